//! Last-known machine positions and the lock that serializes motion.
//!
//! Every backend call that moves, homes or probes, together with the store
//! update that follows it, runs while holding the [`MotionLock`]. The store's
//! write methods take a `&MotionGuard` so that a mutation outside the lock is
//! a type error rather than a review finding.

use std::sync::RwLock;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{HardwareError, Result, fail};
use crate::types::{Axis, Position};
use crate::util::{read, write};

/// Single, non-reentrant async lock over motion.
#[derive(Debug, Default)]
pub struct MotionLock {
    inner: Mutex<()>,
}

/// Proof that the motion lock is held.
#[derive(Debug)]
pub struct MotionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MotionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> MotionGuard<'_> {
        MotionGuard {
            _guard: self.inner.lock().await,
        }
    }
}

/// Machine-space positions. An axis missing from the map is not homed.
#[derive(Debug, Default)]
pub struct AxisPositionStore {
    machine: RwLock<Position>,
}

impl AxisPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map, e.g. with the result of a home or refresh.
    pub fn commit(&self, _guard: &MotionGuard<'_>, pos: Position) {
        *write(&self.machine) = pos;
    }

    /// Overwrite only the axes present in `pos`.
    pub fn update(&self, _guard: &MotionGuard<'_>, pos: &Position) {
        let mut m = write(&self.machine);
        for (a, v) in pos {
            m.insert(*a, *v);
        }
    }

    /// Forget everything; the next positional operation must home.
    pub fn clear(&self, _guard: &MotionGuard<'_>) {
        write(&self.machine).clear();
    }

    pub fn snapshot(&self) -> Position {
        read(&self.machine).clone()
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        read(&self.machine).get(&axis).copied()
    }

    pub fn is_homed(&self, axes: &[Axis]) -> bool {
        let m = read(&self.machine);
        axes.iter().all(|a| m.contains_key(a))
    }

    /// Values for `axes`, failing with `MustHome` when any is unknown.
    pub fn require(&self, axes: &[Axis]) -> Result<Position> {
        let m = read(&self.machine);
        let mut out = Position::new();
        for a in axes {
            match m.get(a) {
                Some(v) => {
                    out.insert(*a, *v);
                }
                None => return fail(HardwareError::MustHome),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(pairs: &[(Axis, f64)]) -> Position {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn commit_update_clear() {
        let lock = MotionLock::new();
        let store = AxisPositionStore::new();
        assert!(store.require(&[Axis::X]).is_err());

        let g = lock.acquire().await;
        store.commit(&g, pos(&[(Axis::X, 1.0), (Axis::Y, 2.0), (Axis::Z, 3.0)]));
        store.update(&g, &pos(&[(Axis::Z, 5.0)]));
        assert_eq!(store.get(Axis::Z), Some(5.0));
        assert!(store.is_homed(&[Axis::X, Axis::Y, Axis::Z]));
        assert!(!store.is_homed(&[Axis::A]));

        store.clear(&g);
        let err = store.require(&[Axis::X]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<HardwareError>(),
            Some(&HardwareError::MustHome)
        );
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let lock = MotionLock::new();
        let g = lock.acquire().await;
        let wait = std::time::Duration::from_millis(10);
        assert!(tokio::time::timeout(wait, lock.acquire()).await.is_err());
        drop(g);
        assert!(tokio::time::timeout(wait, lock.acquire()).await.is_ok());
    }
}
