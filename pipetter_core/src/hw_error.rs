//! Maps `Box<dyn Error>` from trait boundaries to typed `HardwareError`.
//!
//! The traits in `pipetter_traits` use `Box<dyn Error + Send + Sync>` for
//! maximum flexibility; this module converts those to our typed error enum,
//! with an optional feature-gated path for `pipetter_hardware::HwError`
//! downcasting.

use crate::error::HardwareError;

/// Map a trait-boundary error to a typed `HardwareError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_backend_error(e: &(dyn std::error::Error + 'static)) -> HardwareError {
    // Feature-gated: try to downcast to HwError for precise mapping
    #[cfg(feature = "hardware-errors")]
    {
        use pipetter_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => HardwareError::BackendTimeout,
                HwError::UnknownAxis(a) => {
                    HardwareError::Config(format!("backend does not know axis {a}"))
                }
                other => HardwareError::Backend(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        HardwareError::BackendTimeout
    } else {
        HardwareError::Backend(s)
    }
}

/// Convert a boxed boundary error into a report carrying the typed kind plus context.
pub fn backend_report(e: pipetter_traits::BoxError, context: &'static str) -> eyre::Report {
    let kind = map_backend_error(e.as_ref());
    eyre::Report::new(kind).wrap_err(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain(&'static str);
    impl std::fmt::Display for Plain {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }
    impl std::error::Error for Plain {}

    #[test]
    fn string_fallback() {
        assert_eq!(
            map_backend_error(&Plain("serial Timeout after 2s")),
            HardwareError::BackendTimeout
        );
        assert_eq!(
            map_backend_error(&Plain("limit switch hit")),
            HardwareError::Backend("limit switch hit".into())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_hw_errors() {
        use pipetter_hardware::error::HwError;
        assert_eq!(map_backend_error(&HwError::Timeout), HardwareError::BackendTimeout);
        assert!(matches!(
            map_backend_error(&HwError::MotionFault("stall".into())),
            HardwareError::Backend(_)
        ));
    }

    #[test]
    fn report_keeps_kind_under_context() {
        let boxed: pipetter_traits::BoxError = Box::new(Plain("bus fault"));
        let r = backend_report(boxed, "move failed");
        assert!(matches!(
            r.downcast_ref::<HardwareError>(),
            Some(HardwareError::Backend(_))
        ));
        assert_eq!(r.to_string(), "move failed");
    }
}
