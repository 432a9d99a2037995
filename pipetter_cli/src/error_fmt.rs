//! Human-readable error descriptions and structured JSON error formatting.

use pipetter_core::{BuildError, HardwareError};

/// Stable name of an error kind for JSON consumers.
pub fn reason_name(err: &HardwareError) -> &'static str {
    match err {
        HardwareError::MustHome => "MustHome",
        HardwareError::InstrumentNotAttached { .. } => "InstrumentNotAttached",
        HardwareError::TipAlreadyAttached { .. } => "TipAlreadyAttached",
        HardwareError::NoTipAttached { .. } => "NoTipAttached",
        HardwareError::NotReadyToAspirate { .. } => "NotReadyToAspirate",
        HardwareError::PairedOperationAsymmetry => "PairedOperationAsymmetry",
        HardwareError::AxisTransformShape(_) => "AxisTransformShape",
        HardwareError::ExecutionCancelled => "ExecutionCancelled",
        HardwareError::OutOfBounds { .. } => "OutOfBounds",
        HardwareError::InvalidCriticalPoint { .. } => "InvalidCriticalPoint",
        HardwareError::Precondition(_) => "Precondition",
        HardwareError::VolumeConversion { .. } => "VolumeConversion",
        HardwareError::Calibration(_) => "Calibration",
        HardwareError::UnsupportedHardware(_) => "UnsupportedHardware",
        HardwareError::Backend(_) => "Backend",
        HardwareError::BackendTimeout => "BackendTimeout",
        HardwareError::Config(_) => "Config",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBackend => {
                "What happened: No motion backend was provided to the controller.\nLikely causes: The backend failed to initialize or was not wired into the builder.\nHow to fix: Pass a backend via with_backend(...) before build().".to_string()
            }
            BuildError::BackendInUse => {
                "What happened: The backend is already driven by another controller.\nLikely causes: A previous controller instance is still alive.\nHow to fix: Drop the other controller before building a new one.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the [robot] table.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(he) = err.downcast_ref::<HardwareError>() {
        return match he {
            HardwareError::ExecutionCancelled => {
                "What happened: Execution was cancelled.\nLikely causes: Ctrl-C or a stop request while motion was pending.\nHow to fix: Start a new run; the controller resets on the next start.".to_string()
            }
            HardwareError::MustHome => {
                "What happened: The robot position is unknown.\nLikely causes: The robot was never homed, or a previous move failed.\nHow to fix: Home the robot (`pipetter home`) and retry.".to_string()
            }
            HardwareError::InstrumentNotAttached { mount } => format!(
                "What happened: No instrument on the {mount} mount.\nLikely causes: Wrong --mount, or the simulation table lacks that slot.\nHow to fix: Attach an instrument or add [simulation.{mount}] to the config."
            ),
            HardwareError::TipAlreadyAttached { .. }
            | HardwareError::NoTipAttached { .. }
            | HardwareError::NotReadyToAspirate { .. } => format!(
                "What happened: {he}.\nLikely causes: Liquid-handling steps issued out of order.\nHow to fix: Pick up a tip and prepare the plunger before aspirating."
            ),
            HardwareError::OutOfBounds { .. } => format!(
                "What happened: {he}.\nLikely causes: Target outside the reachable deck, or a large mount offset.\nHow to fix: Choose a reachable target or relax motion.bounds_check."
            ),
            HardwareError::Backend(_) | HardwareError::BackendTimeout => format!(
                "What happened: {he}.\nLikely causes: The motion controller rejected or failed the command.\nHow to fix: Re-run with --log-level=debug and check the controller connection."
            ),
            HardwareError::Config(_) | HardwareError::Calibration(_) => format!(
                "What happened: {he}.\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            _ => format!(
                "What happened: {he}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; anything untyped exits with 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 6;
    }
    match err.downcast_ref::<HardwareError>() {
        Some(HardwareError::ExecutionCancelled) => 2,
        Some(HardwareError::MustHome) => 3,
        Some(
            HardwareError::TipAlreadyAttached { .. }
            | HardwareError::NoTipAttached { .. }
            | HardwareError::NotReadyToAspirate { .. }
            | HardwareError::Precondition(_)
            | HardwareError::VolumeConversion { .. },
        ) => 4,
        Some(HardwareError::Backend(_) | HardwareError::BackendTimeout) => 5,
        Some(HardwareError::Config(_) | HardwareError::Calibration(_)) => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = if let Some(he) = err.downcast_ref::<HardwareError>() {
        reason_name(he)
    } else if err.downcast_ref::<BuildError>().is_some() {
        "Build"
    } else {
        "Error"
    };
    json!({
        "reason": reason,
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetter_traits::Mount;
    use rstest::rstest;

    #[rstest]
    #[case(HardwareError::ExecutionCancelled, 2)]
    #[case(HardwareError::MustHome, 3)]
    #[case(HardwareError::NoTipAttached { mount: Mount::Left }, 4)]
    #[case(HardwareError::Precondition("x".into()), 4)]
    #[case(HardwareError::Backend("boom".into()), 5)]
    #[case(HardwareError::Config("bad".into()), 6)]
    #[case(HardwareError::PairedOperationAsymmetry, 1)]
    fn exit_codes_are_stable(#[case] err: HardwareError, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&eyre::Report::new(err)), code);
    }

    #[test]
    fn context_does_not_hide_the_kind() {
        let err = eyre::Report::new(HardwareError::MustHome).wrap_err("reading position");
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "MustHome");
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("plain failure");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: plain failure"));
    }
}
