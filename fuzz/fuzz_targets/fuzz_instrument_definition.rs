#![no_main]
use libfuzzer_sys::fuzz_target;
use pipetter_config::InstrumentConfig;

fuzz_target!(|data: &str| {
    // Arbitrary definitions must either be rejected or validate without panicking.
    if let Ok(def) = toml::from_str::<InstrumentConfig>(data) {
        if def.validate().is_ok() {
            let _ = def.needs_reconfiguration(&def);
        }
    }
});
