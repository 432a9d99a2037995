mod check;
mod cli;
mod error_fmt;
mod logging;

use clap::Parser;
use cli::{Cli, Commands, JSON_MODE};
use eyre::{Result, WrapErr};
use pipetter_config::Config;
use pipetter_core::{HardwareApi, HardwareError, Report};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Weak};

/// Simulated robot used when no `--config` is given.
const DEFAULT_SIM_CONFIG: &str = r#"
[simulation.left]
model = "p300_single_v2.1"
id = "SIM-P300-L"
"#;

fn config_error(e: impl std::fmt::Display) -> Report {
    Report::new(HardwareError::Config(e.to_string()))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let text = match path {
        Some(p) => std::fs::read_to_string(p)
            .map_err(config_error)
            .wrap_err_with(|| format!("reading config {}", p.display()))?,
        None => DEFAULT_SIM_CONFIG.to_string(),
    };
    let cfg = pipetter_config::load_toml(&text).map_err(config_error)?;
    cfg.validate().map_err(config_error)?;
    Ok(cfg)
}

/// Ctrl-C cancels pending motion; the handler holds a weak handle so the
/// controller can still be dropped normally.
fn install_ctrlc(api: &Arc<HardwareApi>) {
    let weak: Weak<HardwareApi> = Arc::downgrade(api);
    let res = ctrlc::set_handler(move || {
        if let Some(api) = weak.upgrade() {
            tracing::warn!("interrupt received; cancelling execution");
            api.execution_gate().cancel();
        }
    });
    if let Err(e) = res {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }
}

async fn run_command(api: &HardwareApi, cmd: Commands) -> Result<(Value, Option<String>)> {
    match cmd {
        Commands::SelfCheck {
            mount,
            volume,
            tip_length,
            print_runtime,
        } => {
            let out = check::self_check(api, mount.into(), volume, tip_length).await?;
            let runtime = print_runtime.then(|| format!("runtime: {} ms", out["elapsed_ms"]));
            Ok((out, runtime))
        }
        Commands::Home { mount } => Ok((check::home(api, mount.into()).await?, None)),
        Commands::Instruments => Ok((check::instruments(api), None)),
        Commands::Health => Ok((check::health(api), None)),
    }
}

fn print_human(out: &Value) {
    if let Some(obj) = out.as_object() {
        for (k, v) in obj {
            println!("{k}: {v}");
        }
    } else {
        println!("{out}");
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    logging::init(cli.json, cli.log_level.as_deref(), &cfg.logging);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .wrap_err("starting async runtime")?;
    rt.block_on(async move {
        let api = Arc::new(HardwareApi::build_simulator(&cfg).await?);
        install_ctrlc(&api);

        let result = run_command(&api, cli.cmd).await;
        if let Err(e) = api.clean_up().await {
            tracing::warn!(error = %e, "backend clean-up failed");
        }
        let (out, runtime) = result?;
        if cli.json {
            println!("{out}");
        } else {
            print_human(&out);
        }
        if let Some(line) = runtime {
            println!("{line}");
        }
        Ok(())
    })
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("color-eyre install failed: {e}");
    }

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", error_fmt::format_error_json(&e));
            } else {
                tracing::error!(error = ?e, "command failed");
                eprintln!("{}", error_fmt::humanize(&e));
            }
            error_fmt::exit_code_for_error(&e)
        }
    };
    logging::shutdown();
    std::process::exit(code);
}
