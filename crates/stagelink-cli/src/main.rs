//! `stagelink-cli` – the station process.
//!
//! This binary:
//!
//! 1. Installs the log/trace pipeline
//!    ([`init_tracing`][stagelink_runtime::telemetry::init_tracing]).
//! 2. Loads `~/.stagelink/config.toml` (or `STAGELINK_CONFIG`), writing a
//!    default file on first run.
//! 3. Assembles the hardware rig: simulated stage and camera when
//!    `simulate = true`, otherwise an empty rig that reports not-ready.
//! 4. Runs the [`SessionManager`] on a current-thread runtime until
//!    **Ctrl-C**, which drains the session, stops the stage and shuts the
//!    hardware down.

mod config;

use std::sync::Arc;

use colored::Colorize;
use stagelink_hal::sim::{SimCamera, SimEncoder, SimStage};
use stagelink_hal::{HardwareRig, Resolution};
use stagelink_middleware::WsConnector;
use stagelink_runtime::{SessionManager, StationConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() {
    let _tracing = stagelink_runtime::telemetry::init_tracing("stagelink");

    print_banner();

    let cfg = load_config();
    println!(
        "  Station {} → {}",
        cfg.station_id.bold(),
        cfg.server_url.dimmed()
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the stage and closing the session …".yellow().bold());
        shutdown_ctrlc.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let rig = build_rig(&cfg);

    // ── Runtime ───────────────────────────────────────────────────────────
    // One scheduler thread for the manager and its tasks; the blocking pool
    // is sized to the worker count.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(cfg.workers.max(1))
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            println!("{}: {}", "Startup error".red(), e);
            std::process::exit(1);
        }
    };

    let manager = SessionManager::new(cfg, Arc::new(WsConnector), rig);
    runtime.block_on(manager.run(shutdown));

    info!("station stopped");
    println!("{}", "  ✓ Hardware shut down. Exiting stagelink.".green());
}

/// Load the config file, falling back to defaults (plus environment
/// overrides) when it is missing or broken.  A missing file is written out
/// so there is something to edit.
fn load_config() -> StationConfig {
    let path = config::config_path();
    match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = StationConfig::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = StationConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn build_rig(cfg: &StationConfig) -> HardwareRig {
    let resolution = Resolution {
        width: cfg.frames.width,
        height: cfg.frames.height,
    };
    let rig = HardwareRig::new(Arc::new(SimEncoder)).with_resolution(resolution);
    if cfg.simulate {
        println!("  Hardware: {}", "simulated stage and camera".cyan());
        rig.with_stage(Box::new(SimStage::new("sim_stage")))
            .with_camera(Box::new(SimCamera::new("sim_camera")))
    } else {
        println!(
            "  Hardware: {} ({})",
            "no drivers attached".yellow(),
            "set simulate = true to use the simulators".dimmed()
        );
        warn!("no stage or camera driver attached; motion commands will report not-ready");
        rig
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"     _                   _ _       _    "#.bold().cyan());
    println!("{}", r#" ___| |_ __ _  __ _  ___| (_)_ __ | | __"#.bold().cyan());
    println!("{}", r#"/ __| __/ _` |/ _` |/ _ \ | | '_ \| |/ /"#.bold().cyan());
    println!("{}", r#"\__ \ || (_| | (_| |  __/ | | | | |   < "#.bold().cyan());
    println!("{}", r#"|___/\__\__,_|\__, |\___|_|_|_| |_|_|\_\"#.bold().cyan());
    println!("{}", r#"              |___/                     "#.bold().cyan());
    println!();
    println!("  {} {}",
        "stagelink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Stage and camera station client");
    println!();
}
