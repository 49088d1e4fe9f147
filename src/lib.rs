//! shotmark: snip the viewport or a dragged region, annotate it, export it.
//!
//! Wiring:
//! - Capture coordinator (capture/) on its own task, fed through an inbox
//! - Region selector hosted per page (selector.rs)
//! - Handoff store + UI bus for getting results to surfaces (handoff/, messaging.rs)
//! - Annotation engine and export (editor/, export.rs) behind a UI surface (surface.rs)

pub mod capture;
pub mod cli;
pub mod config;
pub mod editor;
pub mod error;
pub mod export;
pub mod handoff;
pub mod messaging;
pub mod selector;
pub mod surface;

use clap::Parser;

/// Entry point: called by the `shotmark` binary.
pub fn run() {
    env_logger::init();

    let cli = cli::Cli::parse();
    let outcome = config::Config::from_env()
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|config| {
            log::info!("shotmark starting (store: {})", config.store_path.display());
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(cli::execute(cli, config))
        });

    if let Err(e) = outcome {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
