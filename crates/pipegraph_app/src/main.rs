// SPDX-License-Identifier: MIT OR Apache-2.0
//! `pipegraph` - render pipeline frame driver
//!
//! Loads a pipeline configuration (RON), builds the post-processing graph,
//! optimizes it once and evaluates a fixed number of frames against the
//! headless backend.
//!
//! ```text
//! pipegraph [CONFIG.ron]
//! pipegraph --print-config
//! ```

mod pipeline;

use pipegraph_core::PipelineConfig;
use pipeline::PipelineError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,pipegraph_core=debug,pipegraph_app=debug")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pipegraph v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(std::env::args().nth(1)) {
        tracing::error!("pipegraph failed: {e}");
        std::process::exit(1);
    }
}

fn run(arg: Option<String>) -> Result<(), PipelineError> {
    let config = match arg.as_deref() {
        Some("--print-config") => {
            println!("{}", PipelineConfig::default().to_ron()?);
            return Ok(());
        }
        Some(path) => {
            tracing::info!(path, "loading configuration");
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };

    let summary = pipeline::run(&config)?;
    for rewrite in &summary.report.rewrites {
        tracing::info!(
            pass = %rewrite.pass,
            removed = ?rewrite.removed,
            inserted = %rewrite.inserted,
            "rewrite"
        );
    }
    tracing::info!(
        frames = summary.frames,
        nodes = summary.nodes,
        draws = summary.draws,
        programs = summary.programs,
        "done"
    );
    Ok(())
}
