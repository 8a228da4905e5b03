//! FlowGrid - the interactive audio workstation binary.
//!
//! Takes no arguments: launching rewrites the canonical empty project under
//! `.flowgrid/`, loads `default.fla` when one exists, starts the audio
//! graph, and drains the action queue until stdin closes.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;

use flowgrid_audio::cpal_backend::CpalBackend;
use flowgrid_project::Engine;

/// Frame cadence of the headless main loop.
const FRAME: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "flowgrid", author, version, about = "FlowGrid audio workstation", long_about = None)]
struct Cli {}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let Cli {} = Cli::parse();

    let mut engine = Engine::new(Box::new(CpalBackend::new()));
    engine.launch()?;

    if let Err(err) = engine.graph_mut().start() {
        tracing::warn!(error = %err, "audio not started; running silent");
    }

    // The main loop runs until stdin closes (no UI surface in the CLI
    // build). A reader thread flips the flag on EOF.
    let running = Arc::new(AtomicBool::new(true));
    let reader_flag = Arc::clone(&running);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() {
                break;
            }
        }
        reader_flag.store(false, Ordering::Relaxed);
    });

    tracing::info!("flowgrid running; close stdin to exit");
    while running.load(Ordering::Relaxed) {
        engine.run_queued(false);
        std::thread::sleep(FRAME);
    }

    engine.commit_gesture();
    engine.graph_mut().stop();
    Ok(())
}
