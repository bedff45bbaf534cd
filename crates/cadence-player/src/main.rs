//! Cadence Player - stream-clock demo host
//!
//! Plays a test tone and drives the stream clock from the CPAL callback,
//! while this thread polls the clock and walks through a scripted
//! pause / resume / seek sequence. Run with `RUST_LOG=debug` for the
//! control-loop trace.

mod audio;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use cadence_core::config::load_config;
use cadence_core::StreamClock;

use audio::{start_audio, TransportCommand};
use config::PlayerConfig;

const DEFAULT_CONFIG_PATH: &str = "cadence-player.yaml";

fn main() -> anyhow::Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("cadence-player starting up");

    // Optional `--config <path>` argument
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config: PlayerConfig = load_config(Path::new(&config_path));

    let clock = Arc::new(StreamClock::new());
    let (handle, mut commands) =
        start_audio(&config, clock.clone()).context("starting audio output")?;
    log::info!(
        "Playing a {} Hz tone at {} Hz",
        config.tone_hz,
        handle.sample_rate()
    );

    // Scripted transport demo: the audio callback applies the commands, we
    // only watch the media clock from here.
    for tick in 0..80u32 {
        std::thread::sleep(Duration::from_millis(100));

        let cmd = match tick {
            20 => Some((TransportCommand::Pause, "pausing")),
            35 => Some((TransportCommand::Resume, "resuming")),
            55 => Some((TransportCommand::Seek(60_000_000), "seeking to 60s")),
            _ => None,
        };
        if let Some((cmd, what)) = cmd {
            log::info!("{}", what);
            if commands.send(cmd).is_err() {
                log::warn!("command queue full, dropping {:?}", cmd);
            }
        }

        log::info!("stream position: {:.1} ms", clock.stream_usecs() as f64 / 1000.0);
    }

    if commands.send(TransportCommand::Stop).is_err() {
        log::warn!("command queue full, dropping stop");
    }
    std::thread::sleep(Duration::from_millis(200));
    log::info!("final position: {:.1} ms", clock.stream_usecs() as f64 / 1000.0);

    drop(handle);
    Ok(())
}
