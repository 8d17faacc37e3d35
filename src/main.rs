// src/main.rs
use std::sync::mpsc;
use std::time::Duration;
use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use daqstream::{AcquisitionConfig, AcquisitionController, DataReadyCallback};
const CONFIG_ENV: &str = "DAQSTREAM_CONFIG";
const DEMO_BLOCKS: usize = 5;
struct BlockSummary {
    start: f64,
    end: f64,
    channel_rms: Vec<f64>,
}
fn load_config() -> Result<AcquisitionConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => AcquisitionConfig::from_json_file(&path)
            .with_context(|| format!("failed to load {}", path.to_string_lossy())),
        None => Ok(AcquisitionConfig::default()),
    }
}
// 入口函数
fn main() -> Result<()> {
    env_logger::init();
    let config = load_config()?;
    log::info!("using configuration: {config:?}");
    let (tx, rx) = mpsc::channel();
    let on_data_ready: DataReadyCallback = Box::new(move |time: &Array1<f64>, data: &Array2<f64>| {
        let channel_rms = data
            .rows()
            .into_iter()
            .map(|row| (row.mapv(|v| v * v).mean().unwrap_or(0.0)).sqrt())
            .collect();
        let summary = BlockSummary {
            start: time.get(0).copied().unwrap_or_default(),
            end: time.iter().copied().fold(f64::MIN, f64::max),
            channel_rms,
        };
        // The receiver is gone once the demo has seen enough blocks.
        let _ = tx.send(summary);
    });
    let mut controller = AcquisitionController::from_config(&config, Some(on_data_ready))?;
    log::info!("channels: {}", controller.channel_names().join(", "));
    let wait = Duration::from_secs_f64(controller.block_duration_seconds() * 2.0 + 1.0);
    controller.start_recording()?;
    for _ in 0..DEMO_BLOCKS {
        let summary = rx
            .recv_timeout(wait)
            .context("timed out waiting for the next block")?;
        log::info!(
            "block {:.3}s..{:.3}s rms per channel: {:?}",
            summary.start,
            summary.end,
            summary.channel_rms
        );
    }
    controller.stop_recording()?;
    let data = controller.data();
    log::info!(
        "recorded {} blocks, {} samples per channel",
        data.len(),
        data.total_samples()
    );
    controller.dispose()?;
    Ok(())
}
