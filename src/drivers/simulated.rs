use std::f64::consts::TAU;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use ndarray::Array2;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::drivers::source::{AcquisitionBackend, SamplesReadyCallback};
use crate::drivers::AcquisitionError;
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Peak amplitude of the per-channel sine, in volts.
    pub amplitude_volts: f64,
    /// Half-width of the uniform noise added to every sample, in volts.
    pub noise_volts: f64,
    /// Pace blocks at the sample clock; otherwise emit them back to back.
    pub realtime: bool,
    pub seed: Option<u64>,
    /// Stop generating after this many blocks.
    pub max_blocks: Option<usize>,
}
impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            amplitude_volts: 1.0,
            noise_volts: 0.05,
            realtime: true,
            seed: None,
            max_blocks: None,
        }
    }
}
/// Channel `c` carries a `(c + 1)` Hz sine plus uniform noise; phase carries across blocks.
struct SignalGenerator {
    channel_count: usize,
    frame_rate: u32,
    amplitude: f64,
    noise: f64,
    rng: StdRng,
    sample_index: u64,
}
impl SignalGenerator {
    fn new(settings: &SimulationSettings, channel_count: usize, frame_rate: u32) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            channel_count,
            frame_rate,
            amplitude: settings.amplitude_volts,
            noise: settings.noise_volts.abs(),
            rng,
            sample_index: 0,
        }
    }
    fn next_block(&mut self, samples_per_channel: usize) -> Array2<f64> {
        let start = self.sample_index;
        let rate = f64::from(self.frame_rate.max(1));
        let mut block = Array2::zeros((self.channel_count, samples_per_channel));
        for ((channel, sample), value) in block.indexed_iter_mut() {
            let t = (start + sample as u64) as f64 / rate;
            let freq = (channel + 1) as f64;
            *value = self.amplitude * (TAU * freq * t).sin()
                + self.rng.gen_range(-self.noise..=self.noise);
        }
        self.sample_index += samples_per_channel as u64;
        block
    }
}
/// Software stand-in for a DAQ device: a worker thread synthesises one block per trigger.
pub struct SimulatedBackend {
    settings: SimulationSettings,
    channel_count: usize,
    frame_rate: u32,
    samples_per_trigger: usize,
    generator: Option<Arc<Mutex<SignalGenerator>>>,
    callback: Arc<Mutex<Option<SamplesReadyCallback>>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}
impl SimulatedBackend {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            channel_count: 0,
            frame_rate: 0,
            samples_per_trigger: 0,
            generator: None,
            callback: Arc::new(Mutex::new(None)),
            stop_tx: None,
            worker: None,
            closed: false,
        }
    }
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
    fn generator(&self) -> Result<Arc<Mutex<SignalGenerator>>, AcquisitionError> {
        self.generator.clone().ok_or_else(|| {
            AcquisitionError::Backend(anyhow::anyhow!(
                "simulated backend used before configure()"
            ))
        })
    }
    fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_trigger as f64 / f64::from(self.frame_rate.max(1)))
    }
}
impl AcquisitionBackend for SimulatedBackend {
    fn configure(&mut self, channel_count: usize, frame_rate: u32) -> Result<(), AcquisitionError> {
        self.channel_count = channel_count;
        self.frame_rate = frame_rate;
        self.generator = Some(Arc::new(Mutex::new(SignalGenerator::new(
            &self.settings,
            channel_count,
            frame_rate,
        ))));
        log::debug!("simulated backend configured: {channel_count} channels at {frame_rate} Hz");
        Ok(())
    }
    fn register_ready_callback(
        &mut self,
        samples_per_trigger: usize,
        callback: SamplesReadyCallback,
    ) -> Result<(), AcquisitionError> {
        self.samples_per_trigger = samples_per_trigger;
        *self.callback.lock() = Some(callback);
        Ok(())
    }
    fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.closed {
            return Err(AcquisitionError::BackendClosed);
        }
        if self.worker.is_some() {
            return Ok(());
        }
        let generator = self.generator()?;
        let callback = Arc::clone(&self.callback);
        let samples = self.samples_per_trigger;
        let period = self.block_period();
        let realtime = self.settings.realtime;
        let max_blocks = self.settings.max_blocks;
        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("daq-simulated".into())
            .spawn(move || {
                let started = Instant::now();
                let mut emitted = 0usize;
                loop {
                    if max_blocks.is_some_and(|max| emitted >= max) {
                        break;
                    }
                    let wait = if realtime {
                        let deadline = started + period * (emitted as u32 + 1);
                        deadline.saturating_duration_since(Instant::now())
                    } else {
                        Duration::ZERO
                    };
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let block = generator.lock().next_block(samples);
                    if let Some(callback) = callback.lock().as_mut() {
                        if let Err(err) = callback(block) {
                            log::error!("simulated block rejected by consumer: {err}");
                        }
                    }
                    emitted += 1;
                }
                log::debug!("simulated acquisition worker exiting after {emitted} blocks");
            })
            .map_err(|err| AcquisitionError::Backend(err.into()))?;
        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }
    fn stop(&mut self) -> Result<(), AcquisitionError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("simulated acquisition worker panicked"))?;
        }
        Ok(())
    }
    fn close(&mut self) -> Result<(), AcquisitionError> {
        self.stop()?;
        self.callback.lock().take();
        self.closed = true;
        Ok(())
    }
    fn read_block(&mut self, samples_per_channel: usize) -> Result<Array2<f64>, AcquisitionError> {
        if self.closed {
            return Err(AcquisitionError::BackendClosed);
        }
        let generator = self.generator()?;
        let block = generator.lock().next_block(samples_per_channel);
        Ok(block)
    }
    fn channel_name(&self, channel: usize) -> String {
        format!("sim/ai{channel}")
    }
}
impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    fn fast_settings(max_blocks: usize) -> SimulationSettings {
        SimulationSettings {
            realtime: false,
            seed: Some(7),
            max_blocks: Some(max_blocks),
            ..SimulationSettings::default()
        }
    }
    #[test]
    fn worker_emits_configured_block_shape() {
        let mut backend = SimulatedBackend::new(fast_settings(3));
        let (tx, rx) = mpsc::channel();
        backend.configure(3, 100).unwrap();
        backend
            .register_ready_callback(
                50,
                Box::new(move |raw: Array2<f64>| {
                    tx.send(raw.dim()).ok();
                    Ok(())
                }),
            )
            .unwrap();
        backend.start().unwrap();
        for _ in 0..3 {
            let dim = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(dim, (3, 50));
        }
        backend.stop().unwrap();
        assert!(!backend.is_running());
        backend.close().unwrap();
        assert!(matches!(backend.start(), Err(AcquisitionError::BackendClosed)));
    }
    #[test]
    fn noiseless_signal_is_phase_continuous() {
        let settings = SimulationSettings {
            noise_volts: 0.0,
            ..fast_settings(0)
        };
        let mut backend = SimulatedBackend::new(settings);
        backend.configure(1, 8).unwrap();
        let first = backend.read_block(4).unwrap();
        let second = backend.read_block(4).unwrap();
        // 1 Hz at 8 Hz sampling: sample 2 and sample 6 are the two peaks
        assert!((first[[0, 2]] - 1.0).abs() < 1e-9);
        assert!((second[[0, 2]] + 1.0).abs() < 1e-9);
    }
}
