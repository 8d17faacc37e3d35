use std::collections::VecDeque;
use std::sync::Arc;
use ndarray::Array2;
use parking_lot::Mutex;
use crate::config::BackendConfig;
use crate::drivers::nidaqmx::NiDaqmxBackend;
use crate::drivers::simulated::SimulatedBackend;
use crate::drivers::AcquisitionError;
/// Called by a backend each time `samples_per_trigger` samples per channel are ready.
pub type SamplesReadyCallback = Box<dyn FnMut(Array2<f64>) -> Result<(), AcquisitionError> + Send>;
/// Device driver seam: configures channels and a sample clock, then pushes
/// fixed-size blocks of raw voltages (channels x samples) into a registered callback.
///
/// Backends must serialize callback invocations and deliver exactly the
/// registered number of samples per channel each time, in configuration channel order.
pub trait AcquisitionBackend: Send {
    fn configure(&mut self, channel_count: usize, frame_rate: u32) -> Result<(), AcquisitionError>;
    fn register_ready_callback(
        &mut self,
        samples_per_trigger: usize,
        callback: SamplesReadyCallback,
    ) -> Result<(), AcquisitionError>;
    fn start(&mut self) -> Result<(), AcquisitionError>;
    fn stop(&mut self) -> Result<(), AcquisitionError>;
    /// Releases the device. Called at most once by the owning controller.
    fn close(&mut self) -> Result<(), AcquisitionError>;
    fn read_block(&mut self, samples_per_channel: usize) -> Result<Array2<f64>, AcquisitionError>;
    /// Device-specific physical address of a channel.
    fn channel_name(&self, channel: usize) -> String;
}
/// Builds the backend described by `config`.
pub fn create_backend(config: &BackendConfig) -> Result<Box<dyn AcquisitionBackend>, AcquisitionError> {
    let backend: Box<dyn AcquisitionBackend> = match config {
        BackendConfig::Simulated(settings) => Box::new(SimulatedBackend::new(settings.clone())),
        BackendConfig::Nidaqmx(settings) => Box::new(NiDaqmxBackend::new(settings.clone())?),
    };
    Ok(backend)
}
#[derive(Default)]
struct ManualState {
    channel_count: usize,
    samples_per_trigger: usize,
    pending: VecDeque<Array2<f64>>,
    running: bool,
    closed: bool,
}
type SharedCallback = Arc<Mutex<Option<SamplesReadyCallback>>>;
/// In-memory backend useful for tests and deterministic playback.
///
/// Raw blocks are pushed through the paired [`ManualTrigger`], which invokes the
/// registered callback synchronously on the calling thread.
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
    callback: SharedCallback,
}
/// Producer side of a [`ManualBackend`]. Clones may deliver from several threads;
/// deliveries are serialized.
#[derive(Clone)]
pub struct ManualTrigger {
    state: Arc<Mutex<ManualState>>,
    callback: SharedCallback,
}
impl ManualBackend {
    pub fn new() -> (Self, ManualTrigger) {
        Self::with_blocks(std::iter::empty())
    }
    /// Backend whose `read_block` replays `blocks` in order.
    pub fn with_blocks(blocks: impl IntoIterator<Item = Array2<f64>>) -> (Self, ManualTrigger) {
        let state = Arc::new(Mutex::new(ManualState {
            pending: blocks.into_iter().collect(),
            ..ManualState::default()
        }));
        let callback: SharedCallback = Arc::new(Mutex::new(None));
        (
            Self {
                state: Arc::clone(&state),
                callback: Arc::clone(&callback),
            },
            ManualTrigger { state, callback },
        )
    }
}
impl ManualTrigger {
    /// Hands `raw` to the registered callback.
    ///
    /// Returns `Ok(false)` and drops the block when the backend is not running.
    pub fn deliver(&self, raw: Array2<f64>) -> Result<bool, AcquisitionError> {
        let mut callback = self.callback.lock();
        {
            let state = self.state.lock();
            if state.closed {
                return Err(AcquisitionError::BackendClosed);
            }
            if !state.running {
                return Ok(false);
            }
        }
        match callback.as_mut() {
            Some(callback) => callback(raw).map(|()| true),
            None => Ok(false),
        }
    }
    /// Delivers every queued block; returns how many reached the callback.
    pub fn deliver_pending(&self) -> Result<usize, AcquisitionError> {
        let mut delivered = 0;
        loop {
            let next = self.state.lock().pending.pop_front();
            let Some(raw) = next else {
                return Ok(delivered);
            };
            if self.deliver(raw)? {
                delivered += 1;
            }
        }
    }
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
    /// Samples per channel the consumer asked for on registration.
    pub fn samples_per_trigger(&self) -> usize {
        self.state.lock().samples_per_trigger
    }
}
impl AcquisitionBackend for ManualBackend {
    fn configure(&mut self, channel_count: usize, _frame_rate: u32) -> Result<(), AcquisitionError> {
        self.state.lock().channel_count = channel_count;
        Ok(())
    }
    fn register_ready_callback(
        &mut self,
        samples_per_trigger: usize,
        callback: SamplesReadyCallback,
    ) -> Result<(), AcquisitionError> {
        self.state.lock().samples_per_trigger = samples_per_trigger;
        *self.callback.lock() = Some(callback);
        Ok(())
    }
    fn start(&mut self) -> Result<(), AcquisitionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AcquisitionError::BackendClosed);
        }
        state.running = true;
        Ok(())
    }
    fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.state.lock().running = false;
        Ok(())
    }
    fn close(&mut self) -> Result<(), AcquisitionError> {
        {
            let mut state = self.state.lock();
            state.running = false;
            state.closed = true;
        }
        self.callback.lock().take();
        Ok(())
    }
    fn read_block(&mut self, samples_per_channel: usize) -> Result<Array2<f64>, AcquisitionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AcquisitionError::BackendClosed);
        }
        let channel_count = state.channel_count;
        Ok(state
            .pending
            .pop_front()
            .unwrap_or_else(|| Array2::zeros((channel_count, samples_per_channel))))
    }
    fn channel_name(&self, channel: usize) -> String {
        format!("manual/ai{channel}")
    }
}
