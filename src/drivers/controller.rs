use std::sync::Arc;
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use crate::config::AcquisitionConfig;
use crate::drivers::event::{DataReadyCallback, DataReadyListeners, ListenerId};
use crate::drivers::source::{create_backend, AcquisitionBackend};
use crate::drivers::{AcquisitionError, SampleBlock, TimestampedBuffer};
/// Interval between delivered blocks unless configured otherwise.
pub const DEFAULT_BLOCK_DURATION_SECONDS: f64 = 1.0;
/// Number of samples per channel in one block of `block_duration_seconds`.
pub fn samples_per_block(
    block_duration_seconds: f64,
    frame_rate: u32,
) -> Result<usize, AcquisitionError> {
    if frame_rate == 0 {
        return Err(AcquisitionError::InvalidFrameRate);
    }
    let samples = (block_duration_seconds * f64::from(frame_rate)).round();
    if !samples.is_finite() || samples < 1.0 {
        return Err(AcquisitionError::InvalidBlockDuration {
            seconds: block_duration_seconds,
            frame_rate,
        });
    }
    Ok(samples as usize)
}
/// `samples` evenly spaced instants starting at `t0`, `dt` apart.
fn block_time_vector(t0: f64, dt: f64, samples: usize) -> Array1<f64> {
    (0..samples).map(|i| t0 + i as f64 * dt).collect()
}
/// Recording state shared with the backend's delivery thread and every [`DataReader`].
///
/// Only stamping and appending happen under this lock; handlers run after it is released.
struct Session {
    buffer: TimestampedBuffer,
    paused: bool,
    num_channels: usize,
    dt: f64,
    samples_per_block: usize,
}
impl Session {
    /// Stamps `raw` so its first sample lands one `dt` after the last recorded one.
    ///
    /// Returns `Ok(None)` when the block was dropped because recording is paused.
    fn on_samples_arrived(
        &mut self,
        raw: Array2<f64>,
    ) -> Result<Option<Arc<SampleBlock>>, AcquisitionError> {
        if self.paused {
            log::trace!("dropping block delivered while paused");
            return Ok(None);
        }
        if raw.nrows() != self.num_channels {
            return Err(AcquisitionError::ChannelMismatch {
                expected: self.num_channels,
                actual: raw.nrows(),
            });
        }
        let t0 = match self.buffer.sample_block_ref(-1)? {
            Some(previous) => previous.end_time().map_or(0.0, |last| last + self.dt),
            None => 0.0,
        };
        let time = block_time_vector(t0, self.dt, self.samples_per_block);
        let block = self.buffer.push(time, raw)?;
        log::debug!(
            "block {} stamped at {:.6}s ({} samples)",
            self.buffer.len() - 1,
            t0,
            block.num_samples()
        );
        Ok(Some(block))
    }
}
/// Data-ready handlers, notified on the backend's delivery thread.
struct Handlers {
    on_data_ready: Option<DataReadyCallback>,
    listeners: DataReadyListeners,
}
impl Handlers {
    fn notify(&mut self, block: &SampleBlock) {
        if let Some(callback) = self.on_data_ready.as_mut() {
            callback(block.time(), block.data());
        }
        self.listeners.notify(block.time(), block.data());
    }
}
/// Cloneable read handle onto a controller's recording, usable from any thread,
/// including from inside data-ready handlers.
#[derive(Clone)]
pub struct DataReader {
    session: Arc<Mutex<Session>>,
}
impl DataReader {
    /// Deep copy of every block recorded so far.
    pub fn data(&self) -> TimestampedBuffer {
        snapshot(&self.session).copy()
    }
    pub fn len(&self) -> usize {
        self.session.lock().buffer.len()
    }
    pub fn is_empty(&self) -> bool {
        self.session.lock().buffer.is_empty()
    }
}
/// Clones the block handles under the lock; the sample data is copied by the caller.
fn snapshot(session: &Mutex<Session>) -> TimestampedBuffer {
    session.lock().buffer.clone()
}
/// Drives one acquisition backend: start/stop lifecycle, per-block timestamps,
/// and delivery of each completed block to the registered handlers.
///
/// Handlers run on the backend's delivery thread, in block order, after the block
/// is visible to readers. They may read the recording through a [`DataReader`] but
/// must not subscribe or unsubscribe from inside a callback.
pub struct AcquisitionController {
    num_channels: usize,
    frame_rate: u32,
    block_duration_seconds: f64,
    samples_per_block: usize,
    is_recording: bool,
    session: Arc<Mutex<Session>>,
    handlers: Arc<Mutex<Handlers>>,
    backend: Option<Box<dyn AcquisitionBackend>>,
}
impl AcquisitionController {
    pub fn new(
        num_channels: usize,
        frame_rate: u32,
        on_data_ready: Option<DataReadyCallback>,
        backend: Box<dyn AcquisitionBackend>,
    ) -> Result<Self, AcquisitionError> {
        Self::with_block_duration(
            num_channels,
            frame_rate,
            DEFAULT_BLOCK_DURATION_SECONDS,
            on_data_ready,
            backend,
        )
    }
    pub fn with_block_duration(
        num_channels: usize,
        frame_rate: u32,
        block_duration_seconds: f64,
        on_data_ready: Option<DataReadyCallback>,
        mut backend: Box<dyn AcquisitionBackend>,
    ) -> Result<Self, AcquisitionError> {
        if num_channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        let samples_per_block = samples_per_block(block_duration_seconds, frame_rate)?;
        let session = Arc::new(Mutex::new(Session {
            buffer: TimestampedBuffer::new(),
            paused: false,
            num_channels,
            dt: 1.0 / f64::from(frame_rate),
            samples_per_block,
        }));
        let handlers = Arc::new(Mutex::new(Handlers {
            on_data_ready,
            listeners: DataReadyListeners::new(),
        }));
        backend.configure(num_channels, frame_rate)?;
        let ingest = Arc::clone(&session);
        let notify = Arc::clone(&handlers);
        backend.register_ready_callback(
            samples_per_block,
            Box::new(move |raw: Array2<f64>| {
                // Held across the append so handlers see blocks in arrival order.
                let mut handlers = notify.lock();
                let appended = ingest.lock().on_samples_arrived(raw);
                match appended {
                    Ok(Some(block)) => {
                        handlers.notify(&block);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(err) => {
                        log::warn!("rejected acquisition block: {err}");
                        Err(err)
                    }
                }
            }),
        )?;
        log::info!(
            "acquisition configured: {num_channels} channels at {frame_rate} Hz, {samples_per_block} samples per block"
        );
        Ok(Self {
            num_channels,
            frame_rate,
            block_duration_seconds,
            samples_per_block,
            is_recording: false,
            session,
            handlers,
            backend: Some(backend),
        })
    }
    /// Validates `config` and builds the backend it names.
    pub fn from_config(
        config: &AcquisitionConfig,
        on_data_ready: Option<DataReadyCallback>,
    ) -> Result<Self, AcquisitionError> {
        config.validate()?;
        let backend = create_backend(&config.backend)?;
        Self::with_block_duration(
            config.num_channels,
            config.frame_rate,
            config.block_duration_seconds,
            on_data_ready,
            backend,
        )
    }
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
    /// Time between consecutive samples, in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.frame_rate)
    }
    pub fn block_duration_seconds(&self) -> f64 {
        self.block_duration_seconds
    }
    pub fn samples_per_block(&self) -> usize {
        self.samples_per_block
    }
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }
    pub fn is_paused(&self) -> bool {
        self.session.lock().paused
    }
    pub fn is_disposed(&self) -> bool {
        self.backend.is_none()
    }
    /// Physical channel addresses, empty once disposed.
    pub fn channel_names(&self) -> Vec<String> {
        self.backend
            .as_ref()
            .map(|backend| (0..self.num_channels).map(|c| backend.channel_name(c)).collect())
            .unwrap_or_default()
    }
    /// Clears the recording and starts the backend.
    pub fn start_recording(&mut self) -> Result<(), AcquisitionError> {
        if self.is_recording {
            return Err(AcquisitionError::AlreadyRecording);
        }
        let backend = self.backend.as_mut().ok_or(AcquisitionError::BackendClosed)?;
        {
            let mut session = self.session.lock();
            session.buffer = TimestampedBuffer::new();
            session.paused = false;
        }
        backend.start()?;
        self.is_recording = true;
        log::info!("recording started");
        Ok(())
    }
    /// Stops the backend; a no-op when not recording.
    pub fn stop_recording(&mut self) -> Result<(), AcquisitionError> {
        if !self.is_recording {
            return Ok(());
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.stop()?;
        }
        self.is_recording = false;
        let blocks = {
            let mut session = self.session.lock();
            session.paused = false;
            session.buffer.len()
        };
        log::info!("recording stopped after {blocks} blocks");
        Ok(())
    }
    /// Drops incoming blocks until [`AcquisitionController::resume_recording`],
    /// keeping what was recorded so far. A no-op when not recording.
    pub fn pause_recording(&mut self) {
        if !self.is_recording {
            return;
        }
        self.session.lock().paused = true;
        log::info!("recording paused");
    }
    /// Accepts blocks again; the next one continues the time axis where the recording left off.
    pub fn resume_recording(&mut self) {
        let mut session = self.session.lock();
        if session.paused {
            session.paused = false;
            log::info!("recording resumed");
        }
    }
    /// Deep copy of the current recording.
    pub fn data(&self) -> TimestampedBuffer {
        snapshot(&self.session).copy()
    }
    pub fn reader(&self) -> DataReader {
        DataReader {
            session: Arc::clone(&self.session),
        }
    }
    /// Adds a handler called after the constructor callback for every new block.
    pub fn subscribe(&self, callback: DataReadyCallback) -> ListenerId {
        self.handlers.lock().listeners.subscribe(callback)
    }
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.handlers.lock().listeners.unsubscribe(id)
    }
    pub fn clear_listeners(&self) {
        self.handlers.lock().listeners.clear();
    }
    /// Stops recording and closes the backend; later calls do nothing.
    ///
    /// The backend is closed even when stopping it fails; the first error is returned.
    pub fn dispose(&mut self) -> Result<(), AcquisitionError> {
        let stopped = self.stop_recording();
        let Some(mut backend) = self.backend.take() else {
            return stopped;
        };
        self.is_recording = false;
        let closed = backend.close();
        log::info!("acquisition backend released");
        stopped.and(closed)
    }
}
impl Drop for AcquisitionController {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::warn!("failed to release acquisition backend: {err}");
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::{ManualBackend, ManualTrigger};
    use ndarray::array;
    use std::sync::mpsc;
    fn manual_controller(
        num_channels: usize,
        frame_rate: u32,
        on_data_ready: Option<DataReadyCallback>,
    ) -> (AcquisitionController, ManualTrigger) {
        let (backend, trigger) = ManualBackend::new();
        let controller =
            AcquisitionController::new(num_channels, frame_rate, on_data_ready, Box::new(backend))
                .unwrap();
        (controller, trigger)
    }
    fn ramp(num_channels: usize, samples: usize, offset: f64) -> Array2<f64> {
        Array2::from_shape_fn((num_channels, samples), |(c, s)| {
            offset + (c * samples + s) as f64
        })
    }
    #[test]
    fn two_blocks_are_stamped_back_to_back() {
        let (mut controller, trigger) = manual_controller(2, 4, None);
        assert_eq!(trigger.samples_per_trigger(), 4);
        controller.start_recording().unwrap();
        trigger.deliver(ramp(2, 4, 0.0)).unwrap();
        trigger.deliver(ramp(2, 4, 100.0)).unwrap();
        let data = controller.data();
        assert_eq!(data.len(), 2);
        let first = data.sample_block(0).unwrap().unwrap();
        let second = data.sample_block(1).unwrap().unwrap();
        assert_eq!(first.time(), &array![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(second.time(), &array![1.0, 1.25, 1.5, 1.75]);
        assert_eq!(second.data(), &ramp(2, 4, 100.0));
    }
    #[test]
    fn time_axis_stays_continuous_over_many_blocks() {
        let (mut controller, trigger) = manual_controller(3, 250, None);
        controller.start_recording().unwrap();
        for i in 0..12 {
            trigger.deliver(ramp(3, 250, i as f64)).unwrap();
        }
        let data = controller.data();
        let dt = controller.dt();
        for pair in data.blocks().windows(2) {
            let gap = pair[1].start_time().unwrap() - pair[0].end_time().unwrap();
            assert!((gap - dt).abs() < 1e-9);
        }
        let time = data.time();
        assert_eq!(time.len(), 12 * 250);
        assert_eq!(time[0], 0.0);
        for (prev, next) in time.iter().zip(time.iter().skip(1)) {
            assert!((next - prev - dt).abs() < 1e-9);
        }
    }
    #[test]
    fn callback_receives_the_stamped_block_once() {
        let (tx, rx) = mpsc::channel();
        let callback: DataReadyCallback = Box::new(move |time: &Array1<f64>, data: &Array2<f64>| {
            tx.send((time.clone(), data.clone())).unwrap();
        });
        let (mut controller, trigger) = manual_controller(2, 8, Some(callback));
        controller.start_recording().unwrap();
        let raw = ramp(2, 8, 0.5);
        trigger.deliver(raw.clone()).unwrap();
        let (time, data) = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(time.len(), 8);
        assert_eq!(time[0], 0.0);
        for (i, t) in time.iter().enumerate() {
            assert!((t - i as f64 * 0.125).abs() < 1e-12);
        }
        assert_eq!(data, raw);
    }
    #[test]
    fn listeners_run_after_the_constructor_callback() {
        let (tx, rx) = mpsc::channel();
        let constructor_tx = tx.clone();
        let (mut controller, trigger) = manual_controller(
            1,
            2,
            Some(Box::new(move |_, _| {
                constructor_tx.send("constructor").unwrap();
            })),
        );
        let id = controller.subscribe(Box::new(move |_, _| {
            tx.send("listener").unwrap();
        }));
        controller.start_recording().unwrap();
        trigger.deliver(array![[1.0, 2.0]]).unwrap();
        assert!(controller.unsubscribe(id));
        trigger.deliver(array![[3.0, 4.0]]).unwrap();
        let order: Vec<&str> = rx.try_iter().collect();
        assert_eq!(order, vec!["constructor", "listener", "constructor"]);
    }
    #[test]
    fn stopping_is_idempotent() {
        let (mut controller, _trigger) = manual_controller(1, 10, None);
        controller.stop_recording().unwrap();
        assert!(!controller.is_recording());
        controller.start_recording().unwrap();
        controller.stop_recording().unwrap();
        controller.stop_recording().unwrap();
        assert!(!controller.is_recording());
    }
    #[test]
    fn second_start_fails_and_keeps_the_recording() {
        let (mut controller, trigger) = manual_controller(1, 2, None);
        controller.start_recording().unwrap();
        trigger.deliver(array![[1.0, 2.0]]).unwrap();
        assert!(matches!(
            controller.start_recording(),
            Err(AcquisitionError::AlreadyRecording)
        ));
        assert!(controller.is_recording());
        assert_eq!(controller.data().len(), 1);
    }
    #[test]
    fn starting_again_resets_the_recording() {
        let (mut controller, trigger) = manual_controller(1, 2, None);
        controller.start_recording().unwrap();
        trigger.deliver(array![[1.0, 2.0]]).unwrap();
        trigger.deliver(array![[3.0, 4.0]]).unwrap();
        controller.stop_recording().unwrap();
        assert!(!trigger.deliver(array![[5.0, 6.0]]).unwrap());
        assert_eq!(controller.data().len(), 2);
        controller.start_recording().unwrap();
        assert!(controller.data().is_empty());
        trigger.deliver(array![[7.0, 8.0]]).unwrap();
        let first = controller.data().sample_block(0).unwrap().unwrap();
        assert_eq!(first.start_time(), Some(0.0));
    }
    #[test]
    fn data_copies_are_isolated() {
        let (mut controller, trigger) = manual_controller(1, 2, None);
        controller.start_recording().unwrap();
        trigger.deliver(array![[1.0, 2.0]]).unwrap();
        let snapshot = controller.data();
        let (_, mut data) = snapshot.sample_block(-1).unwrap().unwrap().into_parts();
        data.fill(0.0);
        drop(snapshot);
        trigger.deliver(array![[3.0, 4.0]]).unwrap();
        let again = controller.data();
        assert_eq!(again.len(), 2);
        assert_eq!(again.sample_block(0).unwrap().unwrap().data(), &array![[1.0, 2.0]]);
    }
    #[test]
    fn malformed_blocks_are_rejected_back_to_the_backend() {
        let (mut controller, trigger) = manual_controller(2, 4, None);
        controller.start_recording().unwrap();
        assert!(matches!(
            trigger.deliver(ramp(2, 3, 0.0)),
            Err(AcquisitionError::ShapeMismatch {
                time_len: 4,
                data_len: 3
            })
        ));
        assert!(matches!(
            trigger.deliver(ramp(3, 4, 0.0)),
            Err(AcquisitionError::ChannelMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(controller.data().is_empty());
        trigger.deliver(ramp(2, 4, 0.0)).unwrap();
        assert_eq!(controller.data().len(), 1);
    }
    #[test]
    fn dispose_closes_the_backend_once() {
        let (mut controller, trigger) = manual_controller(1, 2, None);
        controller.start_recording().unwrap();
        controller.dispose().unwrap();
        assert!(trigger.is_closed());
        assert!(!controller.is_recording());
        assert!(controller.is_disposed());
        controller.dispose().unwrap();
        assert!(controller.channel_names().is_empty());
        assert!(matches!(
            controller.start_recording(),
            Err(AcquisitionError::BackendClosed)
        ));
    }
    #[test]
    fn concurrent_readers_only_see_whole_blocks() {
        const BLOCKS: usize = 50;
        let (mut controller, trigger) = manual_controller(1, 2, None);
        let reader = controller.reader();
        controller.start_recording().unwrap();
        let producer = std::thread::spawn(move || {
            for i in 0..BLOCKS {
                trigger.deliver(array![[i as f64, i as f64]]).unwrap();
            }
        });
        let mut last_len = 0;
        loop {
            let finished = producer.is_finished();
            let data = reader.data();
            assert!(data.len() >= last_len);
            assert!(data.iter().all(|block| block.num_samples() == 2));
            let time = data.time();
            assert_eq!(time.len(), data.len() * 2);
            for (i, t) in time.iter().enumerate() {
                assert_eq!(*t, i as f64 * 0.5);
            }
            last_len = data.len();
            if finished {
                break;
            }
        }
        producer.join().unwrap();
        assert_eq!(last_len, BLOCKS);
        assert_eq!(reader.len(), BLOCKS);
    }
    #[test]
    fn handlers_can_read_the_recording() {
        use std::time::Duration;
        let (mut controller, trigger) = manual_controller(1, 2, None);
        let reader = controller.reader();
        let (tx, rx) = mpsc::channel();
        controller.subscribe(Box::new(move |time: &Array1<f64>, _: &Array2<f64>| {
            let last = reader.data().sample_block(-1).unwrap().map(|block| block.time().clone());
            tx.send((reader.len(), last == Some(time.clone()))).ok();
        }));
        controller.start_recording().unwrap();
        let producer = std::thread::spawn(move || {
            trigger.deliver(array![[1.0, 2.0]]).unwrap();
            trigger.deliver(array![[3.0, 4.0]]).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(3)).unwrap(), (1, true));
        assert_eq!(rx.recv_timeout(Duration::from_secs(3)).unwrap(), (2, true));
        producer.join().unwrap();
    }
    #[test]
    fn paused_recording_drops_blocks_and_keeps_the_buffer() {
        let (tx, rx) = mpsc::channel();
        let callback: DataReadyCallback = Box::new(move |time: &Array1<f64>, _: &Array2<f64>| {
            tx.send(time[0]).unwrap();
        });
        let (mut controller, trigger) = manual_controller(1, 2, Some(callback));
        controller.pause_recording();
        assert!(!controller.is_paused());
        controller.start_recording().unwrap();
        trigger.deliver(array![[1.0, 2.0]]).unwrap();
        controller.pause_recording();
        assert!(controller.is_paused());
        assert!(controller.is_recording());
        trigger.deliver(array![[3.0, 4.0]]).unwrap();
        assert_eq!(controller.data().len(), 1);
        controller.resume_recording();
        assert!(!controller.is_paused());
        trigger.deliver(array![[5.0, 6.0]]).unwrap();
        let data = controller.data();
        assert_eq!(data.len(), 2);
        assert_eq!(data.sample_block(-1).unwrap().unwrap().data(), &array![[5.0, 6.0]]);
        assert_eq!(data.time(), array![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0.0, 1.0]);
        controller.pause_recording();
        controller.stop_recording().unwrap();
        assert!(!controller.is_paused());
    }
    #[test]
    fn rejects_invalid_construction() {
        let (backend, _) = ManualBackend::new();
        assert!(matches!(
            AcquisitionController::new(0, 10, None, Box::new(backend)),
            Err(AcquisitionError::InvalidChannelCount)
        ));
        let (backend, _) = ManualBackend::new();
        assert!(matches!(
            AcquisitionController::new(1, 0, None, Box::new(backend)),
            Err(AcquisitionError::InvalidFrameRate)
        ));
        let (backend, _) = ManualBackend::new();
        assert!(matches!(
            AcquisitionController::with_block_duration(1, 10, 0.01, None, Box::new(backend)),
            Err(AcquisitionError::InvalidBlockDuration { .. })
        ));
    }
    #[test]
    fn simulated_backend_feeds_a_configured_controller() {
        use crate::config::BackendConfig;
        use crate::drivers::SimulationSettings;
        use std::time::Duration;
        let config = AcquisitionConfig {
            num_channels: 2,
            frame_rate: 100,
            block_duration_seconds: 0.1,
            backend: BackendConfig::Simulated(SimulationSettings {
                realtime: false,
                seed: Some(3),
                max_blocks: Some(3),
                ..SimulationSettings::default()
            }),
        };
        let (tx, rx) = mpsc::channel();
        let callback: DataReadyCallback = Box::new(move |time: &Array1<f64>, data: &Array2<f64>| {
            tx.send((time.len(), data.dim())).ok();
        });
        let mut controller = AcquisitionController::from_config(&config, Some(callback)).unwrap();
        assert_eq!(controller.channel_names(), vec!["sim/ai0", "sim/ai1"]);
        controller.start_recording().unwrap();
        for _ in 0..3 {
            let (samples, dim) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(samples, 10);
            assert_eq!(dim, (2, 10));
        }
        controller.stop_recording().unwrap();
        let data = controller.data();
        assert_eq!(data.len(), 3);
        let last = data.sample_block(-1).unwrap().unwrap();
        assert!((last.start_time().unwrap() - 0.2).abs() < 1e-9);
        controller.dispose().unwrap();
    }
    #[test]
    fn block_duration_sets_the_trigger_size() {
        let (backend, trigger) = ManualBackend::new();
        let mut controller =
            AcquisitionController::with_block_duration(1, 100, 0.5, None, Box::new(backend))
                .unwrap();
        assert_eq!(controller.samples_per_block(), 50);
        assert_eq!(trigger.samples_per_trigger(), 50);
        controller.start_recording().unwrap();
        trigger.deliver(Array2::zeros((1, 50))).unwrap();
        trigger.deliver(Array2::zeros((1, 50))).unwrap();
        let second = controller.data().sample_block(-1).unwrap().unwrap();
        assert!((second.start_time().unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(controller.channel_names()[0], "manual/ai0");
    }
}
