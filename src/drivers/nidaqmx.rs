//! NI-DAQmx backend loaded at runtime from the vendor's C library.
//!
//! The driver library (`nicaiu.dll` on Windows, `libnidaqmx.so` on Linux) is
//! opened lazily on first use so the crate builds and runs without it; only
//! constructing an [`NiDaqmxBackend`] requires the library to be installed.
use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use anyhow::{anyhow, Context, Result};
use libloading::Library;
use ndarray::Array2;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use crate::drivers::source::{AcquisitionBackend, SamplesReadyCallback};
use crate::drivers::AcquisitionError;
#[cfg(windows)]
const DAQMX_LIBRARY: &str = "nicaiu.dll";
#[cfg(not(windows))]
const DAQMX_LIBRARY: &str = "libnidaqmx.so";
const DAQMX_VAL_CFG_DEFAULT: c_int = -1;
const DAQMX_VAL_VOLTS: c_int = 10348;
const DAQMX_VAL_RISING: c_int = 10280;
const DAQMX_VAL_CONT_SAMPS: c_int = 10123;
const DAQMX_VAL_ACQUIRED_INTO_BUFFER: c_int = 1;
const DAQMX_VAL_GROUP_BY_CHANNEL: u32 = 0;
const READ_TIMEOUT_SECONDS: f64 = 10.0;
// Host-side buffer, in blocks, requested from the driver for continuous acquisition.
const HOST_BUFFER_BLOCKS: u64 = 4;
type TaskHandle = *mut c_void;
type EveryNSamplesCallback = unsafe extern "C" fn(TaskHandle, c_int, u32, *mut c_void) -> c_int;
/// How a device family addresses its analog input channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Stand-alone USB/PCIe boards: `Dev1/ai0`, `Dev1/ai1`, ...
    Board { device: String },
    /// CompactDAQ chassis modules: `cDAQ1Mod3/ai0`, ...
    CompactDaq { chassis: String, module: u32 },
    /// One explicit physical channel per configured channel.
    Explicit { channels: Vec<String> },
}
impl DeviceFamily {
    pub fn channel_name(&self, channel: usize) -> String {
        match self {
            DeviceFamily::Board { device } => format!("{device}/ai{channel}"),
            DeviceFamily::CompactDaq { chassis, module } => {
                format!("{chassis}Mod{module}/ai{channel}")
            }
            DeviceFamily::Explicit { channels } => channels.get(channel).cloned().unwrap_or_default(),
        }
    }
    /// Largest channel count this addressing scheme can express, if bounded.
    pub fn max_channels(&self) -> Option<usize> {
        match self {
            DeviceFamily::Explicit { channels } => Some(channels.len()),
            _ => None,
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NiDaqmxSettings {
    pub family: DeviceFamily,
    #[serde(default = "default_min_volts")]
    pub min_volts: f64,
    #[serde(default = "default_max_volts")]
    pub max_volts: f64,
}
fn default_min_volts() -> f64 {
    -10.0
}
fn default_max_volts() -> f64 {
    10.0
}
struct DaqmxApi {
    #[allow(dead_code)]
    lib: Library,
    create_task: unsafe extern "C" fn(*const c_char, *mut TaskHandle) -> c_int,
    create_ai_voltage_chan: unsafe extern "C" fn(
        TaskHandle,
        *const c_char,
        *const c_char,
        c_int,
        f64,
        f64,
        c_int,
        *const c_char,
    ) -> c_int,
    cfg_samp_clk_timing:
        unsafe extern "C" fn(TaskHandle, *const c_char, f64, c_int, c_int, u64) -> c_int,
    register_every_n_samples_event: unsafe extern "C" fn(
        TaskHandle,
        c_int,
        u32,
        u32,
        Option<EveryNSamplesCallback>,
        *mut c_void,
    ) -> c_int,
    start_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    stop_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    clear_task: unsafe extern "C" fn(TaskHandle) -> c_int,
    read_analog_f64: unsafe extern "C" fn(
        TaskHandle,
        c_int,
        f64,
        u32,
        *mut f64,
        u32,
        *mut c_int,
        *mut u32,
    ) -> c_int,
    get_extended_error_info: unsafe extern "C" fn(*mut c_char, u32) -> c_int,
}
impl DaqmxApi {
    fn load() -> Result<Self> {
        let lib = unsafe { Library::new(DAQMX_LIBRARY) }
            .with_context(|| format!("{DAQMX_LIBRARY} not found; is NI-DAQmx installed?"))?;
        // Safety: signatures follow the NI-DAQmx C reference (NIDAQmx.h).
        unsafe {
            Ok(Self {
                create_task: *lib.get(b"DAQmxCreateTask\0")?,
                create_ai_voltage_chan: *lib.get(b"DAQmxCreateAIVoltageChan\0")?,
                cfg_samp_clk_timing: *lib.get(b"DAQmxCfgSampClkTiming\0")?,
                register_every_n_samples_event: *lib.get(b"DAQmxRegisterEveryNSamplesEvent\0")?,
                start_task: *lib.get(b"DAQmxStartTask\0")?,
                stop_task: *lib.get(b"DAQmxStopTask\0")?,
                clear_task: *lib.get(b"DAQmxClearTask\0")?,
                read_analog_f64: *lib.get(b"DAQmxReadAnalogF64\0")?,
                get_extended_error_info: *lib.get(b"DAQmxGetExtendedErrorInfo\0")?,
                lib,
            })
        }
    }
    fn instance() -> Result<&'static DaqmxApi> {
        static API: OnceCell<DaqmxApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
    /// Negative codes are errors; positive codes are warnings and pass.
    fn check(&self, code: c_int, ctx: &str) -> Result<()> {
        if code >= 0 {
            return Ok(());
        }
        let mut message = vec![0 as c_char; 2048];
        let len = message.len() as u32;
        unsafe { (self.get_extended_error_info)(message.as_mut_ptr(), len) };
        let bytes: Vec<u8> = message
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        Err(anyhow!(
            "{ctx} failed (DAQmx code {code}): {}",
            String::from_utf8_lossy(&bytes)
        ))
    }
    fn read_block(
        &self,
        task: TaskHandle,
        channel_count: usize,
        samples_per_channel: usize,
    ) -> Result<Array2<f64>> {
        let mut buffer = vec![0.0f64; channel_count * samples_per_channel];
        let mut read: c_int = 0;
        self.check(
            unsafe {
                (self.read_analog_f64)(
                    task,
                    samples_per_channel as c_int,
                    READ_TIMEOUT_SECONDS,
                    DAQMX_VAL_GROUP_BY_CHANNEL,
                    buffer.as_mut_ptr(),
                    buffer.len() as u32,
                    &mut read as *mut c_int,
                    ptr::null_mut(),
                )
            },
            "DAQmxReadAnalogF64",
        )?;
        if read.max(0) as usize != samples_per_channel {
            return Err(anyhow!(
                "short read: {read} of {samples_per_channel} samples per channel"
            ));
        }
        // Grouped by channel: every sample of channel 0, then channel 1, ...
        Ok(Array2::from_shape_vec((channel_count, samples_per_channel), buffer)?)
    }
}
struct Task(TaskHandle);
// The handle is an opaque token; DAQmx calls on it are thread-safe.
unsafe impl Send for Task {}
/// State reachable from the driver's every-N-samples event.
struct EventContext {
    api: &'static DaqmxApi,
    task: TaskHandle,
    channel_count: usize,
    samples_per_trigger: usize,
    callback: SamplesReadyCallback,
}
unsafe impl Send for EventContext {}
impl EventContext {
    fn read_and_forward(&mut self) -> Result<(), AcquisitionError> {
        let raw = self
            .api
            .read_block(self.task, self.channel_count, self.samples_per_trigger)?;
        (self.callback)(raw)
    }
}
unsafe extern "C" fn on_every_n_samples(
    _task: TaskHandle,
    _event_type: c_int,
    _n_samples: u32,
    callback_data: *mut c_void,
) -> c_int {
    if callback_data.is_null() {
        return -1;
    }
    // Safety: `callback_data` is the boxed EventContext owned by the backend,
    // which outlives the task (the task is cleared before the box is dropped).
    let context = unsafe { &mut *(callback_data as *mut EventContext) };
    match panic::catch_unwind(AssertUnwindSafe(|| context.read_and_forward())) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            log::error!("DAQmx block rejected: {err}");
            -1
        }
        Err(_) => {
            log::error!("panic while handling DAQmx samples");
            -1
        }
    }
}
/// Continuous analog-input voltage acquisition through NI-DAQmx.
pub struct NiDaqmxBackend {
    api: &'static DaqmxApi,
    settings: NiDaqmxSettings,
    task: Option<Task>,
    channel_count: usize,
    context: Option<Box<EventContext>>,
}
impl NiDaqmxBackend {
    pub fn new(settings: NiDaqmxSettings) -> Result<Self, AcquisitionError> {
        let api = DaqmxApi::instance()?;
        Ok(Self {
            api,
            settings,
            task: None,
            channel_count: 0,
            context: None,
        })
    }
    fn task(&self) -> Result<TaskHandle, AcquisitionError> {
        self.task
            .as_ref()
            .map(|task| task.0)
            .ok_or(AcquisitionError::BackendClosed)
    }
}
impl AcquisitionBackend for NiDaqmxBackend {
    fn configure(&mut self, channel_count: usize, frame_rate: u32) -> Result<(), AcquisitionError> {
        if let Some(max) = self.settings.family.max_channels() {
            if channel_count > max {
                return Err(AcquisitionError::ChannelMismatch {
                    expected: max,
                    actual: channel_count,
                });
            }
        }
        let mut handle: TaskHandle = ptr::null_mut();
        let name = CString::new("").context("task name")?;
        self.api.check(
            unsafe { (self.api.create_task)(name.as_ptr(), &mut handle as *mut TaskHandle) },
            "DAQmxCreateTask",
        )?;
        self.task = Some(Task(handle));
        for channel in 0..channel_count {
            let physical = CString::new(self.channel_name(channel))
                .context("channel name contains a NUL byte")?;
            self.api.check(
                unsafe {
                    (self.api.create_ai_voltage_chan)(
                        handle,
                        physical.as_ptr(),
                        name.as_ptr(),
                        DAQMX_VAL_CFG_DEFAULT,
                        self.settings.min_volts,
                        self.settings.max_volts,
                        DAQMX_VAL_VOLTS,
                        ptr::null(),
                    )
                },
                "DAQmxCreateAIVoltageChan",
            )?;
        }
        self.api.check(
            unsafe {
                (self.api.cfg_samp_clk_timing)(
                    handle,
                    ptr::null(),
                    f64::from(frame_rate),
                    DAQMX_VAL_RISING,
                    DAQMX_VAL_CONT_SAMPS,
                    u64::from(frame_rate) * HOST_BUFFER_BLOCKS,
                )
            },
            "DAQmxCfgSampClkTiming",
        )?;
        self.channel_count = channel_count;
        log::info!(
            "DAQmx task configured: {channel_count} channels at {frame_rate} Hz ({})",
            self.channel_name(0)
        );
        Ok(())
    }
    fn register_ready_callback(
        &mut self,
        samples_per_trigger: usize,
        callback: SamplesReadyCallback,
    ) -> Result<(), AcquisitionError> {
        let task = self.task()?;
        let mut context = Box::new(EventContext {
            api: self.api,
            task,
            channel_count: self.channel_count,
            samples_per_trigger,
            callback,
        });
        let data = &mut *context as *mut EventContext as *mut c_void;
        self.api.check(
            unsafe {
                (self.api.register_every_n_samples_event)(
                    task,
                    DAQMX_VAL_ACQUIRED_INTO_BUFFER,
                    samples_per_trigger as u32,
                    0,
                    Some(on_every_n_samples),
                    data,
                )
            },
            "DAQmxRegisterEveryNSamplesEvent",
        )?;
        self.context = Some(context);
        Ok(())
    }
    fn start(&mut self) -> Result<(), AcquisitionError> {
        let task = self.task()?;
        self.api
            .check(unsafe { (self.api.start_task)(task) }, "DAQmxStartTask")?;
        Ok(())
    }
    fn stop(&mut self) -> Result<(), AcquisitionError> {
        let task = self.task()?;
        self.api
            .check(unsafe { (self.api.stop_task)(task) }, "DAQmxStopTask")?;
        Ok(())
    }
    fn close(&mut self) -> Result<(), AcquisitionError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let cleared = self
            .api
            .check(unsafe { (self.api.clear_task)(task.0) }, "DAQmxClearTask");
        self.context = None;
        cleared?;
        Ok(())
    }
    fn read_block(&mut self, samples_per_channel: usize) -> Result<Array2<f64>, AcquisitionError> {
        let task = self.task()?;
        Ok(self
            .api
            .read_block(task, self.channel_count, samples_per_channel)?)
    }
    fn channel_name(&self, channel: usize) -> String {
        self.settings.family.channel_name(channel)
    }
}
impl Drop for NiDaqmxBackend {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to clear DAQmx task: {err}");
        }
    }
}
