// src/drivers/mod.rs
pub mod buffer;
pub mod controller;
pub mod devices;
pub mod error;
pub mod event;
pub mod nidaqmx;
pub mod simulated;
pub mod source;
pub use buffer::{SampleBlock, TimestampedBuffer};
pub use controller::{
    samples_per_block, AcquisitionController, DataReader, DEFAULT_BLOCK_DURATION_SECONDS,
};
pub use devices::DeviceSet;
pub use error::AcquisitionError;
pub use event::{DataReadyCallback, DataReadyListeners, ListenerId};
pub use nidaqmx::{DeviceFamily, NiDaqmxBackend, NiDaqmxSettings};
pub use simulated::{SimulatedBackend, SimulationSettings};
pub use source::{
    create_backend, AcquisitionBackend, ManualBackend, ManualTrigger, SamplesReadyCallback,
};
