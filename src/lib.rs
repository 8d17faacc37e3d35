//! Continuous multi-channel voltage acquisition: fixed-duration blocks pulled
//! from a DAQ backend, stamped on a phase-continuous time axis, and handed to
//! consumer callbacks.
pub mod config;
pub mod drivers;
pub use config::{AcquisitionConfig, BackendConfig};
pub use drivers::{
    AcquisitionBackend, AcquisitionController, AcquisitionError, DataReadyCallback, DeviceSet,
    SampleBlock, TimestampedBuffer,
};
