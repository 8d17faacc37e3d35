use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::drivers::{
    samples_per_block, AcquisitionError, NiDaqmxSettings, SimulationSettings,
    DEFAULT_BLOCK_DURATION_SECONDS,
};
/// Which acquisition backend to drive, tagged by `type` in JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Simulated(SimulationSettings),
    Nidaqmx(NiDaqmxSettings),
}
impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Simulated(SimulationSettings::default())
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub num_channels: usize,
    /// Samples per second per channel.
    pub frame_rate: u32,
    #[serde(default = "default_block_duration")]
    pub block_duration_seconds: f64,
    #[serde(default)]
    pub backend: BackendConfig,
}
fn default_block_duration() -> f64 {
    DEFAULT_BLOCK_DURATION_SECONDS
}
impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            num_channels: 2,
            frame_rate: 1000,
            block_duration_seconds: DEFAULT_BLOCK_DURATION_SECONDS,
            backend: BackendConfig::default(),
        }
    }
}
impl AcquisitionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, AcquisitionError> {
        let config: AcquisitionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AcquisitionError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.num_channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        samples_per_block(self.block_duration_seconds, self.frame_rate)?;
        Ok(())
    }
    pub fn samples_per_block(&self) -> Result<usize, AcquisitionError> {
        samples_per_block(self.block_duration_seconds, self.frame_rate)
    }
}
