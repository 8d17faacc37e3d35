use std::collections::BTreeMap;
use serde_json::{json, Map, Value};
use crate::drivers::{AcquisitionController, AcquisitionError};
/// Keyed collection of acquisition controllers driven together.
///
/// Devices are started and stopped one after another; their clocks are not
/// synchronised, so each recording keeps its own time axis starting at zero.
#[derive(Default)]
pub struct DeviceSet {
    next_id: usize,
    devices: BTreeMap<usize, AcquisitionController>,
    is_recording: bool,
    is_paused: bool,
}
impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }
    /// Takes ownership of `controller`; the returned id addresses it later.
    pub fn add(&mut self, controller: AcquisitionController) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.devices.insert(id, controller);
        id
    }
    /// Disposes and drops the device registered under `id`.
    pub fn remove(&mut self, id: usize) -> Result<(), AcquisitionError> {
        let mut controller = self
            .devices
            .remove(&id)
            .ok_or(AcquisitionError::UnknownDevice(id))?;
        controller.dispose()
    }
    pub fn len(&self) -> usize {
        self.devices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
    /// Disposes every device, returning the first failure after trying them all.
    pub fn clear(&mut self) -> Result<(), AcquisitionError> {
        let mut first_error = None;
        for (id, mut controller) in std::mem::take(&mut self.devices) {
            if let Err(err) = controller.dispose() {
                log::warn!("device {id} failed to dispose: {err}");
                first_error.get_or_insert(err);
            }
        }
        self.is_recording = false;
        self.is_paused = false;
        first_error.map_or(Ok(()), Err)
    }
    pub fn get(&self, id: usize) -> Result<&AcquisitionController, AcquisitionError> {
        self.devices.get(&id).ok_or(AcquisitionError::UnknownDevice(id))
    }
    pub fn get_mut(&mut self, id: usize) -> Result<&mut AcquisitionController, AcquisitionError> {
        self.devices
            .get_mut(&id)
            .ok_or(AcquisitionError::UnknownDevice(id))
    }
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.devices.keys().copied()
    }
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }
    /// Starts every device; if one fails, the ones started by this call are stopped again.
    ///
    /// Devices that were already recording are left running untouched.
    pub fn start_recording(&mut self) -> Result<(), AcquisitionError> {
        if self.is_recording {
            return Err(AcquisitionError::AlreadyRecording);
        }
        let ids: Vec<usize> = self.devices.keys().copied().collect();
        let mut started = Vec::new();
        for id in ids {
            let Some(controller) = self.devices.get_mut(&id) else {
                continue;
            };
            if controller.is_recording() {
                log::debug!("device {id} is already recording");
                continue;
            }
            if let Err(err) = controller.start_recording() {
                log::error!("device {id} failed to start recording: {err}");
                for started_id in &started {
                    if let Some(controller) = self.devices.get_mut(started_id) {
                        if let Err(stop_err) = controller.stop_recording() {
                            log::warn!("device {started_id} failed to stop: {stop_err}");
                        }
                    }
                }
                return Err(err);
            }
            started.push(id);
        }
        self.is_recording = true;
        self.is_paused = false;
        Ok(())
    }
    /// Pauses every device without discarding what they recorded.
    pub fn pause_recording(&mut self) {
        if !self.is_recording {
            return;
        }
        for controller in self.devices.values_mut() {
            controller.pause_recording();
        }
        self.is_paused = true;
    }
    pub fn resume_recording(&mut self) {
        for controller in self.devices.values_mut() {
            controller.resume_recording();
        }
        self.is_paused = false;
    }
    /// Stops every device, returning the first failure after trying them all.
    pub fn stop_recording(&mut self) -> Result<(), AcquisitionError> {
        let mut first_error = None;
        for (id, controller) in self.devices.iter_mut() {
            if let Err(err) = controller.stop_recording() {
                log::warn!("device {id} failed to stop recording: {err}");
                first_error.get_or_insert(err);
            }
        }
        self.is_recording = false;
        self.is_paused = false;
        first_error.map_or(Ok(()), Err)
    }
    /// Snapshot of every device's settings and recorded blocks as JSON, keyed by id.
    pub fn serialize(&self) -> Result<Value, AcquisitionError> {
        let mut devices = Map::new();
        for (id, controller) in &self.devices {
            devices.insert(
                id.to_string(),
                json!({
                    "num_channels": controller.num_channels(),
                    "frame_rate": controller.frame_rate(),
                    "channel_names": controller.channel_names(),
                    "data": serde_json::to_value(controller.data())?,
                }),
            );
        }
        Ok(Value::Object(devices))
    }
}
