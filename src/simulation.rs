//! Simulated sensor and host used by the `sensorbridge` binary
//!
//! Stands in for the external device manager, the raw protocol decoder and the
//! host input framework so the bridge can run end to end without hardware.

use crate::config::SimulationConfig;
use crate::device::{DeviceHandle, DeviceStateSample, HostError, InputHost, StateLayout};
use crate::session::{
    AngleDecoder, Angles, DeviceEventSender, DeviceInfo, DeviceLink, RawFrame, SessionError,
    SubscriptionId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bytes per encoded frame: forward, lateral, yaw as little-endian f32
pub const FRAME_PAYLOAD_LEN: usize = 12;

pub fn encode_angles(forward: f32, lateral: f32, yaw: f32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(FRAME_PAYLOAD_LEN);
    payload.extend_from_slice(&forward.to_le_bytes());
    payload.extend_from_slice(&lateral.to_le_bytes());
    payload.extend_from_slice(&yaw.to_le_bytes());
    payload
}

/// Decoder for frames produced by [`encode_angles`]
#[derive(Debug, Default)]
pub struct ByteAngleDecoder;

impl AngleDecoder for ByteAngleDecoder {
    fn reset(&mut self, device: &DeviceInfo) {
        debug!("Decoder reset for {}", device.id);
    }

    fn decode(&mut self, frame: &RawFrame) -> Result<Angles, SessionError> {
        let payload = frame.payload.get(..FRAME_PAYLOAD_LEN).ok_or_else(|| {
            SessionError::DecodeError(format!(
                "frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.payload.len(),
                FRAME_PAYLOAD_LEN
            ))
        })?;

        let mut values = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64);
        let mut next = || values.next().unwrap_or_default();

        Ok(Angles {
            forward: next(),
            lateral: next(),
            yaw: next(),
        })
    }
}

/// Link whose subscription state is shared with the simulated sensor thread
#[derive(Clone, Debug, Default)]
pub struct SimulatedLink {
    streaming: Arc<AtomicBool>,
    next_subscription: u64,
    fail_subscribe: bool,
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link that refuses every subscription
    pub fn refusing() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    /// Flag the sensor thread reads to know whether frames are wanted
    pub fn streaming_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.streaming)
    }
}

impl DeviceLink for SimulatedLink {
    fn subscribe(&mut self, device: &DeviceInfo) -> Result<SubscriptionId, SessionError> {
        if self.fail_subscribe {
            return Err(SessionError::SubscriptionError(format!(
                "{} refused raw data subscription",
                device.name
            )));
        }
        self.next_subscription += 1;
        self.streaming.store(true, Ordering::Release);
        info!("Subscribed to raw data of {}", device.name);
        Ok(SubscriptionId(self.next_subscription))
    }

    fn unsubscribe(&mut self, device: &DeviceInfo, subscription: SubscriptionId) {
        self.streaming.store(false, Ordering::Release);
        info!(
            "Unsubscribed from raw data of {} (subscription {})",
            device.name, subscription.0
        );
    }
}

/// Host that only records and logs what it is asked to do
#[derive(Debug, Default)]
pub struct LoggingHost {
    registered: Vec<String>,
    next_handle: u32,
    live: Vec<DeviceHandle>,
    last_published: Option<(DeviceHandle, DeviceStateSample)>,
    published: u64,
}

impl LoggingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_published(&self) -> Option<(DeviceHandle, DeviceStateSample)> {
        self.last_published
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn live_devices(&self) -> &[DeviceHandle] {
        &self.live
    }
}

impl InputHost for LoggingHost {
    fn register_layout(&mut self, layout: &StateLayout) -> Result<(), HostError> {
        if self.registered.iter().any(|name| name == layout.name) {
            return Ok(());
        }
        info!(
            "Host registered layout {} ({}, {} bytes)",
            layout.display_name, layout.format, layout.size
        );
        self.registered.push(layout.name.to_string());
        Ok(())
    }

    fn add_device(&mut self, layout: &StateLayout) -> Result<DeviceHandle, HostError> {
        if !self.registered.iter().any(|name| name == layout.name) {
            return Err(HostError::LayoutNotRegistered(layout.format));
        }
        self.next_handle += 1;
        let handle = DeviceHandle(self.next_handle);
        self.live.push(handle);
        Ok(handle)
    }

    fn remove_device(&mut self, handle: DeviceHandle) -> Result<(), HostError> {
        let before = self.live.len();
        self.live.retain(|live| *live != handle);
        if self.live.len() == before {
            return Err(HostError::UnknownDevice(handle));
        }
        Ok(())
    }

    fn queue_state_event(
        &mut self,
        handle: DeviceHandle,
        sample: &DeviceStateSample,
    ) -> Result<(), HostError> {
        if !self.live.contains(&handle) {
            return Err(HostError::UnknownDevice(handle));
        }
        trace!("State event for {}: {:?}", handle, sample.to_bytes());
        self.last_published = Some((handle, *sample));
        self.published += 1;
        Ok(())
    }
}

/// Runs the producer side of the simulation on a plain OS thread.
///
/// Reports the device ready, streams a sweep of angles while subscribed and
/// finally reports the disconnect. Cancelling `cancel` ends the stream early.
pub fn spawn_sensor_thread(
    device: DeviceInfo,
    events: DeviceEventSender,
    streaming: Arc<AtomicBool>,
    config: SimulationConfig,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("sensor-sim".to_string())
        .spawn(move || run_sensor(device, events, streaming, config, cancel))
}

fn run_sensor(
    device: DeviceInfo,
    events: DeviceEventSender,
    streaming: Arc<AtomicBool>,
    config: SimulationConfig,
    cancel: CancellationToken,
) -> u64 {
    thread::sleep(Duration::from_millis(config.connect_delay_ms));
    if cancel.is_cancelled() || !events.ready(device.clone()) {
        return 0;
    }

    let interval = Duration::from_millis(config.frame_interval_ms.max(1));
    let mut sequence = 0u64;
    let mut sent = 0u64;

    while !cancel.is_cancelled() && (config.frame_count == 0 || sequence < config.frame_count) {
        if streaming.load(Ordering::Acquire) {
            let (forward, lateral) = sweep(sequence, config.amplitude_degrees);
            let frame = RawFrame::new(
                device.id.clone(),
                sequence,
                encode_angles(forward, lateral, 0.0),
            );
            if !events.data(frame) {
                warn!("Session gone, stopping sensor stream");
                return sent;
            }
            sent += 1;
            sequence += 1;
        }
        thread::sleep(interval);
    }

    events.disconnected(device);
    info!("Sensor simulation finished after {} frames", sent);
    sent
}

/// Slow figure-eight tilt
fn sweep(sequence: u64, amplitude: f32) -> (f32, f32) {
    let t = sequence as f32 * 0.02;
    (amplitude * t.sin(), amplitude * (2.0 * t).sin() * 0.5)
}
