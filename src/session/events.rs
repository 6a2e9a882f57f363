//! Events and collaborator boundaries of the external device manager
//!
//! The device manager pushes [`DeviceEvent`]s into an unbounded channel from
//! whatever thread it runs on. Senders never block.

use crate::session::SessionError;
use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DeviceId(id.into()),
            name: name.into(),
        }
    }
}

/// Raw data frame as delivered by the device, before angle decoding
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub device: DeviceId,
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl RawFrame {
    pub fn new(device: DeviceId, sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            device,
            sequence,
            payload,
            timestamp: Local::now(),
        }
    }
}

/// Decoded orientation in degrees, nominally within [-90, 90] but unclamped
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Angles {
    pub forward: f64,
    pub lateral: f64,
    pub yaw: f64,
}

#[derive(Clone, Debug)]
pub enum DeviceEvent {
    Ready(DeviceInfo),
    Data(RawFrame),
    Disconnected(DeviceInfo),
}

/// Token for an active raw-data subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Subscription control on the external device manager
pub trait DeviceLink: Send + 'static {
    /// Starts forwarding raw frames of `device` as [`DeviceEvent::Data`]
    fn subscribe(&mut self, device: &DeviceInfo) -> Result<SubscriptionId, SessionError>;

    fn unsubscribe(&mut self, device: &DeviceInfo, subscription: SubscriptionId);
}

/// External angle decoder. Frames are expected to be sanitized already.
pub trait AngleDecoder: Send + 'static {
    /// Called when a device becomes ready, before its first frame
    fn reset(&mut self, _device: &DeviceInfo) {}

    fn decode(&mut self, frame: &RawFrame) -> Result<Angles, SessionError>;
}

/// Producer-side sender, usable from plain threads
#[derive(Clone, Debug)]
pub struct DeviceEventSender {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl DeviceEventSender {
    /// Pushes an event; returns `false` once the session worker is gone
    pub fn send(&self, event: DeviceEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Session closed, dropping device event: {:?}", e.0);
                false
            }
        }
    }

    pub fn ready(&self, device: DeviceInfo) -> bool {
        self.send(DeviceEvent::Ready(device))
    }

    pub fn data(&self, frame: RawFrame) -> bool {
        self.send(DeviceEvent::Data(frame))
    }

    pub fn disconnected(&self, device: DeviceInfo) -> bool {
        self.send(DeviceEvent::Disconnected(device))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn device_event_channel() -> (DeviceEventSender, mpsc::UnboundedReceiver<DeviceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeviceEventSender { tx }, rx)
}
