//! Device session state machine
//!
//! Owns the connect/ready/disconnect lifecycle of exactly one physical device
//! and turns its raw frames into virtual device samples on the consumer thread.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──Ready──► Connecting ──subscribed──► Ready ──Disconnected──► Disconnected
//!      ▲                      │                                                  │
//!      └──subscribe failed────┘                                    (cycle restarts on Ready)
//! ```
//!
//! Transitions are typestate-checked via statum. [`SessionMachine`] wraps the
//! typed states so events arriving at runtime can be dispatched, and
//! [`SessionHandle`] runs it on a tokio task fed by the device event channel.

use crate::session::events::{
    AngleDecoder, DeviceEvent, DeviceId, DeviceInfo, DeviceLink, RawFrame, SubscriptionId,
};
use crate::session::mapping::sample_from_angles;
use crate::session::sink::DeviceSink;
use crate::session::SessionError;
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Session tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Angle in degrees that maps to a full rotation axis deflection
    pub full_scale_degrees: f32,

    /// Button bitfield sent with every sample; no button source is wired
    pub idle_buttons: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            full_scale_degrees: 90.0,
            idle_buttons: 0,
        }
    }
}

impl SessionSettings {
    /// Replaces a full scale that would turn every sample into inf or NaN
    pub fn validated(mut self) -> Self {
        if !(self.full_scale_degrees.is_finite() && self.full_scale_degrees > 0.0) {
            let fallback = Self::default().full_scale_degrees;
            warn!(
                "Invalid full_scale_degrees {}, using {}",
                self.full_scale_degrees, fallback
            );
            self.full_scale_degrees = fallback;
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Ready,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub connections: u64,
    pub frames_forwarded: u64,
    pub frames_skipped: u64,
}

/// Observable session state, published after every handled event
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub device: Option<DeviceId>,
    pub counters: SessionCounters,
}

/// Data held while a device is connected
#[derive(Debug, Clone)]
pub struct ActiveLink {
    pub device: DeviceInfo,
    pub subscription: SubscriptionId,
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready(ActiveLink),
}

#[machine]
pub struct DeviceSession<S: SessionState> {
    link: Box<dyn DeviceLink>,
    decoder: Box<dyn AngleDecoder>,
    sink: Box<dyn DeviceSink>,
    settings: SessionSettings,
    counters: SessionCounters,
}

impl<S: SessionState> DeviceSession<S> {
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }
}

impl DeviceSession<Disconnected> {
    pub fn create(
        link: Box<dyn DeviceLink>,
        decoder: Box<dyn AngleDecoder>,
        sink: Box<dyn DeviceSink>,
        settings: Option<SessionSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default().validated();
        debug!("Creating device session with settings: {:?}", settings);
        Self::new(link, decoder, sink, settings, SessionCounters::default())
    }

    pub fn begin_connect(self, device: &DeviceInfo) -> DeviceSession<Connecting> {
        info!("Device is ready: {} ({})", device.id, device.name);
        self.transition()
    }
}

/// Result of [`DeviceSession::<Connecting>::establish`]
pub enum ConnectOutcome {
    Ready(DeviceSession<Ready>),
    Failed(DeviceSession<Disconnected>, SessionError),
}

impl DeviceSession<Connecting> {
    /// Subscribes to raw data and schedules creation of the virtual device.
    ///
    /// The attach request is queued before this returns, so it always precedes
    /// the first sample of this connection.
    pub fn establish(mut self, device: DeviceInfo) -> ConnectOutcome {
        let subscription = match self.link.subscribe(&device) {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", device.id, e);
                return ConnectOutcome::Failed(self.transition(), e);
            }
        };
        debug!("Subscribed to {} as {:?}", device.id, subscription);

        self.decoder.reset(&device);
        if let Err(e) = self.sink.attach() {
            warn!("Virtual device creation for {} dropped: {}", device.id, e);
        }
        self.counters.connections += 1;

        info!("Session ready for {}", device.id);
        ConnectOutcome::Ready(self.transition_with(ActiveLink {
            device,
            subscription,
        }))
    }
}

impl DeviceSession<Ready> {
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.get_state_data().map(|link| &link.device)
    }

    /// Decodes one frame and schedules the resulting sample
    pub fn forward_frame(&mut self, frame: &RawFrame) -> Result<(), SessionError> {
        let angles = match self.decoder.decode(frame) {
            Ok(angles) => angles,
            Err(e) => {
                self.counters.frames_skipped += 1;
                return Err(e);
            }
        };

        let sample = sample_from_angles(
            &angles,
            self.settings.full_scale_degrees,
            self.settings.idle_buttons,
        );
        trace!(
            "Frame {} angles {:?} -> rotation {}",
            frame.sequence,
            angles,
            sample.rotation
        );

        if let Err(e) = self.sink.publish(sample) {
            self.counters.frames_skipped += 1;
            return Err(e.into());
        }
        self.counters.frames_forwarded += 1;
        Ok(())
    }

    /// Schedules removal of the virtual device and drops the subscription
    pub fn disconnect(mut self) -> DeviceSession<Disconnected> {
        if let Err(e) = self.sink.detach() {
            warn!("Virtual device removal dropped: {}", e);
        }
        if let Some(link) = self.get_state_data().cloned() {
            self.link.unsubscribe(&link.device, link.subscription);
            debug!("Unsubscribed from {}", link.device.id);
        }
        self.transition()
    }
}

enum SessionPhase {
    Disconnected(DeviceSession<Disconnected>),
    Ready(DeviceSession<Ready>),
}

/// Runtime driver over the typed session states
pub struct SessionMachine {
    phase: Option<SessionPhase>,
}

impl SessionMachine {
    pub fn new(
        link: impl DeviceLink,
        decoder: impl AngleDecoder,
        sink: impl DeviceSink,
        settings: Option<SessionSettings>,
    ) -> Self {
        let session =
            DeviceSession::create(Box::new(link), Box::new(decoder), Box::new(sink), settings);
        Self {
            phase: Some(SessionPhase::Disconnected(session)),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.phase {
            Some(SessionPhase::Ready(_)) => SessionStatus::Ready,
            _ => SessionStatus::Disconnected,
        }
    }

    pub fn current_device(&self) -> Option<&DeviceInfo> {
        match &self.phase {
            Some(SessionPhase::Ready(session)) => session.device(),
            _ => None,
        }
    }

    pub fn settings(&self) -> Option<&SessionSettings> {
        match &self.phase {
            Some(SessionPhase::Ready(session)) => Some(session.settings()),
            Some(SessionPhase::Disconnected(session)) => Some(session.settings()),
            None => None,
        }
    }

    pub fn counters(&self) -> SessionCounters {
        match &self.phase {
            Some(SessionPhase::Ready(session)) => session.counters(),
            Some(SessionPhase::Disconnected(session)) => session.counters(),
            None => SessionCounters::default(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            device: self.current_device().map(|device| device.id.clone()),
            counters: self.counters(),
        }
    }

    pub fn handle_event(&mut self, event: DeviceEvent) {
        let Some(phase) = self.phase.take() else {
            error!("Session state missing, dropping event {:?}", event);
            return;
        };
        self.phase = Some(Self::step(phase, event));
    }

    fn step(phase: SessionPhase, event: DeviceEvent) -> SessionPhase {
        match (phase, event) {
            (SessionPhase::Disconnected(session), DeviceEvent::Ready(device)) => {
                match session.begin_connect(&device).establish(device) {
                    ConnectOutcome::Ready(session) => SessionPhase::Ready(session),
                    ConnectOutcome::Failed(session, e) => {
                        warn!("Device stays disconnected: {}", e);
                        SessionPhase::Disconnected(session)
                    }
                }
            }
            (SessionPhase::Ready(session), DeviceEvent::Ready(device)) => {
                if session.device().map(|current| &current.id) == Some(&device.id) {
                    debug!("Duplicate ready notification for {}", device.id);
                } else {
                    warn!(
                        "Ignoring ready notification for {} while {} is connected",
                        device.id,
                        session.device().map(|d| d.id.to_string()).unwrap_or_default()
                    );
                }
                SessionPhase::Ready(session)
            }
            (SessionPhase::Ready(mut session), DeviceEvent::Data(frame)) => {
                let is_current = session
                    .device()
                    .is_some_and(|current| current.id == frame.device);
                if !is_current {
                    debug!("Ignoring frame from non-current device {}", frame.device);
                } else if let Err(e) = session.forward_frame(&frame) {
                    warn!("Frame {} skipped: {}", frame.sequence, e);
                }
                SessionPhase::Ready(session)
            }
            (SessionPhase::Disconnected(session), DeviceEvent::Data(frame)) => {
                debug!(
                    "Ignoring frame {} from {} while disconnected",
                    frame.sequence, frame.device
                );
                SessionPhase::Disconnected(session)
            }
            (SessionPhase::Ready(session), DeviceEvent::Disconnected(device)) => {
                let is_current = session
                    .device()
                    .is_some_and(|current| current.id == device.id);
                if is_current {
                    info!("Device disconnected: {}", device.id);
                    SessionPhase::Disconnected(session.disconnect())
                } else {
                    warn!("Ignoring disconnect of non-current device {}", device.id);
                    SessionPhase::Ready(session)
                }
            }
            (SessionPhase::Disconnected(session), DeviceEvent::Disconnected(device)) => {
                debug!("Device {} disconnected while already disconnected", device.id);
                SessionPhase::Disconnected(session)
            }
        }
    }

    /// Removes the virtual device and unsubscribes, whatever the current state
    pub fn teardown(&mut self) {
        self.phase = match self.phase.take() {
            Some(SessionPhase::Ready(session)) => {
                info!(
                    "Tearing down session for {}",
                    session.device().map(|d| d.id.to_string()).unwrap_or_default()
                );
                Some(SessionPhase::Disconnected(session.disconnect()))
            }
            other => other,
        };
    }
}

impl Drop for SessionMachine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle for the session worker task
///
/// The worker consumes [`DeviceEvent`]s until shutdown is requested, the
/// handle is dropped, or every event sender is gone; then it tears down.
#[derive(Debug)]
pub struct SessionHandle {
    status_rx: watch::Receiver<SessionSnapshot>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<SessionSnapshot>>,
}

impl SessionHandle {
    pub fn spawn(
        mut machine: SessionMachine,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(machine.snapshot());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task_handle = tokio::spawn(async move {
            info!("Session worker started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Shutdown signal received for session worker");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => {
                            machine.handle_event(event);
                            status_tx.send_replace(machine.snapshot());
                        }
                        None => {
                            info!("All device event senders closed");
                            break;
                        }
                    }
                }
            }

            machine.teardown();
            let snapshot = machine.snapshot();
            status_tx.send_replace(snapshot.clone());
            info!(
                "Session worker finished: {} frames forwarded, {} skipped",
                snapshot.counters.frames_forwarded, snapshot.counters.frames_skipped
            );
            snapshot
        });

        Self {
            status_rx,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Signals the worker, waits for teardown and returns the final snapshot
    pub async fn shutdown(&mut self) -> Result<SessionSnapshot, SessionError> {
        debug!("Sending shutdown signal to session worker");
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Session worker already terminated");
            }
        }
        self.join().await
    }

    /// Waits for the worker to finish on its own (all senders closed)
    pub async fn join(&mut self) -> Result<SessionSnapshot, SessionError> {
        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Session worker panicked: {}", e);
                SessionError::WorkerError(format!("Session worker panicked: {}", e))
            }),
            None => {
                debug!("Session worker already joined");
                Ok(self.snapshot())
            }
        }
    }
}
