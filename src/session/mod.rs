//! Device session subsystem
//!
//! Bridges the external device manager (producer side) to the virtual device
//! (consumer side):
//!
//! ```text
//! device manager ─[DeviceEvent]─► SessionMachine ─► AngleDecoder ─► map_rotation
//!  (any thread)    (unbounded)         │                                │
//!                                      └──────► DeviceSink ◄────────────┘
//!                                           (DispatchHandle → consumer thread)
//! ```

pub mod error;
pub mod events;
pub mod mapping;
pub mod session_manager;
pub mod sink;

pub use error::SessionError;
pub use events::{
    device_event_channel, AngleDecoder, Angles, DeviceEvent, DeviceEventSender, DeviceId,
    DeviceInfo, DeviceLink, RawFrame, SubscriptionId,
};
pub use mapping::{map_rotation, sample_from_angles};
pub use session_manager::{
    ActiveLink, ConnectOutcome, DeviceSession, SessionCounters, SessionHandle, SessionMachine,
    SessionSettings, SessionSnapshot, SessionState, SessionStatus,
};
pub use sink::DeviceSink;
