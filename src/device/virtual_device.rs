//! Virtual sensor device registered with the host input framework
//!
//! [`InputRuntime`] is the consumer-owned context the dispatcher hands to every
//! task. It owns the host connection and at most one [`VirtualDevice`]; all of
//! its mutation happens on the consumer thread after a drain.
//!
//! # Frame protocol
//!
//! ```text
//! tick ─► Dispatcher::tick (apply queued attach/sample/detach) ─► poll ─► host state event
//! ```

use crate::device::error::HostError;
use crate::device::state::{DeviceStateSample, StateLayout, SENSOR_LAYOUT};
use crate::dispatch::{Dispatcher, DrainReport};
use std::fmt;
use tracing::{debug, error, info, trace, warn};

/// Host-assigned identity of a device instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Boundary to the host input framework. Only touched on the consumer thread.
pub trait InputHost {
    /// Registers a device type layout. Hosts may treat repeats as no-ops.
    fn register_layout(&mut self, layout: &StateLayout) -> Result<(), HostError>;

    fn add_device(&mut self, layout: &StateLayout) -> Result<DeviceHandle, HostError>;

    fn remove_device(&mut self, handle: DeviceHandle) -> Result<(), HostError>;

    /// Publishes one state event for `handle`
    fn queue_state_event(
        &mut self,
        handle: DeviceHandle,
        sample: &DeviceStateSample,
    ) -> Result<(), HostError>;
}

/// A registered instance and the sample it publishes on the next poll.
///
/// The held sample is a single latest-wins slot: every update overwrites it,
/// so samples arriving between two polls are intentionally lost.
#[derive(Debug)]
pub struct VirtualDevice {
    handle: DeviceHandle,
    held: DeviceStateSample,
    updates: u64,
    polls: u64,
}

impl VirtualDevice {
    fn new(handle: DeviceHandle) -> Self {
        Self {
            handle,
            held: DeviceStateSample::default(),
            updates: 0,
            polls: 0,
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn held_state(&self) -> DeviceStateSample {
        self.held
    }

    /// Number of samples written since attach
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn set_state(&mut self, sample: DeviceStateSample) {
        self.held = sample;
        self.updates += 1;
    }

    /// Host poll callback: publishes the held sample as one state event
    pub fn on_update<H: InputHost + ?Sized>(&mut self, host: &mut H) -> Result<(), HostError> {
        let sample = DeviceStateSample::new(self.held.buttons, self.held.rotation);
        host.queue_state_event(self.handle, &sample)?;
        self.polls += 1;
        trace!(
            "Device {} published buttons={:#b} rotation={}",
            self.handle,
            sample.buttons,
            sample.rotation
        );
        Ok(())
    }
}

/// Result of one consumer frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub drain: DrainReport,
    /// State events published by the poll that followed the drain
    pub published: usize,
}

/// Consumer-thread context: host connection plus the attached device
pub struct InputRuntime<H: InputHost> {
    host: H,
    layout: &'static StateLayout,
    layout_registered: bool,
    device: Option<VirtualDevice>,
}

impl<H: InputHost> InputRuntime<H> {
    pub fn new(host: H) -> Self {
        Self::with_layout(host, &SENSOR_LAYOUT)
    }

    pub fn with_layout(host: H, layout: &'static StateLayout) -> Self {
        Self {
            host,
            layout,
            layout_registered: false,
            device: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn layout(&self) -> &'static StateLayout {
        self.layout
    }

    pub fn device(&self) -> Option<&VirtualDevice> {
        self.device.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.device.is_some()
    }

    /// Registers the device type once. Returns `false` when already registered.
    pub fn register_device_type(&mut self) -> Result<bool, HostError> {
        if self.layout_registered {
            trace!("Layout {} already registered", self.layout.format);
            return Ok(false);
        }

        self.host.register_layout(self.layout)?;
        self.layout_registered = true;
        info!(
            "Registered device layout '{}' ({})",
            self.layout.name, self.layout.format
        );
        Ok(true)
    }

    /// Creates the virtual device instance, registering its type first if needed
    pub fn attach_device(&mut self) -> Result<DeviceHandle, HostError> {
        if let Some(device) = &self.device {
            warn!("Virtual device {} already attached", device.handle);
            return Ok(device.handle);
        }

        self.register_device_type()?;
        let handle = self.host.add_device(self.layout)?;
        self.device = Some(VirtualDevice::new(handle));
        info!(
            "Virtual device {} attached ({})",
            handle, self.layout.display_name
        );
        Ok(handle)
    }

    /// Overwrites the held sample of the attached device
    pub fn apply_sample(&mut self, sample: DeviceStateSample) -> Result<(), HostError> {
        match self.device.as_mut() {
            Some(device) => {
                device.set_state(sample);
                Ok(())
            }
            None => Err(HostError::NoDevice),
        }
    }

    /// Removes the attached device. Returns its handle, or `None` if none was attached.
    pub fn detach_device(&mut self) -> Result<Option<DeviceHandle>, HostError> {
        let Some(device) = self.device.take() else {
            debug!("Detach requested with no virtual device attached");
            return Ok(None);
        };

        self.host.remove_device(device.handle)?;
        info!(
            "Virtual device {} removed after {} updates and {} polls",
            device.handle, device.updates, device.polls
        );
        Ok(Some(device.handle))
    }

    /// Host poll: publishes one sample per attached device
    pub fn poll(&mut self) -> Result<usize, HostError> {
        match self.device.as_mut() {
            Some(device) => {
                device.on_update(&mut self.host)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// One consumer tick: drain queued work first, then let the host poll
    pub fn run_frame(&mut self, dispatcher: &Dispatcher<Self>) -> FrameReport {
        let drain = dispatcher.tick(self);
        let published = match self.poll() {
            Ok(published) => published,
            Err(e) => {
                error!("Device poll failed: {}", e);
                0
            }
        };
        FrameReport { drain, published }
    }
}

impl<H: InputHost> Drop for InputRuntime<H> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            info!("Removing virtual device {} on teardown", device.handle);
            if let Err(e) = self.host.remove_device(device.handle) {
                warn!("Failed to remove device {} on teardown: {}", device.handle, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::Vec2;
    use crate::dispatch::DispatcherRegistry;

    #[derive(Default)]
    struct FakeHost {
        registrations: usize,
        next_handle: u32,
        live: Vec<DeviceHandle>,
        events: Vec<(DeviceHandle, DeviceStateSample)>,
    }

    impl InputHost for FakeHost {
        fn register_layout(&mut self, _layout: &StateLayout) -> Result<(), HostError> {
            self.registrations += 1;
            Ok(())
        }

        fn add_device(&mut self, _layout: &StateLayout) -> Result<DeviceHandle, HostError> {
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
            self.events.push((handle, *sample));
            Ok(())
        }
    }

    #[test]
    fn type_registration_is_idempotent() {
        let mut runtime = InputRuntime::new(FakeHost::default());
        assert_eq!(runtime.register_device_type(), Ok(true));
        assert_eq!(runtime.register_device_type(), Ok(false));

        runtime.attach_device().unwrap();
        assert_eq!(runtime.host().registrations, 1);
    }

    #[test]
    fn poll_publishes_the_latest_held_sample() {
        let mut runtime = InputRuntime::new(FakeHost::default());
        let handle = runtime.attach_device().unwrap();

        runtime
            .apply_sample(DeviceStateSample::new(0, Vec2::new(0.1, 0.9)))
            .unwrap();
        runtime
            .apply_sample(DeviceStateSample::new(1, Vec2::new(0.3, 0.7)))
            .unwrap();
        assert_eq!(runtime.poll(), Ok(1));

        let events = &runtime.host().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (handle, DeviceStateSample::new(1, Vec2::new(0.3, 0.7))));
        assert_eq!(runtime.device().unwrap().updates(), 2);
    }

    #[test]
    fn detached_device_is_no_longer_polled() {
        let mut runtime = InputRuntime::new(FakeHost::default());
        let handle = runtime.attach_device().unwrap();
        runtime.poll().unwrap();

        assert_eq!(runtime.detach_device(), Ok(Some(handle)));
        assert_eq!(runtime.poll(), Ok(0));
        assert_eq!(runtime.host().events.len(), 1);
        assert_eq!(runtime.apply_sample(DeviceStateSample::default()), Err(HostError::NoDevice));
        assert_eq!(runtime.detach_device(), Ok(None));
    }

    #[test]
    fn second_attach_keeps_the_existing_instance() {
        let mut runtime = InputRuntime::new(FakeHost::default());
        let first = runtime.attach_device().unwrap();
        let second = runtime.attach_device().unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.host().live.len(), 1);
    }

    #[test]
    fn run_frame_drains_before_polling() {
        let registry = DispatcherRegistry::new();
        let dispatcher = Dispatcher::create(&registry, None).unwrap();
        let handle = registry.handle();
        let mut runtime = InputRuntime::new(FakeHost::default());

        handle
            .enqueue_on_consumer(|rt: &mut InputRuntime<FakeHost>| {
                rt.attach_device()?;
                Ok(())
            })
            .unwrap();
        handle
            .enqueue_on_consumer(|rt: &mut InputRuntime<FakeHost>| {
                rt.apply_sample(DeviceStateSample::new(0, Vec2::new(0.0, 1.0)))?;
                Ok(())
            })
            .unwrap();

        let report = runtime.run_frame(&dispatcher);
        assert_eq!(report.drain.executed, 2);
        assert_eq!(report.published, 1);
        assert_eq!(
            runtime.host().events[0].1,
            DeviceStateSample::new(0, Vec2::new(0.0, 1.0))
        );
    }
}
