//! Consumer-side effects requested by the session

use crate::device::{DeviceStateSample, InputHost, InputRuntime};
use crate::dispatch::{DispatchError, DispatchHandle};
use tracing::trace;

/// Where the session sends virtual device changes.
///
/// Every call only schedules work; the change happens on the consumer thread.
pub trait DeviceSink: Send + 'static {
    fn attach(&self) -> Result<(), DispatchError>;

    /// Latest-wins: the consumer keeps only the newest sample
    fn publish(&self, sample: DeviceStateSample) -> Result<(), DispatchError>;

    fn detach(&self) -> Result<(), DispatchError>;
}

impl<H: InputHost + 'static> DeviceSink for DispatchHandle<InputRuntime<H>> {
    fn attach(&self) -> Result<(), DispatchError> {
        self.enqueue_on_consumer(|runtime: &mut InputRuntime<H>| {
            runtime.attach_device()?;
            Ok(())
        })
        .map(|_| ())
    }

    fn publish(&self, sample: DeviceStateSample) -> Result<(), DispatchError> {
        let depth = self.enqueue_on_consumer(move |runtime: &mut InputRuntime<H>| {
            runtime.apply_sample(sample)?;
            Ok(())
        })?;
        trace!("Sample queued, dispatcher depth {}", depth);
        Ok(())
    }

    fn detach(&self) -> Result<(), DispatchError> {
        self.enqueue_on_consumer(|runtime: &mut InputRuntime<H>| {
            runtime.detach_device()?;
            Ok(())
        })
        .map(|_| ())
    }
}
