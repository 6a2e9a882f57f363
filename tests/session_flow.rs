use sensorbridge::device::{DeviceStateSample, InputRuntime};
use sensorbridge::dispatch::{Dispatcher, DispatcherRegistry};
use sensorbridge::session::{
    device_event_channel, sample_from_angles, Angles, DeviceEvent, DeviceInfo, RawFrame,
    SessionHandle, SessionMachine, SessionStatus,
};
use sensorbridge::simulation::{encode_angles, ByteAngleDecoder, LoggingHost, SimulatedLink};

type Runtime = InputRuntime<LoggingHost>;

fn sensor() -> DeviceInfo {
    DeviceInfo::new("sensor-1", "Motion Sensor")
}

fn data(device: &DeviceInfo, sequence: u64, forward: f32, lateral: f32) -> DeviceEvent {
    DeviceEvent::Data(RawFrame::new(
        device.id.clone(),
        sequence,
        encode_angles(forward, lateral, 7.0),
    ))
}

fn expected(forward: f64, lateral: f64) -> DeviceStateSample {
    let angles = Angles {
        forward,
        lateral,
        yaw: 7.0,
    };
    sample_from_angles(&angles, 90.0, 0)
}

#[test]
fn ready_data_disconnect_reaches_the_virtual_device() {
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let dispatcher = Dispatcher::create(&registry, None).unwrap();
    let mut runtime = InputRuntime::new(LoggingHost::new());
    let mut session = SessionMachine::new(
        SimulatedLink::new(),
        ByteAngleDecoder,
        registry.handle(),
        None,
    );
    let device = sensor();

    session.handle_event(DeviceEvent::Ready(device.clone()));
    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(dispatcher.queue_depth(), 1);
    assert!(!runtime.is_attached());

    session.handle_event(data(&device, 1, 10.0, 20.0));
    session.handle_event(data(&device, 2, 30.0, -45.0));
    session.handle_event(data(&device, 3, 45.0, 9.0));
    assert_eq!(dispatcher.queue_depth(), 4);

    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 4);
    assert_eq!(report.drain.faulted, 0);
    assert_eq!(report.published, 1);

    let attached = runtime.device().unwrap();
    assert_eq!(attached.held_state(), expected(45.0, 9.0));
    assert_eq!(attached.updates(), 3);
    assert_eq!(runtime.host().live_devices().len(), 1);
    assert_eq!(
        runtime.host().last_published(),
        Some((attached.handle(), expected(45.0, 9.0)))
    );

    session.handle_event(DeviceEvent::Disconnected(device.clone()));
    assert_eq!(session.status(), SessionStatus::Disconnected);

    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 1);
    assert_eq!(report.published, 0);
    assert!(!runtime.is_attached());
    assert!(runtime.host().live_devices().is_empty());

    // Late frames and further polls change nothing
    session.handle_event(data(&device, 4, 80.0, 80.0));
    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 0);
    assert_eq!(report.published, 0);
    assert_eq!(runtime.host().published(), 1);
}

#[test]
fn updates_without_a_dispatcher_are_dropped_not_buffered() {
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let mut session = SessionMachine::new(
        SimulatedLink::new(),
        ByteAngleDecoder,
        registry.handle(),
        None,
    );
    let device = sensor();

    session.handle_event(DeviceEvent::Ready(device.clone()));
    session.handle_event(data(&device, 1, 45.0, 45.0));
    assert_eq!(session.counters().frames_skipped, 1);

    let dispatcher = Dispatcher::create(&registry, None).unwrap();
    let mut runtime = InputRuntime::new(LoggingHost::new());
    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 0);
    assert!(!runtime.is_attached());

    // Once registered, the next frame's update faults on the missing device
    // and the drain carries on
    session.handle_event(data(&device, 2, 0.0, 0.0));
    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 1);
    assert_eq!(report.drain.faulted, 1);
    assert_eq!(report.published, 0);
}

#[test]
fn dropping_the_dispatcher_discards_pending_updates() {
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let mut session = SessionMachine::new(
        SimulatedLink::new(),
        ByteAngleDecoder,
        registry.handle(),
        None,
    );
    let device = sensor();

    let dispatcher = Dispatcher::create(&registry, None).unwrap();
    session.handle_event(DeviceEvent::Ready(device.clone()));
    session.handle_event(data(&device, 1, 9.0, 9.0));
    assert_eq!(dispatcher.queue_depth(), 2);
    drop(dispatcher);
    assert!(!registry.is_ready());

    let replacement = Dispatcher::create(&registry, None).unwrap();
    assert_eq!(replacement.queue_depth(), 0);
}

#[tokio::test]
async fn worker_feeds_the_consumer_from_a_producer_thread() {
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let dispatcher = Dispatcher::create(&registry, None).unwrap();
    let mut runtime = InputRuntime::new(LoggingHost::new());

    let (events, receiver) = device_event_channel();
    let machine = SessionMachine::new(
        SimulatedLink::new(),
        ByteAngleDecoder,
        registry.handle(),
        None,
    );
    let mut session = SessionHandle::spawn(machine, receiver);
    let mut status = session.subscribe();

    let device = sensor();
    let producer = {
        let events = events.clone();
        std::thread::spawn(move || {
            events.ready(device.clone());
            for sequence in 1..=3 {
                events.send(data(&device, sequence, 18.0 * sequence as f32, 0.0));
            }
        })
    };
    producer.join().unwrap();

    status
        .wait_for(|snapshot| snapshot.counters.frames_forwarded == 3)
        .await
        .unwrap();

    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 4);
    assert_eq!(report.published, 1);
    assert_eq!(
        runtime.device().unwrap().held_state(),
        expected(54.0, 0.0)
    );

    assert_eq!(session.snapshot().status, SessionStatus::Ready);

    // Last sender gone: the worker tears down on its own
    drop(events);
    let snapshot = session.join().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Disconnected);

    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 1);
    assert!(!runtime.is_attached());
}

#[test]
fn dropping_a_ready_session_removes_the_device() {
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let dispatcher = Dispatcher::create(&registry, None).unwrap();
    let mut runtime = InputRuntime::new(LoggingHost::new());
    let link = SimulatedLink::new();
    let streaming = link.streaming_flag();
    let mut session = SessionMachine::new(link, ByteAngleDecoder, registry.handle(), None);
    let device = sensor();

    session.handle_event(DeviceEvent::Ready(device.clone()));
    session.handle_event(data(&device, 1, 18.0, 18.0));
    runtime.run_frame(&dispatcher);
    assert!(runtime.is_attached());
    assert!(streaming.load(std::sync::atomic::Ordering::Acquire));

    drop(session);
    assert!(!streaming.load(std::sync::atomic::Ordering::Acquire));

    let report = runtime.run_frame(&dispatcher);
    assert_eq!(report.drain.executed, 1);
    assert_eq!(report.published, 0);
    assert!(!runtime.is_attached());
    assert!(runtime.host().live_devices().is_empty());
}
