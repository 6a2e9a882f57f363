use color_eyre::{eyre::eyre, Result};
use sensorbridge::config::BridgeConfig;
use sensorbridge::device::{
    AxisControl, ButtonControl, FrameReport, InputRuntime, PRIMARY_BUTTON_BIT, SENSOR_LAYOUT,
};
use sensorbridge::dispatch::{Dispatcher, DispatcherRegistry};
use sensorbridge::session::{device_event_channel, DeviceInfo, SessionHandle, SessionMachine};
use sensorbridge::simulation::{spawn_sensor_thread, ByteAngleDecoder, LoggingHost, SimulatedLink};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

type Runtime = InputRuntime<LoggingHost>;

#[tokio::main]
async fn main() -> Result<()> {
    setup_error_reporting()?;

    let config_path = BridgeConfig::default_path();
    let config = BridgeConfig::load_from(&config_path).await?;
    setup_logging(&config.logging.level);
    info!("Using config {}: {:?}", config_path.display(), config);

    // Consumer side: this thread owns the dispatcher and the runtime
    let registry: DispatcherRegistry<Runtime> = DispatcherRegistry::new();
    let dispatcher = Dispatcher::create(&registry, Some(config.dispatcher.clone()))
        .map_err(|e| eyre!("Failed to create dispatcher: {}", e))?;
    let mut runtime = InputRuntime::new(LoggingHost::new());
    runtime
        .register_device_type()
        .map_err(|e| eyre!("Failed to register device type: {}", e))?;

    let mut printer = InputPrinter::resolve(config.simulation.tick_hz)?;

    // Producer side: session worker plus the simulated sensor thread
    let link = SimulatedLink::new();
    let streaming = link.streaming_flag();
    let (events_tx, events_rx) = device_event_channel();
    let machine = SessionMachine::new(
        link,
        ByteAngleDecoder,
        registry.handle(),
        Some(config.session.clone()),
    );
    let mut session = SessionHandle::spawn(machine, events_rx);
    let mut session_status = session.subscribe();

    let cancel = CancellationToken::new();
    let sensor = spawn_sensor_thread(
        DeviceInfo::new("sim-0", "Simulated Motion Sensor"),
        events_tx,
        streaming,
        config.simulation.clone(),
        cancel.clone(),
    )
    .map_err(|e| eyre!("Failed to start sensor thread: {}", e))?;

    let tick_hz = config.simulation.tick_hz.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / tick_hz as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Running consumer loop at {} Hz", tick_hz);
    let interrupted = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, stopping");
                break true;
            }
            changed = session_status.changed() => {
                if changed.is_err() {
                    info!("Session worker ended");
                    break false;
                }
                debug!("Session: {:?}", *session_status.borrow());
            }
            _ = ticker.tick() => {
                let report = runtime.run_frame(&dispatcher);
                printer.print(&runtime, report);
            }
        }
    };

    cancel.cancel();
    let snapshot = if interrupted {
        session.shutdown().await
    } else {
        session.join().await
    }
    .map_err(|e| eyre!("Session shutdown failed: {}", e))?;
    info!("Final session state: {:?}", snapshot);

    // Apply the teardown the session just queued
    let report = runtime.run_frame(&dispatcher);
    printer.print(&runtime, report);
    dispatcher.log_queue_depth();

    match tokio::task::spawn_blocking(move || sensor.join()).await {
        Ok(Ok(frames)) => info!("Sensor thread sent {} frames", frames),
        Ok(Err(_)) => warn!("Sensor thread panicked"),
        Err(e) => warn!("Failed to join sensor thread: {}", e),
    }

    drop(runtime);
    drop(dispatcher);
    Ok(())
}

/// Logs the published device state through typed control handles
struct InputPrinter {
    primary: ButtonControl,
    rotation: AxisControl,
    every: u64,
    frames: u64,
}

impl InputPrinter {
    fn resolve(tick_hz: u32) -> Result<Self> {
        let primary = SENSOR_LAYOUT
            .button("primary_button")
            .map_err(|e| eyre!("Layout is missing the primary button: {}", e))?;
        let rotation = SENSOR_LAYOUT
            .axis("rotation")
            .map_err(|e| eyre!("Layout is missing the rotation axis: {}", e))?;
        debug!(
            "Resolved controls: primary button bit {}, rotation axis",
            PRIMARY_BUTTON_BIT
        );
        Ok(Self {
            primary,
            rotation,
            every: u64::from(tick_hz.max(1)),
            frames: 0,
        })
    }

    fn print(&mut self, runtime: &Runtime, report: FrameReport) {
        let Some(device) = runtime.device() else {
            return;
        };
        self.frames += 1;

        let sample = device.held_state();
        let rotation = self.rotation.read(&sample);
        let pressed = self.primary.is_pressed(&sample);
        if self.frames % self.every == 0 {
            info!(
                "Device {}: rotation {}, primary {}, {} tasks this frame",
                device.handle(),
                rotation,
                pressed,
                report.drain.executed
            );
        } else {
            debug!(
                "Device {}: rotation {}, primary {}",
                device.handle(),
                rotation,
                pressed
            );
        }
    }
}

fn setup_error_reporting() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: &str) {
    let parsed = level.parse::<Level>();
    FmtSubscriber::builder()
        .with_max_level(*parsed.as_ref().unwrap_or(&Level::INFO))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    if parsed.is_err() {
        warn!("Unknown log level '{}', using info", level);
    }
}
