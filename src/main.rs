use color_eyre::{eyre::eyre, Result};
use joybus::backend::{DeviceBackend, GilrsBackend, VirtualBackend, VirtualDeviceSpec};
use joybus::config::{AppConfig, BackendKind};
use joybus::device::{JoystickOffset, PovState};
use joybus::{ControllerEvent, ControllerHandle, ControllersChangedEvent, EventHub};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = setup(config_path)?;

    let hub = EventHub::new();
    subscribe_console(&hub);

    let (backend, demo) = create_backend(config.backend)?;
    info!("Initializing controller with {} backend", config.backend);
    let controller = ControllerHandle::spawn(backend, &hub, Some(config.controller.clone()), None)
        .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;

    println!();
    println!("Press controller buttons or move hats (last axis movement will be reported).");
    println!("Press Ctrl-C to exit ...");
    println!();

    let demo_task = demo.map(|backend| tokio::spawn(run_demo(backend)));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Some(task) = demo_task {
        task.abort();
    }
    controller.shutdown();
    Ok(())
}

fn setup(config_path: Option<PathBuf>) -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = AppConfig::load(config_path.as_deref())?;
    if !joybus::logging::init_console(&config.logging) {
        warn!("A tracing subscriber was already installed");
    }
    Ok(config)
}

fn create_backend(
    kind: BackendKind,
) -> Result<(Arc<dyn DeviceBackend>, Option<VirtualBackend>)> {
    match kind {
        BackendKind::Gilrs => {
            let backend =
                GilrsBackend::new().map_err(|e| eyre!("Failed to start gilrs backend: {}", e))?;
            Ok((Arc::new(backend), None))
        }
        BackendKind::Virtual => {
            let backend = VirtualBackend::new();
            Ok((Arc::new(backend.clone()), Some(backend)))
        }
    }
}

// Prints button and hat events together with the latest axis movement
fn subscribe_console(hub: &EventHub) {
    let last_axis: Arc<Mutex<Option<ControllerEvent>>> = Arc::new(Mutex::new(None));

    hub.subscribe(move |_, event: &ControllerEvent| {
        if event.is_axis() {
            *last_axis.lock() = Some(event.clone());
            return;
        }
        println!("{}", event);
        if let Some(axis) = last_axis.lock().take() {
            println!("{}", axis);
        }
    });

    hub.subscribe(|_, event: &ControllersChangedEvent| {
        println!("Controller un/plugged. New count: {}", event.count());
        for device in &event.devices {
            println!("  {}", device);
        }
    });
}

// Drives one virtual pad so the virtual backend has something to show
async fn run_demo(backend: VirtualBackend) {
    let pad = backend.plug(VirtualDeviceSpec::waitable_gamepad("Virtual Pad", 10, 1, 2));
    let hats = [PovState::Up, PovState::Right, PovState::Down, PovState::Left];
    let mut interval = tokio::time::interval(Duration::from_millis(750));
    let mut step: usize = 0;

    loop {
        interval.tick().await;
        let button = (step % 10) as u8;
        pad.move_axis(JoystickOffset::X, ((step * 4096) % 65536) as i32);
        pad.press(button);
        pad.release(button);
        pad.set_pov(0, hats[step % hats.len()]);
        step += 1;
    }
}
