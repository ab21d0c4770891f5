use std::path::PathBuf;

use clap::{ArgAction, Parser};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use usb_power_controller::config::Config;
use usb_power_controller::hub::{PortPower, SimulatedHub, UsbHub};
use usb_power_controller::logging::setup_logging;
use usb_power_controller::mqtt::{MqttConfig, MqttService};
use usb_power_controller::power::{PowerState, UsbPowerController};

const SIMULATED_PORTS: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "usb-power-controller")]
#[command(
    version,
    disable_version_flag = true,
    about = "Control the power output of the usb hub (Raspberry Pi)",
    after_help = "Not really a switch. Really a relay."
)]
struct Args {
    /// Config file used to launch the daemon. Copy example.toml and adjust it.
    #[arg(short, long, value_name = "PATH", default_value = "example.toml")]
    config: PathBuf,

    /// Log level filter (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(short, long, value_name = "LEVEL", default_value = "debug")]
    log_level: String,

    /// Run against an in-memory hub instead of USB hardware
    #[arg(long)]
    simulate: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup()?;

    let config = Config::load(&args.config)
        .wrap_err_with(|| format!("Error parsing the config file {}", args.config.display()))?;

    let _log_guard =
        setup_logging(&config.general, &args.log_level).wrap_err("Failed to setup logging")?;
    info!("USB power controller v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file successfully loaded");

    info!("Initializing USB power controller handler...");
    let hub: Box<dyn PortPower> = if args.simulate {
        info!("Simulating a USB hub with {} ports", SIMULATED_PORTS);
        Box::new(SimulatedHub::new(SIMULATED_PORTS, PowerState::On))
    } else {
        Box::new(
            UsbHub::open(config.general.hub_location.as_deref())
                .wrap_err("Failed to open USB hub")?,
        )
    };
    let controller =
        UsbPowerController::new(hub).wrap_err("Failed to initialize USB power controller")?;
    info!("USB power controller handler successfully initialized");

    let service = MqttService::create(MqttConfig::from_config(&config), controller);

    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(shutdown.clone());

    let mut running = service.connect();
    let result = running.run(shutdown).await;

    match &result {
        Ok(()) => {
            info!("USB power controller stopped by keyboard input. Cleaning up and exiting...")
        }
        Err(e) => {
            error!("{}", e);
            error!("Unrecoverable error in the MQTT loop. Quitting...");
        }
    }

    running.stop().await.cleanup();
    result.wrap_err("MQTT loop failed")
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn spawn_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.cancel(),
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });
}
