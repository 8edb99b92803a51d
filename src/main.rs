//! muselive: live terminal plot of a Muse headset's EEG.
//!
//! Run with no arguments to stream from the first headset found; press
//! Ctrl-C, `q` or Esc to stop.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;

use muselive::{
    acquisition::{self, Acquisition},
    bridge::MuseBridge,
    chart::TerminalChart,
    config::Config,
    device::DeviceDiscovery,
    display::{self, Interrupt, RunOutcome},
    transport::LslTransport,
};

#[derive(Parser, Debug)]
#[command(name = "muselive")]
#[command(version)]
#[command(about = "Stream a Muse headset's EEG over LSL and plot it live", long_about = None)]
struct Cli {
    /// Bluetooth adapter to use (default adapter if omitted)
    #[arg(long)]
    adapter: Option<String>,

    /// Only consider devices whose name contains this text
    #[arg(long, default_value = "Muse")]
    name: String,

    /// Seconds to scan for devices
    #[arg(long, default_value = "10.5")]
    scan_timeout: f64,

    /// Seconds to wait for the EEG stream to be advertised
    #[arg(long, default_value = "5")]
    resolve_timeout: f64,

    /// Seconds of history shown in the plot
    #[arg(long, default_value = "5")]
    window: f64,

    /// Sensor preset sent to the headset before streaming (e.g. 21)
    #[arg(long)]
    preset: Option<u8>,

    /// Name of the published LSL stream
    #[arg(long, default_value = "Muse")]
    stream_name: String,

    /// Stop streaming if the headset sends nothing for this many seconds
    #[arg(long, default_value = "3")]
    data_timeout: f64,

    /// List nearby devices and exit
    #[arg(long)]
    list: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::default()
            .with_name_filter(self.name.clone())
            .with_scan_timeout(seconds("--scan-timeout", self.scan_timeout)?)
            .with_resolve_timeout(seconds("--resolve-timeout", self.resolve_timeout)?)
            .with_window(seconds("--window", self.window)?)
            .with_stream_name(self.stream_name.clone())
            .with_data_timeout(seconds("--data-timeout", self.data_timeout)?);
        if let Some(adapter) = &self.adapter {
            config = config.with_adapter(adapter.clone());
        }
        if let Some(preset) = self.preset {
            config = config.with_preset(preset);
        }
        config.validate()?;
        Ok(config)
    }
}

fn seconds(flag: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {flag}: {value}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level.as_str())).init();
    let config = cli.config()?;

    let interrupt = Interrupt::new();
    interrupt
        .install_handler()
        .context("failed to install Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if cli.list {
        let devices = runtime.block_on(config.device.list_devices())?;
        if devices.is_empty() {
            println!("No devices found.");
        }
        for device in devices {
            println!("{}\t{}", device.address, device.name);
        }
        return Ok(());
    }

    let transport = LslTransport;
    let muse_bridge = MuseBridge::new(config.bridge.clone());
    let Acquisition {
        mut consumer,
        sampling_rate,
        bridge,
        ..
    } = runtime.block_on(acquisition::connect(
        &config.device,
        &muse_bridge,
        &transport,
        &config,
    ))?;

    let outcome = display::run(
        &transport,
        &mut consumer,
        sampling_rate,
        || TerminalChart::open(interrupt.clone()),
        &interrupt,
        &config,
    );

    drop(consumer);
    if let Err(e) = bridge.stop() {
        log::warn!("{e}");
    }

    match outcome? {
        RunOutcome::Interrupted { samples, redraws } => {
            log::info!("Received {samples} samples, {redraws} redraws");
        }
        RunOutcome::StreamMissing => {}
    }
    Ok(())
}
