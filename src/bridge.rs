//! Streaming bridge: relays EEG notifications from a headset to an LSL
//! outlet on a supervised background thread.
//!
//! `BridgeHandle` owns the thread. The thread runs its own current-thread
//! tokio runtime, reports startup completion through `Ready`, and stops
//! when the handle's cancellation token fires. `BridgeHandle::stop` (or
//! dropping the handle) cancels and joins it.
//!
//! `MuseBridge` is the production bridge: it connects to the headset over
//! GATT, subscribes to the four EEG characteristics, publishes an `EEG`
//! stream and pushes every assembled packet to it.

use std::future::Future;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bluer::{Address, Device, Session, gatt::remote::Characteristic};
use futures::{StreamExt, stream::select_all};
use lsl::ExPushable;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::{
    NUM_CHANNELS,
    comm::{
        CONTROL_CHARACTERISTIC, Command, EEG_SAMPLING_RATE, EegPacket, Electrode, MUSE_SERVICE,
        PacketAssembler, SAMPLES_PER_PACKET,
    },
    device::DeviceDescriptor,
    error::{Error, Result},
    transport::EEG_STREAM_TYPE,
};

/// Seconds of data the outlet keeps for slow consumers.
const OUTLET_MAX_BUFFERED: i32 = 360;

/// How long to wait for the headset's GATT services after connecting.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can start streaming from a device.
pub trait StreamingBridge {
    /// Starts the bridge for `device` on its own thread. The returned handle
    /// must be awaited with `BridgeHandle::wait_ready` before consuming.
    fn start(&self, device: &DeviceDescriptor) -> Result<BridgeHandle>;
}

/// Signals the supervising handle that the bridge finished starting up.
#[derive(Debug)]
pub struct Ready(oneshot::Sender<()>);

impl Ready {
    pub fn signal(self) {
        // The handle may already be gone; nothing to report to then
        let _ = self.0.send(());
    }
}

/// Supervises a bridge thread.
#[derive(Debug)]
pub struct BridgeHandle {
    cancel: CancellationToken,
    ready: Option<oneshot::Receiver<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl BridgeHandle {
    /// Spawns `task` on a new thread named `name` with its own tokio runtime.
    ///
    /// The task receives a `Ready` to signal once it is streaming and a
    /// cancellation token to watch. Dropping `Ready` unsignalled counts as
    /// a failed startup.
    pub fn spawn<F, Fut>(name: String, task: F) -> Result<BridgeHandle>
    where
        F: FnOnce(Ready, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let token = cancel.clone();
        let thread = thread::Builder::new().name(name).spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(task(Ready(ready_tx), token));
            match &result {
                Ok(()) => log::info!("Streaming bridge stopped"),
                Err(e) => log::error!("Streaming bridge failed: {e}"),
            }
            result
        })?;
        Ok(BridgeHandle {
            cancel,
            ready: Some(ready_rx),
            thread: Some(thread),
        })
    }

    /// Waits for the bridge to finish starting up.
    ///
    /// # Errors
    ///
    /// Returns the bridge's own error if it exited before signalling.
    pub async fn wait_ready(&mut self) -> Result<()> {
        let Some(ready) = self.ready.take() else {
            return Ok(());
        };
        if ready.await.is_ok() {
            return Ok(());
        }
        match self.join() {
            Err(e) => Err(e),
            Ok(()) => Err(Error::Bridge("exited during startup".to_string())),
        }
    }

    /// Returns `true` while the bridge thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels the bridge and waits for its thread to exit.
    pub fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Bridge("bridge thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            if let Err(e) = self.join() {
                log::warn!("Streaming bridge ended with error on drop: {e}");
            }
        }
    }
}

/// Configuration of the Muse bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bluetooth adapter to connect through; the default adapter if `None`.
    pub adapter: Option<String>,
    /// Name of the published stream. Default: "Muse".
    pub stream_name: String,
    /// Sensor preset sent before streaming starts, if any.
    pub preset: Option<u8>,
    /// Stop if no complete packet arrives for this long. Default: 3 seconds.
    pub data_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            stream_name: "Muse".to_string(),
            preset: None,
            data_timeout: Duration::from_secs(3),
        }
    }
}

/// Bridges a Muse headset to an LSL outlet.
#[derive(Debug, Clone, Default)]
pub struct MuseBridge {
    config: BridgeConfig,
}

impl MuseBridge {
    pub fn new(config: BridgeConfig) -> MuseBridge {
        MuseBridge { config }
    }
}

impl StreamingBridge for MuseBridge {
    fn start(&self, device: &DeviceDescriptor) -> Result<BridgeHandle> {
        let config = self.config.clone();
        let address = device.address;
        log::info!("Starting streaming bridge for {} ({address})", device.name);
        BridgeHandle::spawn(format!("muse-bridge-{address}"), move |ready, cancel| {
            stream(config, address, ready, cancel)
        })
    }
}

/// Body of the bridge thread.
async fn stream(
    config: BridgeConfig,
    address: Address,
    ready: Ready,
    cancel: CancellationToken,
) -> Result<()> {
    let session = Session::new().await?;
    let adapter = match &config.adapter {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    let device = adapter.device(address)?;
    if !device.is_connected().await? {
        log::info!("Connecting to {address}");
        device.connect().await?;
    }

    release_after(relay(&config, &device, address, ready, &cancel), async {
        device.disconnect().await.map_err(Error::from)
    })
    .await
}

/// Runs `session`, then `release` whether or not the session failed. A
/// release failure is logged; the session's outcome is returned.
async fn release_after<T>(
    session: impl Future<Output = Result<T>>,
    release: impl Future<Output = Result<()>>,
) -> Result<T> {
    let result = session.await;
    if let Err(e) = release.await {
        log::warn!("Failed to release headset: {e}");
    }
    result
}

/// Subscribes to the connected headset and relays its packets until
/// cancelled or the data stops.
async fn relay(
    config: &BridgeConfig,
    device: &Device,
    address: Address,
    ready: Ready,
    cancel: &CancellationToken,
) -> Result<()> {
    let (control, electrodes) = find_characteristics(device).await?;
    let outlet = create_outlet(config, address)?;

    let mut notifications = Vec::with_capacity(NUM_CHANNELS);
    for (electrode, characteristic) in Electrode::ALL.into_iter().zip(&electrodes) {
        let values = characteristic.notify().await?;
        notifications.push(values.map(move |bytes| (electrode, bytes)).boxed_local());
    }
    let mut notifications = select_all(notifications);

    if let Some(preset) = config.preset {
        control.write(&Command::Preset(preset).encode()).await?;
    }
    control.write(&Command::Resume.encode()).await?;
    log::info!("Streaming EEG from {address}");
    ready.signal();

    let mut assembler = PacketAssembler::new();
    let mut deadline = Instant::now() + config.data_timeout;
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = sleep_until(deadline) => {
                break Err(Error::Bridge(format!(
                    "no data received for {:.1}s",
                    config.data_timeout.as_secs_f64()
                )));
            }
            next = notifications.next() => {
                let Some((electrode, bytes)) = next else {
                    break Err(Error::Bridge("notification streams ended".to_string()));
                };
                let packet = match EegPacket::parse(electrode, &bytes) {
                    Ok(packet) => packet,
                    Err(e) => {
                        log::warn!("{e}");
                        continue;
                    }
                };
                if let Some(rows) = assembler.push(packet) {
                    if let Err(e) = push_rows(&outlet, &rows) {
                        break Err(e);
                    }
                    deadline = Instant::now() + config.data_timeout;
                }
            }
        }
    };

    if let Err(e) = control.write(&Command::Halt.encode()).await {
        log::warn!("Failed to halt streaming: {e}");
    }
    if assembler.dropped() > 0 {
        log::info!("Dropped {} incomplete packets", assembler.dropped());
    }
    result
}

/// Locates the control characteristic and the four EEG characteristics,
/// the latter in channel order.
async fn find_characteristics(
    device: &Device,
) -> Result<(Characteristic, [Characteristic; NUM_CHANNELS])> {
    let deadline = Instant::now() + SERVICES_RESOLVE_TIMEOUT;
    while !device.is_services_resolved().await? {
        if Instant::now() >= deadline {
            return Err(Error::Bridge("GATT services were not resolved".to_string()));
        }
        sleep(Duration::from_millis(100)).await;
    }

    let mut control = None;
    let mut electrodes: [Option<Characteristic>; NUM_CHANNELS] = Default::default();
    for service in device.services().await? {
        if service.uuid().await? != MUSE_SERVICE {
            continue;
        }
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if uuid == CONTROL_CHARACTERISTIC {
                control = Some(characteristic);
            } else if let Some(electrode) = Electrode::from_characteristic(uuid) {
                electrodes[electrode.index()] = Some(characteristic);
            }
        }
    }

    let control =
        control.ok_or_else(|| Error::Bridge("control characteristic not found".to_string()))?;
    let mut found = Vec::with_capacity(NUM_CHANNELS);
    for (electrode, characteristic) in Electrode::ALL.into_iter().zip(electrodes) {
        found.push(characteristic.ok_or_else(|| {
            Error::Bridge(format!("{} characteristic not found", electrode.label()))
        })?);
    }
    let electrodes = found
        .try_into()
        .map_err(|_| Error::Bridge("unexpected characteristic count".to_string()))?;
    Ok((control, electrodes))
}

/// Declares the EEG stream and makes it visible on the network.
fn create_outlet(config: &BridgeConfig, address: Address) -> Result<lsl::StreamOutlet> {
    let mut info = lsl::StreamInfo::new(
        &config.stream_name,
        EEG_STREAM_TYPE,
        NUM_CHANNELS as u32,
        EEG_SAMPLING_RATE,
        lsl::ChannelFormat::Float32,
        &format!("Muse{address}"),
    )?;
    info.desc().append_child_value("manufacturer", "Muse");
    let mut channels = info.desc().append_child("channels");
    for electrode in Electrode::ALL {
        channels
            .append_child("channel")
            .append_child_value("label", electrode.label())
            .append_child_value("unit", "microvolts")
            .append_child_value("type", EEG_STREAM_TYPE);
    }
    Ok(lsl::StreamOutlet::new(
        &info,
        SAMPLES_PER_PACKET as i32,
        OUTLET_MAX_BUFFERED,
    )?)
}

/// Pushes a packet's rows, stamping the newest with the local clock and
/// back-dating the rest by one sampling period each.
fn push_rows(outlet: &lsl::StreamOutlet, rows: &[[f32; NUM_CHANNELS]]) -> Result<()> {
    let now = lsl::local_clock();
    for (stamp, row, last) in sample_stamps(now, rows) {
        outlet.push_sample_ex(&row.to_vec(), stamp, last)?;
    }
    Ok(())
}

/// Pairs each row with its timestamp and whether it is the newest.
fn sample_stamps(
    now: f64,
    rows: &[[f32; NUM_CHANNELS]],
) -> impl Iterator<Item = (f64, &[f32; NUM_CHANNELS], bool)> {
    let newest = rows.len().saturating_sub(1);
    rows.iter().enumerate().map(move |(i, row)| {
        let age = (newest - i) as f64 / EEG_SAMPLING_RATE;
        (now - age, row, i == newest)
    })
}
