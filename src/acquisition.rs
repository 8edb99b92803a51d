//! Acquisition setup: find a headset, start its streaming bridge and attach
//! a consumer to the stream it publishes.

use crate::{
    MAX_CHUNK_LEN,
    bridge::{BridgeHandle, StreamingBridge},
    config::Config,
    device::{DeviceDescriptor, DeviceDiscovery},
    error::{Error, Result},
    transport::{Consumer, EEG_STREAM_TYPE, Transport},
};

/// Everything the display loop needs, plus the running bridge.
#[derive(Debug)]
pub struct Acquisition<C> {
    /// Consumer attached to the EEG stream
    pub consumer: C,
    /// Nominal sampling rate of the stream in Hz
    pub sampling_rate: u32,
    /// Producer-to-consumer clock offset negotiated at attachment, in seconds
    pub time_correction: f64,
    /// The headset being streamed
    pub device: DeviceDescriptor,
    /// The bridge publishing the stream; stop it when done
    pub bridge: BridgeHandle,
}

/// Connects to the first discovered headset and attaches to its EEG stream.
///
/// The bridge is started only once a device is known, and the stream is
/// only resolved after the bridge reports it is streaming.
///
/// # Errors
///
/// * `Error::NoDeviceFound` - discovery returned no devices.
/// * `Error::StreamNotFound` - no EEG stream was advertised in time.
/// * Any error raised by discovery, the bridge or the transport.
pub async fn connect<D, B, T>(
    discovery: &D,
    bridge: &B,
    transport: &T,
    config: &Config,
) -> Result<Acquisition<T::Consumer>>
where
    D: DeviceDiscovery,
    B: StreamingBridge,
    T: Transport,
{
    let device = discovery
        .list_devices()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::NoDeviceFound)?;
    log::info!("Using {} ({})", device.name, device.address);

    let mut handle = bridge.start(&device)?;
    handle.wait_ready().await?;

    let streams = transport.resolve(EEG_STREAM_TYPE, config.resolve_timeout)?;
    let stream = streams.first().ok_or(Error::StreamNotFound)?;

    println!("Start acquiring data");
    let mut consumer = transport.open(stream, MAX_CHUNK_LEN)?;
    let time_correction = consumer.time_correction()?;
    log::debug!("Time correction: {time_correction:.6}s");
    let sampling_rate = consumer.nominal_srate()? as u32;
    log::info!("Sampling rate: {sampling_rate} Hz");

    Ok(Acquisition {
        consumer,
        sampling_rate,
        time_correction,
        device,
        bridge: handle,
    })
}
