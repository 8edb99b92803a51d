//! Provides the pieces of the Muse Bluetooth LE protocol needed to stream
//! EEG. It defines the GATT characteristics the headset exposes, the
//! control commands it accepts, the decoder for EEG notifications and an
//! assembler that merges per-electrode notifications into sample rows.
//!
//! # Enums
//!
//! - `Electrode`: The four EEG electrodes and their GATT characteristics.
//! - `Command`: Control commands written to the headset.
//!
//! # Structs
//!
//! - `EegPacket`: One decoded EEG notification (12 samples, one electrode).
//! - `PacketAssembler`: Merges notifications sharing a packet index into rows.
//!
//! # Example
//!
//! ```rust
//! use muselive::comm::{EegPacket, Electrode, PacketAssembler};
//!
//! let mut assembler = PacketAssembler::new();
//! let bytes = [0u8; 20];
//! for electrode in Electrode::ALL {
//!     let packet = EegPacket::parse(electrode, &bytes).unwrap();
//!     if let Some(rows) = assembler.push(packet) {
//!         assert_eq!(rows.len(), 12);
//!     }
//! }
//! ```
//!
//! # Errors
//!
//! `EegPacket::parse` returns `Error::Protocol` if a notification does not
//! have the expected length.

use bluer::Uuid;

use crate::{
    NUM_CHANNELS,
    error::{Error, Result},
};

/// Number of samples carried by a single EEG notification.
pub const SAMPLES_PER_PACKET: usize = 12;

/// Nominal EEG sampling rate of the headset in Hz.
pub const EEG_SAMPLING_RATE: f64 = 256.0;

/// Microvolts per raw ADC step.
const MICROVOLTS_PER_STEP: f32 = 0.48828125;

/// Raw ADC value corresponding to 0 uV.
const ADC_OFFSET: f32 = 2048.0;

/// Size of an EEG notification: packet index + 12 packed 12-bit samples.
const PACKET_LEN: usize = 2 + SAMPLES_PER_PACKET * 12 / 8;

/// Primary GATT service advertised by Muse headsets.
pub const MUSE_SERVICE: Uuid = Uuid::from_u128(0x0000fe8d_0000_1000_8000_00805f9b34fb);

/// Characteristic accepting control commands.
pub const CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x273e0001_4c4d_454d_96be_f03bac821358);

/// The four EEG electrodes streamed by the headset, in channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Electrode {
    /// Left ear
    Tp9 = 0,
    /// Left forehead
    Af7 = 1,
    /// Right forehead
    Af8 = 2,
    /// Right ear
    Tp10 = 3,
}

impl Electrode {
    /// All electrodes in channel order.
    pub const ALL: [Electrode; NUM_CHANNELS] =
        [Electrode::Tp9, Electrode::Af7, Electrode::Af8, Electrode::Tp10];

    /// Channel index of the electrode in a sample row.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Label published in the stream metadata.
    pub fn label(self) -> &'static str {
        match self {
            Electrode::Tp9 => "TP9",
            Electrode::Af7 => "AF7",
            Electrode::Af8 => "AF8",
            Electrode::Tp10 => "TP10",
        }
    }

    /// GATT characteristic notifying this electrode's samples.
    pub fn characteristic(self) -> Uuid {
        match self {
            Electrode::Tp9 => Uuid::from_u128(0x273e0003_4c4d_454d_96be_f03bac821358),
            Electrode::Af7 => Uuid::from_u128(0x273e0004_4c4d_454d_96be_f03bac821358),
            Electrode::Af8 => Uuid::from_u128(0x273e0005_4c4d_454d_96be_f03bac821358),
            Electrode::Tp10 => Uuid::from_u128(0x273e0006_4c4d_454d_96be_f03bac821358),
        }
    }

    /// Looks up the electrode notifying on `uuid`, if any.
    pub fn from_characteristic(uuid: Uuid) -> Option<Electrode> {
        Electrode::ALL
            .into_iter()
            .find(|electrode| electrode.characteristic() == uuid)
    }
}

/// Control commands understood by the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop streaming
    Halt,
    /// Start or resume streaming
    Resume,
    /// Select a sensor preset (e.g. 21)
    Preset(u8),
}

impl Command {
    /// Encodes the command as written to the control characteristic:
    /// a length byte, the ASCII command and a trailing newline.
    pub fn encode(self) -> Vec<u8> {
        let text = match self {
            Command::Halt => "h".to_string(),
            Command::Resume => "d".to_string(),
            Command::Preset(preset) => format!("p{preset}"),
        };
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.push((text.len() + 1) as u8);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

/// One decoded EEG notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EegPacket {
    /// Electrode the samples belong to
    pub electrode: Electrode,
    /// Rolling packet counter shared by all electrodes
    pub index: u16,
    /// Samples in microvolts, oldest first
    pub samples: [f32; SAMPLES_PER_PACKET],
}

impl EegPacket {
    /// Decodes a notification: a big-endian `u16` packet index followed by
    /// twelve unsigned 12-bit samples packed two per three bytes.
    pub fn parse(electrode: Electrode, bytes: &[u8]) -> Result<EegPacket> {
        if bytes.len() != PACKET_LEN {
            return Err(Error::Protocol(format!(
                "{} packet has {} bytes, expected {}",
                electrode.label(),
                bytes.len(),
                PACKET_LEN
            )));
        }
        let index = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mut samples = [0f32; SAMPLES_PER_PACKET];
        for (pair, triple) in bytes[2..].chunks_exact(3).enumerate() {
            let first = (u16::from(triple[0]) << 4) | (u16::from(triple[1]) >> 4);
            let second = (u16::from(triple[1] & 0x0F) << 8) | u16::from(triple[2]);
            samples[pair * 2] = to_microvolts(first);
            samples[pair * 2 + 1] = to_microvolts(second);
        }
        Ok(EegPacket {
            electrode,
            index,
            samples,
        })
    }
}

fn to_microvolts(raw: u16) -> f32 {
    MICROVOLTS_PER_STEP * (f32::from(raw) - ADC_OFFSET)
}

/// Merges per-electrode notifications that share a packet index into
/// rows of one value per channel.
///
/// The headset notifies each electrode separately. Once all four
/// electrodes of the current index have arrived, the rows are released.
/// A notification with a different index discards the incomplete set.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    index: Option<u16>,
    pending: [Option<[f32; SAMPLES_PER_PACKET]>; NUM_CHANNELS],
    dropped: u64,
}

impl PacketAssembler {
    pub fn new() -> PacketAssembler {
        PacketAssembler::default()
    }

    /// Adds a packet, returning the 12 assembled rows when the set for its
    /// index is complete.
    pub fn push(&mut self, packet: EegPacket) -> Option<Vec<[f32; NUM_CHANNELS]>> {
        if self.index != Some(packet.index) {
            if self.pending.iter().any(Option::is_some) {
                self.dropped += 1;
                log::debug!(
                    "Dropping incomplete EEG packet {:?} (next is {})",
                    self.index,
                    packet.index
                );
            }
            self.index = Some(packet.index);
            self.pending = [None; NUM_CHANNELS];
        }
        self.pending[packet.electrode.index()] = Some(packet.samples);

        if self.pending.iter().any(Option::is_none) {
            return None;
        }
        let channels = std::mem::take(&mut self.pending).map(|c| c.unwrap_or_default());
        self.index = None;
        Some(
            (0..SAMPLES_PER_PACKET)
                .map(|i| std::array::from_fn(|ch| channels[ch][i]))
                .collect(),
        )
    }

    /// Number of incomplete packet sets discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
