//! Consumer side of the Lab Streaming Layer transport.
//!
//! `Transport` resolves advertised streams and opens consumers on them;
//! `Consumer` negotiates time correction, reads metadata and pulls chunks.
//! `LslTransport` implements both over the `lsl` crate. LSL calls are
//! synchronous and block the calling thread for at most their timeout.

use std::time::Duration;

use lsl::Pullable;

use crate::{
    NUM_CHANNELS,
    error::{Error, Result},
};

/// Content type of the streams this crate consumes.
pub const EEG_STREAM_TYPE: &str = "EEG";

/// Seconds of backlog an inlet buffers if the consumer stalls.
const MAX_BUFFERED_SECS: i32 = 360;

/// Timeout for metadata and time-correction queries.
const QUERY_TIMEOUT: f64 = 5.0;

/// A bounded batch of consecutive samples with their timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// One row per sample, one value per channel
    pub samples: Vec<[f32; NUM_CHANNELS]>,
    /// Timestamp of each row, in the producer's clock
    pub timestamps: Vec<f64>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn push(&mut self, row: [f32; NUM_CHANNELS], timestamp: f64) {
        self.samples.push(row);
        self.timestamps.push(timestamp);
    }
}

/// Something that advertises streams and attaches consumers to them.
pub trait Transport {
    /// Opaque description of an advertised stream.
    type Stream;
    type Consumer: Consumer;

    /// Resolves the streams of content type `stream_type`, waiting up to
    /// `timeout` for at least one to appear.
    fn resolve(&self, stream_type: &str, timeout: Duration) -> Result<Vec<Self::Stream>>;

    /// Opens a consumer that receives at most `max_chunklen` samples per
    /// transmitted chunk.
    fn open(&self, stream: &Self::Stream, max_chunklen: usize) -> Result<Self::Consumer>;
}

/// A live connection to one stream.
pub trait Consumer {
    /// Negotiates the offset between producer and consumer clocks in seconds.
    fn time_correction(&mut self) -> Result<f64>;

    /// The producer-declared sampling rate in Hz.
    fn nominal_srate(&mut self) -> Result<f64>;

    /// Waits up to `timeout` for data and returns at most `max_samples`
    /// rows. An empty chunk means the wait timed out.
    fn pull_chunk(&mut self, timeout: Duration, max_samples: usize) -> Result<Chunk>;
}

/// LSL transport over the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct LslTransport;

impl Transport for LslTransport {
    type Stream = lsl::StreamInfo;
    type Consumer = LslConsumer;

    fn resolve(&self, stream_type: &str, timeout: Duration) -> Result<Vec<lsl::StreamInfo>> {
        log::debug!("Resolving LSL streams with type={stream_type:?}");
        let streams = lsl::resolve_byprop("type", stream_type, 1, timeout.as_secs_f64())?;
        if streams.len() > 1 {
            log::warn!(
                "Multiple {stream_type} streams found ({}), using first match",
                streams.len()
            );
        }
        Ok(streams)
    }

    fn open(&self, stream: &lsl::StreamInfo, max_chunklen: usize) -> Result<LslConsumer> {
        let channel_count = stream.channel_count().max(0) as usize;
        if channel_count < NUM_CHANNELS {
            return Err(Error::ChannelCount {
                expected: NUM_CHANNELS,
                found: channel_count,
            });
        }
        log::info!(
            "Opening inlet on '{}' ({} channels, {} Hz)",
            stream.stream_name(),
            channel_count,
            stream.nominal_srate()
        );
        let inlet = lsl::StreamInlet::new(stream, MAX_BUFFERED_SECS, max_chunklen as i32, true)?;
        Ok(LslConsumer { inlet })
    }
}

/// Consumer backed by an `lsl::StreamInlet`.
pub struct LslConsumer {
    inlet: lsl::StreamInlet,
}

impl Consumer for LslConsumer {
    fn time_correction(&mut self) -> Result<f64> {
        Ok(self.inlet.time_correction(QUERY_TIMEOUT)?)
    }

    fn nominal_srate(&mut self) -> Result<f64> {
        Ok(self.inlet.info(QUERY_TIMEOUT)?.nominal_srate())
    }

    fn pull_chunk(&mut self, timeout: Duration, max_samples: usize) -> Result<Chunk> {
        let mut chunk = Chunk::default();
        // Block only for the first sample, then drain what is already queued
        let mut wait = timeout.as_secs_f64();
        while chunk.len() < max_samples {
            let (sample, timestamp): (Vec<f32>, f64) = self.inlet.pull_sample(wait)?;
            // A zero timestamp means nothing arrived before the timeout
            if timestamp == 0.0 {
                break;
            }
            chunk.push(to_row(&sample)?, timestamp);
            wait = 0.0;
        }
        Ok(chunk)
    }
}

/// Takes the first four channels of a sample.
fn to_row(sample: &[f32]) -> Result<[f32; NUM_CHANNELS]> {
    sample
        .get(..NUM_CHANNELS)
        .and_then(|head| head.try_into().ok())
        .ok_or(Error::ChannelCount {
            expected: NUM_CHANNELS,
            found: sample.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_row_truncates_extra_channels() {
        let row = to_row(&[1.0, 2.0, 3.0, 4.0, 99.0]).unwrap();
        assert_eq!(row, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_to_row_rejects_short_sample() {
        let err = to_row(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelCount {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn test_chunk_push_keeps_timestamps_parallel() {
        let mut chunk = Chunk::default();
        assert!(chunk.is_empty());
        chunk.push([0.0; NUM_CHANNELS], 1.5);
        chunk.push([1.0; NUM_CHANNELS], 1.6);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.timestamps, vec![1.5, 1.6]);
    }
}
