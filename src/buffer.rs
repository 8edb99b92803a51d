//! Fixed-capacity per-channel sample history backing the live plot.

use std::collections::VecDeque;
use std::time::Duration;

use crate::{NUM_CHANNELS, comm::EEG_SAMPLING_RATE};

/// Samples per channel reserved up front; larger windows grow on demand.
const MAX_PREALLOC: usize = 4096;

/// Scrolling history of the last `capacity` samples of every channel.
///
/// Samples are appended in arrival order; once full, the oldest sample of
/// each channel is evicted for every new one. `total` counts every sample
/// ever appended so the plot's x axis can show absolute sample indices.
#[derive(Debug, Clone)]
pub struct ChannelBuffers {
    channels: [VecDeque<f32>; NUM_CHANNELS],
    capacity: usize,
    total: u64,
}

impl ChannelBuffers {
    /// Creates empty buffers holding at most `capacity` samples per channel.
    pub fn new(capacity: usize) -> ChannelBuffers {
        let capacity = capacity.max(1);
        ChannelBuffers {
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity.min(MAX_PREALLOC))),
            capacity,
            total: 0,
        }
    }

    /// Creates buffers sized to hold `window` worth of samples at `sampling_rate` Hz.
    ///
    /// Streams with an irregular rate report 0 Hz; those are sized as if
    /// they ran at the headset's native rate.
    pub fn for_window(sampling_rate: u32, window: Duration) -> ChannelBuffers {
        let rate = if sampling_rate == 0 {
            log::warn!(
                "Stream has no nominal sampling rate, sizing plot for {EEG_SAMPLING_RATE} Hz"
            );
            EEG_SAMPLING_RATE
        } else {
            f64::from(sampling_rate)
        };
        // Float-to-int casts saturate, so absurd windows cannot overflow
        let capacity = (rate * window.as_secs_f64()).ceil() as usize;
        ChannelBuffers::new(capacity)
    }

    /// Appends rows in order, evicting the oldest samples past capacity.
    pub fn extend(&mut self, rows: &[[f32; NUM_CHANNELS]]) {
        for row in rows {
            for (channel, &value) in self.channels.iter_mut().zip(row) {
                if channel.len() == self.capacity {
                    channel.pop_front();
                }
                channel.push_back(value);
            }
        }
        self.total += rows.len() as u64;
    }

    /// Samples of channel `index`, oldest first.
    pub fn channel(&self, index: usize) -> &VecDeque<f32> {
        &self.channels[index]
    }

    /// Number of samples currently held per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples appended since creation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Absolute sample index of the oldest retained sample.
    pub fn first_index(&self) -> u64 {
        self.total - self.len() as u64
    }
}
