//! Live display loop: pulls chunks from a consumer into the per-channel
//! buffers and redraws the chart after every chunk until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{
    MAX_CHUNK_LEN, PULL_TIMEOUT, REDRAW_PAUSE,
    buffer::ChannelBuffers,
    config::Config,
    error::Result,
    transport::{Consumer, EEG_STREAM_TYPE, Transport},
};

/// Exit status of the process when interrupted outside the display loop.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// A drawing surface with one sub-plot per channel.
pub trait ChartSurface {
    /// Clears every sub-plot, plots its channel's buffer and flushes.
    fn redraw(&mut self, buffers: &ChannelBuffers) -> Result<()>;

    /// Yields for `duration` so the surface can refresh.
    fn pause(&mut self, duration: Duration) -> Result<()> {
        std::thread::sleep(duration);
        Ok(())
    }

    /// Processes pending user input without blocking.
    fn poll_events(&mut self) -> Result<()> {
        Ok(())
    }
}

/// User-initiated termination request.
///
/// Set by the process signal handler or by the chart surface when the user
/// asks to quit. Only honoured once armed by the display loop; before that
/// the signal handler terminates the process.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    triggered: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt::default()
    }

    /// Routes Ctrl-C / SIGINT to this flag.
    pub fn install_handler(&self) -> std::result::Result<(), ctrlc::Error> {
        let interrupt = self.clone();
        ctrlc::set_handler(move || {
            if interrupt.is_armed() {
                interrupt.trigger();
            } else {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        })
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

/// How the display loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pre-flight check found no EEG stream; nothing was drawn.
    StreamMissing,
    /// The user interrupted the loop.
    Interrupted {
        /// Samples received over the loop's lifetime
        samples: u64,
        /// Number of redraws performed
        redraws: u64,
    },
}

/// Returns `true` if an EEG stream is currently advertised.
pub fn stream_available<T: Transport>(transport: &T, config: &Config) -> Result<bool> {
    Ok(!transport
        .resolve(EEG_STREAM_TYPE, config.resolve_timeout)?
        .is_empty())
}

/// Runs the live plot until interrupted.
///
/// The chart is only created once the pre-flight stream check passes, and
/// is dropped (releasing the surface) before the termination notice is
/// printed.
///
/// # Errors
///
/// Any error from the transport, the consumer or the chart ends the loop
/// and is returned as is.
pub fn run<T, C, F>(
    transport: &T,
    consumer: &mut T::Consumer,
    sampling_rate: u32,
    open_chart: F,
    interrupt: &Interrupt,
    config: &Config,
) -> Result<RunOutcome>
where
    T: Transport,
    C: ChartSurface,
    F: FnOnce() -> Result<C>,
{
    if !stream_available(transport, config)? {
        log::error!("EEG stream disappeared before plotting");
        println!("Muse EEG stream not found.");
        return Ok(RunOutcome::StreamMissing);
    }

    interrupt.arm();
    let mut chart = open_chart()?;
    let mut buffers = ChannelBuffers::for_window(sampling_rate, config.window);
    log::debug!(
        "Plotting {} samples per channel at {sampling_rate} Hz",
        buffers.capacity()
    );

    let mut redraws = 0;
    while !interrupt.is_triggered() {
        chart.poll_events()?;
        if interrupt.is_triggered() {
            break;
        }
        let chunk = consumer.pull_chunk(PULL_TIMEOUT, MAX_CHUNK_LEN)?;
        if chunk.is_empty() {
            continue;
        }
        buffers.extend(&chunk.samples);
        chart.redraw(&buffers)?;
        redraws += 1;
        chart.pause(REDRAW_PAUSE)?;
    }

    drop(chart);
    println!("Live plot stopped.");
    Ok(RunOutcome::Interrupted {
        samples: buffers.total(),
        redraws,
    })
}
