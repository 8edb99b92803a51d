//! muselive discovers a Muse headset over Bluetooth, bridges its EEG
//! channels to a Lab Streaming Layer stream, and plots the four channels
//! live in the terminal.
//!
//! Setup (`acquisition::connect`) finds the headset, starts the streaming
//! bridge and attaches a consumer to the published stream. The display loop
//! (`display::run`) then pulls chunks from the consumer and redraws the
//! chart until interrupted.

pub mod acquisition;
pub mod bridge;
pub mod buffer;
pub mod chart;
pub mod comm;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod transport;

use std::time::Duration;

pub use error::{Error, Result};

/// Number of EEG channels streamed and plotted.
pub const NUM_CHANNELS: usize = 4;

/// Maximum number of samples per chunk, both requested from the transport
/// and pulled per iteration of the display loop.
pub const MAX_CHUNK_LEN: usize = 12;

/// How long a single pull waits for data.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after every redraw so the chart can refresh.
pub const REDRAW_PAUSE: Duration = Duration::from_millis(10);

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bluer::Address;

    use crate::acquisition::connect;
    use crate::bridge::{BridgeHandle, StreamingBridge};
    use crate::buffer::ChannelBuffers;
    use crate::config::Config;
    use crate::device::{DeviceDescriptor, DeviceDiscovery};
    use crate::display::{ChartSurface, Interrupt, RunOutcome, run};
    use crate::transport::{Chunk, Consumer, Transport};

    struct MockDiscovery(Vec<DeviceDescriptor>);

    impl DeviceDiscovery for MockDiscovery {
        async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
            Ok(self.0.clone())
        }
    }

    /// Records which devices a bridge was started for.
    #[derive(Default)]
    struct MockBridge {
        started: Arc<std::sync::Mutex<Vec<Address>>>,
    }

    impl StreamingBridge for MockBridge {
        fn start(&self, device: &DeviceDescriptor) -> Result<BridgeHandle> {
            self.started.lock().unwrap().push(device.address);
            BridgeHandle::spawn("mock-bridge".to_string(), |ready, cancel| async move {
                ready.signal();
                cancel.cancelled().await;
                Ok(())
            })
        }
    }

    /// Scripted consumer: each pull pops the next chunk, and an exhausted
    /// script triggers the interrupt and times out.
    #[derive(Debug)]
    struct MockConsumer {
        srate: f64,
        pulls: VecDeque<Chunk>,
        pull_count: Rc<RefCell<usize>>,
        interrupt: Interrupt,
    }

    impl Consumer for MockConsumer {
        fn time_correction(&mut self) -> Result<f64> {
            Ok(0.0125)
        }

        fn nominal_srate(&mut self) -> Result<f64> {
            Ok(self.srate)
        }

        fn pull_chunk(&mut self, timeout: std::time::Duration, max_samples: usize) -> Result<Chunk> {
            assert_eq!(timeout, PULL_TIMEOUT);
            assert_eq!(max_samples, MAX_CHUNK_LEN);
            *self.pull_count.borrow_mut() += 1;
            match self.pulls.pop_front() {
                Some(chunk) => Ok(chunk),
                None => {
                    self.interrupt.trigger();
                    Ok(Chunk::default())
                }
            }
        }
    }

    struct MockTransport {
        streams: usize,
        resolves: AtomicUsize,
        opened_with: RefCell<Option<usize>>,
        script: RefCell<Option<MockConsumer>>,
    }

    impl MockTransport {
        fn new(streams: usize, consumer: MockConsumer) -> MockTransport {
            MockTransport {
                streams,
                resolves: AtomicUsize::new(0),
                opened_with: RefCell::new(None),
                script: RefCell::new(Some(consumer)),
            }
        }
    }

    impl Transport for MockTransport {
        type Stream = usize;
        type Consumer = MockConsumer;

        fn resolve(&self, stream_type: &str, _timeout: std::time::Duration) -> Result<Vec<usize>> {
            assert_eq!(stream_type, "EEG");
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.streams).collect())
        }

        fn open(&self, stream: &usize, max_chunklen: usize) -> Result<MockConsumer> {
            assert_eq!(*stream, 0);
            *self.opened_with.borrow_mut() = Some(max_chunklen);
            Ok(self.script.borrow_mut().take().expect("consumer opened twice"))
        }
    }

    /// Records the buffer length seen at every redraw.
    #[derive(Default)]
    struct MockChart {
        redraws: Rc<RefCell<Vec<usize>>>,
    }

    impl ChartSurface for MockChart {
        fn redraw(&mut self, buffers: &ChannelBuffers) -> Result<()> {
            self.redraws.borrow_mut().push(buffers.len());
            Ok(())
        }

        fn pause(&mut self, _duration: std::time::Duration) -> Result<()> {
            Ok(())
        }
    }

    fn muse(last: u8) -> DeviceDescriptor {
        DeviceDescriptor {
            name: format!("Muse-00{last:02X}"),
            address: Address::new([0x00, 0x55, 0xDA, 0xB0, 0x00, last]),
        }
    }

    fn consumer(srate: f64, pulls: Vec<Chunk>, interrupt: &Interrupt) -> MockConsumer {
        MockConsumer {
            srate,
            pulls: pulls.into(),
            pull_count: Rc::default(),
            interrupt: interrupt.clone(),
        }
    }

    fn chunk(samples: usize) -> Chunk {
        let mut chunk = Chunk::default();
        for i in 0..samples {
            let v = i as f32;
            chunk.push([v, v + 10.0, v + 20.0, v + 30.0], 100.0 + i as f64 / 256.0);
        }
        chunk
    }

    /// Scenario: one device found, bridge starts, stream resolves, consumer
    /// opened with 12-sample chunks and the advertised rate is returned.
    #[tokio::test]
    async fn test_connect_reports_stream_rate() {
        let interrupt = Interrupt::new();
        let discovery = MockDiscovery(vec![muse(1)]);
        let bridge = MockBridge::default();
        let transport = MockTransport::new(1, consumer(256.0, vec![], &interrupt));

        let acquisition = connect(&discovery, &bridge, &transport, &Config::default())
            .await
            .unwrap();

        assert_eq!(acquisition.sampling_rate, 256);
        assert_eq!(acquisition.time_correction, 0.0125);
        assert_eq!(acquisition.device, muse(1));
        assert_eq!(*transport.opened_with.borrow(), Some(MAX_CHUNK_LEN));
        assert_eq!(*bridge.started.lock().unwrap(), vec![muse(1).address]);
        assert!(acquisition.bridge.is_running());
        acquisition.bridge.stop().unwrap();
    }

    #[tokio::test]
    async fn test_connect_selects_first_device() {
        let interrupt = Interrupt::new();
        let discovery = MockDiscovery(vec![muse(7), muse(3), muse(9)]);
        let bridge = MockBridge::default();
        let transport = MockTransport::new(2, consumer(256.0, vec![], &interrupt));

        let acquisition = connect(&discovery, &bridge, &transport, &Config::default())
            .await
            .unwrap();

        assert_eq!(acquisition.device, muse(7));
        assert_eq!(*bridge.started.lock().unwrap(), vec![muse(7).address]);
    }

    /// Scenario: nothing discovered, so no bridge is ever started.
    #[tokio::test]
    async fn test_connect_without_devices_fails_before_bridge() {
        let interrupt = Interrupt::new();
        let bridge = MockBridge::default();
        let transport = MockTransport::new(1, consumer(256.0, vec![], &interrupt));

        let err = connect(&MockDiscovery(vec![]), &bridge, &transport, &Config::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoDeviceFound));
        assert!(bridge.started.lock().unwrap().is_empty());
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_without_stream_fails() {
        let interrupt = Interrupt::new();
        let bridge = MockBridge::default();
        let transport = MockTransport::new(0, consumer(256.0, vec![], &interrupt));

        let err = connect(&MockDiscovery(vec![muse(1)]), &bridge, &transport, &Config::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StreamNotFound));
        assert_eq!(err.to_string(), "Can't find EEG stream");
        assert!(transport.opened_with.borrow().is_none());
    }

    /// Scenario: three timed-out pulls then a 5-sample chunk grow every
    /// buffer from 0 to 5 with exactly one redraw.
    #[test]
    fn test_timeouts_skip_redraw() {
        let interrupt = Interrupt::new();
        let transport = MockTransport::new(1, consumer(256.0, vec![], &interrupt));
        let pulls = vec![Chunk::default(), Chunk::default(), Chunk::default(), chunk(5)];
        let mut consumer = consumer(256.0, pulls, &interrupt);
        let pull_count = consumer.pull_count.clone();
        let chart = MockChart::default();
        let redraws = chart.redraws.clone();

        let outcome = run(
            &transport,
            &mut consumer,
            256,
            || Ok(chart),
            &interrupt,
            &Config::default(),
        )
        .unwrap();

        assert_eq!(*redraws.borrow(), vec![5]);
        assert_eq!(*pull_count.borrow(), 5);
        assert_eq!(
            outcome,
            RunOutcome::Interrupted {
                samples: 5,
                redraws: 1
            }
        );
    }

    #[test]
    fn test_each_chunk_grows_buffers_by_its_length() {
        let interrupt = Interrupt::new();
        let transport = MockTransport::new(1, consumer(256.0, vec![], &interrupt));
        let pulls = vec![chunk(12), chunk(1), Chunk::default(), chunk(7)];
        let mut consumer = consumer(256.0, pulls, &interrupt);
        let chart = MockChart::default();
        let redraws = chart.redraws.clone();

        run(
            &transport,
            &mut consumer,
            256,
            || Ok(chart),
            &interrupt,
            &Config::default(),
        )
        .unwrap();

        assert_eq!(*redraws.borrow(), vec![12, 13, 20]);
    }

    /// Scenario: an interrupt ends the loop cleanly.
    #[test]
    fn test_interrupt_stops_loop() {
        let interrupt = Interrupt::new();
        let transport = MockTransport::new(1, consumer(256.0, vec![], &interrupt));
        let mut consumer = consumer(256.0, vec![chunk(3)], &interrupt);
        interrupt.trigger();

        let outcome = run(
            &transport,
            &mut consumer,
            256,
            || Ok(MockChart::default()),
            &interrupt,
            &Config::default(),
        )
        .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Interrupted {
                samples: 0,
                redraws: 0
            }
        );
        assert_eq!(*consumer.pull_count.borrow(), 0);
    }

    #[test]
    fn test_missing_stream_skips_chart() {
        let interrupt = Interrupt::new();
        let transport = MockTransport::new(0, consumer(256.0, vec![], &interrupt));
        let mut consumer = consumer(256.0, vec![chunk(3)], &interrupt);
        let opened = RefCell::new(false);

        let outcome = run(
            &transport,
            &mut consumer,
            256,
            || {
                *opened.borrow_mut() = true;
                Ok(MockChart::default())
            },
            &interrupt,
            &Config::default(),
        )
        .unwrap();

        assert_eq!(outcome, RunOutcome::StreamMissing);
        assert!(!*opened.borrow());
        assert_eq!(*consumer.pull_count.borrow(), 0);
        assert_eq!(transport.resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consumer_error_propagates() {
        struct FailingConsumer;

        impl Consumer for FailingConsumer {
            fn time_correction(&mut self) -> Result<f64> {
                Ok(0.0)
            }

            fn nominal_srate(&mut self) -> Result<f64> {
                Ok(256.0)
            }

            fn pull_chunk(&mut self, _: std::time::Duration, _: usize) -> Result<Chunk> {
                Err(Error::Io(std::io::Error::other("stream lost")))
            }
        }

        struct OneStream;

        impl Transport for OneStream {
            type Stream = ();
            type Consumer = FailingConsumer;

            fn resolve(&self, _: &str, _: std::time::Duration) -> Result<Vec<()>> {
                Ok(vec![()])
            }

            fn open(&self, _: &(), _: usize) -> Result<FailingConsumer> {
                Ok(FailingConsumer)
            }
        }

        let err = run(
            &OneStream,
            &mut FailingConsumer,
            256,
            || Ok(MockChart::default()),
            &Interrupt::new(),
            &Config::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }
}
