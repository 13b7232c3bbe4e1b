use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use wave_capture_core::{
    BufferId, CaptureConfig, CaptureDelegate, CaptureEngine, CaptureError, DataChunk,
    DeviceSelector, EngineState, SimulatedBackend, SimulatedController, WaveFormat,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const DEVICE: DeviceSelector = DeviceSelector::Id(0);

/// 8-bit mono, so one sample is one byte.
const FORMAT: WaveFormat = WaveFormat::PCM_8KHZ_8BIT_MONO;

#[derive(Default)]
struct Recorded {
    chunks: Vec<DataChunk>,
    errors: Vec<CaptureError>,
    states: Vec<EngineState>,
}

#[derive(Default)]
struct RecordingDelegate {
    recorded: Mutex<Recorded>,
    changed: Condvar,
    /// Number of upcoming chunks to panic on instead of recording.
    panics_remaining: AtomicUsize,
}

impl RecordingDelegate {
    fn wait_for_chunks(&self, count: usize) -> Vec<DataChunk> {
        let deadline = Instant::now() + TIMEOUT;
        let mut recorded = self.recorded.lock();
        while recorded.chunks.len() < count {
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                break;
            }
        }
        recorded.chunks.clone()
    }

    fn wait_for_errors(&self, count: usize) -> Vec<CaptureError> {
        let deadline = Instant::now() + TIMEOUT;
        let mut recorded = self.recorded.lock();
        while recorded.errors.len() < count {
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                break;
            }
        }
        recorded.errors.clone()
    }

    fn chunks(&self) -> Vec<DataChunk> {
        self.recorded.lock().chunks.clone()
    }

    fn states(&self) -> Vec<EngineState> {
        self.recorded.lock().states.clone()
    }
}

impl CaptureDelegate for RecordingDelegate {
    fn on_data_ready(&self, chunk: DataChunk) {
        let panicking = self
            .panics_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("consumer failed on chunk {}", chunk.sequence);
        }
        self.recorded.lock().chunks.push(chunk);
        self.changed.notify_all();
    }

    fn on_state_changed(&self, state: &EngineState) {
        self.recorded.lock().states.push(state.clone());
        self.changed.notify_all();
    }

    fn on_error(&self, error: &CaptureError) {
        self.recorded.lock().errors.push(error.clone());
        self.changed.notify_all();
    }
}

fn config(buffer_size_samples: usize, queue_depth: usize) -> CaptureConfig {
    CaptureConfig {
        buffer_size_samples,
        queue_depth,
        wait_poll_ms: 10,
        drain_poll_ms: 50,
        ..Default::default()
    }
}

fn open_engine(
    config: CaptureConfig,
) -> (
    CaptureEngine<SimulatedBackend>,
    SimulatedController,
    Arc<RecordingDelegate>,
) {
    let backend = SimulatedBackend::new(2);
    let controller = backend.controller(DEVICE).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    let mut engine = CaptureEngine::with_config(backend, config).unwrap();
    engine.set_delegate(delegate.clone());
    engine.open(DEVICE, FORMAT).unwrap();
    (engine, controller, delegate)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn ten_full_completions_at_depth_four() {
    let (mut engine, controller, delegate) = open_engine(config(64, 4));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(4, TIMEOUT));

    for _ in 0..10 {
        assert!(controller.wait_for_in_flight(1, TIMEOUT));
        assert!(controller.complete_next(64).is_some());
        assert!(controller.max_in_flight() <= 4);
    }

    let chunks = delegate.wait_for_chunks(10);
    assert_eq!(chunks.len(), 10);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence, i as u64);
        assert_eq!(chunk.len(), 64);
        // The simulated driver stamps each buffer with its completion index.
        assert!(chunk.data.iter().all(|&b| b == i as u8));
    }

    assert!(controller.wait_for_in_flight(4, TIMEOUT));
    engine.stop().unwrap();
    assert_eq!(controller.max_in_flight(), 4);

    let stats = engine.stats();
    assert!(stats.peak_outstanding <= 4);
    assert_eq!(stats.chunks_delivered, 10);
    // The four buffers still at the device come back empty on reset.
    assert_eq!(stats.completions_drained, 14);
    assert_eq!(stats.empty_completions, 4);
    assert_eq!(delegate.chunks().len(), 10);
}

#[test]
fn reset_returns_partial_and_empty_buffers() {
    let mut config = config(64, 2);
    config.deliver_empty_chunks = true;
    let (mut engine, controller, delegate) = open_engine(config);

    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    assert!(controller.record(&[7u8; 10]));

    engine.stop().unwrap();

    let chunks = delegate.chunks();
    let sizes: Vec<usize> = chunks.iter().map(DataChunk::len).collect();
    assert_eq!(sizes, vec![10, 0]);
    assert_eq!(chunks[0].data, vec![7u8; 10]);

    let stats = engine.stats();
    assert_eq!(stats.completions_drained, 2);
    assert_eq!(stats.empty_completions, 1);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(controller.in_flight(), 0);
}

#[test]
fn empty_completions_are_not_delivered_by_default() {
    let (mut engine, controller, delegate) = open_engine(config(64, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    assert!(controller.record(&[1u8; 10]));

    engine.stop().unwrap();

    let sizes: Vec<usize> = delegate.chunks().iter().map(DataChunk::len).collect();
    assert_eq!(sizes, vec![10]);
    assert_eq!(engine.stats().completions_drained, 2);
}

#[test]
fn completions_drained_after_stop_can_be_silenced() {
    let mut config = config(16, 2);
    config.notify_during_drain = false;
    let (mut engine, controller, delegate) = open_engine(config);

    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    assert!(controller.record(&[3u8; 16]));
    engine.stop().unwrap();

    assert!(delegate.chunks().is_empty());
    assert_eq!(engine.stats().completions_drained, 2);
}

#[test]
fn delayed_completions_never_exceed_depth() {
    let (mut engine, controller, _delegate) = open_engine(config(32, 3));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(3, TIMEOUT));

    // Nothing completes; the loop must not submit more.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(controller.in_flight(), 3);
    assert_eq!(controller.submitted_total(), 3);

    assert!(controller.complete_next(32).is_some());
    assert!(wait_until(|| controller.submitted_total() == 4));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.max_in_flight(), 3);

    engine.stop().unwrap();
}

#[test]
fn stop_drains_every_outstanding_buffer() {
    let (mut engine, controller, delegate) = open_engine(config(32, 6));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(6, TIMEOUT));

    for _ in 0..2 {
        controller.complete_next(32).unwrap();
    }
    delegate.wait_for_chunks(2);
    assert!(controller.wait_for_in_flight(6, TIMEOUT));

    engine.stop().unwrap();

    let stats = engine.stats();
    assert_eq!(controller.in_flight(), 0);
    assert_eq!(stats.outstanding, 0);
    // Two normal completions, six from the reset.
    assert_eq!(stats.completions_drained, 8);
    assert_eq!(controller.resets(), 1);
}

#[test]
fn stop_is_idempotent() {
    let (mut engine, controller, delegate) = open_engine(config(32, 2));
    assert!(engine.stop().is_ok());
    assert_eq!(controller.resets(), 0);

    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    engine.stop().unwrap();
    let states_after_first = delegate.states();

    assert!(engine.stop().is_ok());
    assert_eq!(controller.resets(), 1);
    assert_eq!(delegate.states(), states_after_first);
    assert_eq!(engine.state(), EngineState::Open);
}

#[test]
fn buffers_are_conserved_across_cycles() {
    let (mut engine, controller, delegate) = open_engine(config(16, 4));

    let mut delivered = 0;
    for cycle in 0..3 {
        engine.start().unwrap();
        assert!(controller.wait_for_in_flight(4, TIMEOUT));
        for _ in 0..=cycle {
            assert!(controller.wait_for_in_flight(1, TIMEOUT));
            controller.complete_next(16).unwrap();
            delivered += 1;
        }
        delegate.wait_for_chunks(delivered);
        engine.stop().unwrap();
        assert_eq!(controller.in_flight(), 0);
    }

    let stats = engine.stats();
    assert_eq!(stats.buffers_allocated, 4);

    engine.close().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_released);
    assert_eq!(stats.live_buffers(), 0);
}

#[test]
fn lifecycle_sequencing_errors() {
    let backend = SimulatedBackend::new(1).accepting(|f| f.bits_per_sample == 8);
    let controller = backend.controller(DEVICE).unwrap();
    let mut engine = CaptureEngine::with_config(backend, config(16, 2)).unwrap();

    assert_eq!(engine.start(), Err(CaptureError::NotOpen));
    assert_eq!(engine.open(DeviceSelector::Id(1), FORMAT), Err(CaptureError::DeviceUnavailable));
    assert_eq!(
        engine.open(DEVICE, WaveFormat::PCM_44KHZ_16BIT_MONO),
        Err(CaptureError::UnsupportedFormat)
    );
    assert!(!controller.is_open());

    engine.open(DEVICE, FORMAT).unwrap();
    assert_eq!(engine.open(DEVICE, FORMAT), Err(CaptureError::AlreadyOpen));

    engine.start().unwrap();
    assert_eq!(engine.start(), Err(CaptureError::AlreadyStarted));
    assert_eq!(engine.close(), Err(CaptureError::StillRunning));
    assert_eq!(engine.configure(config(32, 2)), Err(CaptureError::AlreadyStarted));

    engine.stop().unwrap();
    engine.close().unwrap();
    assert!(!controller.is_open());
    assert_eq!(engine.state(), EngineState::Closed);
    assert!(engine.close().is_ok());
    assert_eq!(engine.start(), Err(CaptureError::NotOpen));
}

#[test]
fn invalid_configuration_fails_before_device_interaction() {
    let (mut engine, controller, _delegate) = open_engine(config(16, 2));
    let bad = CaptureConfig {
        queue_depth: 0,
        ..config(16, 2)
    };
    assert!(matches!(
        engine.configure(bad),
        Err(CaptureError::InvalidConfiguration(_))
    ));
    assert_eq!(engine.config().queue_depth, 2);
    assert_eq!(controller.submitted_total(), 0);

    assert!(matches!(
        CaptureEngine::with_config(SimulatedBackend::new(1), config(0, 2)),
        Err(CaptureError::InvalidConfiguration(_))
    ));
}

#[test]
fn reconfigured_depth_applies_on_next_start() {
    let (mut engine, controller, _delegate) = open_engine(config(16, 4));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(4, TIMEOUT));
    engine.stop().unwrap();

    engine.configure(config(16, 2)).unwrap();
    assert_eq!(engine.stats().live_buffers(), 2);

    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.in_flight(), 2);
    engine.stop().unwrap();
}

#[test]
fn submit_failure_is_fatal_and_cleanup_still_works() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    let fault = CaptureError::DeviceIo("bus error".into());
    controller.fail_next_submit(fault.clone());

    engine.start().unwrap();
    assert!(wait_until(|| engine.state().is_failed()));
    assert_eq!(engine.state(), EngineState::Failed(fault.clone()));
    assert!(delegate.wait_for_errors(1).contains(&fault));

    assert!(matches!(engine.start(), Err(CaptureError::EngineFailed(_))));
    assert!(engine.stop().is_ok());
    assert!(engine.stop().is_ok());
    assert!(engine.close().is_ok());
    assert_eq!(engine.state(), EngineState::Closed);

    let stats = engine.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_released);
}

#[test]
fn fatal_error_while_streaming_with_broken_reset() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    controller.fail_next_submit(CaptureError::DeviceIo("unplugged".into()));
    controller.fail_next_reset(CaptureError::DeviceIo("unplugged".into()));
    controller.complete_next(16).unwrap();

    assert!(wait_until(|| engine.state().is_failed()));
    assert_eq!(delegate.wait_for_chunks(1).len(), 1);

    // A failed engine can be closed directly; it is stopped first.
    assert!(engine.close().is_ok());
    assert!(!controller.is_open());
    let stats = engine.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_released);
}

#[test]
fn device_refusing_to_start_leaves_engine_open() {
    let (mut engine, controller, _delegate) = open_engine(config(16, 3));
    controller.fail_next_start(CaptureError::DeviceIo("busy".into()));

    assert_eq!(engine.start(), Err(CaptureError::DeviceIo("busy".into())));
    assert_eq!(engine.state(), EngineState::Open);
    assert!(!engine.is_running());
    assert_eq!(controller.in_flight(), 0);
    assert_eq!(engine.stats().outstanding, 0);

    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(3, TIMEOUT));
    engine.stop().unwrap();
}

#[test]
fn bad_completion_does_not_stall_the_stream() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    // Driver claims more bytes than the buffer holds.
    controller.complete_next(1000).unwrap();
    let errors = delegate.wait_for_errors(1);
    assert_eq!(
        errors[0],
        CaptureError::BufferOverrun {
            recorded: 1000,
            capacity: 16
        }
    );

    // Completion for a buffer the device never had.
    controller.complete_spurious(BufferId::from_raw(999), 4);
    let errors = delegate.wait_for_errors(2);
    assert!(matches!(errors[1], CaptureError::InvalidBuffer(_)));

    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    controller.complete_next(16).unwrap();
    let chunks = delegate.wait_for_chunks(1);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 16);
    assert!(engine.state().is_capturing());

    engine.stop().unwrap();
    assert_eq!(engine.stats().rejected_completions, 2);
}

#[test]
fn stop_while_driver_thread_streams() {
    let (mut engine, controller, delegate) = open_engine(config(16, 4));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(4, TIMEOUT));

    let done = Arc::new(AtomicBool::new(false));
    let driver = {
        let controller = controller.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                if controller.complete_next(16).is_none() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    delegate.wait_for_chunks(20);
    engine.stop().unwrap();
    done.store(true, Ordering::SeqCst);
    driver.join().unwrap();

    assert_eq!(controller.in_flight(), 0);
    let chunks = delegate.chunks();
    assert!(chunks.len() >= 20);
    assert!(chunks
        .iter()
        .enumerate()
        .all(|(i, chunk)| chunk.sequence == i as u64));
    assert!(controller.max_in_flight() <= 4);
}

#[test]
fn state_transitions_are_reported() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    engine.stop().unwrap();
    engine.close().unwrap();

    assert_eq!(
        delegate.states(),
        vec![
            EngineState::Open,
            EngineState::Capturing,
            EngineState::Stopping,
            EngineState::Open,
            EngineState::Closed,
        ]
    );
}

#[test]
fn dropping_a_running_engine_releases_the_device() {
    let (mut engine, controller, _delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    drop(engine);
    assert!(!controller.is_open());
    assert_eq!(controller.in_flight(), 0);
}

#[test]
fn early_completion_for_held_buffer_is_rejected() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    // Buffer 0 is still at the device.
    controller.complete_spurious(BufferId::from_raw(0), 4);
    let errors = delegate.wait_for_errors(1);
    assert!(matches!(errors[0], CaptureError::InvalidBuffer(_)));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.in_flight(), 2);
    assert_eq!(controller.submitted_total(), 2);
    assert_eq!(engine.stats().outstanding, 2);

    for _ in 0..3 {
        assert!(controller.wait_for_in_flight(2, TIMEOUT));
        controller.complete_next(16).unwrap();
    }
    assert_eq!(delegate.wait_for_chunks(3).len(), 3);
    assert_eq!(controller.max_in_flight(), 2);

    engine.stop().unwrap();
    engine.close().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.rejected_completions, 1);
    assert_eq!(stats.buffers_allocated, 2);
    assert_eq!(stats.buffers_allocated, stats.buffers_released);
}

#[test]
fn refused_reclaim_is_fatal_and_retried_on_drain() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    let fault = CaptureError::DeviceIo("unprepare failed".into());
    controller.fail_next_reclaim(fault.clone());
    controller.complete_next(16).unwrap();

    assert!(wait_until(|| engine.state().is_failed()));
    assert_eq!(engine.state(), EngineState::Failed(fault.clone()));
    assert!(delegate.wait_for_errors(1).contains(&fault));

    engine.stop().unwrap();
    assert_eq!(controller.in_flight(), 0);
    assert_eq!(controller.max_in_flight(), 2);
    assert_eq!(controller.submitted_total(), 2);

    let stats = engine.stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.completions_drained, 2);
    // The refused buffer came back on retry and was still delivered.
    assert_eq!(delegate.chunks().len(), 1);

    engine.close().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_released);
}

#[test]
fn oversized_buffers_are_rejected_before_the_device_opens() {
    let backend = SimulatedBackend::new(1);
    let controller = backend.controller(DEVICE).unwrap();
    let huge = CaptureConfig {
        buffer_size_samples: usize::MAX,
        queue_depth: 1,
        ..Default::default()
    };
    let mut engine = CaptureEngine::with_config(backend, huge).unwrap();

    assert!(matches!(
        engine.open(DEVICE, WaveFormat::PCM_44KHZ_16BIT_STEREO),
        Err(CaptureError::InvalidConfiguration(_))
    ));
    assert!(!controller.is_open());
    assert_eq!(
        engine.open(DEVICE, WaveFormat::pcm(u32::MAX, 16, 2)),
        Err(CaptureError::UnsupportedFormat)
    );

    engine.configure(config(16, 2)).unwrap();
    engine.open(DEVICE, WaveFormat::PCM_44KHZ_16BIT_STEREO).unwrap();
    let too_long = CaptureConfig {
        buffer_size_samples: (u32::MAX as usize) / 4 + 1,
        ..config(16, 2)
    };
    assert!(matches!(
        engine.configure(too_long),
        Err(CaptureError::InvalidConfiguration(_))
    ));
    assert_eq!(engine.config().buffer_size_samples, 16);
}

#[test]
fn panicking_delegate_only_loses_its_chunk() {
    let (mut engine, controller, delegate) = open_engine(config(16, 2));
    delegate.panics_remaining.store(1, Ordering::SeqCst);
    engine.start().unwrap();
    assert!(controller.wait_for_in_flight(2, TIMEOUT));

    controller.complete_next(16).unwrap();
    let errors = delegate.wait_for_errors(1);
    assert!(matches!(errors[0], CaptureError::DelegatePanicked(_)));
    assert!(engine.state().is_capturing());

    assert!(controller.wait_for_in_flight(2, TIMEOUT));
    controller.complete_next(16).unwrap();
    let chunks = delegate.wait_for_chunks(1);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 16);

    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Open);
    let stats = engine.stats();
    assert_eq!(stats.chunks_delivered, 1);
    assert_eq!(stats.rejected_completions, 1);
    assert_eq!(stats.outstanding, 0);
}
