//! Playback - timing, the dispatch loop and the player that owns the output
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{Sequence, SequenceIter};
use crate::config::PlayerConfig;
use crate::midi::{self, MidiSink, TimedOutput};

/// Source of playback-relative time.
pub trait TimeSource {
    /// Seconds since the source started.
    fn elapsed(&self) -> f64;

    fn sleep(&self, duration: Duration);

    fn elapsed_ms(&self) -> u64 {
        (self.elapsed() * 1000.0) as u64
    }
}

/// Monotonic wall clock. Clones share the same origin, so the transport
/// and the dispatch loop agree on what "now" is.
#[derive(Debug, Clone)]
pub struct Clock {
    base: Instant,
    origin_ns: Arc<AtomicU64>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            origin_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the origin to now, for every clone.
    pub fn restart(&self) {
        let now = self.base.elapsed().as_nanos() as u64;
        self.origin_ns.store(now, Ordering::SeqCst);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for Clock {
    fn elapsed(&self) -> f64 {
        let now = self.base.elapsed().as_nanos() as u64;
        let origin = self.origin_ns.load(Ordering::SeqCst);
        now.saturating_sub(origin) as f64 * 1e-9
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Blocks until a target time by polling the time source.
pub struct Waiter<T: TimeSource> {
    clock: T,
    poll_interval: Duration,
    last_time: f64,
}

impl<T: TimeSource> Waiter<T> {
    pub fn new(clock: T, poll_interval: Duration) -> Self {
        Self {
            clock,
            poll_interval,
            last_time: 0.0,
        }
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn now(&self) -> f64 {
        self.clock.elapsed()
    }

    /// Return once `elapsed() >= time`. Prints a `.` for every whole second
    /// that passes while waiting.
    pub fn wait_until(&mut self, time: f64) {
        let mut now = self.clock.elapsed();
        self.last_time = self.last_time.min(now);
        while now < time {
            self.clock.sleep(self.poll_interval);
            now = self.clock.elapsed();
            self.tick_progress(now);
        }
    }

    /// Like [`wait_until`](Self::wait_until), but gives up when `cancel` is
    /// set. Returns whether the target time was reached.
    pub fn wait_until_or_cancel(&mut self, time: f64, cancel: &AtomicBool) -> bool {
        let mut now = self.clock.elapsed();
        self.last_time = self.last_time.min(now);
        while now < time {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            self.clock.sleep(self.poll_interval);
            now = self.clock.elapsed();
            self.tick_progress(now);
        }
        true
    }

    fn tick_progress(&mut self, now: f64) {
        if now.trunc() > self.last_time.trunc() {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, ".");
            let _ = stdout.flush();
            self.last_time = now;
        }
    }
}

/// Walk the sequence in real time, writing each translated event to the
/// sink once its time has come. Returns the last time processed.
pub fn dispatch<S, T>(seq: &Sequence, sink: &mut S, waiter: &mut Waiter<T>) -> anyhow::Result<f64>
where
    S: MidiSink + ?Sized,
    T: TimeSource,
{
    let mut last_time = 0.0;
    for (event, note_on) in seq.iter() {
        let next_time = SequenceIter::effective_time(event, note_on);
        waiter.wait_until(next_time);
        midi::send_event(sink, event, note_on)?;
        last_time = next_time;
    }
    Ok(last_time)
}

/// An open output plus the clock it is driven by.
pub struct Player {
    output: TimedOutput,
    waiter: Waiter<Clock>,
    drain: Duration,
}

impl Player {
    pub fn open(config: &PlayerConfig) -> anyhow::Result<Self> {
        let clock = Clock::new();
        let output = TimedOutput::open(config, clock.clone())?;
        Ok(Self {
            output,
            waiter: Waiter::new(clock, config.poll_interval),
            drain: config.drain,
        })
    }

    pub fn port_name(&self) -> &str {
        self.output.port_name()
    }

    /// Play the whole sequence from time zero, then keep the output open
    /// long enough for buffered messages to go out.
    pub fn play(&mut self, seq: &Sequence) -> anyhow::Result<()> {
        log::info!(
            "Playing {} events ({:.2}s) on '{}'",
            seq.len(),
            seq.end_time(),
            self.output.port_name()
        );
        // Leftovers from an earlier pass are stamped against the old origin.
        self.output.flush();
        self.waiter.clock().restart();
        let last_time = dispatch(seq, &mut self.output, &mut self.waiter)?;
        log::debug!("last event at {:.3}s", last_time);
        let drain_until = self.waiter.now() + self.drain.as_secs_f64();
        self.waiter.wait_until(drain_until);
        Ok(())
    }

    pub fn close(self) {
        self.output.close();
    }
}

/// Play a sequence on the configured output. If the output cannot be
/// opened nothing is played; failures are only logged at debug level.
pub fn seq_play(seq: &Sequence, config: &PlayerConfig) {
    let mut player = match Player::open(config) {
        Ok(player) => player,
        Err(e) => {
            log::debug!("Skipping playback: {:#}", e);
            return;
        }
    };
    if let Err(e) = player.play(seq) {
        log::debug!("Playback stopped: {:#}", e);
    }
    player.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiMessage;
    use crate::sequencer::Parameter;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Clock that only moves when slept on.
    #[derive(Clone)]
    struct ManualClock {
        now_ms: Rc<Cell<u64>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now_ms: Rc::new(Cell::new(0)),
            }
        }
    }

    impl TimeSource for ManualClock {
        fn elapsed(&self) -> f64 {
            self.now_ms.get() as f64 / 1000.0
        }

        fn sleep(&self, duration: Duration) {
            self.now_ms.set(self.now_ms.get() + duration.as_millis() as u64);
        }
    }

    /// Sink that records the clock reading at each write.
    struct StampingSink {
        clock: ManualClock,
        written: Vec<(u64, MidiMessage)>,
    }

    impl MidiSink for StampingSink {
        fn write_short(&mut self, msg: MidiMessage) -> anyhow::Result<()> {
            self.written.push((self.clock.now_ms.get(), msg));
            Ok(())
        }
    }

    struct FailingSink;

    impl MidiSink for FailingSink {
        fn write_short(&mut self, _msg: MidiMessage) -> anyhow::Result<()> {
            anyhow::bail!("device gone")
        }
    }

    #[test]
    fn test_wait_until_zero_returns_immediately() {
        let clock = ManualClock::new();
        let mut waiter = Waiter::new(clock.clone(), Duration::from_millis(1));
        waiter.wait_until(0.0);
        assert_eq!(clock.now_ms.get(), 0);
    }

    #[test]
    fn test_wait_until_past_time_returns_immediately() {
        let clock = ManualClock::new();
        clock.now_ms.set(2000);
        let mut waiter = Waiter::new(clock.clone(), Duration::from_millis(1));
        waiter.wait_until(1.0);
        assert_eq!(clock.now_ms.get(), 2000);
    }

    #[test]
    fn test_wait_until_never_returns_early() {
        let clock = ManualClock::new();
        let mut waiter = Waiter::new(clock.clone(), Duration::from_millis(1));
        waiter.wait_until(1.5);
        assert!(waiter.now() >= 1.5);
        assert_eq!(clock.now_ms.get(), 1500);
    }

    #[test]
    fn test_wait_until_with_real_clock() {
        let mut waiter = Waiter::new(Clock::new(), Duration::from_millis(1));
        waiter.wait_until(0.02);
        assert!(waiter.now() >= 0.02);
    }

    #[test]
    fn test_wait_until_or_cancel() {
        let clock = ManualClock::new();
        let mut waiter = Waiter::new(clock.clone(), Duration::from_millis(1));
        let cancel = AtomicBool::new(true);
        assert!(!waiter.wait_until_or_cancel(1.0, &cancel));
        assert_eq!(clock.now_ms.get(), 0);

        cancel.store(false, Ordering::SeqCst);
        assert!(waiter.wait_until_or_cancel(0.25, &cancel));
        assert!(waiter.now() >= 0.25);
    }

    #[test]
    fn test_clock_restart_shares_origin() {
        let clock = Clock::new();
        let other = clock.clone();
        thread::sleep(Duration::from_millis(20));
        assert!(other.elapsed() >= 0.02);
        clock.restart();
        assert!(other.elapsed() < 0.02);
    }

    #[test]
    fn test_dispatch_writes_each_message_on_time() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 0.5);
        seq.add_update(0, 0.25, -1, Parameter::real("control7", 1.0));
        seq.add_update(0, 0.3, -1, Parameter::real("foo", 1.0));

        let clock = ManualClock::new();
        let mut sink = StampingSink {
            clock: clock.clone(),
            written: Vec::new(),
        };
        let mut waiter = Waiter::new(clock, Duration::from_millis(1));
        let last = dispatch(&seq, &mut sink, &mut waiter).unwrap();

        assert_eq!(last, 0.5);
        let stamps: Vec<(u64, u64, u8)> = sink
            .written
            .iter()
            .map(|(at, m)| (*at, m.timestamp, m.status))
            .collect();
        assert_eq!(
            stamps,
            vec![(0, 0, 0x90), (250, 250, 0xB0), (500, 500, 0x90)]
        );
        assert!(sink.written.iter().all(|(at, m)| *at >= m.timestamp));
    }

    #[test]
    fn test_dispatch_empty_sequence() {
        let clock = ManualClock::new();
        let mut sink: Vec<MidiMessage> = Vec::new();
        let mut waiter = Waiter::new(clock, Duration::from_millis(1));
        let last = dispatch(&Sequence::new(), &mut sink, &mut waiter).unwrap();
        assert_eq!(last, 0.0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_dispatch_stops_on_sink_error() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 1.0);
        let mut waiter = Waiter::new(ManualClock::new(), Duration::from_millis(1));
        let err = dispatch(&seq, &mut FailingSink, &mut waiter).unwrap_err();
        assert!(err.to_string().contains("device gone"));
    }

    #[test]
    fn test_seq_play_without_matching_port_is_a_no_op() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 10.0, 10.0);
        let config = PlayerConfig::new().with_port("no such port \u{1F3B9}");
        let started = Instant::now();
        seq_play(&seq, &config);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
