//! Gapless, ordered playback scheduling with interrupt-flush.
//!
//! The scheduler owns two pieces of state:
//!
//! - the playback cursor: the next free slot on the sink timeline. Never
//!   behind the sink's current time when read after a call; advances by each
//!   chunk's duration as chunks are scheduled.
//! - the active voice set: every scheduled, not-yet-finished handle. A voice
//!   leaves the set exactly once: pruned after the sink marks it finished,
//!   or drained by `interrupt()`.
//!
//! Both are mutated only from the session's run loop, so no locking here.

use crate::codec::PlaybackChunk;
use crate::error::SessionError;

use super::sink::{OutputSink, PlaybackHandle};

pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    cursor: f64,
    active: Vec<PlaybackHandle>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            cursor: 0.0,
            active: Vec::new(),
        }
    }

    /// Schedule a chunk directly after the last one, or immediately when
    /// playback has drained (underrun), never in the past.
    pub fn schedule(&mut self, chunk: PlaybackChunk) -> Result<(), SessionError> {
        self.prune_finished();

        let t_now = self.sink.now();
        if self.cursor < t_now {
            log::debug!(
                "playback underrun: cursor {:.3}s behind sink time {:.3}s",
                self.cursor,
                t_now
            );
            self.cursor = t_now;
        }

        let duration = chunk.duration;
        let handle = self.sink.schedule(chunk, self.cursor)?;
        log::debug!(
            "scheduled voice {} at {:.3}s for {:.3}s",
            handle.id(),
            self.cursor,
            duration
        );
        self.cursor += duration;
        self.active.push(handle);
        Ok(())
    }

    /// Barge-in: stop every active voice and reset the cursor so the next
    /// chunk starts immediately instead of after stale queued audio.
    pub fn interrupt(&mut self) {
        let flushed = self.active.len();
        for handle in self.active.drain(..) {
            self.sink.stop(&handle);
        }
        self.cursor = self.sink.now();
        if flushed > 0 {
            log::info!("interrupted playback, flushed {} voices", flushed);
        }
    }

    /// Flush and release the sink. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        self.sink.close();
    }

    /// Next free slot on the sink timeline.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of scheduled, not-yet-finished voices.
    pub fn active_voices(&mut self) -> usize {
        self.prune_finished();
        self.active.len()
    }

    // Naturally completed voices remove themselves from the set
    fn prune_finished(&mut self) {
        self.active.retain(|handle| !handle.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockSink;

    fn chunk(duration: f64) -> PlaybackChunk {
        let sample_rate = 24000u32;
        let samples = vec![0i16; (duration * sample_rate as f64) as usize];
        PlaybackChunk {
            samples,
            sample_rate,
            duration,
        }
    }

    #[test]
    fn consecutive_chunks_are_gapless() {
        let (sink, state) = MockSink::new(0.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(chunk(0.25)).unwrap();
        scheduler.schedule(chunk(0.1)).unwrap();
        scheduler.schedule(chunk(0.4)).unwrap();

        let scheduled = state.lock().unwrap().scheduled.clone();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(scheduled[0].start, 0.0);
        assert!((scheduled[1].start - 0.25).abs() < 1e-9);
        assert!((scheduled[2].start - 0.35).abs() < 1e-9);
        assert!((scheduler.cursor() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn underrun_resets_cursor_to_sink_time() {
        let (sink, state) = MockSink::new(0.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(chunk(0.25)).unwrap();
        // Playback drained: sink time has moved past the cursor
        state.lock().unwrap().now = 1.0;
        scheduler.schedule(chunk(0.25)).unwrap();

        let scheduled = state.lock().unwrap().scheduled.clone();
        assert!((scheduled[1].start - 1.0).abs() < 1e-9);
        assert!((scheduler.cursor() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn half_second_chunk_at_ten_seconds() {
        let (sink, state) = MockSink::new(10.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        assert_eq!(scheduler.active_voices(), 0);
        scheduler.schedule(chunk(0.5)).unwrap();

        let scheduled = state.lock().unwrap().scheduled.clone();
        assert!((scheduled[0].start - 10.0).abs() < 1e-9);
        assert!((scheduler.cursor() - 10.5).abs() < 1e-9);
    }

    #[test]
    fn interrupt_stops_everything_and_resets_cursor() {
        let (sink, state) = MockSink::new(11.5);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(chunk(0.25)).unwrap();
        scheduler.schedule(chunk(0.25)).unwrap();
        assert_eq!(scheduler.active_voices(), 2);
        assert!((scheduler.cursor() - 12.0).abs() < 1e-9);

        state.lock().unwrap().now = 11.6;
        scheduler.interrupt();

        assert_eq!(scheduler.active_voices(), 0);
        assert!((scheduler.cursor() - 11.6).abs() < 1e-9);
        let stopped = state.lock().unwrap().stopped.clone();
        assert_eq!(stopped.len(), 2);
    }

    #[test]
    fn finished_voice_leaves_the_active_set() {
        let (sink, state) = MockSink::new(0.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(chunk(0.25)).unwrap();
        assert_eq!(scheduler.active_voices(), 1);

        state.lock().unwrap().handles[0].mark_finished();
        assert_eq!(scheduler.active_voices(), 0);
        // Natural completion, not a stop
        assert!(state.lock().unwrap().stopped.is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let (sink, state) = MockSink::new(0.0);
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(chunk(0.25)).unwrap();
        scheduler.close();
        scheduler.close();

        assert!(state.lock().unwrap().closed);
        assert_eq!(scheduler.active_voices(), 0);
    }
}
