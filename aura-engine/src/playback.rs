use std::collections::BTreeMap;

use aura_core::pcm::AudioBuffer;

use crate::traits::{AudioOutput, PlaybackId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    pub start_at: f64,
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Gapless, non-overlapping scheduling of agent audio on the output clock.
pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    next_start_time: f64,
    active: BTreeMap<PlaybackId, PlaybackHandle>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output: Some(output),
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Output clock in seconds. Zero once the device is closed.
    pub fn clock(&self) -> f64 {
        self.output.as_ref().map(|o| o.current_time()).unwrap_or(0.0)
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// End of the last scheduled buffer, or the current clock when idle.
    pub fn scheduled_until(&self) -> f64 {
        self.active
            .values()
            .map(PlaybackHandle::end_at)
            .fold(self.clock(), f64::max)
    }

    pub fn schedule(&mut self, buffer: &AudioBuffer) -> PlaybackHandle {
        let clock = self.clock();
        let start_at = self.next_start_time.max(clock);
        let duration = buffer.duration();

        let id = PlaybackId(self.next_id);
        self.next_id += 1;

        let handle = PlaybackHandle {
            id,
            start_at,
            duration,
        };
        self.next_start_time = start_at + duration;
        self.active.insert(id, handle);

        if let Some(output) = self.output.as_mut() {
            output.start(id, buffer, start_at);
        }

        handle
    }

    /// Returns true when this end emptied the active set.
    pub fn on_ended(&mut self, id: PlaybackId) -> bool {
        if self.active.remove(&id).is_none() {
            return false;
        }
        self.active.is_empty()
    }

    /// Returns true when something was actually playing.
    pub fn interrupt(&mut self) -> bool {
        let was_speaking = !self.active.is_empty();
        if let Some(output) = self.output.as_mut() {
            for id in self.active.keys() {
                output.stop(*id);
            }
        }
        self.active.clear();
        self.next_start_time = 0.0;
        was_speaking
    }

    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use approx::assert_abs_diff_eq;

    fn buffer(seconds: f64) -> AudioBuffer {
        let frames = (24_000.0 * seconds) as usize;
        AudioBuffer::mono(24_000, vec![0.0; frames])
    }

    #[test]
    fn late_offer_is_queued_after_previous_buffer() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out.clone()));

        let first = sched.schedule(&buffer(2.0));
        assert_abs_diff_eq!(first.start_at, 0.0);

        out.set_time(0.5);
        let second = sched.schedule(&buffer(1.0));
        assert_abs_diff_eq!(second.start_at, 2.0);
        assert_abs_diff_eq!(sched.next_start_time(), 3.0);
    }

    #[test]
    fn schedule_never_starts_in_the_past() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out.clone()));

        sched.schedule(&buffer(0.5));
        out.set_time(4.0);
        let h = sched.schedule(&buffer(0.5));
        assert_abs_diff_eq!(h.start_at, 4.0);
    }

    #[test]
    fn consecutive_buffers_do_not_overlap() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out.clone()));

        let mut prev_end = 0.0;
        for (i, secs) in [0.3, 0.7, 0.25, 1.1].into_iter().enumerate() {
            out.set_time(i as f64 * 0.1);
            let h = sched.schedule(&buffer(secs));
            assert!(h.start_at >= prev_end - 1e-9);
            prev_end = h.end_at();
        }

        let started = out.started();
        assert_eq!(started.len(), 4);
    }

    #[test]
    fn speaking_tracks_the_active_set() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out));

        let a = sched.schedule(&buffer(0.2));
        let b = sched.schedule(&buffer(0.2));
        assert!(sched.is_speaking());

        assert!(!sched.on_ended(a.id));
        assert!(sched.is_speaking());
        assert!(sched.on_ended(b.id));
        assert!(!sched.is_speaking());

        // Already removed.
        assert!(!sched.on_ended(b.id));
    }

    #[test]
    fn interrupt_on_empty_set_resets_cursor() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out));

        assert!(!sched.interrupt());
        assert_abs_diff_eq!(sched.next_start_time(), 0.0);
        assert!(!sched.is_speaking());
    }

    #[test]
    fn interrupt_stops_every_handle() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out.clone()));

        let a = sched.schedule(&buffer(1.0));
        let b = sched.schedule(&buffer(1.0));
        assert!(sched.interrupt());

        assert_eq!(out.stopped(), vec![a.id, b.id]);
        assert!(!sched.is_speaking());
        assert_abs_diff_eq!(sched.next_start_time(), 0.0);

        // Late end notifications for stopped handles are ignored.
        assert!(!sched.on_ended(a.id));
    }

    #[test]
    fn shutdown_closes_output_once() {
        let out = FakeOutput::new();
        let mut sched = PlaybackScheduler::new(Box::new(out.clone()));
        sched.schedule(&buffer(1.0));

        sched.shutdown();
        sched.shutdown();
        drop(sched);

        assert_eq!(out.close_count(), 1);
        assert_eq!(out.stopped().len(), 1);
    }
}
