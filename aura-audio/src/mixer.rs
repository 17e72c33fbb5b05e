//! Software mixer that gives the output device a clock.
//!
//! The device callback pulls frames through `render`; everything else
//! (`start`, `stop`, `current_time`) is driven by the session.

use aura_engine::traits::PlaybackId;
use tokio::sync::mpsc;

struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

pub struct Mixer {
    sample_rate_hz: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<PlaybackId>,
}

impl Mixer {
    pub fn new(sample_rate_hz: u32, ended: mpsc::UnboundedSender<PlaybackId>) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
            ended,
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate_hz as f64
    }

    /// `samples` must already be at the mixer's rate. A start time in the past
    /// plays from the next rendered frame.
    pub fn start(&mut self, id: PlaybackId, samples: Vec<f32>, start_at: f64) {
        let requested = (start_at.max(0.0) * self.sample_rate_hz as f64).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame: requested.max(self.frames_rendered),
            samples,
        });
    }

    /// Remove without an end notification.
    pub fn stop(&mut self, id: PlaybackId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub fn stop_all(&mut self) {
        self.voices.clear();
    }

    /// Mix the next `out.len()` mono frames.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let block_start = self.frames_rendered;
        let block_end = block_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            if from >= to {
                continue;
            }
            let src = &voice.samples[(from - voice.start_frame) as usize..(to - voice.start_frame) as usize];
            let dst = &mut out[(from - block_start) as usize..(to - block_start) as usize];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.frames_rendered = block_end;

        let ended = &self.ended;
        self.voices.retain(|v| {
            if v.end_frame() <= block_end {
                let _ = ended.send(v.id);
                false
            } else {
                true
            }
        });
    }
}
