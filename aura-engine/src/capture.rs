use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aura_core::pcm::{UPSTREAM_MIME_TYPE, encode};

use crate::traits::{LiveTransport, SampleCallback};

const PROGRESS_LOG_EVERY: u64 = 100;

/// Re-frames arbitrary chunks into fixed-size frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_len: usize,
    buf: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            buf: Vec::with_capacity(frame_len),
        }
    }

    pub fn push(&mut self, mut samples: &[f32], mut on_frame: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.frame_len - self.buf.len()).min(samples.len());
            self.buf.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buf.len() == self.frame_len {
                on_frame(&self.buf);
                self.buf.clear();
            }
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStats {
    pub sent: u64,
    pub dropped: u64,
}

/// Microphone side of a session: frames, encodes, and forwards audio.
///
/// Runs on the capture device thread. Only takes short locks and never waits
/// on the network.
pub struct CapturePipeline {
    frames: Mutex<FrameAccumulator>,
    transport: Mutex<Option<Arc<dyn LiveTransport>>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl CapturePipeline {
    pub fn new(frame_len: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(FrameAccumulator::new(frame_len)),
            transport: Mutex::new(None),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn attach(&self, transport: Arc<dyn LiveTransport>) {
        if let Ok(mut slot) = self.transport.lock() {
            *slot = Some(transport);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.transport.lock() {
            *slot = None;
        }
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Callback to hand to the microphone.
    pub fn callback(self: &Arc<Self>) -> SampleCallback {
        let this = Arc::clone(self);
        Arc::new(move |samples: &[f32]| this.push_samples(samples))
    }

    pub fn push_samples(&self, samples: &[f32]) {
        let Ok(mut frames) = self.frames.lock() else {
            return;
        };
        frames.push(samples, |frame| self.forward(frame));
    }

    fn forward(&self, frame: &[f32]) {
        let transport = match self.transport.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        let delivered = match transport {
            Some(t) => t.try_send_audio(UPSTREAM_MIME_TYPE, encode(frame)),
            None => false,
        };

        if !delivered {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % PROGRESS_LOG_EVERY == 0 {
                log::debug!("capture: dropped {dropped} frame(s)");
            }
            return;
        }

        let sent = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if sent % PROGRESS_LOG_EVERY == 0 {
            log::debug!("capture: sent {sent} frames ({} samples each)", frame.len());
        }
    }
}
