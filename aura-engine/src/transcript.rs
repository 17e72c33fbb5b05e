use std::collections::BTreeMap;
use std::time::Duration;

use aura_core::types::{Message, MessageId};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Queued {
    Caption(String),
    TurnBoundary,
}

/// Pairs agent transcription with the audio it belongs to, so text appears
/// when the listener hears it rather than when it arrives.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    pending: String,
    // Ordered by (due, sequence); the sequence keeps arrival order among equal deadlines.
    queue: BTreeMap<(Instant, u64), Queued>,
    seq: u64,
    messages: Vec<Message>,
    open: Option<MessageId>,
    next_message_id: u64,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn open_message(&self) -> Option<MessageId> {
        self.open
    }

    pub fn pending_text(&self) -> &str {
        &self.pending
    }

    pub fn push_fragment(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Snapshot the pending text and show it when the buffer starting at
    /// `start_at` (output clock) begins to play.
    pub fn on_buffer_scheduled(&mut self, start_at: f64, clock: f64, now: Instant) -> Option<Instant> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        let due = now + seconds(start_at - clock);
        self.enqueue(due, Queued::Caption(text));
        Some(due)
    }

    /// Close the open message once the turn's last caption is shown.
    ///
    /// `scheduled_until` is the end of the last scheduled buffer on the output
    /// clock; leftover pending text is shown then.
    pub fn on_turn_complete(&mut self, scheduled_until: f64, clock: f64, now: Instant) {
        if !self.pending.trim().is_empty() {
            let text = std::mem::take(&mut self.pending);
            let due = now + seconds(scheduled_until - clock);
            self.enqueue(due, Queued::Caption(text));
        }
        self.pending.clear();

        let last_caption_due = self
            .queue
            .iter()
            .filter(|(_, q)| matches!(q, Queued::Caption(_)))
            .map(|((due, _), _)| *due)
            .max();

        match last_caption_due {
            Some(due) => self.enqueue(due, Queued::TurnBoundary),
            None => self.open = None,
        }
    }

    /// Apply every caption due at or before `now`. Returns true when the
    /// transcript changed.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            match entry.remove() {
                Queued::Caption(text) => changed |= self.apply_caption(&text),
                Queued::TurnBoundary => self.open = None,
            }
        }
        changed
    }

    /// The agent was cut off. Captions already due are shown; captions for
    /// audio that was stopped before it played are dropped, and the
    /// interrupted turn is closed so the next turn opens a new message.
    pub fn on_interrupt(&mut self, now: Instant) -> bool {
        let changed = self.fire_due(now);
        let dropped = self
            .queue
            .values()
            .filter(|q| matches!(q, Queued::Caption(_)))
            .count();
        if dropped > 0 {
            log::debug!("dropping {dropped} captions of interrupted audio");
        }
        self.queue.clear();
        self.pending.clear();
        self.open = None;
        changed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    fn enqueue(&mut self, due: Instant, item: Queued) {
        self.seq += 1;
        self.queue.insert((due, self.seq), item);
    }

    fn apply_caption(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        if let Some(open) = self.open {
            if let Some(msg) = self.messages.iter_mut().rev().find(|m| m.id == open) {
                if !msg.text.is_empty() {
                    msg.text.push(' ');
                }
                msg.text.push_str(text);
                return true;
            }
        }

        self.next_message_id += 1;
        let id = MessageId(self.next_message_id);
        self.messages.push(Message::agent(id, text));
        self.open = Some(id);
        true
    }
}

fn seconds(delta: f64) -> Duration {
    if delta.is_finite() && delta > 0.0 {
        Duration::from_secs_f64(delta)
    } else {
        Duration::ZERO
    }
}
