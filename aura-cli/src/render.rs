use std::collections::HashMap;
use std::io::{self, Write};

use aura_core::text::{TextSegment, split_mantra};
use aura_core::types::{MessageId, SessionSummary, SessionView};

/// Terminal rendering of agent text: mantra spans are shouted, markers never shown.
pub fn render_text(text: &str) -> String {
    let mut out = String::new();
    for seg in split_mantra(text) {
        match seg {
            TextSegment::Plain(t) => out.push_str(&t),
            TextSegment::Mantra(t) => {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
                out.push_str(&t.to_uppercase());
            }
        }
    }
    out
}

/// Streams transcript growth to a writer as captions appear.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: HashMap<MessageId, String>,
    last_status: Option<&'static str>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, view: &SessionView, out: &mut impl Write) -> io::Result<()> {
        let status = view.status.label();
        if self.last_status != Some(status) {
            writeln!(out, "[{status}]")?;
            self.last_status = Some(status);
        }

        for msg in &view.messages {
            let rendered = render_text(&msg.text);
            match self.printed.get(&msg.id) {
                Some(prev) if *prev == rendered => continue,
                Some(prev) if rendered.starts_with(prev.as_str()) => {
                    write!(out, "{}", &rendered[prev.len()..])?;
                }
                _ => write!(out, "\nAura: {rendered}")?,
            }
            self.printed.insert(msg.id, rendered);
        }

        if let Some(err) = &view.error_message {
            writeln!(out, "\n{err}")?;
        }
        out.flush()
    }
}

pub fn print_summary(summary: &SessionSummary, out: &mut impl Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Today's energy: {}", summary.theme)?;
    writeln!(out, "\"{}\"", summary.quote)?;
    out.flush()
}
