use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const MANTRA_OPEN: &str = "[MANTRA]";
pub const MANTRA_CLOSE: &str = "[/MANTRA]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSegment {
    Plain(String),
    /// The core affirmation phrase, shown as a distinct emphasized block.
    Mantra(String),
}

impl TextSegment {
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(t) | Self::Mantra(t) => t,
        }
    }
}

fn mantra_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // An unterminated opening marker runs to the end of the text.
        Regex::new(r"(?s)\[MANTRA\](.*?)(?:\[/MANTRA\]|\z)").expect("valid mantra regex")
    })
}

fn stray_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[/?MANTRA\]").expect("valid marker regex"))
}

fn strip_markers(text: &str) -> String {
    stray_marker_re().replace_all(text, "").to_string()
}

fn push_segment(out: &mut Vec<TextSegment>, raw: &str, mantra: bool) {
    let clean = strip_markers(raw);
    if clean.trim().is_empty() {
        return;
    }
    if mantra {
        out.push(TextSegment::Mantra(clean.trim().to_string()));
    } else {
        out.push(TextSegment::Plain(clean));
    }
}

/// Split message text on `[MANTRA]...[/MANTRA]` markers.
///
/// Markers never appear in the output. Blank segments are dropped.
pub fn split_mantra(text: &str) -> Vec<TextSegment> {
    let mut out = Vec::new();
    let mut last = 0;

    for caps in mantra_span_re().captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_segment(&mut out, &text[last..whole.start()], false);
        push_segment(&mut out, inner.as_str(), true);
        last = whole.end();
    }
    push_segment(&mut out, &text[last..], false);

    out
}

/// Plain rendering with markers removed, e.g. for terminals or logs.
pub fn strip_mantra_markers(text: &str) -> String {
    strip_markers(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_markers(segments: &[TextSegment]) -> bool {
        segments
            .iter()
            .all(|s| !s.text().contains(MANTRA_OPEN) && !s.text().contains(MANTRA_CLOSE))
    }

    #[test]
    fn splits_terminated_mantra() {
        let segs = split_mantra(
            "Let this peace settle. [MANTRA]I am grounded.[/MANTRA] Will you say it with me?",
        );
        assert_eq!(
            segs,
            vec![
                TextSegment::Plain("Let this peace settle. ".into()),
                TextSegment::Mantra("I am grounded.".into()),
                TextSegment::Plain(" Will you say it with me?".into()),
            ]
        );
    }

    #[test]
    fn unterminated_mantra_runs_to_end_without_markers() {
        let segs = split_mantra("[MANTRA]I am strong");
        assert_eq!(segs, vec![TextSegment::Mantra("I am strong".into())]);
        assert!(no_markers(&segs));
    }

    #[test]
    fn stray_closing_marker_is_removed() {
        let segs = split_mantra("Breathe in.[/MANTRA] Breathe out.");
        assert_eq!(segs, vec![TextSegment::Plain("Breathe in. Breathe out.".into())]);
    }

    #[test]
    fn nested_opening_marker_does_not_leak() {
        let segs = split_mantra("[MANTRA]I am [MANTRA]calm[/MANTRA] now");
        assert!(no_markers(&segs));
        assert_eq!(segs[0], TextSegment::Mantra("I am calm".into()));
    }

    #[test]
    fn empty_mantra_is_dropped() {
        let segs = split_mantra("Hello [MANTRA]  [/MANTRA]");
        assert_eq!(segs, vec![TextSegment::Plain("Hello ".into())]);
    }

    #[test]
    fn multiple_mantras_keep_order() {
        let segs = split_mantra("[MANTRA]One[/MANTRA] and [MANTRA]Two[/MANTRA]");
        assert_eq!(
            segs,
            vec![
                TextSegment::Mantra("One".into()),
                TextSegment::Plain(" and ".into()),
                TextSegment::Mantra("Two".into()),
            ]
        );
    }

    #[test]
    fn strip_removes_all_markers() {
        assert_eq!(
            strip_mantra_markers("a [MANTRA]b[/MANTRA] c"),
            "a b c"
        );
    }
}
