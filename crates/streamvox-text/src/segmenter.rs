//! Turns an incrementally fed character stream into synthesis units.
//!
//! A unit is normally a full sentence (terminator preserved, used downstream
//! for prosody and trailing silence). When the player reports that its
//! buffer is running dry and enough unterminated text is pending, a fragment
//! is cut at a word boundary instead, so the device stays primed while a
//! long sentence is still arriving.

/// Characters that end a sentence.
pub const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '\n'];

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Fragments shorter than this many code points are never emitted.
    pub minimum_sentence_length: usize,
    /// Fragments are only cut while the player buffer holds less than this
    /// many seconds of audio.
    pub buffer_threshold_seconds: f64,
    /// Disable to emit only terminator-delimited sentences.
    pub fast_sentence_fragment: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            minimum_sentence_length: 10,
            buffer_threshold_seconds: 2.0,
            fast_sentence_fragment: true,
        }
    }
}

#[derive(Debug)]
pub struct SentenceSegmenter {
    pending: String,
    config: SegmenterConfig,
}

impl SentenceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            pending: String::new(),
            config,
        }
    }

    /// Append text to the pending character stream.
    pub fn feed(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Code points currently pending.
    pub fn pending_chars(&self) -> usize {
        self.pending.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.trim().is_empty()
    }

    /// Produce the next synthesis unit, if any. `buffered_seconds` is the
    /// player's current buffer level and gates fragment emission.
    pub fn next_unit(&mut self, buffered_seconds: f64) -> Option<String> {
        loop {
            if let Some(end) = self.find_terminator() {
                let unit: String = self.pending.drain(..end).collect();
                self.trim_pending_start();
                let unit = unit.trim().to_string();
                if unit.is_empty() {
                    // A bare terminator (e.g. leading newline); keep scanning.
                    continue;
                }
                return Some(unit);
            }
            return self.try_fragment(buffered_seconds);
        }
    }

    /// Emit whatever is left, terminator or not. Call at end of input.
    pub fn flush(&mut self) -> Option<String> {
        let unit = std::mem::take(&mut self.pending).trim().to_string();
        if unit.is_empty() {
            None
        } else {
            Some(unit)
        }
    }

    fn trim_pending_start(&mut self) {
        let skip = self.pending.len() - self.pending.trim_start().len();
        if skip > 0 {
            self.pending.drain(..skip);
        }
    }

    /// Byte offset one past the first terminator, or None.
    fn find_terminator(&self) -> Option<usize> {
        self.pending
            .char_indices()
            .find(|(_, c)| SENTENCE_TERMINATORS.contains(c))
            .map(|(i, c)| i + c.len_utf8())
    }

    /// Cut a fragment at the first word boundary past the minimum length,
    /// but only while the player is starving.
    fn try_fragment(&mut self, buffered_seconds: f64) -> Option<String> {
        if !self.config.fast_sentence_fragment
            || buffered_seconds >= self.config.buffer_threshold_seconds
        {
            return None;
        }

        let mut chars_seen = 0usize;
        let mut split_at = None;
        for (byte_idx, c) in self.pending.char_indices() {
            if c.is_whitespace() && chars_seen >= self.config.minimum_sentence_length {
                split_at = Some(byte_idx);
                break;
            }
            chars_seen += 1;
        }

        let split_at = split_at?;
        let fragment: String = self.pending.drain(..split_at).collect();
        self.trim_pending_start();
        let fragment = fragment.trim().to_string();
        if fragment.is_empty() {
            None
        } else {
            tracing::trace!("Emitting fragment of {} chars", fragment.chars().count());
            Some(fragment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: f64 = 10.0;
    const STARVING: f64 = 0.0;

    fn segmenter() -> SentenceSegmenter {
        SentenceSegmenter::new(SegmenterConfig::default())
    }

    fn collect_units(seg: &mut SentenceSegmenter, buffered: f64) -> Vec<String> {
        let mut units = Vec::new();
        while let Some(unit) = seg.next_unit(buffered) {
            units.push(unit);
        }
        units
    }

    #[test]
    fn splits_on_terminators_and_preserves_them() {
        let mut seg = segmenter();
        seg.feed("First sentence. Second one! A question? Last line\n");
        let units = collect_units(&mut seg, FULL);
        assert_eq!(
            units,
            vec![
                "First sentence.",
                "Second one!",
                "A question?",
                "Last line"
            ]
        );
    }

    #[test]
    fn units_arrive_in_feed_order_across_calls() {
        let mut seg = segmenter();
        seg.feed("One.");
        seg.feed(" Two.");
        assert_eq!(seg.next_unit(FULL).unwrap(), "One.");
        seg.feed(" Three.");
        assert_eq!(seg.next_unit(FULL).unwrap(), "Two.");
        assert_eq!(seg.next_unit(FULL).unwrap(), "Three.");
        assert_eq!(seg.next_unit(FULL), None);
    }

    #[test]
    fn incomplete_sentence_stays_pending_while_buffer_is_full() {
        let mut seg = segmenter();
        seg.feed("not terminated yet");
        assert_eq!(seg.next_unit(FULL), None);
        assert_eq!(seg.pending_chars(), 18);
        seg.feed(".");
        assert_eq!(seg.next_unit(FULL).unwrap(), "not terminated yet.");
    }

    #[test]
    fn fragment_emitted_when_starving() {
        let mut seg = segmenter();
        seg.feed("a long run of words with no terminator anywhere in sight");
        let fragment = seg.next_unit(STARVING).unwrap();
        // Cut at the first word boundary past the minimum length.
        assert_eq!(fragment, "a long run");
        assert!(fragment.chars().count() >= 10);
    }

    #[test]
    fn fragment_respects_minimum_length() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig {
            minimum_sentence_length: 5,
            ..SegmenterConfig::default()
        });
        seg.feed("abc ");
        // Only 4 code points pending, below the minimum.
        assert_eq!(seg.next_unit(STARVING), None);
        seg.feed("defgh more");
        let fragment = seg.next_unit(STARVING).unwrap();
        assert!(fragment.chars().count() >= 5);
    }

    #[test]
    fn no_fragment_without_word_boundary() {
        let mut seg = segmenter();
        seg.feed("supercalifragilistic");
        // One unbroken word: no boundary to cut at, even while starving.
        assert_eq!(seg.next_unit(STARVING), None);
    }

    #[test]
    fn no_fragment_when_disabled() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig {
            fast_sentence_fragment: false,
            ..SegmenterConfig::default()
        });
        seg.feed("plenty of pending words without a terminator here");
        assert_eq!(seg.next_unit(STARVING), None);
    }

    #[test]
    fn empty_feed_produces_nothing() {
        let mut seg = segmenter();
        seg.feed("");
        assert_eq!(seg.next_unit(STARVING), None);
        assert_eq!(seg.flush(), None);
        assert!(seg.is_empty());
    }

    #[test]
    fn bare_terminators_are_skipped() {
        let mut seg = segmenter();
        seg.feed("\n\n. ...First.");
        let units = collect_units(&mut seg, FULL);
        assert_eq!(units, vec!["First."]);
    }

    #[test]
    fn flush_returns_trailing_text() {
        let mut seg = segmenter();
        seg.feed("Complete. trailing words");
        assert_eq!(seg.next_unit(FULL).unwrap(), "Complete.");
        assert_eq!(seg.next_unit(FULL), None);
        assert_eq!(seg.flush().unwrap(), "trailing words");
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn multibyte_text_is_counted_in_code_points() {
        let mut seg = SentenceSegmenter::new(SegmenterConfig {
            minimum_sentence_length: 4,
            ..SegmenterConfig::default()
        });
        seg.feed("héllo wörld après coup");
        let fragment = seg.next_unit(STARVING).unwrap();
        assert_eq!(fragment, "héllo");
        seg.feed(".");
        let rest = collect_units(&mut seg, FULL);
        assert_eq!(rest, vec!["wörld après coup."]);
    }

    #[test]
    fn units_are_trimmed_and_non_empty() {
        let mut seg = segmenter();
        seg.feed("   padded sentence.   another one!   ");
        let units = collect_units(&mut seg, FULL);
        assert_eq!(units, vec!["padded sentence.", "another one!"]);
        for unit in units {
            assert_eq!(unit, unit.trim());
            assert!(!unit.is_empty());
        }
    }
}
