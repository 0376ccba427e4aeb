//! Longest-literal-prefix matching for protected tokens.
//!
//! A [`TokenMatcher`] holds a dictionary of literal strings (user-defined
//! pieces, reserved markers) and answers one question for a given input
//! position: does a dictionary entry start here, and how long is the longest
//! one? Both the normalizer and the segmenter consult it before doing
//! anything else, so protected tokens pass through whole.
//!
//! Matching uses an anchored leftmost-longest Aho-Corasick automaton, which
//! resolves overlapping dictionary entries (`"ab"` vs `"abc"`) to the
//! longest in a single pass.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Anchored, Input, MatchKind, StartKind};

/// Prefix matcher over a dictionary of protected literal tokens.
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    tokens: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl TokenMatcher {
    /// Build a matcher from literal tokens. An empty dictionary is legal and
    /// produces a matcher that never matches. Empty strings are ignored.
    pub fn new<I, P>(tokens: I) -> Result<Self, aho_corasick::BuildError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.is_empty())
            .collect();
        let automaton = if tokens.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .match_kind(MatchKind::LeftmostLongest)
                    .start_kind(StartKind::Anchored)
                    .build(&tokens)?,
            )
        };
        Ok(TokenMatcher { tokens, automaton })
    }

    /// Length of the longest dictionary entry that is a prefix of `input`,
    /// as `(len, true)`. Without a match, `(len, false)` where `len` covers
    /// one leading code point (capped at the input length), so callers can
    /// always advance byte-wise through malformed input.
    pub fn prefix_match(&self, input: &[u8]) -> (usize, bool) {
        match self.prefix_match_text(input) {
            Some(token) => (token.len(), true),
            None if input.is_empty() => (0, false),
            None => (one_char_len(input[0]).min(input.len()), false),
        }
    }

    /// Text of the longest dictionary entry that is a prefix of `input`.
    /// The returned slice is byte-identical to the matched input prefix.
    pub fn prefix_match_text(&self, input: &[u8]) -> Option<&str> {
        let automaton = self.automaton.as_ref()?;
        if input.is_empty() {
            return None;
        }
        let search = Input::new(input).anchored(Anchored::Yes);
        automaton
            .find(search)
            .map(|m| self.tokens[m.pattern().as_usize()].as_str())
    }
}

/// Byte length of a UTF-8 code point, judged from its lead byte. Stray
/// continuation bytes count as a single byte so malformed input advances
/// byte-by-byte.
pub(crate) fn one_char_len(lead: u8) -> usize {
    match lead {
        0x00..=0xBF => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xFF => 4,
    }
}
