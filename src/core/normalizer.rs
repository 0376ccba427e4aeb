//! Text normalization with byte-level provenance.
//!
//! The normalizer rewrites raw input bytes into canonical text while
//! recording, for every output byte, the input offset it came from. Rewrite
//! rules live in a "charsmap": a prefix index whose values point into a pool
//! of NUL-terminated replacement strings. On top of the rules it applies
//! whitespace policy (escaping spaces to the U+2581 marker, collapsing and
//! trimming extra whitespace, adding a dummy word-boundary prefix or
//! suffix).
//!
//! # Charsmap format
//!
//! ```text
//! <u32 LE index size N><N bytes: serialized prefix index><replacement pool>
//! ```
//!
//! The pool is the concatenation of NUL-terminated UTF-8 strings; rule
//! values are byte offsets of replacement starts. An empty charsmap selects
//! identity normalization. Blobs are produced by [`compile_charsmap`] and
//! consumed by [`Normalizer::from_charsmap`].
//!
//! # Guarantees
//!
//! - Normalization never fails on any input, however malformed; invalid
//!   UTF-8 resynchronizes byte-by-byte, emitting U+FFFD.
//! - The output is always valid UTF-8 (the pool is validated on load).
//! - `alignment.len() == text.len() + 1`; the final entry is the total
//!   number of input bytes consumed.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::matcher::{one_char_len, TokenMatcher};
use super::trie::{PrefixIndex, PrefixMatch, TrieError};

/// The word-boundary marker substituted for spaces: U+2581 LOWER ONE EIGHTH
/// BLOCK, three bytes in UTF-8.
pub const SPACE_SYMBOL: &str = "\u{2581}";

const REPLACEMENT_CHAR: &str = "\u{fffd}";

/// Errors from decoding or compiling a charsmap.
#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("broken charsmap blob: {0}")]
    BrokenCharsMap(String),
    #[error("charsmap index: {0}")]
    Index(#[from] TrieError),
    #[error("invalid rewrite rule: {0}")]
    InvalidRule(String),
}

/// Whitespace and boundary-marker policy applied around the rewrite rules.
#[derive(Debug, Clone, Copy)]
pub struct NormalizerOptions {
    /// Replace literal spaces with [`SPACE_SYMBOL`].
    pub escape_whitespaces: bool,
    /// Collapse internal space runs and strip leading/trailing whitespace.
    pub remove_extra_whitespaces: bool,
    /// Emit one boundary marker before the content, so "world" and
    /// "hello world" share the piece "▁world".
    pub add_dummy_prefix: bool,
    /// Move the dummy marker to the end of the output instead.
    pub treat_whitespace_as_suffix: bool,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        NormalizerOptions {
            escape_whitespaces: true,
            remove_extra_whitespaces: true,
            add_dummy_prefix: true,
            treat_whitespace_as_suffix: false,
        }
    }
}

/// Canonical text plus its byte alignment back into the original input.
///
/// `alignment[i]` is the offset of the input byte that produced `text`'s
/// byte `i`; the final entry is the total number of input bytes consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub alignment: Vec<usize>,
}

/// Decoded rewrite rules: prefix index over raw substrings, values pointing
/// into the replacement pool.
struct CharsMap {
    index: PrefixIndex,
    pool: String,
}

impl CharsMap {
    /// Replacement string for a rule value: the pool substring up to the
    /// next NUL.
    fn replacement(&self, value: u32) -> &str {
        let start = value as usize;
        let end = self.pool.as_bytes()[start..]
            .iter()
            .position(|&b| b == 0)
            .map_or(self.pool.len(), |nul| start + nul);
        &self.pool[start..end]
    }
}

/// Rewrites raw bytes into canonical text, tracking byte provenance.
pub struct Normalizer {
    rules: Option<CharsMap>,
    matcher: Option<TokenMatcher>,
    options: NormalizerOptions,
}

impl Normalizer {
    /// A normalizer with no rewrite rules. Whitespace and marker policy
    /// still apply.
    pub fn identity(options: NormalizerOptions) -> Self {
        Normalizer {
            rules: None,
            matcher: None,
            options,
        }
    }

    /// Decode a charsmap blob. An empty blob selects identity
    /// normalization.
    pub fn from_charsmap(blob: &[u8], options: NormalizerOptions) -> Result<Self, NormalizerError> {
        if blob.is_empty() {
            tracing::info!("charsmap is empty, using identity normalization");
            return Ok(Normalizer::identity(options));
        }
        let rules = decode_charsmap(blob)?;
        tracing::debug!(
            rules = rules.index.len(),
            pool_bytes = rules.pool.len(),
            "charsmap loaded"
        );
        Ok(Normalizer {
            rules: Some(rules),
            matcher: None,
            options,
        })
    }

    /// Compile (pattern, replacement) pairs and build a normalizer from
    /// them.
    pub fn from_rules<P, R>(
        rules: impl IntoIterator<Item = (P, R)>,
        options: NormalizerOptions,
    ) -> Result<Self, NormalizerError>
    where
        P: AsRef<str>,
        R: AsRef<str>,
    {
        let blob = compile_charsmap(rules)?;
        Normalizer::from_charsmap(&blob, options)
    }

    /// Attach a matcher whose dictionary entries pass through normalization
    /// untouched.
    pub fn with_token_matcher(mut self, matcher: TokenMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Normalize raw bytes into canonical text plus its alignment map.
    /// Never fails; malformed UTF-8 is replaced with U+FFFD byte-by-byte.
    pub fn normalize(&self, input: &[u8]) -> NormalizedText {
        let mut text = String::new();
        let mut alignment: Vec<usize> = Vec::new();

        if input.is_empty() {
            alignment.push(0);
            return NormalizedText { text, alignment };
        }

        let opts = &self.options;
        let mut input = input;
        let mut consumed = 0usize;

        // Skip leading input that normalizes to a bare space.
        if opts.remove_extra_whitespaces {
            while !input.is_empty() {
                let (prefix, len) = self.normalize_prefix(input);
                if prefix != " " {
                    break;
                }
                consumed += len;
                input = &input[len..];
            }
        }

        // Everything normalized to whitespace.
        if input.is_empty() {
            alignment.push(consumed);
            return NormalizedText { text, alignment };
        }

        text.reserve(input.len() * 3);
        alignment.reserve(input.len() * 3);

        if !opts.treat_whitespace_as_suffix && opts.add_dummy_prefix {
            push_boundary(&mut text, &mut alignment, consumed, opts.escape_whitespaces);
        }

        let mut is_prev_space = opts.remove_extra_whitespaces;
        while !input.is_empty() {
            let (prefix, len) = self.normalize_prefix(input);
            debug_assert!(len > 0, "normalize_prefix must always consume input");

            // Collapse space runs across replacement boundaries.
            let piece = if is_prev_space {
                prefix.trim_start_matches(' ')
            } else {
                prefix
            };

            if !piece.is_empty() {
                for ch in piece.chars() {
                    if opts.escape_whitespaces && ch == ' ' {
                        text.push_str(SPACE_SYMBOL);
                        for _ in 0..SPACE_SYMBOL.len() {
                            alignment.push(consumed);
                        }
                    } else {
                        text.push(ch);
                        for _ in 0..ch.len_utf8() {
                            alignment.push(consumed);
                        }
                    }
                }
                is_prev_space = piece.ends_with(' ');
            }

            consumed += len;
            input = &input[len..];
            if !opts.remove_extra_whitespaces {
                is_prev_space = false;
            }
        }

        // Trim trailing whitespace, rewinding the consumed cursor through
        // the alignment map.
        if opts.remove_extra_whitespaces {
            let space = if opts.escape_whitespaces {
                SPACE_SYMBOL
            } else {
                " "
            };
            while text.ends_with(space) {
                let length = text.len() - space.len();
                consumed = alignment[length];
                text.truncate(length);
                alignment.truncate(length);
            }
        }

        if opts.treat_whitespace_as_suffix && opts.add_dummy_prefix {
            push_boundary(&mut text, &mut alignment, consumed, opts.escape_whitespaces);
        }

        alignment.push(consumed);
        debug_assert_eq!(alignment.len(), text.len() + 1);

        NormalizedText { text, alignment }
    }

    /// Normalize the front of `input`: returns the replacement text and how
    /// many input bytes it consumed.
    ///
    /// Resolution order: protected token (returned verbatim), then the
    /// longest rewrite rule, then one code point passed through, with U+FFFD
    /// and a one-byte advance for malformed UTF-8.
    fn normalize_prefix<'a>(&'a self, input: &'a [u8]) -> (&'a str, usize) {
        if input.is_empty() {
            return ("", 0);
        }

        if let Some(matcher) = &self.matcher {
            if let Some(token) = matcher.prefix_match_text(input) {
                return (token, token.len());
            }
        }

        if let Some(rules) = &self.rules {
            let mut longest: Option<PrefixMatch> = None;
            for m in rules.index.common_prefixes(input) {
                if longest.map_or(true, |best| m.len > best.len) {
                    longest = Some(m);
                }
            }
            if let Some(m) = longest {
                return (rules.replacement(m.value), m.len);
            }
        }

        let len = one_char_len(input[0]);
        if input.len() >= len {
            if let Ok(ch) = std::str::from_utf8(&input[..len]) {
                return (ch, len);
            }
        }
        (REPLACEMENT_CHAR, 1)
    }
}

fn push_boundary(text: &mut String, alignment: &mut Vec<usize>, at: usize, escape: bool) {
    if escape {
        text.push_str(SPACE_SYMBOL);
        for _ in 0..SPACE_SYMBOL.len() {
            alignment.push(at);
        }
    } else {
        text.push(' ');
        alignment.push(at);
    }
}

/// Compile (pattern, replacement) rule pairs into a charsmap blob.
///
/// Identical replacement strings share one pool entry. Patterns must be
/// non-empty and unique; replacements may be empty (a deletion rule) but
/// must not contain NUL.
pub fn compile_charsmap<P, R>(
    rules: impl IntoIterator<Item = (P, R)>,
) -> Result<Vec<u8>, NormalizerError>
where
    P: AsRef<str>,
    R: AsRef<str>,
{
    let mut pool = String::new();
    let mut offsets: FxHashMap<String, u32> = FxHashMap::default();
    let mut pairs: Vec<(Vec<u8>, u32)> = Vec::new();

    for (pattern, replacement) in rules {
        let pattern = pattern.as_ref();
        let replacement = replacement.as_ref();
        if pattern.is_empty() {
            return Err(NormalizerError::InvalidRule("empty pattern".to_string()));
        }
        if replacement.contains('\0') {
            return Err(NormalizerError::InvalidRule(format!(
                "replacement for {pattern:?} contains NUL"
            )));
        }
        let offset = match offsets.get(replacement) {
            Some(&offset) => offset,
            None => {
                let offset = pool.len() as u32;
                pool.push_str(replacement);
                pool.push('\0');
                offsets.insert(replacement.to_string(), offset);
                offset
            }
        };
        pairs.push((pattern.as_bytes().to_vec(), offset));
    }

    let index = PrefixIndex::new(pairs)?;
    let trie = index.to_bytes();
    let mut blob = Vec::with_capacity(4 + trie.len() + pool.len());
    blob.extend_from_slice(&(trie.len() as u32).to_le_bytes());
    blob.extend_from_slice(&trie);
    blob.extend_from_slice(pool.as_bytes());
    Ok(blob)
}

fn decode_charsmap(blob: &[u8]) -> Result<CharsMap, NormalizerError> {
    if blob.len() < 4 {
        return Err(NormalizerError::BrokenCharsMap(format!(
            "{} bytes is shorter than the length prefix",
            blob.len()
        )));
    }
    let mut size = [0u8; 4];
    size.copy_from_slice(&blob[..4]);
    let index_len = u32::from_le_bytes(size) as usize;
    if blob.len() - 4 < index_len {
        return Err(NormalizerError::BrokenCharsMap(format!(
            "declared index size {index_len} exceeds the {} remaining bytes",
            blob.len() - 4
        )));
    }

    let index = PrefixIndex::from_bytes(&blob[4..4 + index_len])?;
    let pool = std::str::from_utf8(&blob[4 + index_len..])
        .map_err(|_| {
            NormalizerError::BrokenCharsMap("replacement pool is not valid UTF-8".to_string())
        })?
        .to_string();

    // Every rule value must land on a character boundary of the pool so
    // replacements slice cleanly.
    for (key, value) in index.iter() {
        let start = value as usize;
        if start > pool.len() || !pool.is_char_boundary(start) {
            return Err(NormalizerError::BrokenCharsMap(format!(
                "value {value} of rule {:?} does not address the pool",
                String::from_utf8_lossy(key)
            )));
        }
    }

    Ok(CharsMap { index, pool })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_off() -> NormalizerOptions {
        NormalizerOptions {
            escape_whitespaces: false,
            remove_extra_whitespaces: false,
            add_dummy_prefix: false,
            treat_whitespace_as_suffix: false,
        }
    }

    #[test]
    fn test_identity_passthrough() {
        let norm = Normalizer::identity(flags_off());
        let out = norm.normalize("hello world".as_bytes());
        assert_eq!(out.text, "hello world");
        assert_eq!(out.alignment.len(), out.text.len() + 1);
        assert_eq!(out.alignment, (0..=11).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_input() {
        let norm = Normalizer::identity(NormalizerOptions::default());
        let out = norm.normalize(b"");
        assert_eq!(out.text, "");
        assert_eq!(out.alignment, vec![0]);
    }

    #[test]
    fn test_whitespace_only_input() {
        let norm = Normalizer::identity(NormalizerOptions::default());
        let out = norm.normalize(b"   ");
        assert_eq!(out.text, "");
        assert_eq!(out.alignment, vec![3]);
    }

    #[test]
    fn test_escape_and_dummy_prefix() {
        let norm = Normalizer::identity(NormalizerOptions::default());
        let out = norm.normalize("I have a pen".as_bytes());
        assert_eq!(out.text, "▁I▁have▁a▁pen");
        assert_eq!(out.alignment.len(), out.text.len() + 1);
        // The dummy marker and "I" both come from offset 0.
        assert_eq!(&out.alignment[..4], &[0, 0, 0, 0]);
        // The first internal space at offset 1 covers three marker bytes.
        assert_eq!(&out.alignment[4..7], &[1, 1, 1]);
        assert_eq!(*out.alignment.last().unwrap(), 12);
    }

    #[test]
    fn test_collapse_and_trim() {
        let norm = Normalizer::identity(NormalizerOptions::default());
        let out = norm.normalize("  hello   world  ".as_bytes());
        assert_eq!(out.text, "▁hello▁world");
        assert_eq!(out.alignment.len(), out.text.len() + 1);
        // Leading spaces were skipped, so the marker points at "h".
        assert_eq!(out.alignment[0], 2);
    }

    #[test]
    fn test_no_collapse_when_disabled() {
        let mut opts = NormalizerOptions::default();
        opts.remove_extra_whitespaces = false;
        opts.add_dummy_prefix = false;
        let norm = Normalizer::identity(opts);
        let out = norm.normalize("a  b ".as_bytes());
        assert_eq!(out.text, "a▁▁b▁");
    }

    #[test]
    fn test_dummy_suffix() {
        let mut opts = NormalizerOptions::default();
        opts.treat_whitespace_as_suffix = true;
        let norm = Normalizer::identity(opts);
        let out = norm.normalize(b"hi");
        assert_eq!(out.text, "hi▁");
        assert_eq!(out.alignment, vec![0, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_longest_rule_wins() {
        let norm =
            Normalizer::from_rules([("A", "a"), ("AB", "Z")], flags_off()).unwrap();
        let out = norm.normalize(b"ABC");
        assert_eq!(out.text, "ZC");
        // "AB" consumed two input bytes for one output byte.
        assert_eq!(out.alignment, vec![0, 2, 3]);
    }

    #[test]
    fn test_deletion_rule() {
        let norm = Normalizer::from_rules([("x", "")], flags_off()).unwrap();
        let out = norm.normalize(b"axb");
        assert_eq!(out.text, "ab");
        assert_eq!(out.alignment, vec![0, 2, 3]);
    }

    #[test]
    fn test_expanding_rule_alignment() {
        let norm = Normalizer::from_rules([("a", "xyz")], flags_off()).unwrap();
        let out = norm.normalize(b"ab");
        assert_eq!(out.text, "xyzb");
        // All three replacement bytes map to the rule's start offset.
        assert_eq!(out.alignment, vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_rule_output_respects_space_policy() {
        let norm =
            Normalizer::from_rules([("\t", " ")], NormalizerOptions::default()).unwrap();
        let out = norm.normalize(b"a\t\tb");
        // Both tabs normalize to spaces and collapse into one marker.
        assert_eq!(out.text, "▁a▁b");
    }

    #[test]
    fn test_leading_rule_space_skipped() {
        // Leading input that normalizes to " " counts as heading whitespace.
        let norm =
            Normalizer::from_rules([("\t", " ")], NormalizerOptions::default()).unwrap();
        let out = norm.normalize(b"\t\thi");
        assert_eq!(out.text, "▁hi");
        assert_eq!(out.alignment[0], 2);
    }

    #[test]
    fn test_malformed_utf8_resyncs_per_byte() {
        let norm = Normalizer::identity(flags_off());
        let out = norm.normalize(b"\xffa");
        assert_eq!(out.text, "\u{fffd}a");
        assert_eq!(out.alignment, vec![0, 0, 0, 1, 2]);

        // A truncated three-byte sequence: one replacement per bad byte.
        let out = norm.normalize(b"\xe2\x28");
        assert_eq!(out.text, "\u{fffd}(");
        assert_eq!(out.alignment, vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_protected_token_passes_through_rules() {
        let matcher = TokenMatcher::new(["<s>"]).unwrap();
        let norm = Normalizer::from_rules([("<", "&lt;")], flags_off())
            .unwrap()
            .with_token_matcher(matcher);
        let out = norm.normalize(b"<s><x");
        assert_eq!(out.text, "<s>&lt;x");
    }

    #[test]
    fn test_charsmap_round_trip() {
        let blob = compile_charsmap([("abc", "x"), ("a", "y"), ("q", "x")]).unwrap();
        let norm = Normalizer::from_charsmap(&blob, flags_off()).unwrap();
        let out = norm.normalize(b"abcaq");
        assert_eq!(out.text, "xyx");
        assert_eq!(out.alignment, vec![0, 3, 4, 5]);
    }

    #[test]
    fn test_empty_charsmap_is_identity() {
        let norm = Normalizer::from_charsmap(b"", flags_off()).unwrap();
        let out = norm.normalize("caf\u{e9}".as_bytes());
        assert_eq!(out.text, "café");
    }

    #[test]
    fn test_broken_charsmap_rejected() {
        // Shorter than the length prefix.
        assert!(matches!(
            Normalizer::from_charsmap(&[1, 2, 3], flags_off()),
            Err(NormalizerError::BrokenCharsMap(_))
        ));

        // Declared index size exceeds the blob.
        let mut blob = 100u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&[0; 8]);
        assert!(matches!(
            Normalizer::from_charsmap(&blob, flags_off()),
            Err(NormalizerError::BrokenCharsMap(_))
        ));

        // Pool with invalid UTF-8.
        let mut blob = compile_charsmap([("a", "b")]).unwrap();
        blob.push(0xff);
        assert!(matches!(
            Normalizer::from_charsmap(&blob, flags_off()),
            Err(NormalizerError::BrokenCharsMap(_))
        ));

        // Rule value pointing past the pool.
        let index = PrefixIndex::new(vec![(b"a".to_vec(), 9)]).unwrap();
        let trie = index.to_bytes();
        let mut blob = (trie.len() as u32).to_le_bytes().to_vec();
        blob.extend_from_slice(&trie);
        blob.extend_from_slice(b"x\0");
        assert!(matches!(
            Normalizer::from_charsmap(&blob, flags_off()),
            Err(NormalizerError::BrokenCharsMap(_))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_rules() {
        assert!(matches!(
            compile_charsmap([("", "x")]),
            Err(NormalizerError::InvalidRule(_))
        ));
        assert!(matches!(
            compile_charsmap([("a", "x\0y")]),
            Err(NormalizerError::InvalidRule(_))
        ));
        assert!(matches!(
            compile_charsmap([("a", "x"), ("a", "y")]),
            Err(NormalizerError::Index(_))
        ));
    }

    #[test]
    fn test_trailing_trim_rewinds_consumed() {
        let norm = Normalizer::identity(NormalizerOptions::default());
        let out = norm.normalize(b"hi  ");
        assert_eq!(out.text, "▁hi");
        // The sentinel rewinds to the offset of the first trimmed space.
        assert_eq!(*out.alignment.last().unwrap(), 2);
    }
}
