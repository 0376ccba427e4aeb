use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use super::matcher::TokenMatcher;
use super::normalizer::{
    NormalizedText, Normalizer, NormalizerError, NormalizerOptions, SPACE_SYMBOL,
};
use super::segmenter::Segmenter;
use super::vocab::{VocabError, Vocabulary};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Normalization error: {0}")]
    NormalizerError(#[from] NormalizerError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
}

/// Surface form of the unknown piece in decoded output.
const UNKNOWN_SURFACE: &str = " \u{2047} ";

/// End-to-end tokenizer over a fixed piece vocabulary.
///
/// Ties the two pipeline stages together:
///
/// 1. **Normalization**: raw input bytes are rewritten into canonical text
///    (charsmap rules, whitespace collapsing, boundary markers), with a byte
///    alignment back into the original input.
/// 2. **Segmentation**: the canonical text is split into vocabulary pieces
///    by greedy score-ordered merging.
///
/// Decoding runs the inverse surface mapping: piece texts are concatenated,
/// boundary markers become spaces, control pieces vanish, and the unknown
/// piece decodes to `" ⁇ "`.
///
/// Both stages consult one protected-token matcher built from the
/// vocabulary's user-defined pieces, plus any extra literals given at
/// construction, so protected tokens survive the whole pipeline intact.
///
/// # Example
/// ```ignore
/// let vocab = Vocabulary::new(pieces)?;
/// let tokenizer = Tokenizer::new(vocab, NormalizerOptions::default())?;
/// let ids = tokenizer.encode("I have a pen");
/// let text = tokenizer.decode(&ids);
/// ```
pub struct Tokenizer {
    normalizer: Normalizer,
    segmenter: Segmenter,
    options: NormalizerOptions,
}

impl Tokenizer {
    /// Create a tokenizer with no rewrite rules.
    ///
    /// Whitespace and boundary-marker handling still follow `options`; only
    /// the charsmap stage is empty.
    pub fn new(vocab: Vocabulary, options: NormalizerOptions) -> Result<Self, TokenizerError> {
        Self::with_full_options(vocab, None, options, &[])
    }

    /// Create a tokenizer with rewrite rules decoded from a serialized
    /// charsmap blob. An empty blob is equivalent to [`new`](Self::new).
    pub fn with_charsmap(
        vocab: Vocabulary,
        charsmap: &[u8],
        options: NormalizerOptions,
    ) -> Result<Self, TokenizerError> {
        Self::with_full_options(vocab, Some(charsmap), options, &[])
    }

    /// Create a tokenizer with all configuration options.
    ///
    /// # Arguments
    /// * `vocab` - Piece table the segmenter matches against
    /// * `charsmap` - Optional serialized rewrite rules for normalization
    /// * `options` - Whitespace and boundary-marker policy
    /// * `protected` - Extra literals shielded from normalization and
    ///   merging, on top of the vocabulary's user-defined pieces
    pub fn with_full_options(
        vocab: Vocabulary,
        charsmap: Option<&[u8]>,
        options: NormalizerOptions,
        protected: &[&str],
    ) -> Result<Self, TokenizerError> {
        // One matcher serves both stages, so a token the normalizer copied
        // verbatim is exactly a token the segmenter refuses to split.
        let matcher = TokenMatcher::new(vocab.user_defined().chain(protected.iter().copied()))?;
        let normalizer = match charsmap {
            Some(blob) => Normalizer::from_charsmap(blob, options)?,
            None => Normalizer::identity(options),
        }
        .with_token_matcher(matcher.clone());

        debug!(
            pieces = vocab.len(),
            protected = protected.len(),
            "tokenizer ready"
        );

        Ok(Tokenizer {
            normalizer,
            segmenter: Segmenter::with_matcher(vocab, matcher),
            options,
        })
    }

    /// Encode text to piece ids.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_bytes(text.as_bytes())
    }

    /// Encode raw bytes to piece ids. Malformed UTF-8 is replaced during
    /// normalization rather than rejected.
    pub fn encode_bytes(&self, input: &[u8]) -> Vec<u32> {
        let normalized = self.normalizer.normalize(input);
        self.segmenter
            .encode(&normalized.text)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    /// Encode text to `(piece, id)` pairs. The piece texts concatenate back
    /// to the canonical form of the input.
    pub fn encode_pieces(&self, text: &str) -> Vec<(String, u32)> {
        let normalized = self.normalizer.normalize(text.as_bytes());
        self.segmenter
            .encode(&normalized.text)
            .into_iter()
            .map(|(piece, id)| (piece.to_string(), id))
            .collect()
    }

    /// Normalize text without segmenting it.
    pub fn normalize(&self, text: &str) -> NormalizedText {
        self.normalizer.normalize(text.as_bytes())
    }

    /// Normalize raw bytes without segmenting them.
    pub fn normalize_bytes(&self, input: &[u8]) -> NormalizedText {
        self.normalizer.normalize(input)
    }

    /// Decode piece ids back to text.
    ///
    /// This is the inverse surface mapping, not a byte-exact inverse of
    /// [`encode`](Self::encode): control pieces produce nothing, the unknown
    /// piece decodes to `" ⁇ "`, boundary markers become spaces, and the
    /// space introduced by the dummy prefix is trimmed again. Ids outside
    /// the vocabulary are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        let vocab = self.segmenter.vocab();
        let mut surface = String::new();
        for &id in ids {
            if id as usize >= vocab.len() || vocab.is_control(id) {
                continue;
            }
            if vocab.is_unknown(id) {
                surface.push_str(UNKNOWN_SURFACE);
            } else {
                surface.push_str(vocab.id_to_text(id));
            }
        }

        let mut text = surface.replace(SPACE_SYMBOL, " ");
        if self.options.add_dummy_prefix {
            if self.options.treat_whitespace_as_suffix {
                if text.ends_with(' ') {
                    text.pop();
                }
            } else if text.starts_with(' ') {
                text.remove(0);
            }
        }
        text
    }

    /// Batch encode multiple texts in parallel.
    pub fn encode_batch(&self, texts: &[String]) -> Vec<Vec<u32>> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    /// Batch decode multiple id sequences in parallel.
    pub fn decode_batch(&self, id_lists: &[Vec<u32>]) -> Vec<String> {
        id_lists.par_iter().map(|ids| self.decode(ids)).collect()
    }

    /// The vocabulary backing this tokenizer.
    pub fn vocab(&self) -> &Vocabulary {
        self.segmenter.vocab()
    }

    /// Number of pieces in the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.segmenter.vocab().len()
    }
}
