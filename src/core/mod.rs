//! Core normalization and segmentation engine for slivr.
//!
//! Raw input passes through two stages. The normalizer rewrites bytes into
//! canonical text using longest-match charsmap rules, whitespace policy, and
//! boundary markers, keeping a byte alignment back into the original input.
//! The segmenter then splits the canonical text into vocabulary pieces by
//! greedy score-ordered merging.
//!
//! # Architecture
//!
//! - [`Tokenizer`]: end-to-end pipeline with the encoding/decoding API and
//!   Rayon batch operations
//! - [`Normalizer`]: charsmap-driven canonicalization with byte alignment
//!   provenance
//! - [`Segmenter`]: greedy score-ordered merge segmentation over a fixed
//!   piece table
//! - [`Vocabulary`]: typed piece table mapping texts to ids and back
//! - [`PrefixIndex`]: serializable byte trie answering the normalizer's
//!   common-prefix queries
//! - [`TokenMatcher`]: anchored longest-literal matching for protected
//!   tokens, shared by both stages

mod matcher;
mod normalizer;
mod segmenter;
mod tokenizer;
mod trie;
mod vocab;

pub use matcher::TokenMatcher;
pub use normalizer::{
    compile_charsmap, NormalizedText, Normalizer, NormalizerError, NormalizerOptions, SPACE_SYMBOL,
};
pub use segmenter::Segmenter;
pub use tokenizer::{Tokenizer, TokenizerError};
pub use trie::{CommonPrefixes, PrefixIndex, PrefixMatch, TrieError, MAX_PREFIX_MATCHES};
pub use vocab::{Piece, PieceKind, VocabError, Vocabulary};
