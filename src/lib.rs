//! slivr - normalization-aware subword tokenization.
//!
//! A self-contained segmentation pipeline in the SentencePiece family:
//!
//! - Charsmap-driven normalization with longest-match rewrite rules and a
//!   byte alignment from canonical text back to the original input
//! - Greedy score-ordered merge segmentation over a fixed, typed piece
//!   vocabulary (linked-list symbols, lazily invalidated merge heap)
//! - Protected user-defined tokens that pass through both stages intact
//! - Lossy decoding back to surface text, with Rayon parallelism for batch
//!   encode and decode
//!
//! The same input always produces the same ids: there is no sampling and no
//! training here, only inference over a finished vocabulary.

pub mod core;

pub use crate::core::{
    compile_charsmap, NormalizedText, NormalizerOptions, Piece, PieceKind, Tokenizer,
    TokenizerError, VocabError, Vocabulary, SPACE_SYMBOL,
};
