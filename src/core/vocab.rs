//! Vocabulary table: typed pieces with scores, categories, and id⇄text lookup.
//!
//! A vocabulary is an ordered list of [`Piece`] entries. A piece's id is its
//! 0-based position in that list. Pieces fall into five categories:
//!
//! - `Normal`: a regular subword unit, eligible for merging.
//! - `Unknown`: the fallback piece for text that resolves to nothing else.
//!   Exactly one per vocabulary.
//! - `Control`: a reserved marker such as `<s>` or `</s>`. Never produced by
//!   segmentation and never emitted by decoding.
//! - `Unused`: kept only so that merge history passing through it stays
//!   reachable; never appears in final output.
//! - `UserDefined`: an application-level token that must survive
//!   normalization and segmentation as one piece.
//!
//! Lookup is split into two maps, mirroring the category split: normal,
//! user-defined, and unused pieces live in one map, unknown and control
//! pieces in a reserved map. Text that appears in neither resolves to the
//! unknown id.

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors detected while validating a vocabulary at construction.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("piece {0} has empty text")]
    EmptyPiece(usize),
    #[error("duplicate piece text: {0:?}")]
    DuplicatePiece(String),
    #[error("vocabulary has no unknown piece")]
    MissingUnknown,
    #[error("vocabulary has multiple unknown pieces (ids {0} and {1})")]
    DuplicateUnknown(usize, usize),
}

/// Category of a vocabulary piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Normal,
    Unknown,
    Control,
    Unused,
    UserDefined,
}

/// One vocabulary entry: text, score, and category.
///
/// Scores are log-probability-like weights; a higher score marks a more
/// frequent piece and wins earlier during merging.
#[derive(Debug, Clone)]
pub struct Piece {
    text: String,
    score: f32,
    kind: PieceKind,
}

impl Piece {
    pub fn new(text: impl Into<String>, score: f32, kind: PieceKind) -> Self {
        Piece {
            text: text.into(),
            score,
            kind,
        }
    }

    /// A normal piece with the given score.
    pub fn normal(text: impl Into<String>, score: f32) -> Self {
        Piece::new(text, score, PieceKind::Normal)
    }

    /// The unknown piece. Score is irrelevant for reserved pieces.
    pub fn unknown(text: impl Into<String>) -> Self {
        Piece::new(text, 0.0, PieceKind::Unknown)
    }

    /// A control piece such as `<s>`.
    pub fn control(text: impl Into<String>) -> Self {
        Piece::new(text, 0.0, PieceKind::Control)
    }

    /// An unused piece kept only for merge history.
    pub fn unused(text: impl Into<String>, score: f32) -> Self {
        Piece::new(text, score, PieceKind::Unused)
    }

    /// A user-defined piece, protected from normalization and splitting.
    pub fn user_defined(text: impl Into<String>, score: f32) -> Self {
        Piece::new(text, score, PieceKind::UserDefined)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn kind(&self) -> PieceKind {
        self.kind
    }
}

/// An immutable, validated vocabulary table.
pub struct Vocabulary {
    pieces: Vec<Piece>,
    /// Normal, user-defined, and unused pieces.
    piece_to_id: FxHashMap<String, u32>,
    /// Unknown and control pieces.
    reserved_to_id: FxHashMap<String, u32>,
    unk_id: u32,
}

impl Vocabulary {
    /// Validate and index a list of pieces. Ids are assigned by position.
    ///
    /// Fails if any piece text is empty, any text occurs twice, or the list
    /// does not contain exactly one `Unknown` piece.
    pub fn new(pieces: Vec<Piece>) -> Result<Self, VocabError> {
        let mut piece_to_id = FxHashMap::default();
        let mut reserved_to_id = FxHashMap::default();
        let mut unk_id: Option<usize> = None;

        for (id, piece) in pieces.iter().enumerate() {
            if piece.text.is_empty() {
                return Err(VocabError::EmptyPiece(id));
            }
            if piece_to_id.contains_key(&piece.text) || reserved_to_id.contains_key(&piece.text) {
                return Err(VocabError::DuplicatePiece(piece.text.clone()));
            }
            match piece.kind {
                PieceKind::Unknown => {
                    if let Some(first) = unk_id {
                        return Err(VocabError::DuplicateUnknown(first, id));
                    }
                    unk_id = Some(id);
                    reserved_to_id.insert(piece.text.clone(), id as u32);
                }
                PieceKind::Control => {
                    reserved_to_id.insert(piece.text.clone(), id as u32);
                }
                PieceKind::Normal | PieceKind::Unused | PieceKind::UserDefined => {
                    piece_to_id.insert(piece.text.clone(), id as u32);
                }
            }
        }

        let unk_id = unk_id.ok_or(VocabError::MissingUnknown)? as u32;

        tracing::debug!(
            pieces = pieces.len(),
            user_defined = pieces
                .iter()
                .filter(|p| p.kind == PieceKind::UserDefined)
                .count(),
            unk_id,
            "vocabulary ready"
        );

        Ok(Vocabulary {
            pieces,
            piece_to_id,
            reserved_to_id,
            unk_id,
        })
    }

    /// Number of pieces in the table.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Id of the unknown piece.
    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    /// Resolve text to an id. Empty or unregistered text resolves to the
    /// unknown id.
    pub fn text_to_id(&self, text: &str) -> u32 {
        if text.is_empty() {
            return self.unk_id;
        }
        if let Some(&id) = self.reserved_to_id.get(text) {
            return id;
        }
        self.piece_to_id.get(text).copied().unwrap_or(self.unk_id)
    }

    /// Text of the piece with the given id. Ids come from this table, so an
    /// out-of-range id is a caller bug.
    pub fn id_to_text(&self, id: u32) -> &str {
        &self.pieces[id as usize].text
    }

    /// Score of the piece with the given id.
    pub fn score(&self, id: u32) -> f32 {
        self.pieces[id as usize].score
    }

    /// Category of the piece with the given id.
    pub fn kind(&self, id: u32) -> PieceKind {
        self.pieces[id as usize].kind
    }

    pub fn is_unknown(&self, id: u32) -> bool {
        self.kind(id) == PieceKind::Unknown
    }

    pub fn is_control(&self, id: u32) -> bool {
        self.kind(id) == PieceKind::Control
    }

    pub fn is_unused(&self, id: u32) -> bool {
        self.kind(id) == PieceKind::Unused
    }

    pub fn is_user_defined(&self, id: u32) -> bool {
        self.kind(id) == PieceKind::UserDefined
    }

    /// Resolve a merge candidate. Only normal, user-defined, and unused
    /// pieces can be produced by a merge; reserved pieces never can.
    pub(crate) fn merge_target(&self, text: &str) -> Option<u32> {
        self.piece_to_id.get(text).copied()
    }

    /// Texts of all user-defined pieces, in id order.
    pub fn user_defined(&self) -> impl Iterator<Item = &str> {
        self.pieces
            .iter()
            .filter(|p| p.kind == PieceKind::UserDefined)
            .map(|p| p.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pieces() -> Vec<Piece> {
        vec![
            Piece::unknown("<unk>"),
            Piece::control("<s>"),
            Piece::control("</s>"),
        ]
    }

    #[test]
    fn test_lookup_and_fallback() {
        let mut pieces = base_pieces();
        pieces.push(Piece::normal("a", 0.1));
        pieces.push(Piece::normal("b", 0.2));
        pieces.push(Piece::normal("c", 0.3));
        pieces.push(Piece::unused("d", 0.4));
        pieces.push(Piece::user_defined("e", 0.5));
        let vocab = Vocabulary::new(pieces).unwrap();

        assert_eq!(vocab.len(), 8);
        assert_eq!(vocab.text_to_id("a"), 3);
        assert_eq!(vocab.text_to_id("<s>"), 1);
        // Unregistered and empty text both fall back to the unknown id.
        assert_eq!(vocab.text_to_id("f"), 0);
        assert_eq!(vocab.text_to_id(""), 0);
        assert_eq!(vocab.unk_id(), 0);

        assert_eq!(vocab.id_to_text(3), "a");
        assert_eq!(vocab.score(4), 0.2);
        assert!(vocab.is_unknown(0));
        assert!(vocab.is_control(1));
        assert!(vocab.is_control(2));
        assert!(vocab.is_unused(6));
        assert!(vocab.is_user_defined(7));
        assert_eq!(vocab.kind(3), PieceKind::Normal);
    }

    #[test]
    fn test_merge_target_excludes_reserved() {
        let mut pieces = base_pieces();
        pieces.push(Piece::normal("ab", 1.0));
        let vocab = Vocabulary::new(pieces).unwrap();

        assert_eq!(vocab.merge_target("ab"), Some(3));
        // Reserved pieces are resolvable by text_to_id but never mergeable.
        assert_eq!(vocab.merge_target("<s>"), None);
        assert_eq!(vocab.text_to_id("<s>"), 1);
    }

    #[test]
    fn test_user_defined_iteration() {
        let mut pieces = base_pieces();
        pieces.push(Piece::user_defined("[SEP]", 0.0));
        pieces.push(Piece::normal("x", 0.1));
        pieces.push(Piece::user_defined("[CLS]", 0.0));
        let vocab = Vocabulary::new(pieces).unwrap();

        let defined: Vec<&str> = vocab.user_defined().collect();
        assert_eq!(defined, vec!["[SEP]", "[CLS]"]);
    }

    #[test]
    fn test_empty_piece_rejected() {
        let mut pieces = base_pieces();
        pieces.push(Piece::normal("", 0.1));
        assert!(matches!(
            Vocabulary::new(pieces),
            Err(VocabError::EmptyPiece(3))
        ));
    }

    #[test]
    fn test_duplicate_piece_rejected() {
        let mut pieces = base_pieces();
        pieces.push(Piece::normal("a", 0.1));
        pieces.push(Piece::normal("a", 0.2));
        assert!(matches!(
            Vocabulary::new(pieces),
            Err(VocabError::DuplicatePiece(_))
        ));
    }

    #[test]
    fn test_duplicate_across_categories_rejected() {
        let mut pieces = base_pieces();
        pieces.push(Piece::user_defined("<s>", 0.0));
        assert!(matches!(
            Vocabulary::new(pieces),
            Err(VocabError::DuplicatePiece(_))
        ));
    }

    #[test]
    fn test_missing_unknown_rejected() {
        let pieces = vec![Piece::control("<s>"), Piece::normal("a", 0.1)];
        assert!(matches!(
            Vocabulary::new(pieces),
            Err(VocabError::MissingUnknown)
        ));
    }

    #[test]
    fn test_multiple_unknown_rejected() {
        let mut pieces = base_pieces();
        pieces.push(Piece::unknown("<unk2>"));
        assert!(matches!(
            Vocabulary::new(pieces),
            Err(VocabError::DuplicateUnknown(0, 3))
        ));
    }
}
