//! Greedy score-driven subword segmentation over a fixed vocabulary.
//!
//! The segmenter splits normalized text into an initial run of symbols (one
//! per code point, or one per protected token), then repeatedly merges the
//! adjacent pair whose concatenation is the best-scoring vocabulary piece.
//! Symbols are (start, end) ranges into the one normalized buffer, linked
//! into a doubly linked list, so a merge is an index update rather than a
//! copy.
//!
//! Merge candidates sit in a max-heap ordered by score, ties broken toward
//! the leftmost pair. Entries are invalidated lazily: a popped candidate is
//! simply discarded when either side no longer has the recorded extent.
//!
//! Pieces marked unused may be merged *into* (preserving merge-order
//! history) but never emitted: the final walk resegments them back into the
//! sub-pieces that produced them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::matcher::TokenMatcher;
use super::vocab::Vocabulary;

/// One element of the working run: a live range of the input buffer.
struct Symbol {
    start: usize,
    end: usize,
    /// Index of the previous live symbol, -1 at the head.
    prev: i32,
    /// Index of the next live symbol, -1 at the tail.
    next: i32,
    /// Protected-token symbols never participate in merges.
    frozen: bool,
}

impl Symbol {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A pending merge of two adjacent symbols into one vocabulary piece.
struct MergeCandidate {
    score: f32,
    left: usize,
    right: usize,
    /// Combined byte length at creation time; a mismatch on pop means the
    /// candidate went stale.
    size: usize,
}

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    /// Higher score first; on equal scores the leftmost pair wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.left.cmp(&self.left))
    }
}

/// Turns normalized text into (piece, id) pairs using a vocabulary and its
/// protected-token matcher.
pub struct Segmenter {
    vocab: Vocabulary,
    matcher: TokenMatcher,
}

impl Segmenter {
    /// Build a segmenter whose protected tokens are the vocabulary's
    /// user-defined pieces.
    pub fn new(vocab: Vocabulary) -> Result<Self, aho_corasick::BuildError> {
        let matcher = TokenMatcher::new(vocab.user_defined())?;
        Ok(Segmenter::with_matcher(vocab, matcher))
    }

    /// Build a segmenter with an explicit protected-token matcher.
    pub fn with_matcher(vocab: Vocabulary, matcher: TokenMatcher) -> Self {
        Segmenter { vocab, matcher }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn matcher(&self) -> &TokenMatcher {
        &self.matcher
    }

    /// Segment normalized text. The returned piece texts are slices of
    /// `text`, in order, and concatenate back to `text` exactly.
    pub fn encode<'a>(&self, text: &'a str) -> Vec<(&'a str, u32)> {
        if text.is_empty() {
            return Vec::new();
        }

        let bytes = text.as_bytes();
        let mut symbols: Vec<Symbol> = Vec::with_capacity(text.len());

        // Initial split: one symbol per protected token or code point.
        let mut pos = 0usize;
        while pos < bytes.len() {
            let (len, found) = self.matcher.prefix_match(&bytes[pos..]);
            debug_assert!(len > 0, "prefix_match must always consume input");
            let index = symbols.len() as i32;
            let end = pos + len;
            symbols.push(Symbol {
                start: pos,
                end,
                prev: index - 1,
                next: if end == bytes.len() { -1 } else { index + 1 },
                frozen: found,
            });
            pos = end;
        }

        let mut agenda: BinaryHeap<MergeCandidate> = BinaryHeap::new();
        let mut rev_merge: FxHashMap<&'a str, (&'a str, &'a str)> = FxHashMap::default();

        // Seed with every adjacent pair.
        for i in 1..symbols.len() {
            self.maybe_add_pair(text, &symbols, i - 1, i, &mut agenda, &mut rev_merge);
        }

        while let Some(top) = agenda.pop() {
            let (left, right) = (&symbols[top.left], &symbols[top.right]);
            // Stale candidate: one side was consumed by an earlier merge.
            if left.is_empty() || right.is_empty() || left.len() + right.len() != top.size {
                continue;
            }

            // Extend the left symbol over both ranges and unlink the right.
            debug_assert_eq!(symbols[top.left].end, symbols[top.right].start);
            symbols[top.left].end = symbols[top.right].end;
            let next = symbols[top.right].next;
            symbols[top.left].next = next;
            if next >= 0 {
                symbols[next as usize].prev = top.left as i32;
            }
            symbols[top.right].end = symbols[top.right].start;

            let prev = symbols[top.left].prev;
            if prev >= 0 {
                self.maybe_add_pair(
                    text,
                    &symbols,
                    prev as usize,
                    top.left,
                    &mut agenda,
                    &mut rev_merge,
                );
            }
            if next >= 0 {
                self.maybe_add_pair(
                    text,
                    &symbols,
                    top.left,
                    next as usize,
                    &mut agenda,
                    &mut rev_merge,
                );
            }
        }

        let mut output: Vec<(&'a str, u32)> = Vec::new();
        let mut index = 0i32;
        while index != -1 {
            debug_assert!(index >= 0 && (index as usize) < symbols.len());
            let symbol = &symbols[index as usize];
            self.resegment(&text[symbol.start..symbol.end], &rev_merge, &mut output);
            index = symbol.next;
        }
        output
    }

    /// Push a merge candidate for two adjacent live symbols, if their
    /// concatenation is a known piece. Records reverse-merge info when the
    /// piece is unused.
    fn maybe_add_pair<'a>(
        &self,
        text: &'a str,
        symbols: &[Symbol],
        left: usize,
        right: usize,
        agenda: &mut BinaryHeap<MergeCandidate>,
        rev_merge: &mut FxHashMap<&'a str, (&'a str, &'a str)>,
    ) {
        let (l, r) = (&symbols[left], &symbols[right]);
        if l.frozen || r.frozen {
            return;
        }
        debug_assert_eq!(l.end, r.start, "merge candidates must be adjacent");
        let piece = &text[l.start..r.end];
        let Some(id) = self.vocab.merge_target(piece) else {
            return;
        };
        agenda.push(MergeCandidate {
            score: self.vocab.score(id),
            left,
            right,
            size: piece.len(),
        });
        if self.vocab.is_unused(id) {
            rev_merge.insert(piece, (&text[l.start..l.end], &text[r.start..r.end]));
        }
    }

    /// Emit a surviving piece, expanding unused pieces back into their
    /// recorded sub-pieces depth-first.
    fn resegment<'a>(
        &self,
        piece: &'a str,
        rev_merge: &FxHashMap<&'a str, (&'a str, &'a str)>,
        output: &mut Vec<(&'a str, u32)>,
    ) {
        let id = self.vocab.text_to_id(piece);
        if !self.vocab.is_unused(id) {
            output.push((piece, id));
            return;
        }
        match rev_merge.get(piece) {
            Some(&(left, right)) => {
                self.resegment(left, rev_merge, output);
                self.resegment(right, rev_merge, output);
            }
            // Unused pieces reached here always came from a recorded merge;
            // emit as-is rather than fail if that ever stops holding.
            None => output.push((piece, id)),
        }
    }
}
