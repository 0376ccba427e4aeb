//! Byte-level prefix index for normalization rewrite rules.
//!
//! A [`PrefixIndex`] stores a finite set of byte-string keys, each with an
//! attached `u32` value, and answers common-prefix queries: given an input,
//! report every stored key that is a prefix of that input together with its
//! length and value. The normalizer uses this to find rewrite rules that
//! apply at the current position.
//!
//! The index is built once and read-only afterwards. It also defines a
//! compact byte serialization so a rule set can be embedded in a charsmap
//! blob:
//!
//! ```text
//! <u32 LE entry count>
//! per entry: <u16 LE key length><key bytes><u32 LE value>
//! ```
//!
//! Entries serialize in insertion order, so round-tripping preserves the
//! first-inserted-wins policy for any future equal-length ambiguity.

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Upper bound on matches reported per query. Realistic rule sets stay far
/// below this; queries against deeper key chains are truncated.
pub const MAX_PREFIX_MATCHES: usize = 64;

/// Errors from building or deserializing a prefix index.
#[derive(Error, Debug)]
pub enum TrieError {
    #[error("empty key at entry {0}")]
    EmptyKey(usize),
    #[error("key at entry {0} exceeds {max} bytes", max = u16::MAX)]
    KeyTooLong(usize),
    #[error("duplicate key: {0:?}")]
    DuplicateKey(String),
    #[error("serialized index truncated at byte {0}")]
    Truncated(usize),
    #[error("serialized index has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// One query result: a stored key of byte length `len` is a prefix of the
/// query, carrying `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixMatch {
    pub len: usize,
    pub value: u32,
}

#[derive(Debug, Default)]
struct Node {
    children: FxHashMap<u8, u32>,
    value: Option<u32>,
}

/// Common-prefix-search structure over byte-string keys with `u32` values.
#[derive(Debug)]
pub struct PrefixIndex {
    nodes: Vec<Node>,
    entries: Vec<(Vec<u8>, u32)>,
}

impl PrefixIndex {
    /// Build an index from (key, value) pairs. An empty pair set is legal
    /// and produces an index that never matches.
    pub fn new<K>(pairs: impl IntoIterator<Item = (K, u32)>) -> Result<Self, TrieError>
    where
        K: Into<Vec<u8>>,
    {
        let mut index = PrefixIndex {
            nodes: vec![Node::default()],
            entries: Vec::new(),
        };
        for (entry, (key, value)) in pairs.into_iter().enumerate() {
            let key = key.into();
            if key.is_empty() {
                return Err(TrieError::EmptyKey(entry));
            }
            if key.len() > u16::MAX as usize {
                return Err(TrieError::KeyTooLong(entry));
            }
            index.insert(&key, value)?;
            index.entries.push((key, value));
        }
        Ok(index)
    }

    fn insert(&mut self, key: &[u8], value: u32) -> Result<(), TrieError> {
        let mut node = 0usize;
        for &byte in key {
            node = match self.nodes[node].children.get(&byte) {
                Some(&next) => next as usize,
                None => {
                    let next = self.nodes.len() as u32;
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(byte, next);
                    next as usize
                }
            };
        }
        if self.nodes[node].value.is_some() {
            return Err(TrieError::DuplicateKey(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        self.nodes[node].value = Some(value);
        Ok(())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored (key, value) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u32)> {
        self.entries.iter().map(|(key, value)| (key.as_slice(), *value))
    }

    /// All keys of the index that are prefixes of `query`, in increasing
    /// length order, truncated at [`MAX_PREFIX_MATCHES`].
    pub fn common_prefixes<'a>(&'a self, query: &'a [u8]) -> CommonPrefixes<'a> {
        CommonPrefixes {
            index: self,
            query,
            node: 0,
            depth: 0,
            yielded: 0,
            done: self.is_empty(),
        }
    }

    /// Serialize to the compact entry-list encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.entries.iter().map(|(k, _)| k.len() + 6).sum::<usize>());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, value) in &self.entries {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Parse the compact entry-list encoding produced by [`to_bytes`].
    ///
    /// [`to_bytes`]: PrefixIndex::to_bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, TrieError> {
        let mut pos = 0usize;
        let count = read_u32(data, &mut pos)?;
        // Each entry takes at least 6 wire bytes (length prefix plus value),
        // so a count the remaining data cannot hold is truncation. Checked
        // before the count sizes any allocation.
        if count as usize > (data.len() - pos) / 6 {
            return Err(TrieError::Truncated(data.len()));
        }
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = read_u16(data, &mut pos)? as usize;
            if data.len() - pos < key_len {
                return Err(TrieError::Truncated(data.len()));
            }
            let key = data[pos..pos + key_len].to_vec();
            pos += key_len;
            let value = read_u32(data, &mut pos)?;
            pairs.push((key, value));
        }
        if pos != data.len() {
            return Err(TrieError::TrailingBytes(data.len() - pos));
        }
        PrefixIndex::new(pairs)
    }
}

fn read_u16(data: &[u8], pos: &mut usize) -> Result<u16, TrieError> {
    let end = pos.checked_add(2).filter(|&e| e <= data.len());
    let end = end.ok_or(TrieError::Truncated(data.len()))?;
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&data[*pos..end]);
    *pos = end;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, TrieError> {
    let end = pos.checked_add(4).filter(|&e| e <= data.len());
    let end = end.ok_or(TrieError::Truncated(data.len()))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[*pos..end]);
    *pos = end;
    Ok(u32::from_le_bytes(buf))
}

/// Iterator over the matches of one common-prefix query.
pub struct CommonPrefixes<'a> {
    index: &'a PrefixIndex,
    query: &'a [u8],
    node: u32,
    depth: usize,
    yielded: usize,
    done: bool,
}

impl Iterator for CommonPrefixes<'_> {
    type Item = PrefixMatch;

    fn next(&mut self) -> Option<PrefixMatch> {
        while !self.done && self.yielded < MAX_PREFIX_MATCHES {
            let Some(&byte) = self.query.get(self.depth) else {
                self.done = true;
                break;
            };
            match self.index.nodes[self.node as usize].children.get(&byte) {
                Some(&next) => {
                    self.node = next;
                    self.depth += 1;
                    if let Some(value) = self.index.nodes[next as usize].value {
                        self.yielded += 1;
                        return Some(PrefixMatch {
                            len: self.depth,
                            value,
                        });
                    }
                }
                None => {
                    self.done = true;
                }
            }
        }
        None
    }
}
