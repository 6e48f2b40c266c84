//! Dylibs trie content: the dyld cache's path-to-ordinal table.
//!
//! The shared cache keeps a trie mapping each dylib install path (and
//! aliases) to its index in the cache's image array. The terminal
//! payload is a single ULEB128 ordinal.

use super::{sealed, TrieContent, TrieTree};
use crate::error::Decoded;
use crate::util::read_uleb128;

/// Decoded terminal payload of a dylibs-trie node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DylibIndexContent {
    /// Index of the dylib in the cache's image array.
    pub index: u32,
}

impl sealed::Sealed for DylibIndexContent {}

impl TrieContent for DylibIndexContent {
    fn read(payload: &[u8]) -> Option<Self> {
        let (index, _) = read_uleb128(payload)?;
        Some(Self {
            index: index as u32,
        })
    }
}

/// One dylib path with its cache image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibIndex {
    /// Install path or alias (e.g. "/usr/lib/libSystem.B.dylib").
    pub name: String,
    /// Index in the cache's image array.
    pub index: u32,
}

/// Decoder for the dyld cache dylibs trie.
pub type DylibsTrie<'a> = TrieTree<'a, DylibIndexContent>;

impl<'a> TrieTree<'a, DylibIndexContent> {
    /// Reconstructs every (path, index) pair in the trie.
    pub fn dylib_indices(&self) -> Decoded<DylibIndex> {
        let entries = self.entries();
        Decoded {
            values: entries
                .values
                .into_iter()
                .map(|entry| DylibIndex {
                    name: entry.name,
                    index: entry.content.index,
                })
                .collect(),
            complete: entries.complete,
        }
    }

    /// Looks up a single dylib path.
    pub fn dylib_index(&self, name: &str) -> Option<DylibIndex> {
        self.lookup(name).map(|content| DylibIndex {
            name: name.to_string(),
            index: content.index,
        })
    }
}
