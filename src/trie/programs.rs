//! Programs trie content: the dyld cache's prebuilt-loader-set table.
//!
//! Newer caches keep a trie mapping program paths (and cdhashes) to the
//! byte offset of their prebuilt loader set. The terminal payload is a
//! single ULEB128 offset.

use super::{sealed, TrieContent, TrieTree};
use crate::error::Decoded;
use crate::util::read_uleb128;

/// Decoded terminal payload of a programs-trie node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOffsetContent {
    /// Byte offset of the program's prebuilt loader set.
    pub offset: u32,
}

impl sealed::Sealed for ProgramOffsetContent {}

impl TrieContent for ProgramOffsetContent {
    fn read(payload: &[u8]) -> Option<Self> {
        let (offset, _) = read_uleb128(payload)?;
        Some(Self {
            offset: offset as u32,
        })
    }
}

/// One program path with its loader-set offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOffset {
    /// Program path (e.g. "/usr/bin/ls").
    pub name: String,
    /// Byte offset of the prebuilt loader set.
    pub offset: u32,
}

/// Decoder for the dyld cache programs trie.
pub type ProgramsTrie<'a> = TrieTree<'a, ProgramOffsetContent>;

impl<'a> TrieTree<'a, ProgramOffsetContent> {
    /// Reconstructs every (program, offset) pair in the trie.
    pub fn program_offsets(&self) -> Decoded<ProgramOffset> {
        let entries = self.entries();
        Decoded {
            values: entries
                .values
                .into_iter()
                .map(|entry| ProgramOffset {
                    name: entry.name,
                    offset: entry.content.offset,
                })
                .collect(),
            complete: entries.complete,
        }
    }

    /// Looks up a single program path.
    pub fn program_offset(&self, name: &str) -> Option<ProgramOffset> {
        self.lookup(name).map(|content| ProgramOffset {
            name: name.to_string(),
            offset: content.offset,
        })
    }
}
