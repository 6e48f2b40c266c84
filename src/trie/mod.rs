//! Compressed prefix-trie decoding.
//!
//! Mach-O and the dyld shared cache store several string-keyed tables as
//! compressed prefix tries: exported symbols, dylib paths, and program
//! names. The node wire format is shared; only the terminal payload
//! differs. Each node is:
//!
//! - a ULEB128 terminal size (0 for non-terminal nodes),
//! - that many payload bytes, interpreted per content schema,
//! - one child-count byte,
//! - `count` edges, each a NUL-terminated label followed by a ULEB128
//!   offset of the child node **from the start of the trie buffer**.
//!
//! [`TrieTree`] is generic over the payload schema via the sealed
//! [`TrieContent`] trait; the three schemas in use live in [`export`],
//! [`dylibs`] and [`programs`].

use std::collections::HashSet;
use std::marker::PhantomData;

use tracing::debug;

use crate::error::{Decoded, Error, Result};
use crate::util::{read_cstr, read_uleb128};

pub mod dylibs;
pub mod export;
pub mod programs;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// A terminal-payload schema for one of the known trie kinds.
///
/// This trait is sealed: the set of content schemas is fixed by the file
/// format, so it is closed at compile time rather than open to dynamic
/// dispatch.
pub trait TrieContent: sealed::Sealed + Sized {
    /// Decodes a terminal payload.
    ///
    /// `payload` holds exactly the bytes declared by the node's terminal
    /// size. Returns `None` when nothing recoverable could be decoded;
    /// partially truncated payloads keep whatever fields were read.
    fn read(payload: &[u8]) -> Option<Self>;
}

// =============================================================================
// Nodes and Edges
// =============================================================================

/// An edge from a trie node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieEdge {
    /// Label prefix contributed by this edge.
    pub label: String,
    /// Offset of the child node from the start of the trie buffer.
    pub offset: u64,
}

/// A single decoded trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieNode<C> {
    /// Offset of this node from the start of the trie buffer.
    pub offset: usize,
    /// Declared size of the terminal payload (0 = non-terminal).
    pub terminal_size: u64,
    /// Decoded payload, present when `terminal_size > 0` and the payload
    /// was recoverable.
    pub content: Option<C>,
    /// Outgoing edges, in on-disk order.
    pub children: Vec<TrieEdge>,
}

impl<C> TrieNode<C> {
    /// Returns true if this node completes a key.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal_size != 0
    }
}

/// One reconstructed (key, content) pair from a full trie traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieEntry<C> {
    /// The full key: edge labels concatenated along the path from the
    /// root.
    pub name: String,
    /// The terminal payload.
    pub content: C,
}

// =============================================================================
// Trie Decoder
// =============================================================================

/// Decoder for a compressed prefix trie held in a borrowed byte range.
///
/// All offsets produced and consumed are relative to the start of that
/// range; translating to file offsets or addresses is the caller's job.
/// The buffer is never mutated, so one buffer can back any number of
/// concurrent lookups.
pub struct TrieTree<'a, C: TrieContent> {
    data: &'a [u8],
    _content: PhantomData<fn() -> C>,
}

impl<'a, C: TrieContent> Clone for TrieTree<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C: TrieContent> Copy for TrieTree<'a, C> {}

impl<'a, C: TrieContent> std::fmt::Debug for TrieTree<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieTree")
            .field("size", &self.data.len())
            .finish()
    }
}

impl<'a, C: TrieContent> TrieTree<'a, C> {
    /// Creates a decoder over the given trie bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _content: PhantomData,
        }
    }

    /// Returns the underlying trie bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Decodes the single node at the given offset.
    ///
    /// This is the strict entry point: a node whose terminal-size varint
    /// is unreadable, or whose declared payload overruns the buffer, is
    /// an error. A children list cut off by the end of the buffer keeps
    /// the edges read so far.
    pub fn node_at(&self, offset: usize) -> Result<TrieNode<C>> {
        self.read_node(offset).map(|(node, _)| node)
    }

    /// Node decode plus a flag telling walkers whether anything inside
    /// the node (children list, terminal payload) was cut short.
    fn read_node(&self, offset: usize) -> Result<(TrieNode<C>, bool)> {
        let data = self.data;
        if offset >= data.len() {
            return Err(Error::out_of_bounds(offset, data.len()));
        }

        let (terminal_size, uleb_len) =
            read_uleb128(&data[offset..]).ok_or(Error::InvalidLeb128 { offset })?;

        let payload_start = offset + uleb_len;
        let payload_end = payload_start
            .checked_add(terminal_size as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| Error::truncated(payload_start))?;

        let content = if terminal_size > 0 {
            C::read(&data[payload_start..payload_end])
        } else {
            None
        };

        let mut node = TrieNode {
            offset,
            terminal_size,
            content,
            children: Vec::new(),
        };
        let mut complete = !(terminal_size > 0 && node.content.is_none());

        // Children live after the declared payload regardless of how many
        // payload bytes the content schema actually understood.
        let mut cursor = payload_end;
        if cursor >= data.len() {
            // The child-count byte is missing; tolerate a node flush
            // against the end of the buffer.
            return Ok((node, false));
        }

        let child_count = data[cursor];
        cursor += 1;

        for _ in 0..child_count {
            let Some((label, label_len)) = read_cstr(&data[cursor..]) else {
                complete = false;
                break;
            };
            cursor += label_len;

            let Some((child_offset, offset_len)) = read_uleb128(&data[cursor..]) else {
                complete = false;
                break;
            };
            cursor += offset_len;

            node.children.push(TrieEdge {
                label,
                offset: child_offset,
            });
        }

        Ok((node, complete))
    }

    /// Reconstructs every (key, content) pair in the trie.
    ///
    /// Depth-first from the root at offset 0, children in on-disk order;
    /// each terminal node's key is the concatenation of the edge labels
    /// on its path. A structurally corrupt node stops only its own
    /// subtree and clears [`Decoded::complete`]. Node offsets are never
    /// entered twice, so aliased or cyclic child offsets in hostile
    /// input terminate in linear work.
    pub fn entries(&self) -> Decoded<TrieEntry<C>> {
        let mut out = Decoded::empty();
        if self.data.is_empty() {
            return out;
        }

        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(0);
        let mut stack: Vec<(usize, String)> = vec![(0, String::new())];

        while let Some((offset, prefix)) = stack.pop() {
            let (node, node_complete) = match self.read_node(offset) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(offset, %err, "trie node unreadable, dropping subtree");
                    out.complete = false;
                    continue;
                }
            };
            if !node_complete {
                out.complete = false;
            }

            if node.terminal_size > 0 {
                match node.content {
                    Some(content) => out.values.push(TrieEntry {
                        name: prefix.clone(),
                        content,
                    }),
                    // Terminal payload unrecoverable; the subtree below
                    // is still intact.
                    None => out.complete = false,
                }
            }

            // Reverse push so the stack pops children in on-disk order.
            for edge in node.children.into_iter().rev() {
                let child = usize::try_from(edge.offset).unwrap_or(usize::MAX);
                if !visited.insert(child) {
                    debug!(offset = child, "trie child offset revisited, skipping");
                    out.complete = false;
                    continue;
                }
                let mut name = String::with_capacity(prefix.len() + edge.label.len());
                name.push_str(&prefix);
                name.push_str(&edge.label);
                stack.push((child, name));
            }
        }

        out
    }

    /// Point lookup of a single key.
    ///
    /// Greedy edge matching from the root: at each node, follow the child
    /// whose label is a prefix of the remaining suffix. Nothing is
    /// materialized; cost is proportional to the key length times the
    /// branching factor, not the trie size.
    pub fn lookup(&self, key: &str) -> Option<C> {
        if self.data.is_empty() {
            return None;
        }

        let mut offset = 0usize;
        let mut remaining = key.as_bytes();

        loop {
            let (node, _) = self.read_node(offset).ok()?;

            if remaining.is_empty() {
                return if node.is_terminal() { node.content } else { None };
            }

            // Empty labels are malformed and would never consume input.
            let edge = node
                .children
                .iter()
                .find(|e| !e.label.is_empty() && remaining.starts_with(e.label.as_bytes()))?;

            remaining = &remaining[edge.label.len()..];
            offset = usize::try_from(edge.offset).ok()?;
        }
    }
}
