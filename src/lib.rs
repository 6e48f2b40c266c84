//! dyldinfo - decoders for Mach-O's compressed dynamic-linking metadata.
//!
//! Mach-O files and the dyld shared cache compress their dynamic-linking
//! tables aggressively: symbol exports live in a prefix trie, and
//! rebase/bind fixups are encoded as opcode bytecode with ULEB128
//! operands. This library decodes those encodings from plain byte
//! slices, without owning any I/O:
//!
//! - ULEB128/SLEB128 varints and bounded NUL-terminated strings
//! - The compressed prefix trie, with full reconstruction and point
//!   lookup, for export symbols, dylib paths, and program names
//! - The rebase opcode stream
//! - The three bind opcode streams, including the `threaded` sub-opcodes
//!   used by pointer-authentication chains
//!
//! All input is treated as untrusted: decoders never read out of bounds,
//! always terminate, and tolerate truncated or malformed data by
//! returning the successfully decoded prefix with an explicit
//! completeness flag ([`Decoded`]).
//!
//! # Example
//!
//! ```
//! use dyldinfo::ExportTrie;
//!
//! // An export trie with the single symbol "_main" at offset 0x100,
//! // as a collaborator would extract it from LC_DYLD_INFO.export_off.
//! let data: &[u8] = &[
//!     0x00, 0x01, b'_', b'm', b'a', b'i', b'n', 0x00, 0x09, // root
//!     0x03, 0x00, 0x80, 0x02, 0x00, // terminal node
//! ];
//!
//! let trie = ExportTrie::new(data);
//!
//! let symbols = trie.exported_symbols();
//! assert!(symbols.complete);
//! assert_eq!(symbols.values[0].name, "_main");
//! assert_eq!(symbols.values[0].offset, Some(0x100));
//!
//! // Point lookup decodes only the nodes along the key's path.
//! let hit = trie.search("_main").unwrap();
//! assert_eq!(hit.offset, Some(0x100));
//! ```
//!
//! Decoding is pure and synchronous; the underlying slice is never
//! mutated, so one buffer can serve any number of concurrent decodes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bind;
pub mod dyld_info;
pub mod error;
pub mod rebase;
pub mod trie;
pub mod util;

// Re-export main types
pub use bind::{
    BindOperation, BindOperations, BindSpecial, BindSubOperation, BindSymbolFlags, BindType,
    BindingSymbol,
};
pub use dyld_info::{BindKind, DyldInfo};
pub use error::{Decoded, Error, Result};
pub use rebase::{Rebase, RebaseOperation, RebaseOperations, RebaseType};
pub use trie::dylibs::{DylibIndex, DylibsTrie};
pub use trie::export::{ExportSymbolFlags, ExportSymbolKind, ExportTrie, ExportedSymbol};
pub use trie::programs::{ProgramOffset, ProgramsTrie};
pub use trie::{TrieContent, TrieEdge, TrieEntry, TrieNode, TrieTree};
