//! Boundary bundle for the five `LC_DYLD_INFO` sub-ranges.
//!
//! The load command points at five byte ranges inside `__LINKEDIT`:
//! rebase info, three bind streams, and the export trie. Locating those
//! ranges (and translating any offsets the decoders produce back to file
//! offsets or addresses) belongs to whoever owns the file or image;
//! this type just borrows the extracted slices and fans out to the
//! decoders.

use crate::bind::{BindOperations, BindingSymbol};
use crate::error::Decoded;
use crate::rebase::{Rebase, RebaseOperations};
use crate::trie::export::{ExportTrie, ExportedSymbol};

/// Which of the three bind streams to decode.
///
/// The streams share one bytecode; the split exists so the linker can
/// replay them at different times (weak coalescing, lazy stubs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindKind {
    /// Bindings applied at load time.
    #[default]
    Normal,
    /// Weak bindings, coalesced across images.
    Weak,
    /// Bindings resolved on first call through a stub.
    Lazy,
}

/// Borrowed view of the `LC_DYLD_INFO` payload ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct DyldInfo<'a> {
    /// Rebase opcode stream.
    pub rebase: &'a [u8],
    /// Normal bind opcode stream.
    pub bind: &'a [u8],
    /// Weak bind opcode stream.
    pub weak_bind: &'a [u8],
    /// Lazy bind opcode stream.
    pub lazy_bind: &'a [u8],
    /// Export trie.
    pub export: &'a [u8],
}

impl<'a> DyldInfo<'a> {
    /// Bundles the five sub-ranges a collaborator extracted from
    /// `__LINKEDIT`.
    pub fn new(
        rebase: &'a [u8],
        bind: &'a [u8],
        weak_bind: &'a [u8],
        lazy_bind: &'a [u8],
        export: &'a [u8],
    ) -> Self {
        Self {
            rebase,
            bind,
            weak_bind,
            lazy_bind,
            export,
        }
    }

    /// Iterates the rebase opcode stream.
    pub fn rebase_operations(&self) -> RebaseOperations<'a> {
        RebaseOperations::new(self.rebase)
    }

    /// Replays the rebase stream into flat [`Rebase`] records.
    pub fn rebases(&self, is_64bit: bool) -> Decoded<Rebase> {
        self.rebase_operations().rebases(is_64bit)
    }

    /// Iterates one of the three bind opcode streams.
    pub fn bind_operations(&self, kind: BindKind) -> BindOperations<'a> {
        BindOperations::new(self.bind_data(kind))
    }

    /// Replays one bind stream into flat [`BindingSymbol`] records.
    pub fn binding_symbols(&self, kind: BindKind, is_64bit: bool) -> Decoded<BindingSymbol> {
        self.bind_operations(kind).bindings(is_64bit)
    }

    /// Decoder over the export trie.
    pub fn export_trie(&self) -> ExportTrie<'a> {
        ExportTrie::new(self.export)
    }

    /// Reconstructs every exported symbol.
    pub fn exported_symbols(&self) -> Decoded<ExportedSymbol> {
        self.export_trie().exported_symbols()
    }

    /// Looks up a single exported symbol by name.
    pub fn search_export(&self, name: &str) -> Option<ExportedSymbol> {
        self.export_trie().search(name)
    }

    fn bind_data(&self, kind: BindKind) -> &'a [u8] {
        match kind {
            BindKind::Normal => self.bind,
            BindKind::Weak => self.weak_bind,
            BindKind::Lazy => self.lazy_bind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::bind_opcodes::*;
    use crate::rebase::rebase_opcodes::*;

    #[test]
    fn test_streams_are_independent() {
        let rebase = [
            REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB,
            0x08,
            REBASE_OPCODE_DO_REBASE_IMM_TIMES | 1,
            REBASE_OPCODE_DONE,
        ];
        let bind = [
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | 1,
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM,
            b'_',
            b'n',
            0x00,
            BIND_OPCODE_DO_BIND,
            BIND_OPCODE_DONE,
        ];
        let weak = [
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM,
            b'_',
            b'w',
            0x00,
            BIND_OPCODE_DO_BIND,
            BIND_OPCODE_DONE,
        ];

        let info = DyldInfo::new(&rebase, &bind, &weak, &[], &[]);

        assert_eq!(info.rebases(true).len(), 1);

        let normal = info.binding_symbols(BindKind::Normal, true);
        assert_eq!(normal.values[0].symbol_name, "_n");

        let weak = info.binding_symbols(BindKind::Weak, true);
        assert_eq!(weak.values[0].symbol_name, "_w");

        let lazy = info.binding_symbols(BindKind::Lazy, true);
        assert!(lazy.is_empty());
        assert!(lazy.complete);

        assert!(info.exported_symbols().is_empty());
        assert!(info.search_export("_n").is_none());
    }
}
