//! Export trie content: the symbol table the dynamic linker actually
//! searches.
//!
//! A terminal payload starts with a ULEB128 flags value; the flags then
//! select exactly one trailer:
//! - reexport: source-dylib ordinal + optional imported name,
//! - stub-and-resolver: stub offset + resolver offset,
//! - regular: the symbol's offset from the mach header.

use bitflags::bitflags;

use super::{sealed, TrieContent, TrieTree};
use crate::error::Decoded;
use crate::util::{read_cstr, read_uleb128};

// =============================================================================
// Export Flags
// =============================================================================

/// Export symbol kind mask (low two bits of the flags).
pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;

bitflags! {
    /// EXPORT_SYMBOL_FLAGS_* bits carried by a terminal export node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportSymbolFlags: u64 {
        /// Weak definition (EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION).
        const WEAK_DEFINITION = 0x04;
        /// Re-export from another dylib (EXPORT_SYMBOL_FLAGS_REEXPORT).
        const REEXPORT = 0x08;
        /// Stub with runtime resolver (EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER).
        const STUB_AND_RESOLVER = 0x10;
        /// Statically resolved (EXPORT_SYMBOL_FLAGS_STATIC_RESOLVER).
        const STATIC_RESOLVER = 0x20;
    }
}

/// The kind encoded in the low bits of the export flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSymbolKind {
    /// Regular export.
    Regular,
    /// Thread-local variable.
    ThreadLocal,
    /// Absolute symbol, not relative to any section.
    Absolute,
}

impl ExportSymbolFlags {
    /// Builds flags from the raw ULEB value, keeping the kind bits.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Returns the symbol kind.
    pub fn kind(self) -> ExportSymbolKind {
        match self.bits() & EXPORT_SYMBOL_FLAGS_KIND_MASK {
            0x01 => ExportSymbolKind::ThreadLocal,
            0x02 => ExportSymbolKind::Absolute,
            _ => ExportSymbolKind::Regular,
        }
    }

    /// Returns true if this is a re-export.
    #[inline]
    pub fn is_reexport(self) -> bool {
        self.contains(Self::REEXPORT)
    }

    /// Returns true if this is a weak definition.
    #[inline]
    pub fn is_weak(self) -> bool {
        self.contains(Self::WEAK_DEFINITION)
    }

    /// Returns true if this is a stub with resolver.
    #[inline]
    pub fn is_stub_and_resolver(self) -> bool {
        self.contains(Self::STUB_AND_RESOLVER)
    }
}

// =============================================================================
// Export Content
// =============================================================================

/// Decoded terminal payload of an export-trie node.
///
/// Exactly one of `ordinal`/`symbol_offset` is populated on well-formed
/// input, selected by the reexport flag; truncated payloads keep the
/// fields that were recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportContent {
    /// Export flags.
    pub flags: ExportSymbolFlags,
    /// For re-exports: ordinal of the source dylib.
    pub ordinal: Option<u64>,
    /// For re-exports: name in the source dylib, when it differs.
    pub imported_name: Option<String>,
    /// For stub+resolver exports: offset of the stub.
    pub stub: Option<u64>,
    /// For stub+resolver exports: offset of the resolver function.
    pub resolver: Option<u64>,
    /// For regular exports: symbol offset from the mach header.
    pub symbol_offset: Option<u64>,
}

impl sealed::Sealed for ExportContent {}

impl TrieContent for ExportContent {
    fn read(payload: &[u8]) -> Option<Self> {
        let (raw, mut cursor) = read_uleb128(payload)?;
        let flags = ExportSymbolFlags::from_raw(raw);

        let mut content = ExportContent {
            flags,
            ..Default::default()
        };

        if flags.is_reexport() {
            if let Some((ordinal, len)) = read_uleb128(&payload[cursor..]) {
                cursor += len;
                content.ordinal = Some(ordinal);

                if let Some((name, _)) = read_cstr(&payload[cursor..]) {
                    if !name.is_empty() {
                        content.imported_name = Some(name);
                    }
                }
            }
        } else if flags.is_stub_and_resolver() {
            if let Some((stub, len)) = read_uleb128(&payload[cursor..]) {
                cursor += len;
                content.stub = Some(stub);

                if let Some((resolver, _)) = read_uleb128(&payload[cursor..]) {
                    content.resolver = Some(resolver);
                }
            }
        } else if let Some((offset, _)) = read_uleb128(&payload[cursor..]) {
            content.symbol_offset = Some(offset);
        }

        Some(content)
    }
}

// =============================================================================
// Exported Symbols
// =============================================================================

/// One exported symbol reconstructed from the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    /// Symbol name (full key path in the trie).
    pub name: String,
    /// Symbol offset from the mach header, for regular exports.
    pub offset: Option<u64>,
    /// Export flags.
    pub flags: ExportSymbolFlags,
    /// Source dylib ordinal, for re-exports.
    pub ordinal: Option<u64>,
    /// Name in the source dylib, for re-exports under a different name.
    pub imported_name: Option<String>,
    /// Stub offset, for stub+resolver exports.
    pub stub: Option<u64>,
    /// Resolver function offset, for stub+resolver exports.
    pub resolver: Option<u64>,
}

impl ExportedSymbol {
    fn from_content(name: String, content: ExportContent) -> Self {
        Self {
            name,
            offset: content.symbol_offset,
            flags: content.flags,
            ordinal: content.ordinal,
            imported_name: content.imported_name,
            stub: content.stub,
            resolver: content.resolver,
        }
    }

    /// Returns true if this symbol is re-exported from another dylib.
    #[inline]
    pub fn is_reexport(&self) -> bool {
        self.flags.is_reexport()
    }

    /// Returns true if this is a weak definition.
    #[inline]
    pub fn is_weak(&self) -> bool {
        self.flags.is_weak()
    }
}

/// Decoder for the export trie of a Mach-O image.
pub type ExportTrie<'a> = TrieTree<'a, ExportContent>;

impl<'a> TrieTree<'a, ExportContent> {
    /// Reconstructs every exported symbol in the trie.
    pub fn exported_symbols(&self) -> Decoded<ExportedSymbol> {
        let entries = self.entries();
        Decoded {
            values: entries
                .values
                .into_iter()
                .map(|entry| ExportedSymbol::from_content(entry.name, entry.content))
                .collect(),
            complete: entries.complete,
        }
    }

    /// Looks up a single symbol by name without walking the whole trie.
    pub fn search(&self, name: &str) -> Option<ExportedSymbol> {
        self.lookup(name)
            .map(|content| ExportedSymbol::from_content(name.to_string(), content))
    }
}
