//! Bind opcode stream decoding.
//!
//! `LC_DYLD_INFO` carries three independent bind streams (normal, weak,
//! lazy) in the same bytecode: the high nibble of each byte selects an
//! opcode, the low nibble is an immediate, and ULEB128/SLEB128 operands
//! or a NUL-terminated symbol name may follow. The `threaded` opcode
//! opens a two-form sub-language used by pointer-authentication chains.
//!
//! Only `do_bind*` opcodes emit a binding; every `set_*` opcode merely
//! mutates pending interpreter state. [`BindOperations::bindings`]
//! replays that state machine into flat [`BindingSymbol`] records.

use bitflags::bitflags;
use tracing::warn;

use crate::error::Decoded;
use crate::util::{read_cstr, read_sleb128, read_uleb128};

/// Bind opcodes used in the dyld bind info.
///
/// These constants define the opcodes used in the compressed binding
/// information format found in LC_DYLD_INFO load commands.
#[allow(missing_docs)] // Constants are self-documenting via names
pub mod bind_opcodes {
    /// Terminates a binding sequence.
    pub const BIND_OPCODE_DONE: u8 = 0x00;
    pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
    pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
    pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
    pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
    pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
    pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
    pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
    pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
    pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
    pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xA0;
    pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xB0;
    pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xC0;
    pub const BIND_OPCODE_THREADED: u8 = 0xD0;

    pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;
    pub const BIND_OPCODE_MASK: u8 = 0xF0;

    pub const BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB: u8 = 0x00;
    pub const BIND_SUBOPCODE_THREADED_APPLY: u8 = 0x01;

    pub const BIND_TYPE_POINTER: u8 = 1;
    pub const BIND_TYPE_TEXT_ABSOLUTE32: u8 = 2;
    pub const BIND_TYPE_TEXT_PCREL32: u8 = 3;

    pub const BIND_SPECIAL_DYLIB_SELF: i8 = 0;
    pub const BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE: i8 = -1;
    pub const BIND_SPECIAL_DYLIB_FLAT_LOOKUP: i8 = -2;
    pub const BIND_SPECIAL_DYLIB_WEAK_LOOKUP: i8 = -3;
}

use bind_opcodes::*;

// =============================================================================
// Bind Types, Specials, Symbol Flags
// =============================================================================

/// The kind of fixup a bind writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindType {
    /// Overwrite a stored pointer (BIND_TYPE_POINTER).
    #[default]
    Pointer,
    /// 32-bit absolute address in text (BIND_TYPE_TEXT_ABSOLUTE32).
    TextAbsolute32,
    /// 32-bit pc-relative address in text (BIND_TYPE_TEXT_PCREL32).
    TextPcrel32,
}

impl BindType {
    /// Decodes a type immediate; unknown values fall back to `Pointer`,
    /// which is what the linker tooling does.
    pub fn from_imm(imm: u8) -> Self {
        match imm {
            BIND_TYPE_TEXT_ABSOLUTE32 => BindType::TextAbsolute32,
            BIND_TYPE_TEXT_PCREL32 => BindType::TextPcrel32,
            _ => BindType::Pointer,
        }
    }
}

/// Special dylib ordinals, encoded as small negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSpecial {
    /// Look up in the image itself (BIND_SPECIAL_DYLIB_SELF).
    SelfImage,
    /// Look up in the main executable (BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE).
    MainExecutable,
    /// Flat namespace lookup (BIND_SPECIAL_DYLIB_FLAT_LOOKUP).
    FlatLookup,
    /// Weak lookup across all images (BIND_SPECIAL_DYLIB_WEAK_LOOKUP).
    WeakLookup,
}

impl BindSpecial {
    /// Decodes a sign-extended special ordinal.
    pub fn from_ordinal(ordinal: i8) -> Option<Self> {
        match ordinal {
            BIND_SPECIAL_DYLIB_SELF => Some(BindSpecial::SelfImage),
            BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE => Some(BindSpecial::MainExecutable),
            BIND_SPECIAL_DYLIB_FLAT_LOOKUP => Some(BindSpecial::FlatLookup),
            BIND_SPECIAL_DYLIB_WEAK_LOOKUP => Some(BindSpecial::WeakLookup),
            _ => None,
        }
    }

    /// The ordinal value this special stands for.
    #[inline]
    pub fn ordinal(self) -> i64 {
        match self {
            BindSpecial::SelfImage => 0,
            BindSpecial::MainExecutable => -1,
            BindSpecial::FlatLookup => -2,
            BindSpecial::WeakLookup => -3,
        }
    }
}

bitflags! {
    /// BIND_SYMBOL_FLAGS_* bits carried by the symbol-setting opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BindSymbolFlags: u8 {
        /// Binding may legitimately be missing (BIND_SYMBOL_FLAGS_WEAK_IMPORT).
        const WEAK_IMPORT = 0x1;
        /// Strong definition that must not be overridden
        /// (BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION).
        const NON_WEAK_DEFINITION = 0x8;
    }
}

// =============================================================================
// Bind Operations
// =============================================================================

/// The two forms of the `threaded` sub-language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSubOperation {
    /// Declares the size of the threaded ordinal table; read once before
    /// any `Apply`.
    SetBindOrdinalTableSizeUleb {
        /// Number of ordinal-table entries.
        size: u64,
    },
    /// Marks the current segment's pointer slots as a threaded chain;
    /// each slot's bit-fields select bind-vs-rebase and an ordinal-table
    /// index. Walking the chain is the caller's job.
    Apply,
}

/// One decoded bind opcode with its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // Variants mirror the BIND_OPCODE_* names
pub enum BindOperation {
    Done,
    SetDylibOrdinalImm { ordinal: u64 },
    SetDylibOrdinalUleb { ordinal: u64 },
    SetDylibSpecialImm(BindSpecial),
    SetSymbolTrailingFlagsImm { flags: BindSymbolFlags, name: String },
    SetTypeImm(BindType),
    SetAddendSleb { addend: i64 },
    SetSegmentAndOffsetUleb { segment: u32, offset: u64 },
    AddAddrUleb { offset: u64 },
    DoBind,
    DoBindAddAddrUleb { offset: u64 },
    DoBindAddAddrImmScaled { scale: u64 },
    DoBindUlebTimesSkippingUleb { count: u64, skip: u64 },
    Threaded(BindSubOperation),
}

// =============================================================================
// Stream Interpreter
// =============================================================================

/// Replayable iterator over one bind opcode stream.
///
/// Which of the three streams (normal, weak, lazy) this decodes is
/// decided by the byte range the caller hands over, not by the content.
/// Termination mirrors the rebase stream: `BIND_OPCODE_DONE` is yielded
/// and then hard-stops, running off the end stops, and an unrecognized
/// opcode, sub-opcode, or special ordinal stops with everything decoded
/// so far intact.
#[derive(Debug, Clone)]
pub struct BindOperations<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
    complete: bool,
}

impl<'a> BindOperations<'a> {
    /// Creates an interpreter over a bind-info byte range.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: false,
            complete: true,
        }
    }

    /// True if the stream was not cut short.
    ///
    /// Meaningful once the iterator has returned `None`.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Drains the stream into a [`Decoded`] result.
    pub fn decode(mut self) -> Decoded<BindOperation> {
        let mut values = Vec::new();
        for op in self.by_ref() {
            values.push(op);
        }
        Decoded {
            values,
            complete: self.complete,
        }
    }

    /// Replays the stream into flat [`BindingSymbol`] records.
    ///
    /// `set_*` opcodes update the pending (ordinal, symbol, type, addend,
    /// segment, offset) state without emitting; every `do_bind*` opcode
    /// emits one or more records from the pending state and advances the
    /// offset per its semantics. `threaded` operations never emit here —
    /// resolving chained slots needs pointer-format knowledge the caller
    /// owns.
    pub fn bindings(mut self, is_64bit: bool) -> Decoded<BindingSymbol> {
        let ptr_size: u64 = if is_64bit { 8 } else { 4 };

        let mut symbol_name = String::new();
        let mut library_ordinal: i64 = 0;
        let mut bind_type = BindType::Pointer;
        let mut addend: i64 = 0;
        let mut segment_index: u32 = 0;
        let mut segment_offset: u64 = 0;

        let mut bindings: Vec<BindingSymbol> = Vec::new();

        for operation in self.by_ref() {
            match operation {
                BindOperation::Done => {}

                BindOperation::SetDylibOrdinalImm { ordinal }
                | BindOperation::SetDylibOrdinalUleb { ordinal } => {
                    library_ordinal = ordinal as i64;
                }

                BindOperation::SetDylibSpecialImm(special) => {
                    library_ordinal = special.ordinal();
                }

                BindOperation::SetSymbolTrailingFlagsImm { name, .. } => {
                    symbol_name = name;
                }

                BindOperation::SetTypeImm(t) => bind_type = t,

                BindOperation::SetAddendSleb { addend: value } => addend = value,

                BindOperation::SetSegmentAndOffsetUleb { segment, offset } => {
                    segment_index = segment;
                    segment_offset = offset;
                }

                BindOperation::AddAddrUleb { offset } => {
                    segment_offset = segment_offset.wrapping_add(offset);
                }

                BindOperation::DoBind => {
                    bindings.push(BindingSymbol {
                        bind_type,
                        library_ordinal,
                        segment_index,
                        segment_offset,
                        addend,
                        symbol_name: symbol_name.clone(),
                    });
                    segment_offset = segment_offset.wrapping_add(ptr_size);
                }

                BindOperation::DoBindAddAddrUleb { offset } => {
                    bindings.push(BindingSymbol {
                        bind_type,
                        library_ordinal,
                        segment_index,
                        segment_offset,
                        addend,
                        symbol_name: symbol_name.clone(),
                    });
                    segment_offset = segment_offset.wrapping_add(ptr_size).wrapping_add(offset);
                }

                BindOperation::DoBindAddAddrImmScaled { scale } => {
                    bindings.push(BindingSymbol {
                        bind_type,
                        library_ordinal,
                        segment_index,
                        segment_offset,
                        addend,
                        symbol_name: symbol_name.clone(),
                    });
                    segment_offset = segment_offset
                        .wrapping_add(scale.wrapping_add(1).wrapping_mul(ptr_size));
                }

                BindOperation::DoBindUlebTimesSkippingUleb { count, skip } => {
                    for _ in 0..count {
                        bindings.push(BindingSymbol {
                            bind_type,
                            library_ordinal,
                            segment_index,
                            segment_offset,
                            addend,
                            symbol_name: symbol_name.clone(),
                        });
                        segment_offset =
                            segment_offset.wrapping_add(skip).wrapping_add(ptr_size);
                    }
                }

                BindOperation::Threaded(_) => {}
            }
        }

        Decoded {
            values: bindings,
            complete: self.complete,
        }
    }

    fn read_uleb(&mut self) -> Option<u64> {
        match read_uleb128(&self.data[self.offset..]) {
            Some((value, len)) => {
                self.offset += len;
                Some(value)
            }
            None => {
                warn!(offset = self.offset, "truncated ULEB128 in bind stream");
                self.stop();
                None
            }
        }
    }

    fn read_sleb(&mut self) -> Option<i64> {
        match read_sleb128(&self.data[self.offset..]) {
            Some((value, len)) => {
                self.offset += len;
                Some(value)
            }
            None => {
                warn!(offset = self.offset, "truncated SLEB128 in bind stream");
                self.stop();
                None
            }
        }
    }

    fn read_symbol(&mut self) -> Option<String> {
        match read_cstr(&self.data[self.offset..]) {
            Some((name, len)) => {
                self.offset += len;
                Some(name)
            }
            None => {
                warn!(offset = self.offset, "unterminated symbol in bind stream");
                self.stop();
                None
            }
        }
    }

    fn stop(&mut self) {
        self.done = true;
        self.complete = false;
    }
}

impl<'a> Iterator for BindOperations<'a> {
    type Item = BindOperation;

    fn next(&mut self) -> Option<BindOperation> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let byte = self.data[self.offset];
        self.offset += 1;

        let imm = byte & BIND_IMMEDIATE_MASK;
        match byte & BIND_OPCODE_MASK {
            // Hard stop: trailing bytes after DONE are never inspected.
            BIND_OPCODE_DONE => {
                self.done = true;
                Some(BindOperation::Done)
            }

            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => Some(BindOperation::SetDylibOrdinalImm {
                ordinal: imm as u64,
            }),

            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                let ordinal = self.read_uleb()?;
                Some(BindOperation::SetDylibOrdinalUleb { ordinal })
            }

            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                // Special ordinals are small negative values: sign-extend
                // the 4-bit immediate before matching.
                let ordinal = if imm == 0 {
                    0
                } else {
                    (BIND_OPCODE_MASK | imm) as i8
                };
                match BindSpecial::from_ordinal(ordinal) {
                    Some(special) => Some(BindOperation::SetDylibSpecialImm(special)),
                    None => {
                        warn!(ordinal, "unknown special dylib ordinal");
                        self.stop();
                        None
                    }
                }
            }

            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let name = self.read_symbol()?;
                Some(BindOperation::SetSymbolTrailingFlagsImm {
                    flags: BindSymbolFlags::from_bits_retain(imm),
                    name,
                })
            }

            BIND_OPCODE_SET_TYPE_IMM => Some(BindOperation::SetTypeImm(BindType::from_imm(imm))),

            BIND_OPCODE_SET_ADDEND_SLEB => {
                let addend = self.read_sleb()?;
                Some(BindOperation::SetAddendSleb { addend })
            }

            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                let offset = self.read_uleb()?;
                Some(BindOperation::SetSegmentAndOffsetUleb {
                    segment: imm as u32,
                    offset,
                })
            }

            BIND_OPCODE_ADD_ADDR_ULEB => {
                let offset = self.read_uleb()?;
                Some(BindOperation::AddAddrUleb { offset })
            }

            BIND_OPCODE_DO_BIND => Some(BindOperation::DoBind),

            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                let offset = self.read_uleb()?;
                Some(BindOperation::DoBindAddAddrUleb { offset })
            }

            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                Some(BindOperation::DoBindAddAddrImmScaled { scale: imm as u64 })
            }

            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let count = self.read_uleb()?;
                let skip = self.read_uleb()?;
                Some(BindOperation::DoBindUlebTimesSkippingUleb { count, skip })
            }

            BIND_OPCODE_THREADED => match imm {
                BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB => {
                    let size = self.read_uleb()?;
                    Some(BindOperation::Threaded(
                        BindSubOperation::SetBindOrdinalTableSizeUleb { size },
                    ))
                }
                BIND_SUBOPCODE_THREADED_APPLY => {
                    Some(BindOperation::Threaded(BindSubOperation::Apply))
                }
                subopcode => {
                    warn!(subopcode, "unknown threaded bind sub-opcode");
                    self.stop();
                    None
                }
            },

            opcode => {
                warn!(opcode, offset = self.offset - 1, "unknown bind opcode");
                self.stop();
                None
            }
        }
    }
}

// =============================================================================
// Flattened Records
// =============================================================================

/// One pointer slot to bind, fully resolved against the interpreter
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSymbol {
    /// Fixup kind.
    pub bind_type: BindType,
    /// Dylib ordinal the symbol is imported from; zero or negative for
    /// the [`BindSpecial`] sentinels.
    pub library_ordinal: i64,
    /// Index of the segment the offset is relative to.
    pub segment_index: u32,
    /// Byte offset of the slot within that segment.
    pub segment_offset: u64,
    /// Value added to the resolved address.
    pub addend: i64,
    /// Name of the imported symbol.
    pub symbol_name: String,
}

impl BindingSymbol {
    /// Returns the special-ordinal sentinel, if the ordinal is one.
    pub fn special(&self) -> Option<BindSpecial> {
        i8::try_from(self.library_ordinal)
            .ok()
            .and_then(BindSpecial::from_ordinal)
    }
}
