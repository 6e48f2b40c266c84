//! Rebase opcode stream decoding.
//!
//! `LC_DYLD_INFO` encodes pointer rebasing (slide fixups) as a compact
//! bytecode: each byte's high nibble is an opcode, the low nibble an
//! immediate, optionally followed by ULEB128 operands. The interpreter
//! here reconstructs the logical operations; applying them to segment
//! addresses is the caller's job.

use tracing::warn;

use crate::error::Decoded;
use crate::util::read_uleb128;

/// Rebase opcodes used in the dyld rebase info.
///
/// These constants define the opcodes of the compressed rebase format
/// found in LC_DYLD_INFO load commands.
#[allow(missing_docs)] // Constants are self-documenting via names
pub mod rebase_opcodes {
    /// Terminates a rebase sequence.
    pub const REBASE_OPCODE_DONE: u8 = 0x00;
    pub const REBASE_OPCODE_SET_TYPE_IMM: u8 = 0x10;
    pub const REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x20;
    pub const REBASE_OPCODE_ADD_ADDR_ULEB: u8 = 0x30;
    pub const REBASE_OPCODE_ADD_ADDR_IMM_SCALED: u8 = 0x40;
    pub const REBASE_OPCODE_DO_REBASE_IMM_TIMES: u8 = 0x50;
    pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES: u8 = 0x60;
    pub const REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB: u8 = 0x70;
    pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB: u8 = 0x80;

    pub const REBASE_IMMEDIATE_MASK: u8 = 0x0F;
    pub const REBASE_OPCODE_MASK: u8 = 0xF0;

    pub const REBASE_TYPE_POINTER: u8 = 1;
    pub const REBASE_TYPE_TEXT_ABSOLUTE32: u8 = 2;
    pub const REBASE_TYPE_TEXT_PCREL32: u8 = 3;
}

use rebase_opcodes::*;

// =============================================================================
// Rebase Types and Operations
// =============================================================================

/// The kind of fixup a rebase writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebaseType {
    /// Slide a stored pointer (REBASE_TYPE_POINTER).
    #[default]
    Pointer,
    /// 32-bit absolute address in text (REBASE_TYPE_TEXT_ABSOLUTE32).
    TextAbsolute32,
    /// 32-bit pc-relative address in text (REBASE_TYPE_TEXT_PCREL32).
    TextPcrel32,
}

impl RebaseType {
    /// Decodes a type immediate; unknown values fall back to `Pointer`,
    /// which is what the linker tooling does.
    pub fn from_imm(imm: u8) -> Self {
        match imm {
            REBASE_TYPE_TEXT_ABSOLUTE32 => RebaseType::TextAbsolute32,
            REBASE_TYPE_TEXT_PCREL32 => RebaseType::TextPcrel32,
            _ => RebaseType::Pointer,
        }
    }
}

/// One decoded rebase opcode with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // Variants mirror the REBASE_OPCODE_* names
pub enum RebaseOperation {
    Done,
    SetTypeImm(RebaseType),
    SetSegmentAndOffsetUleb { segment: u32, offset: u64 },
    AddAddrUleb { offset: u64 },
    AddAddrImmScaled { scale: u64 },
    DoRebaseImmTimes { count: u64 },
    DoRebaseUlebTimes { count: u64 },
    DoRebaseAddAddrUleb { offset: u64 },
    DoRebaseUlebTimesSkippingUleb { count: u64, skip: u64 },
}

// =============================================================================
// Stream Interpreter
// =============================================================================

/// Replayable iterator over a rebase opcode stream.
///
/// The iterator stops at `REBASE_OPCODE_DONE` (which is itself yielded),
/// at the end of the declared stream, or at the first unrecognized
/// opcode or truncated operand. A clone resumes from the same position;
/// a fresh interpreter over the same bytes reproduces the same sequence.
#[derive(Debug, Clone)]
pub struct RebaseOperations<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
    complete: bool,
}

impl<'a> RebaseOperations<'a> {
    /// Creates an interpreter over a rebase-info byte range.
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
    pub fn decode(mut self) -> Decoded<RebaseOperation> {
        let mut values = Vec::new();
        for op in self.by_ref() {
            values.push(op);
        }
        Decoded {
            values,
            complete: self.complete,
        }
    }

    /// Replays the stream into flat [`Rebase`] records, the way the
    /// linker would apply it: `set_*`/`add_*` opcodes mutate the pending
    /// (type, segment, offset) state, `do_rebase*` opcodes emit and
    /// advance by the pointer size and any skip stride.
    pub fn rebases(mut self, is_64bit: bool) -> Decoded<Rebase> {
        let ptr_size: u64 = if is_64bit { 8 } else { 4 };

        let mut rebase_type = RebaseType::Pointer;
        let mut segment_index: u32 = 0;
        let mut segment_offset: u64 = 0;
        let mut rebases = Vec::new();

        for operation in self.by_ref() {
            match operation {
                RebaseOperation::Done => {}

                RebaseOperation::SetTypeImm(t) => rebase_type = t,

                RebaseOperation::SetSegmentAndOffsetUleb { segment, offset } => {
                    segment_index = segment;
                    segment_offset = offset;
                }

                RebaseOperation::AddAddrUleb { offset } => {
                    segment_offset = segment_offset.wrapping_add(offset);
                }

                RebaseOperation::AddAddrImmScaled { scale } => {
                    segment_offset = segment_offset.wrapping_add(scale.wrapping_mul(ptr_size));
                }

                RebaseOperation::DoRebaseImmTimes { count }
                | RebaseOperation::DoRebaseUlebTimes { count } => {
                    for _ in 0..count {
                        rebases.push(Rebase {
                            rebase_type,
                            segment_index,
                            segment_offset,
                        });
                        segment_offset = segment_offset.wrapping_add(ptr_size);
                    }
                }

                RebaseOperation::DoRebaseAddAddrUleb { offset } => {
                    rebases.push(Rebase {
                        rebase_type,
                        segment_index,
                        segment_offset,
                    });
                    segment_offset = segment_offset.wrapping_add(offset).wrapping_add(ptr_size);
                }

                RebaseOperation::DoRebaseUlebTimesSkippingUleb { count, skip } => {
                    for _ in 0..count {
                        rebases.push(Rebase {
                            rebase_type,
                            segment_index,
                            segment_offset,
                        });
                        segment_offset = segment_offset.wrapping_add(skip).wrapping_add(ptr_size);
                    }
                }
            }
        }

        Decoded {
            values: rebases,
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
                warn!(offset = self.offset, "truncated ULEB128 in rebase stream");
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

impl<'a> Iterator for RebaseOperations<'a> {
    type Item = RebaseOperation;

    fn next(&mut self) -> Option<RebaseOperation> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let byte = self.data[self.offset];
        self.offset += 1;

        let imm = byte & REBASE_IMMEDIATE_MASK;
        match byte & REBASE_OPCODE_MASK {
            // Hard stop: trailing bytes after DONE are never inspected.
            REBASE_OPCODE_DONE => {
                self.done = true;
                Some(RebaseOperation::Done)
            }

            REBASE_OPCODE_SET_TYPE_IMM => {
                Some(RebaseOperation::SetTypeImm(RebaseType::from_imm(imm)))
            }

            REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                let offset = self.read_uleb()?;
                Some(RebaseOperation::SetSegmentAndOffsetUleb {
                    segment: imm as u32,
                    offset,
                })
            }

            REBASE_OPCODE_ADD_ADDR_ULEB => {
                let offset = self.read_uleb()?;
                Some(RebaseOperation::AddAddrUleb { offset })
            }

            REBASE_OPCODE_ADD_ADDR_IMM_SCALED => {
                Some(RebaseOperation::AddAddrImmScaled { scale: imm as u64 })
            }

            REBASE_OPCODE_DO_REBASE_IMM_TIMES => {
                Some(RebaseOperation::DoRebaseImmTimes { count: imm as u64 })
            }

            REBASE_OPCODE_DO_REBASE_ULEB_TIMES => {
                let count = self.read_uleb()?;
                Some(RebaseOperation::DoRebaseUlebTimes { count })
            }

            REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB => {
                let offset = self.read_uleb()?;
                Some(RebaseOperation::DoRebaseAddAddrUleb { offset })
            }

            REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB => {
                let count = self.read_uleb()?;
                let skip = self.read_uleb()?;
                Some(RebaseOperation::DoRebaseUlebTimesSkippingUleb { count, skip })
            }

            opcode => {
                warn!(opcode, offset = self.offset - 1, "unknown rebase opcode");
                self.stop();
                None
            }
        }
    }
}

// =============================================================================
// Flattened Records
// =============================================================================

/// One pointer slot to rebase, fully resolved against the interpreter
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebase {
    /// Fixup kind.
    pub rebase_type: RebaseType,
    /// Index of the segment the offset is relative to.
    pub segment_index: u32,
    /// Byte offset of the slot within that segment.
    pub segment_offset: u64,
}
