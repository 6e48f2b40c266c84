//! Property-based tests for the metadata decoders.
//!
//! These tests verify that the decoders handle arbitrary input safely,
//! reproduce generated streams exactly, and keep the full-reconstruction
//! and point-lookup trie traversals in agreement.

use proptest::prelude::*;

use dyldinfo::bind::bind_opcodes::*;
use dyldinfo::rebase::rebase_opcodes::*;
use dyldinfo::util::{uleb128_size, write_uleb128};
use dyldinfo::{
    BindOperation, BindOperations, BindType, DylibsTrie, ExportTrie, RebaseOperation,
    RebaseOperations, RebaseType,
};

// =============================================================================
// Trie Fixture Builder
// =============================================================================

/// In-memory radix-tree node used to serialize test tries.
#[derive(Debug, Default)]
struct BuildNode {
    value: Option<u32>,
    children: Vec<(String, usize)>,
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn insert(nodes: &mut Vec<BuildNode>, node: usize, key: &str, value: u32) {
    if key.is_empty() {
        nodes[node].value = Some(value);
        return;
    }

    for i in 0..nodes[node].children.len() {
        let (label, child) = nodes[node].children[i].clone();
        let common = common_prefix_len(&label, key);
        if common == 0 {
            continue;
        }
        if common == label.len() {
            insert(nodes, child, &key[common..], value);
            return;
        }
        // Split the edge at the divergence point.
        let mid = nodes.len();
        nodes.push(BuildNode {
            value: None,
            children: vec![(label[common..].to_string(), child)],
        });
        nodes[node].children[i] = (label[..common].to_string(), mid);
        insert(nodes, mid, &key[common..], value);
        return;
    }

    let leaf = nodes.len();
    nodes.push(BuildNode {
        value: Some(value),
        children: Vec::new(),
    });
    nodes[node].children.push((key.to_string(), leaf));
}

fn node_size(nodes: &[BuildNode], idx: usize, offsets: &[usize]) -> usize {
    let node = &nodes[idx];
    let payload_len = node.value.map_or(0, |v| uleb128_size(v as u64));
    let mut size = uleb128_size(payload_len as u64) + payload_len + 1;
    for (label, child) in &node.children {
        size += label.len() + 1 + uleb128_size(offsets[*child] as u64);
    }
    size
}

/// Serializes a radix tree into the on-disk trie format, iterating the
/// layout until the ULEB child-offset widths stabilize.
fn serialize(nodes: &[BuildNode]) -> Vec<u8> {
    let mut order = Vec::new();
    let mut stack = vec![0usize];
    while let Some(idx) = stack.pop() {
        order.push(idx);
        for (_, child) in nodes[idx].children.iter().rev() {
            stack.push(*child);
        }
    }

    let mut offsets = vec![0usize; nodes.len()];
    for _ in 0..32 {
        let mut changed = false;
        let mut off = 0;
        for &idx in &order {
            if offsets[idx] != off {
                offsets[idx] = off;
                changed = true;
            }
            off += node_size(nodes, idx, &offsets);
        }
        if !changed {
            break;
        }
    }

    let mut buf = Vec::new();
    for &idx in &order {
        let node = &nodes[idx];
        match node.value {
            Some(value) => {
                let payload_len = uleb128_size(value as u64);
                write_uleb128(payload_len as u64, &mut buf);
                write_uleb128(value as u64, &mut buf);
            }
            None => buf.push(0),
        }
        buf.push(node.children.len() as u8);
        for (label, child) in &node.children {
            buf.extend_from_slice(label.as_bytes());
            buf.push(0);
            write_uleb128(offsets[*child] as u64, &mut buf);
        }
    }
    buf
}

fn build_trie(pairs: &std::collections::BTreeMap<String, u32>) -> Vec<u8> {
    let mut nodes = vec![BuildNode::default()];
    for (key, value) in pairs {
        insert(&mut nodes, 0, key, *value);
    }
    serialize(&nodes)
}

// =============================================================================
// Stream Fixture Builders
// =============================================================================

#[derive(Debug, Clone)]
enum GenRebaseOp {
    SetType(u8),
    SetSegment(u8, u64),
    AddAddr(u64),
    AddAddrScaled(u8),
    DoRebaseImm(u8),
    DoRebaseUleb(u64),
    DoRebaseSkipping(u64, u64),
}

fn gen_rebase_op() -> impl Strategy<Value = GenRebaseOp> {
    prop_oneof![
        (1u8..=3).prop_map(GenRebaseOp::SetType),
        (0u8..16, 0u64..0x10000).prop_map(|(s, o)| GenRebaseOp::SetSegment(s, o)),
        (0u64..0x10000).prop_map(GenRebaseOp::AddAddr),
        (0u8..16).prop_map(GenRebaseOp::AddAddrScaled),
        (1u8..16).prop_map(GenRebaseOp::DoRebaseImm),
        (0u64..64).prop_map(GenRebaseOp::DoRebaseUleb),
        (0u64..64, 0u64..256).prop_map(|(c, s)| GenRebaseOp::DoRebaseSkipping(c, s)),
    ]
}

fn encode_rebase(ops: &[GenRebaseOp]) -> (Vec<u8>, Vec<RebaseOperation>) {
    let mut buf = Vec::new();
    let mut expected = Vec::new();
    for op in ops {
        match *op {
            GenRebaseOp::SetType(t) => {
                buf.push(REBASE_OPCODE_SET_TYPE_IMM | t);
                expected.push(RebaseOperation::SetTypeImm(match t {
                    2 => RebaseType::TextAbsolute32,
                    3 => RebaseType::TextPcrel32,
                    _ => RebaseType::Pointer,
                }));
            }
            GenRebaseOp::SetSegment(segment, offset) => {
                buf.push(REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | segment);
                write_uleb128(offset, &mut buf);
                expected.push(RebaseOperation::SetSegmentAndOffsetUleb {
                    segment: segment as u32,
                    offset,
                });
            }
            GenRebaseOp::AddAddr(offset) => {
                buf.push(REBASE_OPCODE_ADD_ADDR_ULEB);
                write_uleb128(offset, &mut buf);
                expected.push(RebaseOperation::AddAddrUleb { offset });
            }
            GenRebaseOp::AddAddrScaled(scale) => {
                buf.push(REBASE_OPCODE_ADD_ADDR_IMM_SCALED | scale);
                expected.push(RebaseOperation::AddAddrImmScaled {
                    scale: scale as u64,
                });
            }
            GenRebaseOp::DoRebaseImm(count) => {
                buf.push(REBASE_OPCODE_DO_REBASE_IMM_TIMES | count);
                expected.push(RebaseOperation::DoRebaseImmTimes {
                    count: count as u64,
                });
            }
            GenRebaseOp::DoRebaseUleb(count) => {
                buf.push(REBASE_OPCODE_DO_REBASE_ULEB_TIMES);
                write_uleb128(count, &mut buf);
                expected.push(RebaseOperation::DoRebaseUlebTimes { count });
            }
            GenRebaseOp::DoRebaseSkipping(count, skip) => {
                buf.push(REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB);
                write_uleb128(count, &mut buf);
                write_uleb128(skip, &mut buf);
                expected.push(RebaseOperation::DoRebaseUlebTimesSkippingUleb { count, skip });
            }
        }
    }
    buf.push(REBASE_OPCODE_DONE);
    expected.push(RebaseOperation::Done);
    (buf, expected)
}

// =============================================================================
// Safety Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Stream decoding never panics on arbitrary input.
    ///
    /// The folds are exercised on structured streams below: a hostile
    /// `do_*_uleb_times` count legitimately repeats that many times, so
    /// replaying arbitrary bytes is not a useful fuzz target.
    #[test]
    fn streams_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = RebaseOperations::new(&data).decode();
        let _ = BindOperations::new(&data).decode();
    }

    /// Trie decoding never panics on arbitrary input, in either
    /// traversal mode.
    #[test]
    fn tries_never_panic(
        data in prop::collection::vec(any::<u8>(), 0..512),
        key in "[ -~]{0,12}",
    ) {
        let trie = ExportTrie::new(&data);
        let _ = trie.exported_symbols();
        let _ = trie.search(&key);
        let _ = DylibsTrie::new(&data).dylib_indices();
    }

    /// Decoding is deterministic and iterators replay.
    #[test]
    fn decode_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(
            RebaseOperations::new(&data).decode(),
            RebaseOperations::new(&data).decode()
        );
        prop_assert_eq!(
            BindOperations::new(&data).decode(),
            BindOperations::new(&data).decode()
        );
    }
}

// =============================================================================
// Round-Trip and Equivalence Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// A generated rebase stream decodes to exactly the operations it
    /// encodes, and truncating it anywhere yields a prefix.
    #[test]
    fn rebase_stream_roundtrip(ops in prop::collection::vec(gen_rebase_op(), 0..12)) {
        let (buf, expected) = encode_rebase(&ops);

        let decoded = RebaseOperations::new(&buf).decode();
        prop_assert!(decoded.complete);
        prop_assert_eq!(&decoded.values, &expected);

        for cut in 0..buf.len() {
            let partial = RebaseOperations::new(&buf[..cut]).decode();
            prop_assert!(partial.len() <= expected.len());
            prop_assert_eq!(&partial.values[..], &expected[..partial.len()]);
        }
    }

    /// A bind stream built from symbol/ordinal state decodes into
    /// bindings that all carry the most recently set state.
    #[test]
    fn bind_state_accumulation(
        ordinal in 1u8..16,
        symbol in "_[a-z]{1,10}",
        offset in 0u64..0x1000,
        binds in 1usize..6,
    ) {
        let mut buf = Vec::new();
        buf.push(BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | ordinal);
        buf.push(BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM);
        buf.extend_from_slice(symbol.as_bytes());
        buf.push(0);
        buf.push(BIND_OPCODE_SET_TYPE_IMM | BIND_TYPE_POINTER);
        buf.push(BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1);
        write_uleb128(offset, &mut buf);
        for _ in 0..binds {
            buf.push(BIND_OPCODE_DO_BIND);
        }
        buf.push(BIND_OPCODE_DONE);

        let bindings = BindOperations::new(&buf).bindings(true);
        prop_assert!(bindings.complete);
        prop_assert_eq!(bindings.len(), binds);
        for (i, b) in bindings.iter().enumerate() {
            prop_assert_eq!(&b.symbol_name, &symbol);
            prop_assert_eq!(b.library_ordinal, ordinal as i64);
            prop_assert_eq!(b.bind_type, BindType::Pointer);
            prop_assert_eq!(b.segment_index, 1);
            prop_assert_eq!(b.segment_offset, offset + 8 * i as u64);
        }

        // The operation stream itself contains exactly one Done.
        let ops = BindOperations::new(&buf).decode();
        prop_assert_eq!(
            ops.values.iter().filter(|op| matches!(op, BindOperation::Done)).count(),
            1
        );
    }

    /// Point lookup and full reconstruction agree on every key of a
    /// generated trie, and miss keys that were not inserted.
    #[test]
    fn trie_search_matches_reconstruction(
        pairs in prop::collection::btree_map("[a-d]{0,6}", 0u32..1000, 1..10),
        probe in "[a-e]{0,7}",
    ) {
        let data = build_trie(&pairs);
        let trie = DylibsTrie::new(&data);

        let indices = trie.dylib_indices();
        prop_assert!(indices.complete);
        prop_assert_eq!(indices.len(), pairs.len());

        for entry in indices.iter() {
            prop_assert_eq!(pairs.get(&entry.name).copied(), Some(entry.index));
            let hit = trie.dylib_index(&entry.name);
            prop_assert_eq!(hit.map(|d| d.index), Some(entry.index));
        }

        // A probe key agrees with the map in both directions.
        prop_assert_eq!(
            trie.dylib_index(&probe).map(|d| d.index),
            pairs.get(&probe).copied()
        );
    }

    /// Truncating a generated trie never panics and only ever loses
    /// entries (the survivors keep their exact names and values).
    #[test]
    fn trie_truncation_is_safe(
        pairs in prop::collection::btree_map("[a-c]{0,5}", 0u32..100, 1..8),
        cut_seed in any::<prop::sample::Index>(),
    ) {
        let data = build_trie(&pairs);
        let cut = cut_seed.index(data.len() + 1);

        let partial = DylibsTrie::new(&data[..cut]).dylib_indices();
        prop_assert!(partial.len() <= pairs.len());
        for entry in partial.iter() {
            prop_assert_eq!(pairs.get(&entry.name).copied(), Some(entry.index));
        }
    }
}
