//! Test fixtures: a fixed-width hash, a length-prefixed block codec and
//! the matching epoch-file parser.

use crate::parser::{BlockParser, ParseStop, ParsedBlock, ParsedEpoch};
use crate::types::{BinaryInfo, BlockHash, BlockOrEbb};
use chain_history::{EpochNo, SlotNo};
use std::fmt;

/// 32-byte hash derived from the block bytes with a cheap spreading
/// function; both the writer and the parser can recompute it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestHash(pub [u8; 32]);

impl TestHash {
    pub fn of(seed: u64) -> Self {
        let mut out = [0u8; 32];
        let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
        for chunk in out.chunks_mut(8) {
            state = state
                .wrapping_mul(0x2545_f491_4f6c_dd1d)
                .rotate_left(23)
                .wrapping_add(0x9e37_79b9);
            chunk.copy_from_slice(&state.to_le_bytes());
        }
        TestHash(out)
    }

    pub fn digest(bytes: &[u8]) -> Self {
        let mut acc = 0xcbf2_9ce4_8422_2325u64;
        for &byte in bytes {
            acc ^= byte as u64;
            acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
        }
        TestHash::of(acc)
    }
}

impl fmt::Debug for TestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestHash({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl AsRef<[u8]> for TestHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl BlockHash for TestHash {
    const SIZE: usize = 32;

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(TestHash(array))
    }
}

const TAG_BLOCK: u8 = 0;
const TAG_EBB: u8 = 1;

/// Fixed prelude after the length prefix: tag, slot-or-epoch, block number.
const HEADER_SIZE: u16 = 17;
const HEADER_OFFSET: u16 = 4;

/// A block in the test codec:
/// `len: u32 | tag: u8 | slot_or_epoch: u64 | block_no: u64 | payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBlock {
    pub block_or_ebb: BlockOrEbb,
    pub block_no: u64,
    pub payload: Vec<u8>,
}

impl TestBlock {
    pub fn block(slot: u64, block_no: u64, payload: &[u8]) -> Self {
        TestBlock {
            block_or_ebb: BlockOrEbb::Block(SlotNo(slot)),
            block_no,
            payload: payload.to_vec(),
        }
    }

    pub fn ebb(epoch: u64, block_no: u64, payload: &[u8]) -> Self {
        TestBlock {
            block_or_ebb: BlockOrEbb::Ebb(EpochNo(epoch)),
            block_no,
            payload: payload.to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body_len = (HEADER_SIZE as usize + self.payload.len()) as u32;
        let mut out = Vec::with_capacity(4 + body_len as usize);
        out.extend_from_slice(&body_len.to_le_bytes());
        match self.block_or_ebb {
            BlockOrEbb::Block(slot) => {
                out.push(TAG_BLOCK);
                out.extend_from_slice(&slot.0.to_le_bytes());
            }
            BlockOrEbb::Ebb(epoch) => {
                out.push(TAG_EBB);
                out.extend_from_slice(&epoch.0.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.block_no.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn hash(&self) -> TestHash {
        TestHash::digest(&self.to_bytes())
    }

    /// The bytes plus header descriptor handed to the append operations.
    pub fn binary(bytes: &[u8]) -> BinaryInfo<'_> {
        BinaryInfo {
            bytes,
            header_offset: HEADER_OFFSET,
            header_size: HEADER_SIZE,
        }
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        let bytes = self.to_bytes();
        bytes[HEADER_OFFSET as usize..(HEADER_OFFSET + HEADER_SIZE) as usize].to_vec()
    }
}

/// Parser for epoch files written in the test codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestBlockParser;

impl BlockParser<TestHash> for TestBlockParser {
    fn parse_epoch(&self, _epoch: EpochNo, bytes: &[u8]) -> ParsedEpoch<TestHash> {
        let mut blocks = Vec::new();
        let mut offset = 0usize;
        let mut stop = None;
        while offset < bytes.len() {
            let stop_at = |reason: &str| ParseStop {
                offset: offset as u64,
                reason: reason.to_string(),
            };
            let Some(len_bytes) = bytes.get(offset..offset + 4) else {
                stop = Some(stop_at("truncated length prefix"));
                break;
            };
            let body_len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            if body_len < HEADER_SIZE as usize {
                stop = Some(stop_at("record shorter than its header"));
                break;
            }
            let Some(record) = bytes.get(offset..offset + 4 + body_len) else {
                stop = Some(stop_at("truncated record"));
                break;
            };
            let tag = record[4];
            let slot_or_epoch = u64::from_le_bytes(record[5..13].try_into().unwrap());
            let block_no = u64::from_le_bytes(record[13..21].try_into().unwrap());
            let block_or_ebb = match tag {
                TAG_BLOCK => BlockOrEbb::Block(SlotNo(slot_or_epoch)),
                TAG_EBB => BlockOrEbb::Ebb(EpochNo(slot_or_epoch)),
                _ => {
                    stop = Some(stop_at("unknown record tag"));
                    break;
                }
            };
            blocks.push(ParsedBlock {
                size: (4 + body_len) as u64,
                header_offset: HEADER_OFFSET,
                header_size: HEADER_SIZE,
                hash: TestHash::digest(record),
                block_or_ebb,
                block_no,
            });
            offset += 4 + body_len;
        }
        ParsedEpoch { blocks, stop }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parser_round_trips_blocks_and_reports_garbage() {
        let blocks = [
            TestBlock::ebb(0, 0, b"boundary"),
            TestBlock::block(1, 1, b"one"),
            TestBlock::block(2, 2, b""),
        ];
        let mut bytes = Vec::new();
        for block in &blocks {
            bytes.extend_from_slice(&block.to_bytes());
        }
        let clean_len = bytes.len();
        bytes.extend_from_slice(&[0xff, 0x03]);

        let parsed = TestBlockParser.parse_epoch(EpochNo(0), &bytes);
        assert_eq!(parsed.blocks.len(), 3);
        assert_eq!(parsed.blocks[0].block_or_ebb, BlockOrEbb::Ebb(EpochNo(0)));
        assert_eq!(parsed.blocks[1].block_or_ebb, BlockOrEbb::Block(SlotNo(1)));
        assert_eq!(parsed.blocks[1].block_no, 1);
        assert_eq!(parsed.blocks[2].size, 21);
        assert_eq!(parsed.blocks[0].hash, blocks[0].hash());

        let stop = parsed.stop.expect("trailing garbage is reported");
        assert_eq!(stop.offset, clean_len as u64);
    }
}
