//! The secondary index: one fixed-width record per filled relative slot,
//! carrying everything needed to read its block without touching the epoch
//! file.

use crate::types::{BlockHash, BlockOrEbb};
use chain_history::{EpochNo, SlotNo};

const TAG_BLOCK: u8 = 0;
const TAG_EBB: u8 = 1;

/// Fixed part of an entry before the hash: offset (8) + header offset (2)
/// + header size (2) + checksum (4) + tag (1) + slot or epoch (8).
const FIXED_SIZE: usize = 25;

/// One record of the secondary index. All integers are little-endian on
/// disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryEntry<H> {
    /// Byte offset of the block within the epoch file.
    pub block_offset: u64,
    /// Offset of the header within the block bytes.
    pub header_offset: u16,
    /// Length of the header within the block bytes.
    pub header_size: u16,
    /// CRC32 of the full block bytes.
    pub checksum: u32,
    /// Slot of the block, or epoch of the EBB.
    pub block_or_ebb: BlockOrEbb,
    pub hash: H,
}

impl<H: BlockHash> SecondaryEntry<H> {
    pub const fn size() -> usize {
        FIXED_SIZE + H::SIZE
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.block_offset.to_le_bytes());
        out.extend_from_slice(&self.header_offset.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
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
        out.extend_from_slice(self.hash.as_ref());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::size());
        self.encode(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != Self::size() {
            return Err("entry has the wrong length");
        }
        let block_offset = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let header_offset = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let header_size = u16::from_le_bytes(bytes[10..12].try_into().unwrap());
        let checksum = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let tag = bytes[16];
        let slot_or_epoch = u64::from_le_bytes(bytes[17..25].try_into().unwrap());
        let block_or_ebb = match tag {
            TAG_BLOCK => BlockOrEbb::Block(SlotNo(slot_or_epoch)),
            TAG_EBB => BlockOrEbb::Ebb(EpochNo(slot_or_epoch)),
            _ => return Err("unknown entry tag"),
        };
        let hash = H::from_slice(&bytes[FIXED_SIZE..]).ok_or("truncated hash")?;
        Ok(SecondaryEntry {
            block_offset,
            header_offset,
            header_size,
            checksum,
            block_or_ebb,
            hash,
        })
    }

    /// Decode a whole secondary file.
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Self>, &'static str> {
        if bytes.len() % Self::size() != 0 {
            return Err("file length is not a multiple of the entry size");
        }
        bytes.chunks_exact(Self::size()).map(Self::decode).collect()
    }

    pub fn encode_all(entries: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * Self::size());
        for entry in entries {
            entry.encode(&mut out);
        }
        out
    }
}

/// CRC32 of a block's bytes, as stored in its entry.
pub fn block_checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::TestHash;
    use quickcheck::{quickcheck, Arbitrary, Gen};

    impl Arbitrary for SecondaryEntry<TestHash> {
        fn arbitrary(g: &mut Gen) -> Self {
            let block_or_ebb = if bool::arbitrary(g) {
                BlockOrEbb::Block(SlotNo(u64::arbitrary(g)))
            } else {
                BlockOrEbb::Ebb(EpochNo(u64::arbitrary(g)))
            };
            SecondaryEntry {
                block_offset: u64::arbitrary(g),
                header_offset: u16::arbitrary(g),
                header_size: u16::arbitrary(g),
                checksum: u32::arbitrary(g),
                block_or_ebb,
                hash: TestHash::of(u64::arbitrary(g)),
            }
        }
    }

    quickcheck! {
        fn entry_serialization_bijection(entry: SecondaryEntry<TestHash>) -> bool {
            let bytes = entry.to_bytes();
            bytes.len() == SecondaryEntry::<TestHash>::size()
                && SecondaryEntry::decode(&bytes) == Ok(entry)
        }
    }

    #[test]
    fn rejects_mangled_entries() {
        let entry = SecondaryEntry {
            block_offset: 1,
            header_offset: 2,
            header_size: 3,
            checksum: 4,
            block_or_ebb: BlockOrEbb::Block(SlotNo(5)),
            hash: TestHash::of(6),
        };
        let mut bytes = entry.to_bytes();

        assert!(SecondaryEntry::<TestHash>::decode(&bytes[1..]).is_err());
        bytes[16] = 9;
        assert_eq!(
            SecondaryEntry::<TestHash>::decode(&bytes),
            Err("unknown entry tag")
        );
    }
}
