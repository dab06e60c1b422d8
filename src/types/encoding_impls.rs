//! Wire-format implementations for the core value types.
//!
//! Kept separate from the type definitions so the persisted layout is
//! reviewable in one place, following the same split the rest of the
//! crate uses for its `encoding_impls` files.

use super::{BlockId, BlockKind, BlockLocation, BlockMeta, Extent, ObjectName, RowId, Timestamp};
use crate::encoding::{Decode, Encode, EncodingError};

impl Encode for Timestamp {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Timestamp {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (ts, n) = u64::decode_from(buf)?;
        Ok((Timestamp(ts), n))
    }
}

impl Encode for ObjectName {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.segment.encode_to(buf)?;
        self.num.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ObjectName {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (segment, n) = u64::decode_from(buf)?;
        offset += n;
        let (num, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { segment, num }, offset))
    }
}

impl Encode for BlockId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.index.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (name, n) = ObjectName::decode_from(buf)?;
        offset += n;
        let (index, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { name, index }, offset))
    }
}

impl Encode for RowId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.block.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for RowId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (block, n) = BlockId::decode_from(buf)?;
        offset += n;
        let (row, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                block,
                offset: row,
            },
            offset,
        ))
    }
}

impl Encode for Extent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.len.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Extent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut consumed = 0;
        let (offset, n) = u32::decode_from(buf)?;
        consumed += n;
        let (len, n) = u32::decode_from(&buf[consumed..])?;
        consumed += n;
        Ok((Self { offset, len }, consumed))
    }
}

impl Encode for BlockLocation {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.block.encode_to(buf)?;
        self.extent.encode_to(buf)?;
        self.rows.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockLocation {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (name, n) = ObjectName::decode_from(buf)?;
        offset += n;
        let (block, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        let (extent, n) = Extent::decode_from(&buf[offset..])?;
        offset += n;
        let (rows, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                name,
                block,
                extent,
                rows,
            },
            offset,
        ))
    }
}

impl Encode for BlockKind {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            BlockKind::Data => 0u32.encode_to(buf),
            BlockKind::Tombstone => 1u32.encode_to(buf),
        }
    }
}

impl Decode for BlockKind {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u32::decode_from(buf)?;
        match tag {
            0 => Ok((BlockKind::Data, n)),
            1 => Ok((BlockKind::Tombstone, n)),
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "BlockKind",
            }),
        }
    }
}

impl Encode for BlockMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.sort_key.encode_to(buf)?;
        self.appendable.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (sort_key, n) = Option::<u16>::decode_from(buf)?;
        offset += n;
        let (appendable, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                sort_key,
                appendable,
            },
            offset,
        ))
    }
}
