//! Wire-format implementations for batches and columns.
//!
//! A column is `[u32 type tag][name][u32 count][cells…]`; a batch is a
//! length-prefixed sequence of columns. Cell encodings come from the
//! value types' own implementations.

use super::{Batch, Column, ColumnData};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::types::{BlockId, BlockLocation, RowId, Timestamp};

const TAG_U64: u32 = 0;
const TAG_BOOL: u32 = 1;
const TAG_TS: u32 = 2;
const TAG_ID: u32 = 3;
const TAG_ROW: u32 = 4;
const TAG_LOC: u32 = 5;
const TAG_BYTES: u32 = 6;

impl Encode for ColumnData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ColumnData::U64(v) => {
                TAG_U64.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Bool(v) => {
                TAG_BOOL.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Ts(v) => {
                TAG_TS.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Id(v) => {
                TAG_ID.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Row(v) => {
                TAG_ROW.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Loc(v) => {
                TAG_LOC.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
            ColumnData::Bytes(v) => {
                TAG_BYTES.encode_to(buf)?;
                encoding::encode_vec(v, buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for ColumnData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u32::decode_from(buf)?;
        let data = match tag {
            TAG_U64 => {
                let (v, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                ColumnData::U64(v)
            }
            TAG_BOOL => {
                let (v, n) = encoding::decode_vec::<bool>(&buf[offset..])?;
                offset += n;
                ColumnData::Bool(v)
            }
            TAG_TS => {
                let (v, n) = encoding::decode_vec::<Timestamp>(&buf[offset..])?;
                offset += n;
                ColumnData::Ts(v)
            }
            TAG_ID => {
                let (v, n) = encoding::decode_vec::<BlockId>(&buf[offset..])?;
                offset += n;
                ColumnData::Id(v)
            }
            TAG_ROW => {
                let (v, n) = encoding::decode_vec::<RowId>(&buf[offset..])?;
                offset += n;
                ColumnData::Row(v)
            }
            TAG_LOC => {
                let (v, n) = encoding::decode_vec::<Option<BlockLocation>>(&buf[offset..])?;
                offset += n;
                ColumnData::Loc(v)
            }
            TAG_BYTES => {
                let (v, n) = encoding::decode_vec::<Vec<u8>>(&buf[offset..])?;
                offset += n;
                ColumnData::Bytes(v)
            }
            _ => {
                return Err(EncodingError::InvalidTag {
                    tag,
                    type_name: "ColumnData",
                });
            }
        };
        Ok((data, offset))
    }
}

impl Encode for Column {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.data.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Column {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (name, n) = String::decode_from(buf)?;
        offset += n;
        let (data, n) = ColumnData::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { name, data }, offset))
    }
}

impl Encode for Batch {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(self.columns(), buf)
    }
}

impl Decode for Batch {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (columns, n) = encoding::decode_vec::<Column>(buf)?;
        let batch = Batch::from_columns(columns)
            .map_err(|e| EncodingError::Custom(format!("decoded ragged batch: {e}")))?;
        Ok((batch, n))
    }
}
