//! Wire-format implementation for the checkpoint metadata store.
//!
//! Layout: `[u32 version][live][live_txn][dropped][dropped_txn]
//! [dropped_log][aux locations]`. The per-table range indexes are not
//! serialized; they are recomputed on decode.

use super::MetaStore;
use crate::batch::Batch;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::types::BlockLocation;

impl Encode for MetaStore {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.version.encode_to(buf)?;
        self.live.encode_to(buf)?;
        self.live_txn.encode_to(buf)?;
        self.dropped.encode_to(buf)?;
        self.dropped_txn.encode_to(buf)?;
        self.dropped_log.encode_to(buf)?;
        encoding::encode_vec(&self.locations, buf)?;
        Ok(())
    }
}

impl Decode for MetaStore {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (version, mut offset) = u32::decode_from(buf)?;
        let (live, n) = Batch::decode_from(&buf[offset..])?;
        offset += n;
        let (live_txn, n) = Batch::decode_from(&buf[offset..])?;
        offset += n;
        let (dropped, n) = Batch::decode_from(&buf[offset..])?;
        offset += n;
        let (dropped_txn, n) = Batch::decode_from(&buf[offset..])?;
        offset += n;
        let (dropped_log, n) = Batch::decode_from(&buf[offset..])?;
        offset += n;
        let (locations, n) = encoding::decode_vec::<BlockLocation>(&buf[offset..])?;
        offset += n;

        let mut store = MetaStore {
            version,
            live,
            live_txn,
            dropped,
            dropped_txn,
            dropped_log,
            live_ranges: Default::default(),
            dropped_ranges: Default::default(),
            locations,
        };
        store
            .recompute_ranges()
            .map_err(|e| EncodingError::Custom(format!("decoded checkpoint: {e}")))?;
        Ok((store, offset))
    }
}
