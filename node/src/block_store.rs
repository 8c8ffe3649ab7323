use crate::coin_store::{db_err, BlockCoinDiff};
use evg_core::blockchain::block_record::BlockRecord;
use evg_core::blockchain::full_block::FullBlock;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::blockchain::sub_epoch_summary::SubEpochSummary;
use evg_core::errors::ChainError;
use evg_serialize::Streamable;

pub const SCHEMA_VERSION: u32 = 1;

const META_PEAK: &[u8] = b"peak";
const META_SCHEMA: &[u8] = b"schema_version";
const META_NETWORK: &[u8] = b"network";

/// Blocks, block records and per-block coin diffs by hash; the main-chain
/// height index; sub-epoch summaries; chain metadata. The height index and
/// peak pointer only ever change inside the chain's commit transaction.
pub struct BlockStore {
    blocks: sled::Tree,
    block_records: sled::Tree,
    coin_diffs: sled::Tree,
    height_index: sled::Tree,
    sub_epoch_summaries: sled::Tree,
    metadata: sled::Tree,
}

fn decode<T: Streamable>(raw: &[u8], what: &str) -> Result<T, ChainError> {
    T::from_bytes(raw).map_err(|e| ChainError::Corruption(format!("bad {what}: {e}")))
}

impl BlockStore {
    /// Opens the store, stamping or checking the schema version and network
    /// id. A mismatch is corruption: recovery is out-of-band, never silent.
    pub fn open(db: &sled::Db, network: &str) -> Result<Self, ChainError> {
        let store = BlockStore {
            blocks: db.open_tree("blocks").map_err(db_err)?,
            block_records: db.open_tree("block_records").map_err(db_err)?,
            coin_diffs: db.open_tree("coin_diffs").map_err(db_err)?,
            height_index: db.open_tree("height_index").map_err(db_err)?,
            sub_epoch_summaries: db.open_tree("sub_epoch_summaries").map_err(db_err)?,
            metadata: db.open_tree("metadata").map_err(db_err)?,
        };
        match store.metadata.get(META_SCHEMA).map_err(db_err)? {
            None => {
                store
                    .metadata
                    .insert(META_SCHEMA, &SCHEMA_VERSION.to_be_bytes())
                    .map_err(db_err)?;
                store
                    .metadata
                    .insert(META_NETWORK, network.as_bytes())
                    .map_err(db_err)?;
            }
            Some(raw) => {
                let found = decode::<u32>(&raw, "schema version")?;
                if found != SCHEMA_VERSION {
                    return Err(ChainError::Corruption(format!(
                        "schema version {found}, expected {SCHEMA_VERSION}"
                    )));
                }
                let stored_network = store.metadata.get(META_NETWORK).map_err(db_err)?;
                if stored_network.as_deref() != Some(network.as_bytes()) {
                    return Err(ChainError::Corruption(format!(
                        "database belongs to another network, expected {network}"
                    )));
                }
            }
        }
        Ok(store)
    }

    pub fn height_index_tree(&self) -> &sled::Tree {
        &self.height_index
    }

    pub fn metadata_tree(&self) -> &sled::Tree {
        &self.metadata
    }

    /// Persists a validated block with its derived record and coin diff.
    /// Safe to call for any branch; nothing here touches the main chain.
    pub fn put_block(
        &self,
        block: &FullBlock,
        record: &BlockRecord,
        diff: &BlockCoinDiff,
    ) -> Result<(), ChainError> {
        let hash = record.header_hash;
        self.blocks
            .insert(hash.as_slice(), block.to_bytes())
            .map_err(db_err)?;
        self.block_records
            .insert(hash.as_slice(), record.to_bytes())
            .map_err(db_err)?;
        self.coin_diffs
            .insert(hash.as_slice(), diff.to_bytes())
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_block(&self, hash: &Bytes32) -> Result<Option<FullBlock>, ChainError> {
        match self.blocks.get(hash.as_slice()).map_err(db_err)? {
            Some(raw) => Ok(Some(decode(&raw, "block")?)),
            None => Ok(None),
        }
    }

    pub fn get_block_record(&self, hash: &Bytes32) -> Result<Option<BlockRecord>, ChainError> {
        match self.block_records.get(hash.as_slice()).map_err(db_err)? {
            Some(raw) => Ok(Some(decode(&raw, "block record")?)),
            None => Ok(None),
        }
    }

    pub fn get_coin_diff(&self, hash: &Bytes32) -> Result<Option<BlockCoinDiff>, ChainError> {
        match self.coin_diffs.get(hash.as_slice()).map_err(db_err)? {
            Some(raw) => Ok(Some(decode(&raw, "coin diff")?)),
            None => Ok(None),
        }
    }

    pub fn get_hash_at_height(&self, height: u32) -> Result<Option<Bytes32>, ChainError> {
        match self
            .height_index
            .get(height.to_be_bytes())
            .map_err(db_err)?
        {
            Some(raw) => Ok(Some(Bytes32::parse(&raw).map_err(|e| {
                ChainError::Corruption(format!("bad height index entry: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub fn get_block_at_height(&self, height: u32) -> Result<Option<FullBlock>, ChainError> {
        match self.get_hash_at_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Main-chain block records for `start..=end`, in height order. Used by
    /// sync to serve header ranges.
    pub fn headers_between(&self, start: u32, end: u32) -> Result<Vec<BlockRecord>, ChainError> {
        let mut records = Vec::new();
        for height in start..=end {
            let Some(hash) = self.get_hash_at_height(height)? else {
                break;
            };
            let Some(record) = self.get_block_record(&hash)? else {
                return Err(ChainError::Corruption(format!(
                    "height index points at missing record {hash}"
                )));
            };
            records.push(record);
        }
        Ok(records)
    }

    pub fn put_sub_epoch_summary(
        &self,
        index: u32,
        summary: &SubEpochSummary,
    ) -> Result<(), ChainError> {
        self.sub_epoch_summaries
            .insert(index.to_be_bytes(), summary.to_bytes())
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_sub_epoch_summaries(&self) -> Result<Vec<SubEpochSummary>, ChainError> {
        let mut summaries = Vec::new();
        for entry in self.sub_epoch_summaries.iter() {
            let (_, raw) = entry.map_err(db_err)?;
            summaries.push(decode(&raw, "sub epoch summary")?);
        }
        Ok(summaries)
    }

    pub fn truncate_sub_epoch_summaries_above(&self, index: u32) -> Result<(), ChainError> {
        let keys: Vec<_> = self
            .sub_epoch_summaries
            .range(std::ops::RangeFrom {
                start: (index + 1).to_be_bytes().to_vec(),
            })
            .collect();
        for entry in keys {
            let (key, _) = entry.map_err(db_err)?;
            self.sub_epoch_summaries.remove(key).map_err(db_err)?;
        }
        Ok(())
    }

    pub fn get_peak_hash(&self) -> Result<Option<Bytes32>, ChainError> {
        match self.metadata.get(META_PEAK).map_err(db_err)? {
            Some(raw) => Ok(Some(Bytes32::parse(&raw).map_err(|e| {
                ChainError::Corruption(format!("bad peak pointer: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// All stored block records. Used to rebuild the in-memory record map
    /// at startup.
    pub fn all_block_records(&self) -> Result<Vec<BlockRecord>, ChainError> {
        let mut records = Vec::new();
        for entry in self.block_records.iter() {
            let (_, raw) = entry.map_err(db_err)?;
            records.push(decode(&raw, "block record")?);
        }
        Ok(records)
    }
}

pub fn meta_peak_key() -> &'static [u8] {
    META_PEAK
}
