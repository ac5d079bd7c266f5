// crates/woo-store/src/rocks.rs
//
// RocksDB-backed `StateStore`.
//
// Keys and values are stored as-is; the key layout in `keys.rs` keeps
// related records under a common prefix so they can be listed with a
// single prefix scan.

use async_trait::async_trait;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options};

use woo_core::error::StakingError;
use woo_core::traits::StateStore;

#[derive(Debug)]
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> Result<Self, StakingError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)
            .map_err(|e| StakingError::Storage(format!("Failed to open RocksDB at {}: {}", path, e)))?;

        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for RocksStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StakingError> {
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| StakingError::Storage(format!("RocksDB put failed: {}", e)))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StakingError> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| StakingError::Storage(format!("RocksDB get failed: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<(), StakingError> {
        self.db
            .delete(key.as_bytes())
            .map_err(|e| StakingError::Storage(format!("RocksDB delete failed: {}", e)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StakingError> {
        let prefix_bytes = prefix.as_bytes();
        let mut out = Vec::new();
        for item in self.db.prefix_iterator(prefix_bytes) {
            let (key, value) = item
                .map_err(|e| StakingError::Storage(format!("RocksDB iteration error: {}", e)))?;
            // Without a prefix extractor the iterator runs past the prefix.
            if !key.starts_with(prefix_bytes) {
                break;
            }
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StakingError::Storage(format!("non-UTF-8 key: {}", e)))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let store = RocksStore::open(&path).unwrap();
            store.put("booster:a", b"1".to_vec()).await.unwrap();
            store.put("booster:b", b"2".to_vec()).await.unwrap();
            store.put("compounder:a", b"3".to_vec()).await.unwrap();
        }
        let store = RocksStore::open(&path).unwrap();
        assert_eq!(store.get("booster:b").await.unwrap(), Some(b"2".to_vec()));
        let scanned = store.scan_prefix("booster:").await.unwrap();
        assert_eq!(scanned.len(), 2);
        store.delete("booster:a").await.unwrap();
        assert_eq!(store.scan_prefix("booster:").await.unwrap().len(), 1);
    }
}
