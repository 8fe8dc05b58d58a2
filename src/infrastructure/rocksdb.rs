use crate::domain::payment_intent::{PaymentIntent, PaymentIntentId};
use crate::domain::payment_intent_event::PaymentIntentEvent;
use crate::domain::ports::PaymentIntentEventLog;
use crate::error::PaymentIntentError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Column family holding every appended entry, keyed by append index.
pub const CF_LOG: &str = "log";
/// Column family holding the latest snapshot per payment intent id.
pub const CF_LATEST: &str = "latest";

#[derive(Serialize, Deserialize)]
struct LogEntry {
    event: PaymentIntentEvent,
    aggregate: PaymentIntent,
}

/// A persistent event log backed by RocksDB.
///
/// Entries in `log` are keyed by a big-endian `u64` append index, so a
/// forward iteration returns them in append order. `latest` is a read-side
/// index overwritten on every save. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbEventLog {
    db: Arc<DB>,
    next_index: Arc<AtomicU64>,
}

impl RocksDbEventLog {
    /// Opens or creates the log at `path`, resuming the append index after
    /// the last stored entry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PaymentIntentError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_log = ColumnFamilyDescriptor::new(CF_LOG, Options::default());
        let cf_latest = ColumnFamilyDescriptor::new(CF_LATEST, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_log, cf_latest])
            .map_err(storage_error)?;

        let next_index = {
            let cf = column_family(&db, CF_LOG)?;
            match db.iterator_cf(cf, IteratorMode::End).next() {
                Some(item) => {
                    let (key, _) = item.map_err(storage_error)?;
                    decode_index(&key)? + 1
                }
                None => 0,
            }
        };

        Ok(Self {
            db: Arc::new(db),
            next_index: Arc::new(AtomicU64::new(next_index)),
        })
    }
}

fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, PaymentIntentError> {
    db.cf_handle(name)
        .ok_or_else(|| PaymentIntentError::Storage(format!("column family {name} not found")))
}

fn storage_error(err: rocksdb::Error) -> PaymentIntentError {
    PaymentIntentError::Storage(err.to_string())
}

fn decode_index(key: &[u8]) -> Result<u64, PaymentIntentError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| PaymentIntentError::Storage(format!("corrupt log key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl PaymentIntentEventLog for RocksDbEventLog {
    async fn save(
        &self,
        event: PaymentIntentEvent,
        aggregate: PaymentIntent,
    ) -> Result<(), PaymentIntentError> {
        let cf_log = column_family(&self.db, CF_LOG)?;
        let cf_latest = column_family(&self.db, CF_LATEST)?;

        let latest = serde_json::to_vec(&aggregate)
            .map_err(|e| PaymentIntentError::Storage(format!("serialization error: {e}")))?;
        let id = aggregate.id().as_str().as_bytes().to_vec();
        let entry = serde_json::to_vec(&LogEntry { event, aggregate })
            .map_err(|e| PaymentIntentError::Storage(format!("serialization error: {e}")))?;

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(cf_log, index.to_be_bytes(), entry);
        batch.put_cf(cf_latest, id, latest);
        self.db.write(batch).map_err(storage_error)
    }

    async fn find_latest(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError> {
        let cf = column_family(&self.db, CF_LATEST)?;
        match self.db.get_cf(cf, id.as_str().as_bytes()).map_err(storage_error)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PaymentIntentError::Storage(format!("deserialization error: {e}"))),
            None => Ok(None),
        }
    }

    async fn events(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Vec<PaymentIntentEvent>, PaymentIntentError> {
        let cf = column_family(&self.db, CF_LOG)?;
        let mut events = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_error)?;
            let entry: LogEntry = serde_json::from_slice(&value)
                .map_err(|e| PaymentIntentError::Storage(format!("deserialization error: {e}")))?;
            if &entry.event.payment_intent_id == id {
                events.push(entry.event);
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::payment_method::PaymentMethodType;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn generated(id: &str) -> (PaymentIntentEvent, PaymentIntent) {
        PaymentIntent::generate(
            PaymentIntentId::new(id).unwrap(),
            vec![PaymentMethodType::Card],
            Amount::new(dec!(120)).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let log = RocksDbEventLog::open(dir.path()).unwrap();

        assert!(log.db.cf_handle(CF_LOG).is_some());
        assert!(log.db.cf_handle(CF_LATEST).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_save_and_find_latest() {
        let dir = tempdir().unwrap();
        let log = RocksDbEventLog::open(dir.path()).unwrap();

        let (event, intent) = generated("pi_1");
        log.save(event, intent.clone()).await.unwrap();
        let (event, next) = intent
            .require_payment_method(PaymentMethodType::Card)
            .unwrap();
        log.save(event, next.clone()).await.unwrap();

        assert_eq!(log.find_latest(intent.id()).await.unwrap().unwrap(), next);
        let seq: Vec<u64> = log
            .events(intent.id())
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq_nr)
            .collect();
        assert_eq!(seq, vec![1, 2]);

        let unknown = PaymentIntentId::new("pi_404").unwrap();
        assert!(log.find_latest(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_resumes_append_order() {
        let dir = tempdir().unwrap();
        let (event, intent) = generated("pi_1");
        {
            let log = RocksDbEventLog::open(dir.path()).unwrap();
            log.save(event, intent.clone()).await.unwrap();
        }

        let log = RocksDbEventLog::open(dir.path()).unwrap();
        let (event, next) = intent
            .require_payment_method(PaymentMethodType::Card)
            .unwrap();
        log.save(event, next.clone()).await.unwrap();

        let events = log.events(intent.id()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].seq_nr, 2);
        assert_eq!(log.find_latest(intent.id()).await.unwrap().unwrap(), next);
    }
}
