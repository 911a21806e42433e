use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use crate::jobs::JobRecord;

use super::error::{LedgerError, Result};
use super::partitions::{decode_job_key, encode_job_key};

/// Fjall-backed persistent storage for job records
#[derive(Clone)]
pub struct FjallLedger {
    keyspace: Keyspace,
    jobs: PartitionHandle,
}

impl FjallLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening job ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, jobs })
    }

    pub fn upsert(&self, record: &JobRecord) -> Result<()> {
        let key = encode_job_key(&record.id);
        let value = serde_json::to_vec(record)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %record.id, status = %record.status, "Upserted job record");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, job_id: &str) -> Result<()> {
        self.jobs.remove(encode_job_key(job_id))?;
        Ok(())
    }

    /// All stored records, oldest first. Records that fail to decode are
    /// skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        for item in self.jobs.iter() {
            let (key, value) = item?;
            let Some(job_id) = decode_job_key(&key) else {
                return Err(LedgerError::InvalidKey(
                    String::from_utf8_lossy(&key).into_owned(),
                ));
            };
            match serde_json::from_slice::<JobRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(job_id, error = %e, "Skipping unreadable job record"),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.jobs.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
