use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use x509_parser::num_bigint::BigUint;

use super::{CounterKind, CrlStore, IssuingPointRecord, StoreError, StoreResult};

/// JSON file holding the records of every issuing point, keyed by id.
///
/// Writes go to a synced sibling temporary file which then replaces the
/// store, and the directory entry is synced too. A reservation that
/// returned is therefore still there after a power loss, and a crash never
/// leaves a truncated store behind.
#[derive(Debug)]
pub struct FileCrlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCrlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StoreResult<BTreeMap<String, IssuingPointRecord>> {
        if !fs::try_exists(&self.path).await? {
            debug!("No issuing point store at {:?}, starting empty", self.path);
            return Ok(BTreeMap::new());
        }
        let content = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    async fn write_all(&self, records: &BTreeMap<String, IssuingPointRecord>) -> StoreResult<()> {
        let content = serde_json::to_vec_pretty(records)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        sync_parent_dir(&self.path).await
    }
}

/// Makes a rename into `path` durable. Directories cannot be synced on Windows.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> StoreResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(parent).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> StoreResult<()> {
    Ok(())
}

#[async_trait]
impl CrlStore for FileCrlStore {
    async fn load(&self, issuing_point: &str) -> StoreResult<Option<IssuingPointRecord>> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        Ok(records.remove(issuing_point))
    }

    async fn save(&self, record: &IssuingPointRecord) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;

        let mut merged = record.clone();
        if let Some(existing) = records.get(&record.id) {
            merged.merge_counters(existing);
        }
        records.insert(record.id.clone(), merged);

        self.write_all(&records).await?;
        info!(issuing_point = %record.id, "Saved issuing point state to {:?}", self.path);
        Ok(())
    }

    async fn reserve_number(
        &self,
        issuing_point: &str,
        counter: CounterKind,
        next: &BigUint,
    ) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;

        let record = records
            .entry(issuing_point.to_string())
            .or_insert_with(|| IssuingPointRecord::new(issuing_point));
        if !record.advance(counter, next) {
            return Err(StoreError::CounterRegression {
                issuing_point: issuing_point.to_string(),
            });
        }

        self.write_all(&records).await
    }
}
