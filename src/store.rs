use crate::error::{FinancialIngestError, Result};
use crate::record::{FinancialRecord, RecordKey};
use crate::utils::normalize_company_name;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

/// Validated records keyed by (company, year). At most one record per key;
/// company names match case-insensitively.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with [`FinancialIngestError::DuplicateRecord`] if the key is taken.
    async fn save(&self, record: &FinancialRecord) -> Result<()>;

    async fn load(&self, company_name: &str, year: i32) -> Result<FinancialRecord>;

    /// Removes and returns the record, or fails with [`FinancialIngestError::NotFound`].
    async fn delete(&self, company_name: &str, year: i32) -> Result<FinancialRecord>;

    /// Stored years for `company_name`, ascending.
    async fn list_years(&self, company_name: &str) -> Result<Vec<i32>>;

    /// One display name per stored company, sorted case-insensitively.
    async fn list_companies(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn save(&self, record: &FinancialRecord) -> Result<()> {
        (**self).save(record).await
    }

    async fn load(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        (**self).load(company_name, year).await
    }

    async fn delete(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        (**self).delete(company_name, year).await
    }

    async fn list_years(&self, company_name: &str) -> Result<Vec<i32>> {
        (**self).list_years(company_name).await
    }

    async fn list_companies(&self) -> Result<Vec<String>> {
        (**self).list_companies().await
    }
}

fn duplicate(record: &FinancialRecord) -> FinancialIngestError {
    FinancialIngestError::DuplicateRecord {
        company_name: record.company_name.clone(),
        year: record.year,
    }
}

fn not_found(company_name: &str, year: i32) -> FinancialIngestError {
    FinancialIngestError::NotFound {
        company_name: normalize_company_name(company_name),
        year,
    }
}

fn years_of<'a>(keys: impl Iterator<Item = &'a RecordKey>, company_name: &str) -> Vec<i32> {
    let company = RecordKey::new(company_name, 0).company_name;
    let mut years: Vec<i32> = keys
        .filter(|k| k.company_name == company)
        .map(|k| k.year)
        .collect();
    years.sort_unstable();
    years
}

/// The most recent year's spelling represents each company.
fn companies_of<'a>(
    records: impl Iterator<Item = (&'a RecordKey, &'a FinancialRecord)>,
) -> Vec<String> {
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    for (key, record) in records {
        names.insert(key.company_name.as_str(), record.company_name.as_str());
    }
    names.into_values().map(str::to_string).collect()
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<RecordKey, FinancialRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(&self, record: &FinancialRecord) -> Result<()> {
        let key = record.key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(duplicate(record));
        }
        debug!("Stored {}", key);
        records.insert(key, record.clone());
        Ok(())
    }

    async fn load(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        self.records
            .read()
            .await
            .get(&RecordKey::new(company_name, year))
            .cloned()
            .ok_or_else(|| not_found(company_name, year))
    }

    async fn delete(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        let removed = self
            .records
            .write()
            .await
            .remove(&RecordKey::new(company_name, year))
            .ok_or_else(|| not_found(company_name, year))?;
        debug!("Deleted {}", removed.key());
        Ok(removed)
    }

    async fn list_years(&self, company_name: &str) -> Result<Vec<i32>> {
        Ok(years_of(self.records.read().await.keys(), company_name))
    }

    async fn list_companies(&self) -> Result<Vec<String>> {
        Ok(companies_of(self.records.read().await.iter()))
    }
}

/// Persists every record as one pretty-printed JSON array. Suited to small
/// histories; each save rewrites the whole file.
pub struct JsonFileRecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<RecordKey, FinancialRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<FinancialRecord> = serde_json::from_str(&contents)?;
        Ok(records.into_iter().map(|r| (r.key(), r)).collect())
    }

    async fn write_all(&self, records: &BTreeMap<RecordKey, FinancialRecord>) -> Result<()> {
        let list: Vec<&FinancialRecord> = records.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn save(&self, record: &FinancialRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let key = record.key();
        if records.contains_key(&key) {
            return Err(duplicate(record));
        }
        records.insert(key.clone(), record.clone());
        self.write_all(&records).await?;
        info!("Saved {} to {}", key, self.path.display());
        Ok(())
    }

    async fn load(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        let _guard = self.lock.lock().await;
        self.read_all()
            .await?
            .remove(&RecordKey::new(company_name, year))
            .ok_or_else(|| not_found(company_name, year))
    }

    async fn delete(&self, company_name: &str, year: i32) -> Result<FinancialRecord> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let removed = records
            .remove(&RecordKey::new(company_name, year))
            .ok_or_else(|| not_found(company_name, year))?;
        self.write_all(&records).await?;
        info!("Deleted {} from {}", removed.key(), self.path.display());
        Ok(removed)
    }

    async fn list_years(&self, company_name: &str) -> Result<Vec<i32>> {
        let _guard = self.lock.lock().await;
        Ok(years_of(self.read_all().await?.keys(), company_name))
    }

    async fn list_companies(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(companies_of(self.read_all().await?.iter()))
    }
}
