use super::{ObjectStore, Page, Record, Repository};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

type WriteFault<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// In-process repository with the same conditional-write semantics as the
/// DynamoDB adapter. Used by tests and local runs.
pub struct MemoryRepository<T> {
    items: Mutex<BTreeMap<(String, String), T>>,
    fault: Mutex<Option<WriteFault<T>>>,
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            fault: Mutex::new(None),
        }
    }
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of a record matching `predicate` fail with a backend error.
    pub fn fail_writes_where<F>(&self, predicate: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        *lock(&self.fault) = Some(Box::new(predicate));
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.items).values().cloned().collect()
    }

    fn check_fault(&self, record: &T) -> Result<(), StoreError> {
        match lock(&self.fault).as_ref() {
            Some(fault) if fault(record) => Err(StoreError::Backend(format!(
                "injected write failure for {}",
                record.partition_key()
            ))),
            _ => Ok(()),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key_of<T: Record>(record: &T) -> (String, String) {
    (record.partition_key(), record.sort_key())
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<T>, StoreError> {
        Ok(lock(&self.items).get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn list(&self, cursor: Option<String>, limit: usize) -> Result<Page<T>, StoreError> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| StoreError::Serialization(format!("invalid cursor {:?}", c)))?,
            None => 0,
        };
        let mut all: Vec<T> = lock(&self.items).values().cloned().collect();
        all.sort_by_key(|r| (r.list_key(), r.partition_key(), r.sort_key()));

        let limit = limit.max(1);
        let items: Vec<T> = all.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + items.len();
        let next_cursor = (next < all.len()).then(|| next.to_string());
        Ok(Page { items, next_cursor })
    }

    async fn list_partition(&self, pk: &str) -> Result<Vec<T>, StoreError> {
        Ok(lock(&self.items)
            .iter()
            .filter(|((p, _), _)| p == pk)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create(&self, record: &T) -> Result<(), StoreError> {
        self.check_fault(record)?;
        let key = key_of(record);
        let mut items = lock(&self.items);
        if items.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        items.insert(key, record.clone());
        Ok(())
    }

    async fn update(&self, record: &T) -> Result<(), StoreError> {
        self.check_fault(record)?;
        let key = key_of(record);
        let mut items = lock(&self.items);
        if !items.contains_key(&key) {
            return Err(StoreError::NotFound(format!("{}/{}", key.0, key.1)));
        }
        items.insert(key, record.clone());
        Ok(())
    }

    async fn put(&self, record: &T) -> Result<(), StoreError> {
        self.check_fault(record)?;
        lock(&self.items).insert(key_of(record), record.clone());
        Ok(())
    }

    async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
        lock(&self.items).remove(&(pk.to_string(), sk.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_text(&self, key: &str, body: String, _content_type: &str) -> Result<(), StoreError> {
        lock(&self.objects).insert(key.to_string(), body);
        Ok(())
    }

    async fn get_text(&self, key: &str) -> Result<String, StoreError> {
        lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StoreError> {
        if !lock(&self.objects).contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}?expires={}", key, expires_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_all;
    use crate::types::LedgerEntry;
    use crate::types::LedgerKind;

    fn entry(id: &str, date: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.into(),
            date: date.into(),
            description: "Uniform sale".into(),
            amount_cents: 2500,
            kind: LedgerKind::Income,
            category: None,
            created_by: "hr".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn conditional_writes() {
        let repo = MemoryRepository::new();
        repo.create(&entry("a", "2024-01-01")).await.unwrap();
        assert!(matches!(
            repo.create(&entry("a", "2024-01-02")).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            repo.update(&entry("b", "2024-01-02")).await,
            Err(StoreError::NotFound(_))
        ));
        repo.update(&entry("a", "2024-02-01")).await.unwrap();
        let got = repo.get("LEDGER#a", "LEDGER#a").await.unwrap().unwrap();
        assert_eq!(got.date, "2024-02-01");
    }

    #[tokio::test]
    async fn pages_in_list_key_order() {
        let repo = MemoryRepository::new();
        for (i, date) in ["2024-03-01", "2024-01-01", "2024-02-01"].iter().enumerate() {
            repo.put(&entry(&i.to_string(), date)).await.unwrap();
        }
        let first = repo.list(None, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].date, "2024-01-01");
        assert!(first.next_cursor.is_some());

        let all = list_all(&repo, 2).await.unwrap();
        let dates: Vec<_> = all.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-01-01", "2024-02-01", "2024-03-01"]);
    }

    #[tokio::test]
    async fn injected_faults_only_hit_matching_records() {
        let repo = MemoryRepository::new();
        repo.fail_writes_where(|e: &LedgerEntry| e.id == "bad");
        assert!(repo.put(&entry("ok", "2024-01-01")).await.is_ok());
        assert!(matches!(
            repo.put(&entry("bad", "2024-01-01")).await,
            Err(StoreError::Backend(_))
        ));
        assert_eq!(repo.len(), 1);
    }
}
