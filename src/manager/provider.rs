use crate::core::{EntityError, EntityKey, FieldMap, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Storage behind one entity kind.
///
/// Every call is synchronous and may block. The manager applies a state
/// change only after the matching call returned `Ok`, so an `Err` leaves the
/// entity and the caches as they were.
pub trait PersistenceProvider: Send + Sync {
    /// All stored field values for `key`, `None` if there is no such row.
    fn get(&self, key: i64) -> Result<Option<FieldMap>>;

    /// Store a new row and return its generated key.
    fn insert(&self, fields: &FieldMap) -> Result<i64>;

    /// Store only the changed fields of an existing row.
    fn update(&self, key: i64, diff: &FieldMap) -> Result<()>;

    fn delete(&self, key: i64) -> Result<()>;

    /// Next ordering position, for indexed entity kinds.
    fn find_next_index(&self) -> Result<i64> {
        Err(EntityError::Logic(
            "provider does not support indexed entities".to_string(),
        ))
    }
}

/// Provider operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    Get,
    Insert,
    Update,
    Delete,
    NextIndex,
}

const OPS: usize = 5;

impl ProviderOp {
    fn slot(self) -> usize {
        match self {
            ProviderOp::Get => 0,
            ProviderOp::Insert => 1,
            ProviderOp::Update => 2,
            ProviderOp::Delete => 3,
            ProviderOp::NextIndex => 4,
        }
    }
}

struct Rows {
    rows: HashMap<i64, FieldMap>,
    next_key: i64,
    failing: Vec<ProviderOp>,
}

/// Thread-safe provider keeping rows in a `HashMap`.
///
/// Keys are generated from 1 upwards. Tests can count calls per operation
/// and make the next call of an operation fail.
pub struct InMemoryProvider {
    rows: Mutex<Rows>,
    index_field: Option<String>,
    calls: [AtomicUsize; OPS],
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Rows {
                rows: HashMap::new(),
                next_key: 1,
                failing: Vec::new(),
            }),
            index_field: None,
            calls: Default::default(),
        }
    }

    /// Answer `find_next_index` from the highest value stored in `field`.
    pub fn indexed(mut self, field: &str) -> Self {
        self.index_field = Some(field.to_string());
        self
    }

    /// Seed a row; later generated keys stay above it.
    pub fn with_row(self, key: i64, fields: FieldMap) -> Self {
        if let Ok(mut rows) = self.rows.lock() {
            rows.next_key = rows.next_key.max(key + 1);
            rows.rows.insert(key, fields);
        }
        self
    }

    /// Make the next call of `op` fail with a provider error.
    pub fn fail_next(&self, op: ProviderOp) -> Result<()> {
        self.rows.lock()?.failing.push(op);
        Ok(())
    }

    pub fn calls(&self, op: ProviderOp) -> usize {
        self.calls[op.slot()].load(Ordering::SeqCst)
    }

    pub fn row(&self, key: i64) -> Result<Option<FieldMap>> {
        Ok(self.rows.lock()?.rows.get(&key).cloned())
    }

    pub fn row_count(&self) -> Result<usize> {
        Ok(self.rows.lock()?.rows.len())
    }

    fn begin(&self, op: ProviderOp, rows: &mut Rows) -> Result<()> {
        self.calls[op.slot()].fetch_add(1, Ordering::SeqCst);
        if let Some(pos) = rows.failing.iter().position(|f| *f == op) {
            rows.failing.remove(pos);
            return Err(EntityError::Provider(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceProvider for InMemoryProvider {
    fn get(&self, key: i64) -> Result<Option<FieldMap>> {
        let mut rows = self.rows.lock()?;
        self.begin(ProviderOp::Get, &mut rows)?;
        Ok(rows.rows.get(&key).cloned())
    }

    fn insert(&self, fields: &FieldMap) -> Result<i64> {
        let mut rows = self.rows.lock()?;
        self.begin(ProviderOp::Insert, &mut rows)?;
        let key = rows.next_key;
        rows.next_key += 1;
        rows.rows.insert(key, fields.clone());
        Ok(key)
    }

    fn update(&self, key: i64, diff: &FieldMap) -> Result<()> {
        let mut rows = self.rows.lock()?;
        self.begin(ProviderOp::Update, &mut rows)?;
        let row = rows
            .rows
            .get_mut(&key)
            .ok_or(EntityError::NotFound(EntityKey::Persistent(key)))?;
        for (field, value) in diff.iter() {
            row.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: i64) -> Result<()> {
        let mut rows = self.rows.lock()?;
        self.begin(ProviderOp::Delete, &mut rows)?;
        rows.rows
            .remove(&key)
            .map(|_| ())
            .ok_or(EntityError::NotFound(EntityKey::Persistent(key)))
    }

    fn find_next_index(&self) -> Result<i64> {
        let mut rows = self.rows.lock()?;
        self.begin(ProviderOp::NextIndex, &mut rows)?;
        let Some(field) = &self.index_field else {
            return Err(EntityError::Logic(
                "provider does not support indexed entities".to_string(),
            ));
        };
        let max = rows
            .rows
            .values()
            .filter_map(|row| row.get(field).and_then(|v| v.as_i64()))
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn fields(name: &str) -> FieldMap {
        [("name".to_string(), Value::from(name))].into_iter().collect()
    }

    #[test]
    fn test_insert_generates_increasing_keys() {
        let provider = InMemoryProvider::new().with_row(10, fields("seed"));
        let a = provider.insert(&fields("a")).unwrap();
        let b = provider.insert(&fields("b")).unwrap();
        assert_eq!((a, b), (11, 12));
        assert_eq!(provider.row_count().unwrap(), 3);
    }

    #[test]
    fn test_update_merges_diff() {
        let provider = InMemoryProvider::new();
        let key = provider.insert(&fields("a")).unwrap();
        let diff: FieldMap = [("age".to_string(), Value::Integer(3))].into_iter().collect();
        provider.update(key, &diff).unwrap();

        let row = provider.row(key).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("a")));
        assert_eq!(row.get("age"), Some(&Value::Integer(3)));
        assert!(matches!(
            provider.update(99, &diff),
            Err(EntityError::NotFound(EntityKey::Persistent(99)))
        ));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let provider = InMemoryProvider::new();
        provider.fail_next(ProviderOp::Insert).unwrap();
        assert!(matches!(provider.insert(&fields("a")), Err(EntityError::Provider(_))));
        assert!(provider.insert(&fields("a")).is_ok());
        assert_eq!(provider.calls(ProviderOp::Insert), 2);
        assert_eq!(provider.row_count().unwrap(), 1);
    }

    #[test]
    fn test_next_index() {
        let mut row = fields("a");
        row.insert("position".to_string(), Value::Integer(4));
        let provider = InMemoryProvider::new().indexed("position").with_row(1, row);
        assert_eq!(provider.find_next_index().unwrap(), 5);

        assert!(InMemoryProvider::new().find_next_index().unwrap_err().is_fatal());
    }
}
