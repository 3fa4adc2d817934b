//! In-memory per-station record store.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// One station's latest accepted observation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WeatherRecord {
    /// Flat string-record payload; always contains an `id` field.
    pub payload: String,

    /// Aggregator clock value at the moment of acceptance.
    pub lamport: i64,

    /// Wall-clock acceptance time in epoch millisecs. Used only for
    /// age-based eviction, never for ordering.
    pub last_update: i64,
}

/// Concurrent map from station ID to its latest record. Single-key
/// operations are safe under arbitrary concurrent callers without external
/// locking; whole-store operations (snapshot) may race with concurrent
/// single-key mutations and make no atomicity promise across entries.
#[derive(Debug, Default)]
pub struct RecordStore {
    /// Station ID -> record mapping.
    records: DashMap<String, WeatherRecord>,
}

impl RecordStore {
    /// Creates a new empty record store.
    pub fn new() -> Self {
        RecordStore {
            records: DashMap::new(),
        }
    }

    /// Inserts or replaces the record of a station. Returns true if the
    /// station was not present before (an insert rather than an update).
    pub fn put(&self, id: String, record: WeatherRecord) -> bool {
        self.records.insert(id, record).is_none()
    }

    /// Clones out the record of a station if present.
    pub fn get(&self, id: &str) -> Option<WeatherRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Removes the record of a station; no-op if absent. Returns true if a
    /// record was actually removed.
    pub fn remove(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Returns whether a station currently has a record.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether the store is currently empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clones out all current entries in unspecified (but stable within one
    /// call) order. Not atomic with respect to concurrent mutations.
    pub fn snapshot(&self) -> Vec<(String, WeatherRecord)> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

/// Current wall-clock time in epoch millisecs.
pub(crate) fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use rand::prelude::*;

    fn make_record(lamport: i64) -> WeatherRecord {
        WeatherRecord {
            payload: format!("{{\n    \"id\": \"s{}\"\n}}", lamport),
            lamport,
            last_update: now_ms(),
        }
    }

    #[test]
    fn put_new_then_update() {
        let store = RecordStore::new();
        assert!(store.put("IDS60901".into(), make_record(1)));
        assert!(!store.put("IDS60901".into(), make_record(2)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("IDS60901").unwrap().lamport, 2);
    }

    #[test]
    fn get_absent() {
        let store = RecordStore::new();
        assert!(store.get("nonexist!").is_none());
        assert!(!store.contains("nonexist!"));
    }

    #[test]
    fn remove_present_and_absent() {
        let store = RecordStore::new();
        store.put("IDS60901".into(), make_record(1));
        assert!(store.remove("IDS60901"));
        assert!(!store.remove("IDS60901"));
        assert!(store.is_empty());
    }

    fn gen_rand_str(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    #[test]
    fn put_rand_get_rand() {
        let store = RecordStore::new();
        let mut ref_map: HashMap<String, i64> = HashMap::new();
        for stamp in 0..100 {
            let id = gen_rand_str(2);
            let was_new = !ref_map.contains_key(&id);
            ref_map.insert(id.clone(), stamp);
            assert_eq!(store.put(id, make_record(stamp)), was_new);
        }
        assert_eq!(store.len(), ref_map.len());
        for (id, stamp) in &ref_map {
            assert_eq!(store.get(id).unwrap().lamport, *stamp);
        }
    }

    #[test]
    fn snapshot_covers_all() {
        let store = RecordStore::new();
        for i in 0..10 {
            store.put(format!("station-{}", i), make_record(i));
        }
        let snap = store.snapshot();
        assert_eq!(snap.len(), 10);
        for (id, record) in snap {
            assert_eq!(store.get(&id).unwrap(), record);
        }
    }
}
