//! # Memtable
//!
//! An in-memory, sorted, mutable write buffer for the StrataKV storage engine.
//!
//! The memtable is the first point of contact for every write. It buffers
//! recent commands in a sorted structure (`BTreeMap`) before they are
//! flushed to immutable on-disk SSTables.
//!
//! ## Key properties
//! - **Sorted order**: entries are always in ascending key order (required
//!   for SSTable flush).
//! - **Latest wins**: at most one command per key; an insert replaces any
//!   earlier command for the same key.
//! - **Tombstone support**: removes are recorded as `Command::Remove` and
//!   retained so they shadow older values in SSTables.
//! - **Entry counting**: `len()` counts distinct keys (tombstones included)
//!   and is what the engine compares against its rotation threshold.
//!
//! ## Example
//! ```rust
//! use command::Command;
//! use memtable::MemTable;
//!
//! let mut m = MemTable::new();
//! m.insert(Command::Set { key: b"hello".to_vec(), value: b"world".to_vec() });
//! assert_eq!(m.get(b"hello").and_then(|c| c.value()), Some(b"world".as_slice()));
//!
//! m.insert(Command::Remove { key: b"hello".to_vec() });
//! assert!(m.get(b"hello").unwrap().is_remove());
//! ```

use command::Command;
use std::collections::BTreeMap;

/// An ordered, in-memory write buffer backed by a `BTreeMap`.
///
/// Values are whole [`Command`]s: a lookup can therefore distinguish "key
/// absent" from "key removed", and a flush can stream the commands straight
/// into an SSTable without re-deriving tombstones.
#[derive(Debug, Default)]
pub struct MemTable {
    map: BTreeMap<Vec<u8>, Command>,
}

impl MemTable {
    /// Creates a new, empty memtable.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Inserts `command`, replacing any earlier command for the same key.
    ///
    /// The key is taken from the command itself, so a `Remove` overwrites an
    /// older `Set` and vice versa. Tombstones are kept: they must reach the
    /// SSTable to shadow older values in previous flushes.
    pub fn insert(&mut self, command: Command) {
        self.map.insert(command.key().to_vec(), command);
    }

    /// Returns the latest command recorded for `key`, tombstones included.
    ///
    /// The engine inspects the command kind: a `Remove` reads as "absent"
    /// and stops the lookup from falling through to older SSTables.
    pub fn get(&self, key: &[u8]) -> Option<&Command> {
        self.map.get(key)
    }

    /// Number of distinct keys, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if the memtable contains zero entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `true` if the memtable has any command for `key` (including tombstones).
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Iterates over all commands in **ascending key order**.
    ///
    /// This includes tombstones. The ordering guarantee comes from the
    /// underlying `BTreeMap` and is what the SSTable writer relies on for
    /// its strictly-increasing-keys input contract.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.map.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &[u8], value: &[u8]) -> Command {
        Command::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn rm(key: &[u8]) -> Command {
        Command::Remove { key: key.to_vec() }
    }

    // -------------------- Basic insert / get --------------------

    #[test]
    fn insert_and_get_single_key() {
        let mut m = MemTable::new();
        m.insert(set(b"k1", b"v1"));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(b"k1"), Some(&set(b"k1", b"v1")));
    }

    #[test]
    fn latest_command_wins() {
        let mut m = MemTable::new();
        m.insert(set(b"k1", b"v1"));
        m.insert(set(b"k1", b"v2"));
        assert_eq!(m.get(b"k1").and_then(|c| c.value()), Some(b"v2".as_slice()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn get_missing_key_returns_none() {
        let m = MemTable::new();
        assert!(m.get(b"nonexistent").is_none());
    }

    // -------------------- Tombstones --------------------

    #[test]
    fn remove_replaces_set() {
        let mut m = MemTable::new();
        m.insert(set(b"k1", b"v1"));
        m.insert(rm(b"k1"));
        assert!(m.get(b"k1").unwrap().is_remove());
        assert_eq!(m.len(), 1); // tombstone still counted
    }

    #[test]
    fn set_resurrects_removed_key() {
        let mut m = MemTable::new();
        m.insert(rm(b"k"));
        m.insert(set(b"k", b"v2"));
        assert_eq!(m.get(b"k").and_then(|c| c.value()), Some(b"v2".as_slice()));
    }

    #[test]
    fn remove_of_absent_key_creates_tombstone() {
        let mut m = MemTable::new();
        m.insert(rm(b"k"));
        assert_eq!(m.len(), 1);
        assert!(m.contains_key(b"k"));
        assert!(m.get(b"k").unwrap().is_remove());
    }

    #[test]
    fn len_counts_tombstones() {
        let mut m = MemTable::new();
        m.insert(set(b"a", b"1"));
        m.insert(rm(b"b"));
        assert_eq!(m.len(), 2);
    }

    // -------------------- Ordering --------------------

    #[test]
    fn iter_yields_sorted_keys() {
        let mut m = MemTable::new();
        m.insert(set(b"c", b"3"));
        m.insert(set(b"a", b"1"));
        m.insert(set(b"b", b"2"));

        let keys: Vec<&[u8]> = m.iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn iter_includes_tombstones() {
        let mut m = MemTable::new();
        m.insert(set(b"a", b"1"));
        m.insert(rm(b"b"));
        m.insert(set(b"c", b"3"));

        let entries: Vec<_> = m.iter().collect();
        assert_eq!(entries.len(), 3);
        assert!(entries[1].is_remove());
    }

    #[test]
    fn iter_empty_memtable() {
        let m = MemTable::new();
        assert_eq!(m.iter().count(), 0);
    }

    // -------------------- Load --------------------

    #[test]
    fn many_distinct_keys_stay_sorted() {
        let mut m = MemTable::new();
        for i in (0u64..1000).rev() {
            m.insert(set(format!("key{i:04}").as_bytes(), b"v"));
        }
        assert_eq!(m.len(), 1000);
        let keys: Vec<_> = m.iter().map(|c| c.key().to_vec()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn overwrite_same_key_many_times() {
        let mut m = MemTable::new();
        for i in 0..10_000u64 {
            m.insert(set(b"k", format!("v{i}").as_bytes()));
        }
        assert_eq!(m.len(), 1);
        assert_eq!(
            m.get(b"k").and_then(|c| c.value()),
            Some(b"v9999".as_slice())
        );
    }

    // -------------------- Edge cases --------------------

    #[test]
    fn binary_keys() {
        let mut m = MemTable::new();
        let key = vec![0x00, 0xFF, 0x80, 0x01];
        m.insert(Command::Set {
            key: key.clone(),
            value: vec![0xDE, 0xAD],
        });
        assert_eq!(
            m.get(&key).and_then(|c| c.value()),
            Some([0xDE_u8, 0xAD].as_slice())
        );
    }

    #[test]
    fn default_creates_empty() {
        let m = MemTable::default();
        assert!(m.is_empty());
        assert_eq!(m.len(), 0);
    }
}
