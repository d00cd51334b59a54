//! Open-addressed hash table
//!
//! One table type backs four different maps: the interned-string set, the
//! global bindings, instance fields, and class method tables. Keys are
//! handles to interned strings, so key equality is handle identity; each
//! entry carries the key's hash so the table never has to reach back into
//! the heap, not even while growing.
//!
//! Linear probing, 75% load factor, power-of-two capacities starting at 8.
//! A deleted entry leaves a tombstone (no key, `true` value) that keeps
//! collision chains intact; insertion reuses the first tombstone seen.

use crate::object::ObjRef;
use crate::value::Value;

const MIN_CAPACITY: usize = 8;

#[derive(Clone)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: None, hash: 0, value: Value::nil() }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !self.value.is_nil()
    }
}

#[derive(Clone)]
pub struct Table {
    /// Live entries plus tombstones; the load factor counts both.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table { count: 0, entries: Vec::new() }
    }

    /// Number of live key/value pairs.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Probe for `key`. Returns the index of the entry holding the key, or
    /// the slot an insertion should use (the first tombstone on the chain
    /// if there was one, otherwise the terminating empty slot).
    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let mut index = hash as usize & (entries.len() - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        // Truly empty: the key is absent.
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (entries.len() - 1);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::empty(); capacity];
        // Tombstones are dropped on rehash, so the count is rebuilt too.
        self.count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let dest = Self::find_entry(&entries, key, entry.hash);
                entries[dest] = entry;
                self.count += 1;
            }
        }
        self.entries = entries;
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        entry.key.map(|_| entry.value)
    }

    /// Insert or update. Returns true when the key was not already present.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            let capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
            self.adjust_capacity(capacity);
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // A reused tombstone is already counted toward the load factor.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry { key: Some(key), hash, value };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry { key: None, hash: 0, value: Value::boolean(true) };
        true
    }

    /// Copy every live entry of `other` into `self` (method inheritance).
    pub fn extend_from(&mut self, other: &Table) {
        for entry in &other.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.hash, entry.value);
            }
        }
    }

    /// Iterate live key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// The interning probe: find a key with this hash for which `eq`
    /// confirms byte equality. Walks the probe chain like a lookup, passing
    /// through tombstones, stopping at the first truly empty slot.
    pub fn find_string(&self, hash: u32, eq: impl Fn(ObjRef) -> bool) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mut index = hash as usize & (self.entries.len() - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    if entry.hash == hash && eq(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & (self.entries.len() - 1);
        }
    }

    /// Tombstone every entry whose key fails `keep`. Used by the collector
    /// to drop interned strings that are about to be swept.
    pub fn retain_keys(&mut self, keep: impl Fn(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key
                && !keep(key)
            {
                *entry = Entry { key: None, hash: 0, value: Value::boolean(true) };
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

/// FNV-1a over raw bytes; the hash every interned string carries.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> ObjRef {
        ObjRef::new(i)
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(hash_bytes(b""), 2166136261);
        assert_eq!(hash_bytes(b"a"), 0xe40c292c);
        assert_eq!(hash_bytes(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_set_get() {
        let mut table = Table::new();
        assert!(table.set(key(1), 10, Value::number(1.0)));
        assert!(table.set(key(2), 20, Value::number(2.0)));
        assert_eq!(table.get(key(1), 10), Some(Value::number(1.0)));
        assert_eq!(table.get(key(2), 20), Some(Value::number(2.0)));
        assert_eq!(table.get(key(3), 30), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut table = Table::new();
        assert!(table.set(key(1), 10, Value::number(1.0)));
        assert!(!table.set(key(1), 10, Value::number(9.0)));
        assert_eq!(table.get(key(1), 10), Some(Value::number(9.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_delete_leaves_chain_intact() {
        let mut table = Table::new();
        // Three keys with colliding hashes probe into one chain.
        table.set(key(1), 8, Value::number(1.0));
        table.set(key(2), 8, Value::number(2.0));
        table.set(key(3), 8, Value::number(3.0));
        assert!(table.delete(key(2), 8));
        // The tombstone must not break the probe to key 3.
        assert_eq!(table.get(key(3), 8), Some(Value::number(3.0)));
        assert_eq!(table.get(key(2), 8), None);
        assert!(!table.delete(key(2), 8));
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut table = Table::new();
        table.set(key(1), 8, Value::number(1.0));
        table.set(key(2), 8, Value::number(2.0));
        table.delete(key(1), 8);
        // The new colliding key should land in the tombstone slot.
        table.set(key(3), 8, Value::number(3.0));
        assert_eq!(table.get(key(2), 8), Some(Value::number(2.0)));
        assert_eq!(table.get(key(3), 8), Some(Value::number(3.0)));
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut table = Table::new();
        for i in 0..100 {
            table.set(key(i), i.wrapping_mul(2654435761), Value::number(i as f64));
        }
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            assert_eq!(
                table.get(key(i), i.wrapping_mul(2654435761)),
                Some(Value::number(i as f64))
            );
        }
    }

    #[test]
    fn test_extend_from() {
        let mut a = Table::new();
        a.set(key(1), 10, Value::number(1.0));
        let mut b = Table::new();
        b.set(key(2), 20, Value::number(2.0));
        b.extend_from(&a);
        assert_eq!(b.get(key(1), 10), Some(Value::number(1.0)));
        assert_eq!(b.get(key(2), 20), Some(Value::number(2.0)));
    }

    #[test]
    fn test_retain_keys() {
        let mut table = Table::new();
        table.set(key(1), 10, Value::nil());
        table.set(key(2), 20, Value::nil());
        table.retain_keys(|k| k == key(2));
        assert_eq!(table.get(key(1), 10), None);
        assert_eq!(table.get(key(2), 20), Some(Value::nil()));
    }

    #[test]
    fn test_find_string_skips_tombstones() {
        let mut table = Table::new();
        table.set(key(1), 8, Value::nil());
        table.set(key(2), 8, Value::nil());
        table.delete(key(1), 8);
        let found = table.find_string(8, |k| k == key(2));
        assert_eq!(found, Some(key(2)));
        assert_eq!(table.find_string(8, |k| k == key(1)), None);
    }
}
