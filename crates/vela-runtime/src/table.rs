//! Generic open-addressed hash table, plus the content-addressed intern table
//! built on the same probing/growth algorithm.

use crate::heap::ObjId;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

/// FNV-1a, 32-bit, exactly as used to hash every string the runtime interns.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[derive(Clone)]
struct Entry {
    key: Option<ObjId>,
    hash: u32,
    value: Value,
}

/// Maps an interned-string handle to a `Value`. Used for globals, instance fields,
/// and class method tables. Equality of keys is handle equality: since strings are
/// interned, two equal names always share one `ObjId`, so no byte comparison is ever
/// needed here (that only happens in [`InternTable`], before a string has a handle).
#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self { entries: Vec::new(), count: 0 }
    }

    pub fn get(&self, key: ObjId, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.find_entry(key, hash);
        self.entries[idx].key.map(|_| self.entries[idx].value.clone())
    }

    /// Insert or overwrite. Returns `true` if this created a brand new key.
    pub fn set(&mut self, key: ObjId, hash: u32, value: Value) -> bool {
        if self.count + 1 > (self.capacity() as f64 * TABLE_MAX_LOAD) as usize {
            let new_cap = grow_capacity(self.capacity());
            self.adjust_capacity(new_cap);
        }

        let idx = self.find_entry(key, hash);
        let is_new_key = self.entries[idx].key.is_none();
        // A tombstone already counted toward `count` when it was created; only a
        // genuinely empty slot (never occupied) increases the live+tombstone count.
        if is_new_key && !self.is_tombstone(idx) {
            self.count += 1;
        }
        self.entries[idx] = Entry { key: Some(key), hash, value };
        is_new_key
    }

    pub fn delete(&mut self, key: ObjId, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = self.find_entry(key, hash);
        if self.entries[idx].key.is_none() {
            return false;
        }
        // Tombstone: key=None, value=true, preserving the probe chain.
        self.entries[idx] = Entry { key: None, hash, value: Value::Bool(true) };
        true
    }

    /// Copy every live entry from `self` into `into` (used by `OP_INHERIT`).
    pub fn add_all(&self, into: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                into.set(key, entry.hash, entry.value.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &Value)> {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, &e.value)))
    }

    /// Delete every entry whose key fails `keep`. Used by the GC to drop intern-table
    /// entries for unmarked strings without retaining them as weak references.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjId) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !keep(key) {
                    entry.key = None;
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    fn is_tombstone(&self, idx: usize) -> bool {
        self.entries[idx].key.is_none() && matches!(self.entries[idx].value, Value::Bool(true))
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(&self, key: ObjId, hash: u32) -> usize {
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if matches!(entry.value, Value::Bool(true)) => {
                    // tombstone
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                None => {
                    // truly empty
                    return tombstone.unwrap_or(index);
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut new_entries = vec![
            Entry { key: None, hash: 0, value: Value::Null };
            capacity
        ];
        let mut new_count = 0;
        for entry in &self.entries {
            let Some(key) = entry.key else { continue };
            let mut index = (entry.hash as usize) & (capacity - 1);
            loop {
                if new_entries[index].key.is_none() {
                    new_entries[index] = Entry { key: Some(key), hash: entry.hash, value: entry.value.clone() };
                    new_count += 1;
                    break;
                }
                index = (index + 1) & (capacity - 1);
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}

/// An in-progress lookup key for the intern table: raw bytes plus precomputed hash,
/// used before the string has been allocated (and therefore has no `ObjId` yet).
struct InternEntry {
    hash: u32,
    bytes: Vec<u8>,
    id: ObjId,
}

/// One slot in the intern table's probe sequence. A bare `Option` can't represent a
/// tombstone, so deleting an entry (via `retain`) would otherwise truncate the probe
/// chain for every other string that happens to hash into the same bucket — `find`
/// would stop early and `intern()` would allocate a duplicate for content that is
/// already live. A tombstone is skipped, not stopped on, exactly like the sibling
/// `Table`'s `key: None, value: Bool(true)` convention.
enum InternSlot {
    Empty,
    Tombstone,
    Occupied(InternEntry),
}

/// Content-addressed table mapping raw string bytes to the single canonical `ObjId`
/// for that content. This is the mechanism that makes string equality reduce to
/// handle equality everywhere else in the runtime.
pub struct InternTable {
    entries: Vec<InternSlot>,
    count: usize,
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InternTable {
    pub fn new() -> Self {
        Self { entries: Vec::new(), count: 0 }
    }

    /// Returns the handle for `bytes` if an equal string has already been interned.
    pub fn find(&self, bytes: &[u8], hash: u32) -> Option<ObjId> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match &self.entries[index] {
                InternSlot::Empty => return None,
                InternSlot::Tombstone => {}
                InternSlot::Occupied(e) if e.hash == hash && e.bytes == bytes => return Some(e.id),
                InternSlot::Occupied(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    pub fn insert(&mut self, bytes: Vec<u8>, hash: u32, id: ObjId) {
        if self.count + 1 > (self.capacity() as f64 * TABLE_MAX_LOAD) as usize {
            let new_cap = grow_capacity(self.capacity());
            self.adjust_capacity(new_cap);
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.entries[index] {
                InternSlot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                InternSlot::Empty => {
                    let target = tombstone.unwrap_or(index);
                    self.entries[target] = InternSlot::Occupied(InternEntry { hash, bytes, id });
                    if tombstone.is_none() {
                        self.count += 1;
                    }
                    return;
                }
                InternSlot::Occupied(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Drop every interned entry whose `ObjId` does not satisfy `keep` (the GC calls
    /// this after tracing, so unmarked strings stop being retained via the intern
    /// table even though the table itself never marks/traces its own keys as roots).
    /// Removed slots become tombstones, preserving the probe chain for surviving
    /// strings that hash into the same bucket.
    pub fn retain(&mut self, mut keep: impl FnMut(ObjId) -> bool) {
        for slot in &mut self.entries {
            if let InternSlot::Occupied(entry) = slot {
                if !keep(entry.id) {
                    *slot = InternSlot::Tombstone;
                }
            }
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(
            &mut self.entries,
            (0..capacity).map(|_| InternSlot::Empty).collect(),
        );
        self.count = 0;
        for slot in old {
            let InternSlot::Occupied(entry) = slot else { continue };
            let mut index = (entry.hash as usize) & (capacity - 1);
            loop {
                if matches!(self.entries[index], InternSlot::Empty) {
                    self.entries[index] = InternSlot::Occupied(entry);
                    self.count += 1;
                    break;
                }
                index = (index + 1) & (capacity - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ObjId {
        ObjId::from_raw(n)
    }

    #[test]
    fn fnv1a_matches_known_vector() {
        // "" hashes to the FNV-1a 32-bit offset basis.
        assert_eq!(fnv1a_hash(b""), 2166136261);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = Table::new();
        table.set(id(1), 42, Value::Number(7.0));
        assert_eq!(table.get(id(1), 42), Some(Value::Number(7.0)));
        assert_eq!(table.get(id(2), 43), None);
    }

    #[test]
    fn delete_leaves_tombstone_that_does_not_break_later_probes() {
        let mut table = Table::new();
        // Force collisions into the same bucket by reusing a hash.
        table.set(id(1), 0, Value::Number(1.0));
        table.set(id(2), 0, Value::Number(2.0));
        assert!(table.delete(id(1), 0));
        // id(2) must still be reachable even though id(1)'s slot (earlier in the
        // probe chain) is now a tombstone.
        assert_eq!(table.get(id(2), 0), Some(Value::Number(2.0)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = Table::new();
        for i in 0..20 {
            table.set(id(i), i, Value::Number(i as f64));
        }
        for i in 0..20 {
            assert_eq!(table.get(id(i), i), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn intern_table_finds_equal_content() {
        let mut interns = InternTable::new();
        let hash = fnv1a_hash(b"hello");
        assert_eq!(interns.find(b"hello", hash), None);
        interns.insert(b"hello".to_vec(), hash, id(5));
        assert_eq!(interns.find(b"hello", hash), Some(id(5)));
        assert_eq!(interns.find(b"hellp", fnv1a_hash(b"hellp")), None);
    }

    #[test]
    fn retain_leaves_a_tombstone_that_does_not_break_later_probes() {
        let mut interns = InternTable::new();
        // Force both entries into the same bucket by reusing a hash, the same way
        // the sibling `Table` test does.
        interns.insert(b"first".to_vec(), 0, id(1));
        interns.insert(b"second".to_vec(), 0, id(2));

        // Collect id(1) only: id(2) survives, but its slot is later in the probe
        // chain than id(1)'s, now-removed slot.
        interns.retain(|i| i == id(2));

        assert_eq!(interns.find(b"first", 0), None);
        assert_eq!(interns.find(b"second", 0), Some(id(2)));
    }

    #[test]
    fn insert_reuses_a_tombstone_slot_instead_of_growing_unnecessarily() {
        let mut interns = InternTable::new();
        interns.insert(b"a".to_vec(), 0, id(1));
        interns.insert(b"b".to_vec(), 0, id(2));
        interns.retain(|i| i != id(1));

        interns.insert(b"c".to_vec(), 0, id(3));

        assert_eq!(interns.find(b"b", 0), Some(id(2)));
        assert_eq!(interns.find(b"c", 0), Some(id(3)));
    }
}
