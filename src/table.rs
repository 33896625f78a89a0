use std::mem::size_of;
use std::ptr;

use crate::objects::object_string::ObjectString;
use crate::value::{is_nil, make_bool_value, make_nil_value, Value};

const TABLE_MIN_CAPACITY: usize = 8;

/// A slot is empty when `key` is null and `value` is nil; a tombstone keeps a
/// null key but a `true` value so probe chains stay intact after deletion.
#[derive(Clone, Copy)]
struct Entry {
    key: *mut ObjectString,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: ptr::null_mut(),
            value: make_nil_value(),
        }
    }
}

/// Open-addressed hash table with linear probing, keyed by interned string
/// identity. Used for globals, instance fields, class methods, and (with
/// `find_string`) the intern set itself.
pub struct Table {
    count: usize,
    tombstones: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            count: 0,
            tombstones: 0,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &self.entries[index];
        if entry.key.is_null() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Insert or overwrite. Returns whether the key was newly added.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        // Load factor 3/4, counting tombstones since they lengthen probes too.
        if (self.count + self.tombstones + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_null();
        if is_new {
            if !is_nil(&entry.value) {
                self.tombstones -= 1;
            }
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new
    }

    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }

        entry.key = ptr::null_mut();
        entry.value = make_bool_value(true);
        self.count -= 1;
        self.tombstones += 1;
        true
    }

    /// Intern lookup: probe for an existing string object with the same
    /// length, hash, and bytes. Identity comparison is useless here since the
    /// candidate has not been allocated yet.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.entries.is_empty() {
            return None;
        }

        let capacity = self.entries.len();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if is_nil(&entry.value) {
                    return None;
                }
            } else {
                let key = unsafe { &*entry.key };
                if key.content.len() == content.len()
                    && key.hash == hash
                    && key.content == content
                {
                    return Some(entry.key);
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, Value)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| (entry.key, entry.value))
    }

    /// Bytes owned by the entry array, for GC accounting.
    pub fn footprint(&self) -> usize {
        self.entries.capacity() * size_of::<Entry>()
    }

    fn find_entry(entries: &[Entry], key: *mut ObjectString) -> usize {
        let capacity = entries.len();
        let mut index = (unsafe { (*key).hash } as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.key.is_null() {
                if is_nil(&entry.value) {
                    return tombstone.unwrap_or(index);
                }
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if entry.key == key {
                return index;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.len() < TABLE_MIN_CAPACITY {
            TABLE_MIN_CAPACITY
        } else {
            self.entries.len() * 2
        };

        let old_entries = std::mem::replace(&mut self.entries, vec![Entry::empty(); new_capacity]);
        self.tombstones = 0;
        for entry in old_entries {
            if entry.key.is_null() {
                continue;
            }
            let index = Self::find_entry(&self.entries, entry.key);
            self.entries[index] = entry;
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_manager::ObjectManager;
    use crate::value::{make_bool_value, make_number_value};

    fn alloc_key(manager: &mut ObjectManager, content: &str) -> *mut ObjectString {
        manager.alloc_string(content).0
    }

    #[test]
    fn test_set_get_and_overwrite() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let key = alloc_key(&mut manager, "answer");

        assert!(table.set(key, make_number_value(1.0)));
        assert!(!table.set(key, make_number_value(42.0)));
        assert_eq!(table.get(key), Some(make_number_value(42.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_missing_key() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let present = alloc_key(&mut manager, "present");
        let missing = alloc_key(&mut manager, "missing");

        table.set(present, make_bool_value(true));
        assert_eq!(table.get(missing), None);
    }

    #[test]
    fn test_delete_leaves_probe_chain_usable() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..16)
            .map(|index| alloc_key(&mut manager, &format!("key-{}", index)))
            .collect();
        for (index, &key) in keys.iter().enumerate() {
            table.set(key, make_number_value(index as f64));
        }

        assert!(table.delete(keys[3]));
        assert!(!table.delete(keys[3]));
        assert_eq!(table.get(keys[3]), None);

        // Every other key must still be reachable through its probe chain.
        for (index, &key) in keys.iter().enumerate() {
            if index == 3 {
                continue;
            }
            assert_eq!(table.get(key), Some(make_number_value(index as f64)));
        }
        assert_eq!(table.len(), 15);
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let first = alloc_key(&mut manager, "first");

        table.set(first, make_number_value(1.0));
        table.delete(first);
        assert!(table.set(first, make_number_value(2.0)));
        assert_eq!(table.get(first), Some(make_number_value(2.0)));
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..100)
            .map(|index| alloc_key(&mut manager, &format!("entry-{}", index)))
            .collect();
        for (index, &key) in keys.iter().enumerate() {
            table.set(key, make_number_value(index as f64));
        }

        assert_eq!(table.len(), 100);
        for (index, &key) in keys.iter().enumerate() {
            assert_eq!(table.get(key), Some(make_number_value(index as f64)));
        }
    }

    #[test]
    fn test_find_string_matches_by_content() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let key = alloc_key(&mut manager, "needle");
        table.set(key, make_nil_value());

        let hash = ObjectString::hash_bytes("needle");
        assert_eq!(table.find_string("needle", hash), Some(key));
        assert_eq!(
            table.find_string("other", ObjectString::hash_bytes("other")),
            None
        );
    }

    #[test]
    fn test_iter_skips_dead_slots() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let kept = alloc_key(&mut manager, "kept");
        let dropped = alloc_key(&mut manager, "dropped");

        table.set(kept, make_number_value(1.0));
        table.set(dropped, make_number_value(2.0));
        table.delete(dropped);

        let live: Vec<_> = table.iter().collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, kept);
    }
}
