use std::mem::size_of;

use crate::memory::grow_capacity;
use crate::objects::object_string::ObjectString;
use crate::value::{is_nil, make_bool_value, Value};

const TABLE_MAX_LOAD: f64 = 0.75;

/// Open-addressing table keyed by interned strings, so keys compare by
/// pointer identity. A deleted slot leaves a tombstone (null key, `true`
/// value) that probing treats as occupied but insertion may reuse.
#[derive(Clone, Copy)]
pub struct Entry {
    key: *mut ObjectString,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: std::ptr::null_mut(),
            value: Value::new(),
        }
    }
}

pub struct Table {
    // Includes tombstones; recomputed without them on growth.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Live entries only, tombstones excluded.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.key.is_null()).count()
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_entry(&self.entries, key)];
        if entry.key.is_null() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Returns true when `key` was not present before.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = grow_capacity!(self.entries.len());
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_null();
        // A reused tombstone was already counted.
        if is_new_key && is_nil(&entry.value) {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = make_bool_value(true);
        true
    }

    /// Locate a string by content before one exists as an object; this is
    /// what makes interning possible.
    pub fn find_string(&self, content: &str, hash: u32) -> *mut ObjectString {
        if self.count == 0 {
            return std::ptr::null_mut();
        }
        let capacity = self.entries.len();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                // A truly empty slot ends the probe; a tombstone does not.
                if is_nil(&entry.value) {
                    return std::ptr::null_mut();
                }
            } else {
                let key = unsafe { &*entry.key };
                if key.hash == hash && key.content == content {
                    return entry.key;
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Weak-key discipline for the intern table: drop entries whose key did
    /// not survive the mark phase, before sweep frees them.
    pub fn remove_white(&mut self) {
        for index in 0..self.entries.len() {
            let key = self.entries[index].key;
            if !key.is_null() && unsafe { !(*key).object.is_marked } {
                self.entries[index].key = std::ptr::null_mut();
                self.entries[index].value = make_bool_value(true);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, &Value)> {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| (entry.key, &entry.value))
    }

    pub fn deep_size(&self) -> usize {
        size_of::<Table>() + self.entries.capacity() * size_of::<Entry>()
    }

    fn find_entry(entries: &[Entry], key: *mut ObjectString) -> usize {
        // Capacities are powers of two, so masking replaces the modulo.
        let capacity = entries.len();
        let mut index = unsafe { (*key).hash } as usize & (capacity - 1);
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

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::empty(); capacity];
        self.count = 0;
        for entry in &self.entries {
            if entry.key.is_null() {
                continue;
            }
            let index = Self::find_entry(&entries, entry.key);
            entries[index] = *entry;
            self.count += 1;
        }
        self.entries = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_string::hash_string;
    use crate::value::{as_number, make_nil_value, make_number_value};

    fn new_string(content: &str) -> *mut ObjectString {
        Box::into_raw(ObjectString::new(content, hash_string(content.as_bytes())))
    }

    fn free_string(string: *mut ObjectString) {
        unsafe {
            drop(Box::from_raw(string));
        }
    }

    #[test]
    fn test_set_get_and_overwrite() {
        let mut table = Table::new();
        let key = new_string("answer");

        assert!(table.set(key, make_number_value(1.0)));
        assert!(!table.set(key, make_number_value(42.0)));
        let value = table.get(key).expect("key should be present");
        assert_eq!(as_number(&value), 42.0);
        assert_eq!(table.len(), 1);

        free_string(key);
    }

    #[test]
    fn test_missing_key_and_delete() {
        let mut table = Table::new();
        let present = new_string("present");
        let absent = new_string("absent");

        table.set(present, make_number_value(1.0));
        assert!(table.get(absent).is_none());
        assert!(!table.delete(absent));

        assert!(table.delete(present));
        assert!(table.get(present).is_none());
        assert_eq!(table.len(), 0);

        free_string(present);
        free_string(absent);
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut table = Table::new();
        let key = new_string("recycled");

        table.set(key, make_number_value(1.0));
        let count_before = table.count;
        table.delete(key);
        table.set(key, make_number_value(2.0));

        // Reinsertion lands in the tombstone without growing the count.
        assert_eq!(table.count, count_before);
        assert_eq!(as_number(&table.get(key).unwrap()), 2.0);

        free_string(key);
    }

    #[test]
    fn test_growth_keeps_all_entries() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..32).map(|i| new_string(&format!("key{}", i))).collect();

        for (i, key) in keys.iter().enumerate() {
            table.set(*key, make_number_value(i as f64));
        }
        assert!(table.capacity() >= 32);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(as_number(&table.get(*key).unwrap()), i as f64);
        }
        assert_eq!(table.len(), 32);

        for key in keys {
            free_string(key);
        }
    }

    #[test]
    fn test_find_string_compares_bytes() {
        let mut table = Table::new();
        let key = new_string("interned");
        table.set(key, make_nil_value());

        let hash = hash_string(b"interned");
        assert_eq!(table.find_string("interned", hash), key);
        assert!(table
            .find_string("missing", hash_string(b"missing"))
            .is_null());

        free_string(key);
    }

    #[test]
    fn test_find_string_on_empty_table() {
        let table = Table::new();
        assert!(table.find_string("anything", hash_string(b"anything")).is_null());
    }
}
