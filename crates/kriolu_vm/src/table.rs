use crate::object::{Gc, ObjString};
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

/// Hash FNV-1a a 32 bit, precalcolato per ogni stringa internata.
pub fn hash_string(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in s.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Slot della tabella. Vuoto: `(None, Nil)`. Tombstone: `(None, true)`.
#[derive(Clone, Copy)]
struct Entry {
    key: Option<Gc<ObjString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: None, value: Value::Nil }
    }

    fn tombstone() -> Self {
        Entry { key: None, value: Value::Boolean(true) }
    }

    fn is_empty(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Nil)
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Boolean(true))
    }
}

/// Tabella hash a indirizzamento aperto con probing lineare. È sia la
/// tabella di internamento delle stringhe sia l'ambiente globale.
pub struct Table {
    entries: Vec<Entry>,
    /// Slot occupati, tombstone inclusi.
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn get(&self, key: Gc<ObjString>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[self.find_slot(key)];
        entry.key.map(|_| entry.value)
    }

    /// Inserisce o sovrascrive. Restituisce `true` se la chiave è nuova.
    pub fn set(&mut self, key: Gc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = if self.entries.len() < 8 { 8 } else { self.entries.len() * 2 };
            self.adjust_capacity(capacity);
        }

        let slot = self.find_slot(key);
        let entry = &mut self.entries[slot];
        let is_new_key = entry.key.is_none();
        // Riusare un tombstone non aumenta il conteggio degli slot occupati.
        if entry.is_empty() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    /// Cancella scrivendo un tombstone, così le sequenze di probing che
    /// passavano di qui restano intatte.
    pub fn delete(&mut self, key: Gc<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }
        let slot = self.find_slot(key);
        if self.entries[slot].key.is_none() {
            return false;
        }
        self.entries[slot] = Entry::tombstone();
        true
    }

    /// Ricerca grezza per (byte, hash): usata dall'internamento, prima che
    /// esista l'oggetto stringa canonico.
    pub fn find_string(&self, s: &str, hash: u32) -> Option<Gc<ObjString>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            if entry.is_empty() {
                return None;
            }
            if let Some(key) = entry.key {
                if key.chars.len() == s.len() && key.hash == hash && &*key.chars == s {
                    return Some(key);
                }
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Gc<ObjString>, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Passata debole dell'interner: le chiavi non marcate dal GC stanno
    /// per essere liberate, vanno rimosse prima dello sweep.
    pub(crate) fn remove_unmarked(&mut self) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !key.header.marked.get() {
                    *entry = Entry::tombstone();
                }
            }
        }
    }

    /// Probing lineare: restituisce lo slot della chiave, oppure il primo
    /// tombstone incontrato (candidato per la scrittura), oppure lo slot
    /// vuoto che termina la sequenza.
    fn find_slot(&self, key: Gc<ObjString>) -> usize {
        let capacity = self.entries.len();
        let mut index = key.hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            if entry.is_empty() {
                return tombstone.unwrap_or(index);
            }
            if entry.is_tombstone() {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if entry.key == Some(key) {
                return index;
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::empty(); capacity]);
        // I tombstone non vengono ricopiati: il conteggio riparte dalle
        // sole chiavi vive.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let slot = self.find_slot(key);
                self.entries[slot] = entry;
                self.count += 1;
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn test_set_get_roundtrip() {
        let mut heap = Heap::new();
        let key = heap.intern("altura");
        let mut table = Table::new();
        assert!(table.set(key, Value::Number(1.0)));
        assert!(!table.set(key, Value::Number(2.0)));
        assert_eq!(table.get(key), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_delete_leaves_probe_chain_usable() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..32).map(|i| heap.intern(&format!("k{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(*k, Value::Number(i as f64));
        }
        assert!(table.delete(keys[7]));
        assert!(!table.delete(keys[7]));
        assert_eq!(table.get(keys[7]), None);
        for (i, k) in keys.iter().enumerate() {
            if i != 7 {
                assert_eq!(table.get(*k), Some(Value::Number(i as f64)));
            }
        }
    }

    #[test]
    fn test_tombstone_slot_reused_on_insert() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let a = heap.intern("a");
        table.set(a, Value::Nil);
        table.delete(a);
        assert!(table.set(a, Value::Boolean(false)));
        assert_eq!(table.get(a), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_find_string_hits_canonical_key() {
        let mut heap = Heap::new();
        let key = heap.intern("saluda");
        let mut table = Table::new();
        table.set(key, Value::Nil);
        let found = table.find_string("saluda", hash_string("saluda")).unwrap();
        assert!(Gc::ptr_eq(found, key));
        assert!(table.find_string("salud", hash_string("salud")).is_none());
    }
}
