// Lua table
// Array part for keys 1..n plus an insertion-ordered hash part.
// Removing a hash entry leaves a tombstone so `next` stays valid while a
// traversal clears fields; tombstones are compacted only when a new key is
// inserted.

use ahash::AHashMap;

use super::{LuaTableRef, LuaValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableKeyError {
    #[error("table index is nil")]
    NilIndex,
    #[error("table index is NaN")]
    NaNIndex,
}

#[derive(Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    nodes: Vec<(LuaValue, LuaValue)>,
    index: AHashMap<LuaValue, usize>,
    /// Number of tombstoned entries in `nodes`
    dead: usize,
    metatable: Option<LuaTableRef>,
}

/// Key as an array position (1-based), when it is a positive integral number.
#[inline]
fn array_key(key: &LuaValue) -> Option<usize> {
    if let LuaValue::Number(n) = key {
        let i = *n as i64;
        if i >= 1 && i as f64 == *n {
            return Some(i as usize);
        }
    }
    None
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(narray),
            nodes: Vec::with_capacity(nhash),
            index: AHashMap::with_capacity(nhash),
            dead: 0,
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<LuaTableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, metatable: Option<LuaTableRef>) {
        self.metatable = metatable;
    }

    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = array_key(key)
            && i <= self.array.len()
        {
            return self.array[i - 1].clone();
        }
        match self.index.get(key) {
            Some(&slot) => self.nodes[slot].1.clone(),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_geti(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as usize) <= self.array.len() {
            return self.array[i as usize - 1].clone();
        }
        self.raw_get(&LuaValue::Number(i as f64))
    }

    /// Field lookup by name, as used for metatable events.
    pub fn raw_get_str(&self, name: &str) -> LuaValue {
        self.raw_get(&LuaValue::from(name))
    }

    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableKeyError> {
        match &key {
            LuaValue::Nil => return Err(TableKeyError::NilIndex),
            LuaValue::Number(n) if n.is_nan() => return Err(TableKeyError::NaNIndex),
            _ => {}
        }

        if let Some(i) = array_key(&key) {
            let len = self.array.len();
            if i <= len {
                self.array[i - 1] = value;
                return Ok(());
            }
            if i == len + 1 {
                self.kill(&key);
                if !value.is_nil() {
                    self.array.push(value);
                    self.migrate_to_array();
                }
                return Ok(());
            }
        }

        if let Some(&slot) = self.index.get(&key) {
            let entry = &mut self.nodes[slot].1;
            match (entry.is_nil(), value.is_nil()) {
                (false, true) => self.dead += 1,
                (true, false) => self.dead -= 1,
                _ => {}
            }
            *entry = value;
        } else if !value.is_nil() {
            if self.dead > 0 && self.dead * 2 >= self.nodes.len() {
                self.compact();
            }
            self.index.insert(key.clone(), self.nodes.len());
            self.nodes.push((key, value));
        }
        Ok(())
    }

    pub fn raw_seti(&mut self, i: i64, value: LuaValue) {
        // integral keys are never nil or NaN
        let _ = self.raw_set(LuaValue::Number(i as f64), value);
    }

    /// Tombstone a hash entry if present.
    fn kill(&mut self, key: &LuaValue) {
        if let Some(&slot) = self.index.get(key) {
            let entry = &mut self.nodes[slot].1;
            if !entry.is_nil() {
                *entry = LuaValue::Nil;
                self.dead += 1;
            }
        }
    }

    /// Move keys n+1, n+2, ... out of the hash part after the array grew.
    fn migrate_to_array(&mut self) {
        loop {
            let key = LuaValue::Number((self.array.len() + 1) as f64);
            let Some(&slot) = self.index.get(&key) else {
                break;
            };
            let value = std::mem::take(&mut self.nodes[slot].1);
            if value.is_nil() {
                break;
            }
            self.dead += 1;
            self.array.push(value);
        }
    }

    fn compact(&mut self) {
        self.nodes.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (slot, (k, _)) in self.nodes.iter().enumerate() {
            self.index.insert(k.clone(), slot);
        }
        self.dead = 0;
    }

    /// Length operator: a border of the table (`t[n] ~= nil` and `t[n+1] == nil`).
    pub fn len(&self) -> usize {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // binary search for a border inside the array part
            let (mut i, mut j) = (0usize, n);
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.nodes.len() == self.dead {
            return n;
        }
        let mut j = n;
        while !self.raw_geti(j as i64 + 1).is_nil() {
            j += 1;
        }
        j
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(LuaValue::is_nil) && self.nodes.len() == self.dead
    }

    /// Traversal step: the entry after `key` (`nil` starts the traversal).
    ///
    /// Returns `Err(())` when `key` is not present in the table.
    #[allow(clippy::result_unit_err)]
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let (array_start, node_start) = match key {
            LuaValue::Nil => (0, 0),
            k => match array_key(k) {
                Some(i) if i <= self.array.len() => (i, 0),
                _ => match self.index.get(k) {
                    Some(&slot) => (self.array.len(), slot + 1),
                    None => return Err(()),
                },
            },
        };

        for (i, v) in self.array.iter().enumerate().skip(array_start) {
            if !v.is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), v.clone())));
            }
        }
        for (k, v) in self.nodes.iter().skip(node_start) {
            if !v.is_nil() {
                return Ok(Some((k.clone(), v.clone())));
            }
        }
        Ok(None)
    }

    /// All live entries, array part first.
    pub fn iter(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (LuaValue::Number((i + 1) as f64), v.clone()));
        let nodes = self
            .nodes
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.clone(), v.clone()));
        array.chain(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> LuaValue {
        LuaValue::Number(n)
    }

    #[test]
    fn array_and_hash_parts() {
        let mut t = LuaTable::new();
        for i in 1..=5 {
            t.raw_seti(i, num(i as f64 * 10.0));
        }
        t.raw_set(LuaValue::from("x"), num(1.0)).unwrap();
        assert_eq!(t.len(), 5);
        assert_eq!(t.raw_geti(3), num(30.0));
        assert_eq!(t.raw_get_str("x"), num(1.0));
        assert_eq!(t.raw_get(&num(6.0)), LuaValue::Nil);
    }

    #[test]
    fn out_of_order_integer_keys_migrate() {
        let mut t = LuaTable::new();
        t.raw_seti(3, num(3.0));
        t.raw_seti(2, num(2.0));
        assert_eq!(t.len(), 0);
        t.raw_seti(1, num(1.0));
        assert_eq!(t.len(), 3);
        assert_eq!(t.raw_geti(3), num(3.0));
    }

    #[test]
    fn rejects_nil_and_nan_keys() {
        let mut t = LuaTable::new();
        assert_eq!(t.raw_set(LuaValue::Nil, num(1.0)), Err(TableKeyError::NilIndex));
        assert_eq!(t.raw_set(num(f64::NAN), num(1.0)), Err(TableKeyError::NaNIndex));
    }

    #[test]
    fn negative_zero_is_zero() {
        let mut t = LuaTable::new();
        t.raw_set(num(0.0), LuaValue::from("zero")).unwrap();
        assert_eq!(t.raw_get(&num(-0.0)), LuaValue::from("zero"));
    }

    #[test]
    fn next_survives_clearing_during_traversal() {
        let mut t = LuaTable::new();
        for name in ["a", "b", "c", "d"] {
            t.raw_set(LuaValue::from(name), LuaValue::from(true)).unwrap();
        }
        let mut seen = 0;
        let mut key = LuaValue::Nil;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.raw_set(k.clone(), LuaValue::Nil).unwrap();
            key = k;
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(t.is_empty());
        assert!(t.next(&LuaValue::from("zzz")).is_err());
    }

    #[test]
    fn border_with_holes() {
        let mut t = LuaTable::new();
        for i in 1..=4 {
            t.raw_seti(i, num(1.0));
        }
        t.raw_seti(4, LuaValue::Nil);
        assert_eq!(t.len(), 3);
    }
}
