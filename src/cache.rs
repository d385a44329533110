use crate::id_generator::Generator;
use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub flags: String,
    /// 0 or an absolute unix time.
    pub exptime: i64,
    pub cas: u64,
    pub data: Bytes,
}

impl Item {
    fn is_expired(&self, now: i64) -> bool {
        self.exptime != 0 && self.exptime <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Stored,
    Exists,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Updated(u64),
    NotFound,
    NotNumeric,
}

/// In-memory item store. Expired items are dropped lazily when touched.
#[derive(Debug, Clone)]
pub struct Cache {
    cas: Arc<Generator>,
    items: Arc<DashMap<String, Item>>,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            cas: Arc::new(Generator::new()),
            items: Arc::new(DashMap::with_capacity(1000)),
        }
    }

    fn item(&self, flags: &str, exptime: i64, data: Bytes) -> Item {
        Item {
            flags: flags.to_string(),
            exptime,
            cas: self.cas.gen(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, key: &str, now: i64) -> Option<Item> {
        let item = self.items.get(key)?.value().clone();
        if item.is_expired(now) {
            self.items.remove_if(key, |_, item| item.is_expired(now));
            return None;
        }
        Some(item)
    }

    pub fn set(&self, key: &str, flags: &str, exptime: i64, data: Bytes) {
        let item = self.item(flags, exptime, data);
        self.items.insert(key.to_string(), item);
    }

    /// Stores only if the key holds no live item.
    pub fn add(&self, key: &str, flags: &str, exptime: i64, data: Bytes, now: i64) -> bool {
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired(now) {
                    return false;
                }
                entry.insert(self.item(flags, exptime, data));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.item(flags, exptime, data));
                true
            }
        }
    }

    /// Stores only if the key holds a live item.
    pub fn replace(&self, key: &str, flags: &str, exptime: i64, data: Bytes, now: i64) -> bool {
        self.update(key, now, |cache, item| *item = cache.item(flags, exptime, data))
            .is_some()
    }

    /// Adds `data` after the existing value, keeping its flags and exptime.
    pub fn append(&self, key: &str, data: &[u8], now: i64) -> bool {
        self.update(key, now, |cache, item| {
            let mut joined = BytesMut::with_capacity(item.data.len() + data.len());
            joined.extend_from_slice(&item.data);
            joined.extend_from_slice(data);
            item.data = joined.freeze();
            item.cas = cache.cas.gen();
        })
        .is_some()
    }

    /// Adds `data` before the existing value, keeping its flags and exptime.
    pub fn prepend(&self, key: &str, data: &[u8], now: i64) -> bool {
        self.update(key, now, |cache, item| {
            let mut joined = BytesMut::with_capacity(item.data.len() + data.len());
            joined.extend_from_slice(data);
            joined.extend_from_slice(&item.data);
            item.data = joined.freeze();
            item.cas = cache.cas.gen();
        })
        .is_some()
    }

    pub fn cas(&self, key: &str, flags: &str, exptime: i64, data: Bytes, unique: u64, now: i64) -> CasOutcome {
        let outcome = self.update(key, now, |cache, item| {
            if item.cas != unique {
                return CasOutcome::Exists;
            }
            *item = cache.item(flags, exptime, data);
            CasOutcome::Stored
        });
        outcome.unwrap_or(CasOutcome::NotFound)
    }

    pub fn delete(&self, key: &str, now: i64) -> bool {
        match self.items.remove(key) {
            Some((_, item)) => !item.is_expired(now),
            None => false,
        }
    }

    /// Adds (`incr`) or subtracts `delta`. Increments wrap at 2^64,
    /// decrements stop at 0.
    pub fn incr_decr(&self, key: &str, delta: u64, incr: bool, now: i64) -> Delta {
        let outcome = self.update(key, now, |cache, item| {
            let current = match std::str::from_utf8(&item.data).ok().and_then(|s| s.trim().parse::<u64>().ok()) {
                Some(current) => current,
                None => return Delta::NotNumeric,
            };
            let value = if incr {
                current.wrapping_add(delta)
            } else {
                current.saturating_sub(delta)
            };
            item.data = Bytes::from(value.to_string());
            item.cas = cache.cas.gen();
            Delta::Updated(value)
        });
        outcome.unwrap_or(Delta::NotFound)
    }

    pub fn touch(&self, key: &str, exptime: i64, now: i64) -> bool {
        self.update(key, now, |_, item| item.exptime = exptime).is_some()
    }

    /// Invalidates every item now, or at `deadline` when it lies in the future.
    pub fn flush_all(&self, deadline: i64, now: i64) {
        if deadline <= now {
            self.items.clear();
            return;
        }
        for mut item in self.items.iter_mut() {
            if item.exptime == 0 || item.exptime > deadline {
                item.exptime = deadline;
            }
        }
    }

    /// Runs `f` on the live item under `key`. Returns `None` if there is none.
    fn update<T>(&self, key: &str, now: i64, f: impl FnOnce(&Cache, &mut Item) -> T) -> Option<T> {
        {
            let mut item = self.items.get_mut(key)?;
            if !item.is_expired(now) {
                return Some(f(self, &mut item));
            }
        }
        self.items.remove_if(key, |_, item| item.is_expired(now));
        None
    }
}
