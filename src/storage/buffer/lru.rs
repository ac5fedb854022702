use super::replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity LRU cache.
///
/// Entries live in a flat arena and the recency list is threaded through
/// them by index, most recently used at the head.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    entries: Vec<Option<Entry<K, V>>>,
    /// Arena slots released by `remove` and `evict`
    vacant: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            vacant: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.bump(idx);
        self.entries[idx].as_ref().map(|entry| &entry.value)
    }

    /// Returns the value without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.entries[idx].as_ref().map(|entry| &entry.value)
    }

    /// Inserts or updates `key` as the most recently used entry. Inserting a
    /// new key into a full cache evicts and returns the least recently used
    /// entry.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.entries[idx].as_mut() {
                entry.value = value;
            }
            self.bump(idx);
            return None;
        }

        if self.capacity == 0 {
            return Some((key, value));
        }
        let evicted = if self.len() >= self.capacity {
            self.evict()
        } else {
            None
        };

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.vacant.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);

        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.vacant.push(idx);
        self.entries[idx].take().map(|entry| entry.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn evict(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        self.vacant.push(idx);
        let entry = self.entries[idx].take()?;
        self.map.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(entry) = self.entries[idx].as_ref() else {
                break;
            };
            keys.push(entry.key.clone());
            cursor = entry.next;
        }
        keys
    }

    fn bump(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(entry) = self.entries[idx].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        match old_head.and_then(|h| self.entries[h].as_mut()) {
            Some(head) => head.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.entries[idx].as_mut() {
            Some(entry) => (entry.prev.take(), entry.next.take()),
            None => return,
        };

        match prev.and_then(|p| self.entries[p].as_mut()) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.entries[n].as_mut()) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }
}

#[derive(Debug)]
pub struct LruReplacer {
    /// Evictable frames; the least recently unpinned is evicted first
    frames: LruCache<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            frames: LruCache::new(max_size),
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        self.frames.evict().map(|(frame_id, _)| frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains(&frame_id) && self.frames.len() < self.frames.capacity() {
            self.frames.set(frame_id, ());
        }
    }

    fn size(&self) -> usize {
        self.frames.len()
    }
}
