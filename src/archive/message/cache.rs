//! 有界缓存，按插入顺序淘汰（FIFO，不是 LRU）

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 3000;

/// 满时一次淘汰的条数
pub const DEFAULT_EVICT_COUNT: usize = 500;

pub struct BoundedCache<K, V> {
    capacity: usize,
    evict_count: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize, evict_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            evict_count: evict_count.clamp(1, capacity),
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// 读取不会改变淘汰顺序
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return;
        }

        if self.entries.len() >= self.capacity {
            for _ in 0..self.evict_count {
                match self.order.pop_front() {
                    Some(old) => {
                        self.entries.remove(&old);
                    }
                    None => break,
                }
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V> Default for BoundedCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_EVICT_COUNT)
    }
}
