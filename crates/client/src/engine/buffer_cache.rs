use std::collections::HashMap;

use mdroom_common::types::RoomId;
use tracing::{debug, warn};

use crate::engine::buffer::BufferHandle;
use crate::resource::Disposable;

pub const DEFAULT_CACHE_CAPACITY: usize = 50;

struct CacheEntry {
    buffer: BufferHandle,
    lru_tick: u64,
}

/// Bounded RoomId -> buffer map with strict least-recently-used eviction.
///
/// Every `get` or `touch` moves the room to the most-recently-used end.
/// Evicted buffers are disposed before they leave the map.
pub struct BufferCache {
    entries: HashMap<RoomId, CacheEntry>,
    capacity: usize,
    default_content: String,
    next_lru_tick: u64,
}

impl BufferCache {
    /// A capacity of 0 is raised to 1 so the active room always fits.
    pub fn new(capacity: usize, default_content: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            default_content: default_content.into(),
            next_lru_tick: 1,
        }
    }

    /// Return the buffer for `room`, creating it with the default content
    /// when absent, and mark it most-recently-used.
    pub fn get(&mut self, room: &RoomId) -> BufferHandle {
        let lru_tick = self.bump_lru_tick();
        let buffer = match self.entries.get_mut(room) {
            Some(entry) => {
                entry.lru_tick = lru_tick;
                entry.buffer.clone()
            }
            None => {
                debug!(room = %room, "creating editor buffer");
                let buffer = BufferHandle::new(room.clone(), self.default_content.clone());
                self.entries.insert(room.clone(), CacheEntry { buffer: buffer.clone(), lru_tick });
                buffer
            }
        };
        self.evict_excess();
        buffer
    }

    /// Mark `room` most-recently-used without creating it.
    pub fn touch(&mut self, room: &RoomId) -> bool {
        if !self.entries.contains_key(room) {
            return false;
        }
        let lru_tick = self.bump_lru_tick();
        if let Some(entry) = self.entries.get_mut(room) {
            entry.lru_tick = lru_tick;
        }
        true
    }

    /// Evict least-recently-used rooms until the cache is within capacity.
    /// Returns the evicted room ids, oldest first.
    pub fn evict_excess(&mut self) -> Vec<RoomId> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.lru_tick)
                .map(|(room, _)| room.clone());
            let Some(room) = oldest else {
                break;
            };
            if let Some(mut entry) = self.entries.remove(&room) {
                match entry.buffer.dispose() {
                    Ok(()) => debug!(room = %room, "evicted editor buffer"),
                    Err(error) => warn!(room = %room, %error, "failed to dispose evicted buffer"),
                }
            }
            evicted.push(room);
        }
        evicted
    }

    pub fn contains(&self, room: &RoomId) -> bool {
        self.entries.contains_key(room)
    }

    pub fn peek(&self, room: &RoomId) -> Option<&BufferHandle> {
        self.entries.get(room).map(|entry| &entry.buffer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached rooms ordered from least to most recently used.
    pub fn cached_rooms(&self) -> Vec<RoomId> {
        let mut rooms =
            self.entries.iter().map(|(room, entry)| (room.clone(), entry.lru_tick)).collect::<Vec<_>>();
        rooms.sort_by_key(|(_, tick)| *tick);
        rooms.into_iter().map(|(room, _)| room).collect()
    }

    /// Dispose and drop every cached buffer.
    pub fn dispose_all(&mut self) {
        for (room, mut entry) in self.entries.drain() {
            if let Err(error) = entry.buffer.dispose() {
                warn!(room = %room, %error, "failed to dispose cached buffer");
            }
        }
    }

    fn bump_lru_tick(&mut self) -> u64 {
        let tick = self.next_lru_tick;
        self.next_lru_tick = self.next_lru_tick.saturating_add(1);
        tick
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn room(id: &str) -> RoomId {
        id.parse().expect("room id should parse")
    }

    #[test]
    fn get_creates_with_default_content_and_reuses_handle() {
        let mut cache = BufferCache::new(4, "# New document\n");
        let first = cache.get(&room("r1"));
        let second = cache.get(&room("r1"));

        assert!(first.ptr_eq(&second));
        assert_eq!(first.content(), "# New document\n");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn third_room_evicts_least_recently_used_with_capacity_two() {
        let mut cache = BufferCache::new(2, "");
        let r1 = cache.get(&room("r1"));
        cache.get(&room("r2"));
        cache.get(&room("r3"));

        assert_eq!(cache.cached_rooms(), vec![room("r2"), room("r3")]);
        assert!(!cache.contains(&room("r1")));
        assert!(r1.is_disposed());
    }

    #[test]
    fn touch_protects_room_from_eviction() {
        let mut cache = BufferCache::new(2, "");
        cache.get(&room("r1"));
        cache.get(&room("r2"));
        assert!(cache.touch(&room("r1")));
        assert!(!cache.touch(&room("missing")));

        cache.get(&room("r3"));
        assert_eq!(cache.cached_rooms(), vec![room("r1"), room("r3")]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut cache = BufferCache::new(0, "");
        assert_eq!(cache.capacity(), 1);
        let current = cache.get(&room("a"));
        assert!(!current.is_disposed());
        cache.get(&room("b"));
        assert!(current.is_disposed());
        assert_eq!(cache.cached_rooms(), vec![room("b")]);
    }

    #[test]
    fn dispose_all_empties_cache() {
        let mut cache = BufferCache::new(3, "");
        let a = cache.get(&room("a"));
        let b = cache.get(&room("b"));
        cache.dispose_all();
        assert!(cache.is_empty());
        assert!(a.is_disposed() && b.is_disposed());
    }

    proptest! {
        #[test]
        fn cache_never_exceeds_capacity(
            capacity in 1usize..6,
            accesses in proptest::collection::vec(0u8..12, 1..64),
        ) {
            let mut cache = BufferCache::new(capacity, "");
            for id in accesses {
                let room = room(&format!("r{id}"));
                let buffer = cache.get(&room);
                prop_assert!(cache.len() <= capacity);
                prop_assert!(!buffer.is_disposed());
                let rooms = cache.cached_rooms();
                prop_assert_eq!(rooms.last(), Some(&room));
            }
        }
    }
}
