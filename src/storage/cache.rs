use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::{DbError, DbResult};

/// The state of a cache page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// The page has no identity and holds no data.
    Detached,
    /// The page holds clean data of some file page.
    Attached,
    /// The page holds modified data not yet saved.
    Dirty,
}

/// The saver callback: writes one full page back to the owner's storage.
/// The buffer is mutable so the owner can stamp service bytes on the way
/// out.
pub type PageSaver<'a> = &'a mut dyn FnMut(u32, &mut [u8]) -> DbResult;

const NONE: usize = usize::MAX;

struct PageSlot {
    index: u32,
    state: PageState,
    prev: usize,
    next: usize,
    buf: Vec<u8>,
}

/// A bounded pool of fixed-size pages ordered by recency of use.
///
/// Attached pages live in the hash index and in the recency list at the
/// same time; dirty pages additionally live in the dirty index. Eviction is
/// strict LRU: a dirty victim is saved through the saver first, never
/// skipped.
pub struct PageCache {
    page_size: usize,
    capacity: usize,
    slots: Vec<PageSlot>,
    head: usize,
    tail: usize,
    pages: HashMap<u32, usize>,
    dirty: HashSet<u32>,
}

impl PageCache {
    pub fn new(page_size: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "cache needs at least one page");
        PageCache {
            page_size,
            capacity,
            slots: Vec::new(),
            head: NONE,
            tail: NONE,
            pages: HashMap::with_capacity(capacity),
            dirty: HashSet::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The count of attached (clean or dirty) pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Probe the state of a page without promoting it.
    pub fn page_state(&self, index: u32) -> PageState {
        match self.pages.get(&index) {
            Some(&slot) => self.slots[slot].state,
            None => PageState::Detached,
        }
    }

    /// Get the buffer of a page.
    ///
    /// A present page is promoted to the head of the recency list and
    /// returned as is. A missing page takes over the least recently used
    /// slot (saving it first when dirty), comes back zero-filled in the
    /// `Attached` state, and `true` in the result marks that the caller has
    /// to load its content.
    pub fn get_page(&mut self, index: u32, saver: PageSaver) -> DbResult<(&mut [u8], bool)> {
        if let Some(&slot) = self.pages.get(&index) {
            self.promote(slot);
            return Ok((self.slots[slot].buf.as_mut_slice(), false));
        }

        let slot = self.grab_slot(saver)?;
        self.slots[slot].index = index;
        self.slots[slot].state = PageState::Attached;
        for b in self.slots[slot].buf.iter_mut() {
            *b = 0;
        }
        self.pages.insert(index, slot);
        self.push_front(slot);
        Ok((self.slots[slot].buf.as_mut_slice(), true))
    }

    /// Move an attached page to the dirty state.
    pub fn dirty(&mut self, index: u32) -> DbResult {
        let slot = match self.pages.get(&index) {
            Some(&slot) => slot,
            None => {
                return Err(DbError::bug(&format!(
                    "dirty of a detached page: {}",
                    index
                )));
            }
        };
        self.slots[slot].state = PageState::Dirty;
        self.dirty.insert(index);
        self.promote(slot);
        Ok(())
    }

    /// Save all dirty pages and downgrade them to attached.
    pub fn clean(&mut self, saver: PageSaver) -> DbResult {
        let mut indexes: Vec<u32> = self.dirty.iter().cloned().collect();
        indexes.sort_unstable();
        for index in indexes {
            let slot = self.pages[&index];
            saver(index, &mut self.slots[slot].buf)?;
            self.slots[slot].state = PageState::Attached;
            self.dirty.remove(&index);
        }
        Ok(())
    }

    /// Save all dirty pages, then detach everything and reset the recency
    /// list.
    pub fn free(&mut self, saver: PageSaver) -> DbResult {
        self.clean(saver)?;
        self.reset();
        Ok(())
    }

    /// Detach all pages without saving anything.
    pub fn reset(&mut self) {
        debug!("cache reset, dropped {} pages", self.pages.len());
        for slot in self.slots.iter_mut() {
            slot.state = PageState::Detached;
            slot.prev = NONE;
            slot.next = NONE;
        }
        self.slots.clear();
        self.pages.clear();
        self.dirty.clear();
        self.head = NONE;
        self.tail = NONE;
    }

    /// Detach a single page without saving it.
    pub fn free_page(&mut self, index: u32) {
        if let Some(slot) = self.pages.remove(&index) {
            self.dirty.remove(&index);
            self.unlink(slot);
            self.slots[slot].state = PageState::Detached;
            // the slot stays allocated; reuse it before growing the pool
            self.slots[slot].prev = NONE;
            self.slots[slot].next = NONE;
        }
    }

    /// Indexes of the dirty pages in ascending order.
    pub fn dirty_indexes(&self) -> Vec<u32> {
        let mut indexes: Vec<u32> = self.dirty.iter().cloned().collect();
        indexes.sort_unstable();
        indexes
    }

    /// Find a slot for a new page: reuse a detached one, grow the pool up
    /// to capacity, or evict the least recently used page.
    fn grab_slot(&mut self, saver: PageSaver) -> DbResult<usize> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.state == PageState::Detached {
                return Ok(i);
            }
        }
        if self.slots.len() < self.capacity {
            self.slots.push(PageSlot {
                index: 0,
                state: PageState::Detached,
                prev: NONE,
                next: NONE,
                buf: vec![0u8; self.page_size],
            });
            return Ok(self.slots.len() - 1);
        }

        let victim = self.tail;
        debug_assert!(victim != NONE, "full cache with an empty recency list");
        let index = self.slots[victim].index;
        if self.slots[victim].state == PageState::Dirty {
            debug!("evicting dirty page {}", index);
            saver(index, &mut self.slots[victim].buf)?;
            self.dirty.remove(&index);
        }
        self.pages.remove(&index);
        self.unlink(victim);
        self.slots[victim].state = PageState::Detached;
        Ok(victim)
    }

    fn promote(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NONE;
        self.slots[slot].next = self.head;
        if self.head != NONE {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NONE {
            self.tail = slot;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let prev = self.slots[slot].prev;
        let next = self.slots[slot].next;
        if prev != NONE {
            self.slots[prev].next = next;
        } else if self.head == slot {
            self.head = next;
        }
        if next != NONE {
            self.slots[next].prev = prev;
        } else if self.tail == slot {
            self.tail = prev;
        }
        self.slots[slot].prev = NONE;
        self.slots[slot].next = NONE;
    }

    #[cfg(test)]
    fn check_lists(&self) {
        // every attached page is reachable from the index and the list
        let mut walked = 0;
        let mut slot = self.head;
        let mut last = NONE;
        while slot != NONE {
            assert_ne!(self.slots[slot].state, PageState::Detached);
            assert_eq!(self.pages[&self.slots[slot].index], slot);
            last = slot;
            slot = self.slots[slot].next;
            walked += 1;
        }
        assert_eq!(walked, self.pages.len());
        assert_eq!(last, self.tail);
        for index in self.dirty.iter() {
            let slot = self.pages[index];
            assert_eq!(self.slots[slot].state, PageState::Dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fill(cache: &mut PageCache, index: u32, value: u8, saved: &mut HashMap<u32, Vec<u8>>) {
        let mut saver = |idx: u32, data: &mut [u8]| {
            saved.insert(idx, data.to_vec());
            Ok(())
        };
        let (buf, _faulted) = cache.get_page(index, &mut saver).unwrap();
        for b in buf.iter_mut() {
            *b = value;
        }
        cache.dirty(index).unwrap();
    }

    #[test]
    fn test_fault_and_hit() {
        let mut cache = PageCache::new(64, 4);
        let mut saver = |_: u32, _: &mut [u8]| Ok(());

        assert_eq!(cache.page_state(7), PageState::Detached);
        let (buf, faulted) = cache.get_page(7, &mut saver).unwrap();
        assert!(faulted);
        assert!(buf.iter().all(|b| *b == 0));
        buf[0] = 0xaa;

        let (buf, faulted) = cache.get_page(7, &mut saver).unwrap();
        assert!(!faulted);
        assert_eq!(buf[0], 0xaa);
        assert_eq!(cache.page_state(7), PageState::Attached);
        cache.check_lists();
    }

    #[test]
    fn test_lru_eviction_saves_dirty() {
        // page size 1024, pool capacity 8, write pages 0..16: the cache
        // must keep the 8 most recent pages and save every evicted one
        let mut cache = PageCache::new(1024, 8);
        let mut saved: HashMap<u32, Vec<u8>> = HashMap::new();

        for i in 0..9u32 {
            fill(&mut cache, i, i as u8 + 1, &mut saved);
        }
        // writing page 8 evicted page 0 and saved it first
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[&0], vec![1u8; 1024]);
        assert_eq!(cache.page_state(0), PageState::Detached);

        for i in 9..16u32 {
            fill(&mut cache, i, i as u8 + 1, &mut saved);
        }
        // pages 8..16 stay resident, 0..8 were saved on eviction
        for i in 0..8u32 {
            assert_eq!(cache.page_state(i), PageState::Detached);
            assert_eq!(saved[&i], vec![i as u8 + 1; 1024]);
        }
        for i in 8..16u32 {
            assert_eq!(cache.page_state(i), PageState::Dirty);
        }
        cache.check_lists();
    }

    #[test]
    fn test_probe_does_not_promote() {
        let mut cache = PageCache::new(64, 2);
        let mut saved: HashMap<u32, Vec<u8>> = HashMap::new();
        fill(&mut cache, 1, 1, &mut saved);
        fill(&mut cache, 2, 2, &mut saved);

        // probing page 1 must not save it from eviction
        assert_eq!(cache.page_state(1), PageState::Dirty);
        fill(&mut cache, 3, 3, &mut saved);
        assert_eq!(cache.page_state(1), PageState::Detached);
        assert_eq!(saved[&1], vec![1u8; 64]);
    }

    #[test]
    fn test_clean_keeps_pages_attached() {
        let mut cache = PageCache::new(64, 4);
        let mut saved: HashMap<u32, Vec<u8>> = HashMap::new();
        fill(&mut cache, 4, 4, &mut saved);
        fill(&mut cache, 5, 5, &mut saved);

        let mut saver = |idx: u32, data: &mut [u8]| {
            saved.insert(idx, data.to_vec());
            Ok(())
        };
        cache.clean(&mut saver).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(cache.page_state(4), PageState::Attached);
        assert_eq!(cache.page_state(5), PageState::Attached);
        assert!(cache.dirty_indexes().is_empty());

        // a second clean saves nothing
        saved.clear();
        let mut saver = |idx: u32, data: &mut [u8]| {
            saved.insert(idx, data.to_vec());
            Ok(())
        };
        cache.clean(&mut saver).unwrap();
        assert!(saved.is_empty());
        cache.check_lists();
    }

    #[test]
    fn test_free_and_reset() {
        let mut cache = PageCache::new(64, 4);
        let mut saved: HashMap<u32, Vec<u8>> = HashMap::new();
        fill(&mut cache, 1, 1, &mut saved);
        fill(&mut cache, 2, 2, &mut saved);

        let mut saver = |idx: u32, data: &mut [u8]| {
            saved.insert(idx, data.to_vec());
            Ok(())
        };
        cache.free(&mut saver).unwrap();
        assert_eq!(saved.len(), 2);
        assert!(cache.is_empty());

        // reset discards without saving
        saved.clear();
        fill(&mut cache, 3, 3, &mut saved);
        cache.reset();
        assert!(saved.is_empty());
        assert_eq!(cache.page_state(3), PageState::Detached);
    }

    #[test]
    fn test_free_page_discards_one() {
        let mut cache = PageCache::new(64, 4);
        let mut saved: HashMap<u32, Vec<u8>> = HashMap::new();
        fill(&mut cache, 1, 1, &mut saved);
        fill(&mut cache, 2, 2, &mut saved);
        cache.free_page(1);
        assert_eq!(cache.page_state(1), PageState::Detached);
        assert_eq!(cache.page_state(2), PageState::Dirty);
        assert!(saved.is_empty());
        cache.check_lists();
    }
}
