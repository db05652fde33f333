//! The data cache.
//!
//! Every instruction-level access to data memory goes through [`Cache`], a
//! write-back cache of whole blocks with LRU replacement:
//!
//! - A block is `block_size` consecutive words; an address's block index
//!   (its *tag*) is `addr / block_size` and its position within the block
//!   is `addr % block_size`.
//! - A missing block is filled from memory, evicting the least recently
//!   used entry if the cache is full. Eviction writes the block back to
//!   memory only if it was written to while resident (*dirty*).
//! - Recency is tracked with a monotonic serial number stamped on every
//!   access; the valid entry with the smallest stamp is the LRU victim.
//!   The serial is 64-bit, so wraparound is unreachable in practice.
//!
//! The dictionary is mirrored by a `tag -> entry` map so lookup stays O(1)
//! even for larger geometries; LRU selection remains a linear scan over
//! the (small) entry array.
//!
//! [`Cache::flush`] writes every resident dirty block back; the simulator
//! runs it on any termination so data memory reflects the program's final
//! state.

use std::collections::HashMap;

use super::mem::{DataMem, DATA_SPAN};
use super::SimErr;

/// One cache entry: the dictionary bits plus the block payload.
#[derive(Debug, Clone)]
struct CacheEntry {
    valid: bool,
    dirty: bool,
    /// The memory-block index currently held (meaningless while invalid).
    tag: u16,
    /// Serial number of the last access; smaller = older.
    ref_count: u64,
    words: Box<[u16]>,
}
impl CacheEntry {
    fn new(block_size: usize) -> Self {
        Self {
            valid: false,
            dirty: false,
            tag: 0,
            ref_count: 0,
            words: vec![u16::from_be_bytes([super::mem::MEM_FILLER; 2]); block_size].into_boxed_slice(),
        }
    }
}

/// Running hit/miss statistics of a [`Cache`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CacheStats {
    /// Lookups that found their tag resident.
    pub hits: u64,
    /// Total memory references (hits + misses).
    pub accesses: u64,
}
impl CacheStats {
    /// Lookups that had to fill their block from memory.
    pub fn misses(&self) -> u64 {
        self.accesses - self.hits
    }

    /// Fraction of accesses that hit, or 0.0 before any access.
    pub fn hit_rate(&self) -> f64 {
        match self.accesses {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}
impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cache hits and {} cache misses, for a hit rate of {:.3}",
            self.hits, self.misses(), self.hit_rate()
        )
    }
}

/// The data cache. See the [module docs](self) for the model.
#[derive(Debug, Clone)]
pub struct Cache {
    entries: Vec<CacheEntry>,
    /// Tags of the valid entries. Kept in sync with `entries`.
    tags: HashMap<u16, usize>,
    block_size: usize,
    hits: u64,
    /// The next serial to stamp (`current_ref_count`). Starts at 1, so
    /// total references = `next_ref - 1`.
    next_ref: u64,
}

impl Cache {
    /// Creates an empty cache with the given geometry.
    ///
    /// # Panics
    ///
    /// Panics if `blocks` or `block_size` is zero, or if `block_size` does
    /// not evenly divide the data area. Geometry is fixed at build time,
    /// so this only trips misconfigured builds.
    pub fn new(blocks: usize, block_size: usize) -> Self {
        assert!(blocks >= 1, "cache must have at least one block");
        assert!(block_size >= 1, "blocks must hold at least one word");
        assert!(
            DATA_SPAN % block_size == 0,
            "block size {block_size} does not evenly divide data memory"
        );

        Self {
            entries: (0..blocks).map(|_| CacheEntry::new(block_size)).collect(),
            tags: HashMap::new(),
            block_size,
            hits: 0,
            next_ref: 1,
        }
    }

    /// The number of words per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The current hit/miss statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits, accesses: self.next_ref - 1 }
    }

    /// Reads the word at `addr` through the cache.
    ///
    /// Errors with [`SimErr::IllegalAddress`] if the address is out of
    /// range; otherwise the access is counted (hit or miss) and the
    /// touched block becomes the most recently used.
    pub fn read(&mut self, addr: u16, data: &mut DataMem) -> Result<u16, SimErr> {
        let (tag, offset) = self.split_addr(addr)?;
        let id = self.ensure_resident(tag, data);
        let serial = self.stamp();

        let entry = &mut self.entries[id];
        entry.ref_count = serial;
        Ok(entry.words[offset])
    }

    /// Writes the word at `addr` through the cache.
    ///
    /// Same access rules as [`Cache::read`]; the touched block is marked
    /// dirty and only reaches memory on eviction or [`Cache::flush`].
    pub fn write(&mut self, addr: u16, word: u16, data: &mut DataMem) -> Result<(), SimErr> {
        let (tag, offset) = self.split_addr(addr)?;
        let id = self.ensure_resident(tag, data);
        let serial = self.stamp();

        let entry = &mut self.entries[id];
        entry.words[offset] = word;
        entry.dirty = true;
        entry.ref_count = serial;

        Ok(())
    }

    /// Writes every resident dirty block back to memory and empties the
    /// cache. Run on simulator termination.
    pub fn flush(&mut self, data: &mut DataMem) {
        for id in 0..self.entries.len() {
            self.write_back(id, data);
        }
    }

    /// Validates an address and splits it into (tag, offset).
    fn split_addr(&self, addr: u16) -> Result<(u16, usize), SimErr> {
        match usize::from(addr) < DATA_SPAN {
            true  => Ok((addr / self.block_size as u16, usize::from(addr) % self.block_size)),
            false => Err(SimErr::IllegalAddress),
        }
    }

    /// Issues the next access serial.
    fn stamp(&mut self) -> u64 {
        let serial = self.next_ref;
        self.next_ref += 1;
        serial
    }

    /// Returns the entry holding `tag`, filling it from memory on a miss.
    /// Hit counting happens here; the caller stamps the entry.
    fn ensure_resident(&mut self, tag: u16, data: &mut DataMem) -> usize {
        match self.lookup(tag) {
            Some(id) => {
                self.hits += 1;
                tracing::trace!(tag, "cache hit");
                id
            }
            None => {
                tracing::trace!(tag, "cache miss");
                self.fill(tag, data)
            }
        }
    }

    /// Looks up the entry currently holding `tag`.
    fn lookup(&self, tag: u16) -> Option<usize> {
        self.tags.get(&tag).copied()
    }

    /// Pulls the block `tag` from memory into a free entry, evicting the
    /// LRU entry if none is free. The entry starts clean and unstamped.
    fn fill(&mut self, tag: u16, data: &mut DataMem) -> usize {
        let id = match self.entries.iter().position(|e| !e.valid) {
            Some(id) => id,
            None => self.evict_lru(data),
        };

        let entry = &mut self.entries[id];
        entry.words.copy_from_slice(data.block(tag, self.block_size));
        entry.valid = true;
        entry.dirty = false;
        entry.tag = tag;
        self.tags.insert(tag, id);

        tracing::debug!(tag, entry = id, "cache fill");
        id
    }

    /// Evicts the least recently used entry (smallest serial among valid
    /// entries), writing it back if dirty, and returns its id.
    fn evict_lru(&mut self, data: &mut DataMem) -> usize {
        let id = self.entries.iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .min_by_key(|(_, e)| e.ref_count)
            .map(|(id, _)| id)
            .unwrap_or_else(|| unreachable!("eviction only happens with no free entry"));

        tracing::debug!(tag = self.entries[id].tag, entry = id, "cache evict");
        self.write_back(id, data);
        id
    }

    /// Writes the entry's payload back to memory if it is valid and
    /// dirty, then invalidates it.
    fn write_back(&mut self, id: usize, data: &mut DataMem) {
        if !self.entries[id].valid {
            return;
        }

        let tag = self.entries[id].tag;
        if self.entries[id].dirty {
            tracing::debug!(tag, entry = id, "cache write-back");
            data.block_mut(tag, self.block_size).copy_from_slice(&self.entries[id].words);
        }

        self.tags.remove(&tag);
        let entry = &mut self.entries[id];
        entry.valid = false;
        entry.dirty = false;
        entry.ref_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::mem::DATA_WORDS;

    fn setup(blocks: usize, block_size: usize) -> (Cache, DataMem) {
        (Cache::new(blocks, block_size), DataMem::new())
    }

    /// Clean payloads mirror memory; serials are distinct and
    /// below the next serial; hits never exceed accesses.
    fn check_invariants(cache: &Cache, data: &DataMem) {
        let mut seen = std::collections::HashSet::new();
        for (id, entry) in cache.entries.iter().enumerate().filter(|(_, e)| e.valid) {
            if !entry.dirty {
                assert_eq!(
                    &*entry.words,
                    data.block(entry.tag, cache.block_size),
                    "clean entry for block {} diverged from memory", entry.tag
                );
            }
            assert!(entry.ref_count < cache.next_ref, "serial must be below the counter");
            assert!(seen.insert(entry.ref_count), "serials must be pairwise distinct");
            assert_eq!(cache.tags.get(&entry.tag), Some(&id));
        }
        let stats = cache.stats();
        assert!(stats.hits <= stats.accesses);
    }

    #[test]
    fn test_read_miss_then_hit() {
        let (mut cache, mut data) = setup(1, 8);
        data.set(3, 0x1234);

        assert_eq!(cache.read(3, &mut data).unwrap(), 0x1234);
        assert_eq!(cache.stats(), CacheStats { hits: 0, accesses: 1 });

        assert_eq!(cache.read(3, &mut data).unwrap(), 0x1234);
        assert_eq!(cache.read(0, &mut data).unwrap(), 0xFFFF); // same block
        assert_eq!(cache.stats(), CacheStats { hits: 2, accesses: 3 });
        check_invariants(&cache, &data);
    }

    #[test]
    fn test_write_is_deferred_until_flush() {
        let (mut cache, mut data) = setup(1, 8);

        cache.write(5, 0xBEEF, &mut data).unwrap();
        // write-back: memory is stale until eviction or flush
        assert_eq!(data.get(5), 0xFFFF);

        cache.flush(&mut data);
        assert_eq!(data.get(5), 0xBEEF);
        assert!(cache.tags.is_empty());
        check_invariants(&cache, &data);
    }

    #[test]
    fn test_read_after_write_sees_cached_word() {
        let (mut cache, mut data) = setup(1, 8);

        cache.write(0, 0x2A, &mut data).unwrap();
        assert_eq!(cache.read(0, &mut data).unwrap(), 0x2A);
        assert_eq!(cache.stats(), CacheStats { hits: 1, accesses: 2 });
    }

    #[test]
    fn test_single_entry_eviction() {
        // with one entry, any new tag evicts the resident block,
        // writing it back iff dirty.
        let (mut cache, mut data) = setup(1, 8);

        cache.write(0, 0xAAAA, &mut data).unwrap();
        // new tag: dirty block 0 must be written back
        assert_eq!(cache.read(8, &mut data).unwrap(), 0xFFFF);
        assert_eq!(data.get(0), 0xAAAA);

        // clean resident block: eviction must not touch memory
        data.set(8, 0x0123);
        cache.read(16, &mut data).unwrap();
        assert_eq!(data.get(8), 0x0123);
        check_invariants(&cache, &data);
    }

    #[test]
    fn test_lru_victim_selection() {
        let (mut cache, mut data) = setup(2, 8);

        cache.write(0, 0x1111, &mut data).unwrap();  // block 0, serial 1
        cache.write(8, 0x2222, &mut data).unwrap();  // block 1, serial 2
        cache.read(0, &mut data).unwrap();           // block 0 now newest (serial 3)

        // block 1 is LRU and must be the victim
        cache.write(16, 0x3333, &mut data).unwrap();
        assert_eq!(data.get(8), 0x2222, "LRU victim should have been written back");
        assert_eq!(data.get(0), 0xFFFF, "block 0 should still be resident");

        // block 0 still resident: this is a hit
        let hits_before = cache.stats().hits;
        cache.read(0, &mut data).unwrap();
        assert_eq!(cache.stats().hits, hits_before + 1);
        check_invariants(&cache, &data);
    }

    #[test]
    fn test_three_writes_two_entries() {
        // two 2-word entries: writes to 0, 4, 8 land in
        // blocks 0, 2, 4; all survive the flush; no hits anywhere.
        let (mut cache, mut data) = setup(2, 2);

        cache.write(0, 0x00AA, &mut data).unwrap();
        cache.write(4, 0x00BB, &mut data).unwrap();
        cache.write(8, 0x00CC, &mut data).unwrap();
        cache.flush(&mut data);

        assert_eq!(data.get(0), 0x00AA);
        assert_eq!(data.get(4), 0x00BB);
        assert_eq!(data.get(8), 0x00CC);
        assert_eq!(cache.stats(), CacheStats { hits: 0, accesses: 3 });
    }

    #[test]
    fn test_hit_accounting() {
        // N distinct blocks then M resident re-accesses.
        let (mut cache, mut data) = setup(4, 8);

        for tag in 0..4u16 {
            cache.read(tag * 8, &mut data).unwrap();
        }
        for _ in 0..3 {
            for tag in 0..4u16 {
                cache.read(tag * 8 + 1, &mut data).unwrap();
            }
        }

        let stats = cache.stats();
        assert_eq!(stats.hits, 12);
        assert_eq!(stats.accesses, 16);
        assert_eq!(stats.misses(), 4);
        assert_eq!(stats.hit_rate(), 0.75);
        check_invariants(&cache, &data);
    }

    #[test]
    fn test_address_range_guard() {
        // the last word address of the guarded span succeeds, one
        // block further fails.
        let (mut cache, mut data) = setup(1, 8);

        let last = (DATA_SPAN - 2) as u16;
        assert!(cache.read(last, &mut data).is_ok());
        assert!(matches!(cache.read(DATA_SPAN as u16, &mut data), Err(SimErr::IllegalAddress)));
        assert!(matches!(cache.write(u16::MAX, 0, &mut data), Err(SimErr::IllegalAddress)));

        // failed accesses are not counted
        assert_eq!(cache.stats().accesses, 1);
    }

    #[test]
    fn test_flush_idempotent() {
        let (mut cache, mut data) = setup(2, 8);
        cache.write(0, 0xD00D, &mut data).unwrap();
        cache.flush(&mut data);
        data.set(0, 0x5555);
        // a second flush has nothing resident and must not clobber memory
        cache.flush(&mut data);
        assert_eq!(data.get(0), 0x5555);
    }

    #[test]
    fn test_invariants_under_mixed_traffic() {
        let (mut cache, mut data) = setup(4, 4);

        // interleave reads and writes over more blocks than entries
        for i in 0..200u16 {
            let addr = (i * 7) % (DATA_WORDS as u16);
            match i % 3 {
                0 => { cache.write(addr, i, &mut data).unwrap(); },
                _ => { cache.read(addr, &mut data).unwrap(); },
            }
            if i % 16 == 0 {
                check_invariants(&cache, &data);
            }
        }
        check_invariants(&cache, &data);

        // after flush, every previously dirty block is in memory
        let resident: Vec<(u16, Vec<u16>, bool)> = cache.entries.iter()
            .filter(|e| e.valid)
            .map(|e| (e.tag, e.words.to_vec(), e.dirty))
            .collect();
        cache.flush(&mut data);
        for (tag, words, dirty) in resident {
            if dirty {
                assert_eq!(data.block(tag, 4), &words[..], "flushed block {tag} mismatch");
            }
        }
    }
}
