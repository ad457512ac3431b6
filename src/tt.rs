//! Shared transposition table.
//!
//! A fixed array of clusters, four entries each. Every entry is two
//! atomic words: the payload, and the Zobrist key XOR-ed with the
//! payload. Readers re-derive the key from both words, so a torn read
//! can at worst produce a key mismatch, never a wrong hit. Slot words
//! use relaxed ordering; the generation counter uses release/acquire.
//!
//! Mate scores are stored relative to the node: the storing ply is
//! subtracted on store and the probing ply re-added on probe, so a mate
//! found through a transposition keeps the correct distance.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::constants::{is_lose_score, is_win_score, PLY_SCALE};
use crate::types::Move;

/// Bound type of a stored score.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum BoundType {
    /// Unused slot.
    Empty = 0,
    /// Exact score.
    Exact = 1,
    /// True score >= stored score (fail high).
    Lower = 2,
    /// True score <= stored score (fail low).
    Upper = 3,
}

impl BoundType {
    fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            1 => BoundType::Exact,
            2 => BoundType::Lower,
            3 => BoundType::Upper,
            _ => BoundType::Empty,
        }
    }
}

/// A decoded table entry.
#[derive(Clone, Copy, Debug)]
pub struct TtEntry {
    score: i16,
    eval: i16,
    /// Depth in fractional plies (`PLY_SCALE` units per ply).
    depth: i32,
    bound: BoundType,
    best_move: u16,
    generation: u8,
}

impl TtEntry {
    #[must_use]
    pub fn empty() -> Self {
        TtEntry {
            score: 0,
            eval: UNKNOWN_EVAL,
            depth: 0,
            bound: BoundType::Empty,
            best_move: 0,
            generation: 0,
        }
    }

    /// Score adjusted back to the probing node's distance from root.
    #[must_use]
    pub fn score(&self, ply: i32) -> i32 {
        let s = i32::from(self.score);
        if is_win_score(s) {
            s - ply
        } else if is_lose_score(s) {
            s + ply
        } else {
            s
        }
    }

    /// Set the score, adjusting mate distances relative to this node.
    pub fn set_score(&mut self, score: i32, ply: i32) {
        let adjusted = if is_win_score(score) {
            score + ply
        } else if is_lose_score(score) {
            score - ply
        } else {
            score
        };
        self.score = adjusted as i16;
    }

    #[must_use]
    pub fn bound(&self) -> BoundType {
        self.bound
    }

    pub fn set_bound(&mut self, bound: BoundType) {
        self.bound = bound;
    }

    /// Depth in fractional plies.
    #[must_use]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth.clamp(0, 1023);
    }

    #[must_use]
    pub fn best_move(&self) -> Move {
        Move::from_compressed(self.best_move)
    }

    pub fn set_best_move(&mut self, m: Move) {
        self.best_move = m.compress();
    }

    /// Cached static eval, or `None` if unknown.
    #[must_use]
    pub fn static_eval(&self) -> Option<i32> {
        if self.eval == UNKNOWN_EVAL {
            None
        } else {
            Some(i32::from(self.eval))
        }
    }

    pub fn set_static_eval(&mut self, eval: i32) {
        self.eval = eval.clamp(-(1 << 14), 1 << 14) as i16;
    }

    fn encode(&self) -> u64 {
        (u64::from(self.best_move))
            | ((self.score as u16 as u64) << 16)
            | ((self.eval as u16 as u64) << 32)
            | ((self.depth.clamp(0, 1023) as u64) << 48)
            | ((self.bound as u64) << 58)
            | ((u64::from(self.generation & 0xf)) << 60)
    }

    fn decode(data: u64) -> Self {
        TtEntry {
            best_move: (data & 0xffff) as u16,
            score: ((data >> 16) & 0xffff) as u16 as i16,
            eval: ((data >> 32) & 0xffff) as u16 as i16,
            depth: ((data >> 48) & 0x3ff) as i32,
            bound: BoundType::from_bits(data >> 58),
            generation: ((data >> 60) & 0xf) as u8,
        }
    }
}

/// Sentinel for "no static eval stored".
const UNKNOWN_EVAL: i16 = i16::MIN;

const CLUSTER: usize = 4;

pub struct TranspositionTable {
    /// `2 * CLUSTER` words per cluster: (xor_key, data) pairs.
    words: Box<[AtomicU64]>,
    cluster_mask: usize,
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Table sized to the largest power-of-two entry count fitting in
    /// `size_mb` megabytes.
    #[must_use]
    pub fn new(size_mb: usize) -> Self {
        let bytes_per_cluster = CLUSTER * 16;
        let mut clusters = (size_mb.max(1) * 1024 * 1024 / bytes_per_cluster).next_power_of_two();
        if clusters * bytes_per_cluster > size_mb.max(1) * 1024 * 1024 {
            clusters /= 2;
        }
        let clusters = clusters.max(1);
        let mut words = Vec::with_capacity(clusters * CLUSTER * 2);
        for _ in 0..clusters * CLUSTER * 2 {
            words.push(AtomicU64::new(0));
        }
        TranspositionTable {
            words: words.into_boxed_slice(),
            cluster_mask: clusters - 1,
            generation: AtomicU8::new(0),
        }
    }

    #[inline]
    fn cluster_base(&self, key: u64) -> usize {
        ((key as usize) & self.cluster_mask) * CLUSTER * 2
    }

    /// Advance the generation. Called once per search.
    pub fn next_generation(&self) {
        let _ = self
            .generation
            .fetch_update(Ordering::Release, Ordering::Acquire, |g| {
                Some(g.wrapping_add(1) & 0xf)
            });
    }

    #[must_use]
    pub fn generation(&self) -> u8 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Find the entry for `key`, if present.
    #[must_use]
    pub fn probe(&self, key: u64) -> Option<TtEntry> {
        let base = self.cluster_base(key);
        for slot in 0..CLUSTER {
            let xor_key = self.words[base + slot * 2].load(Ordering::Relaxed);
            let data = self.words[base + slot * 2 + 1].load(Ordering::Relaxed);
            if data != 0 && xor_key ^ data == key {
                return Some(TtEntry::decode(data));
            }
        }
        None
    }

    /// Insert or refresh an entry. Lock-free: competing writers may both
    /// win a slot; the fingerprint check keeps readers safe either way.
    pub fn store(&self, key: u64, entry: &TtEntry) {
        let generation = self.generation();
        let mut e = *entry;
        e.generation = generation;
        let base = self.cluster_base(key);

        // Same-key refresh, but never overwrite a deeper entry with a
        // shallower non-exact one for the same position.
        let mut victim = 0usize;
        let mut victim_priority = i64::MAX;
        for slot in 0..CLUSTER {
            let xor_key = self.words[base + slot * 2].load(Ordering::Relaxed);
            let data = self.words[base + slot * 2 + 1].load(Ordering::Relaxed);
            if data != 0 && xor_key ^ data == key {
                let old = TtEntry::decode(data);
                if old.depth > e.depth && e.bound != BoundType::Exact
                    && old.generation == generation
                {
                    // Keep the deeper information; still refresh the move
                    // if we have one and the old entry does not.
                    if e.best_move != 0 && old.best_move == 0 {
                        let mut refreshed = old;
                        refreshed.best_move = e.best_move;
                        self.write_slot(base + slot * 2, key, &refreshed);
                    }
                    return;
                }
                if e.best_move == 0 {
                    e.best_move = old.best_move;
                }
                self.write_slot(base + slot * 2, key, &e);
                return;
            }
            let priority = Self::keep_priority(data, generation);
            if priority < victim_priority {
                victim_priority = priority;
                victim = slot;
            }
        }
        self.write_slot(base + victim * 2, key, &e);
    }

    /// Total preorder for replacement: empty first, then stale
    /// generations, then shallower depth, bounds before exact.
    fn keep_priority(data: u64, generation: u8) -> i64 {
        if data == 0 {
            return i64::MIN;
        }
        let e = TtEntry::decode(data);
        let age = i64::from(generation.wrapping_sub(e.generation) & 0xf);
        let exact_bonus = i64::from(e.bound == BoundType::Exact);
        i64::from(e.depth) * 2 + exact_bonus - age * 256
    }

    fn write_slot(&self, word_idx: usize, key: u64, entry: &TtEntry) {
        let data = entry.encode();
        self.words[word_idx].store(key ^ data, Ordering::Relaxed);
        self.words[word_idx + 1].store(data, Ordering::Relaxed);
    }

    /// Hint that `key`'s cluster will be probed soon.
    #[inline]
    pub fn prefetch(&self, key: u64) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let ptr = self.words.as_ptr().add(self.cluster_base(key)) as *const i8;
            _mm_prefetch(ptr, _MM_HINT_T0);
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = key;
        }
    }

    /// Fraction of used slots in the first clusters, per mille.
    #[must_use]
    pub fn hashfull_per_mille(&self) -> u32 {
        let generation = self.generation();
        let sample_clusters = 250.min(self.cluster_mask + 1);
        let mut used = 0u32;
        for c in 0..sample_clusters {
            for slot in 0..CLUSTER {
                let data = self.words[c * CLUSTER * 2 + slot * 2 + 1].load(Ordering::Relaxed);
                if data != 0 && TtEntry::decode(data).generation == generation {
                    used += 1;
                }
            }
        }
        used * 1000 / (sample_clusters as u32 * CLUSTER as u32)
    }

    /// Depth of one search ply, in the fractional units entries store.
    #[must_use]
    pub fn ply_to_depth(plies: i32) -> i32 {
        plies * PLY_SCALE
    }
}
