//! Magic bitboard tables for sliding-piece attacks.
//!
//! Attacks are resolved by `(occupancy & mask) * magic >> shift` into a
//! per-square sub-table. The magic multipliers are found once at start-up
//! with a seeded random search, so the tables are identical in every run.

use std::sync::LazyLock;

use rand::prelude::*;

use super::tables::{slider_attacks_slow, BISHOP_DIRS, ROOK_DIRS};
use crate::types::Square;

struct SquareMagic {
    mask: u64,
    magic: u64,
    shift: u32,
    offset: usize,
}

pub(crate) struct MagicTables {
    rook: [SquareMagic; 64],
    bishop: [SquareMagic; 64],
    attacks: Vec<u64>,
}

impl MagicTables {
    #[inline]
    pub(crate) fn rook_attacks(&self, sq: Square, occupied: u64) -> u64 {
        let m = &self.rook[sq.as_index()];
        let idx = (((occupied & m.mask).wrapping_mul(m.magic)) >> m.shift) as usize;
        self.attacks[m.offset + idx]
    }

    #[inline]
    pub(crate) fn bishop_attacks(&self, sq: Square, occupied: u64) -> u64 {
        let m = &self.bishop[sq.as_index()];
        let idx = (((occupied & m.mask).wrapping_mul(m.magic)) >> m.shift) as usize;
        self.attacks[m.offset + idx]
    }
}

pub(crate) static MAGICS: LazyLock<MagicTables> = LazyLock::new(build_tables);

/// Relevant occupancy mask: ray squares excluding board edges in the ray
/// direction (an edge blocker never changes the attack set).
fn relevant_mask(sq: usize, dirs: &[(isize, isize)]) -> u64 {
    let mut mask = 0u64;
    for &(dx, dy) in dirs {
        let mut x = (sq % 8) as isize + dx;
        let mut y = (sq / 8) as isize + dy;
        while (0..8).contains(&(x + dx)) && (0..8).contains(&(y + dy)) {
            mask |= 1u64 << (y * 8 + x);
            x += dx;
            y += dy;
        }
    }
    mask
}

/// Enumerate all subsets of `mask` (carry-rippler traversal).
fn for_each_subset(mask: u64, mut f: impl FnMut(u64)) {
    let mut subset = 0u64;
    loop {
        f(subset);
        subset = subset.wrapping_sub(mask) & mask;
        if subset == 0 {
            break;
        }
    }
}

fn build_tables() -> MagicTables {
    // Fixed seed: the tables must be identical across runs and threads.
    let mut rng = StdRng::seed_from_u64(0x0be7_a11e_d5ee_d001);
    let mut attacks: Vec<u64> = Vec::with_capacity(110_000);

    let rook = std::array::from_fn(|sq| {
        find_square_magic(sq, &ROOK_DIRS, &mut rng, &mut attacks)
    });
    let bishop = std::array::from_fn(|sq| {
        find_square_magic(sq, &BISHOP_DIRS, &mut rng, &mut attacks)
    });

    MagicTables {
        rook,
        bishop,
        attacks,
    }
}

fn find_square_magic(
    sq: usize,
    dirs: &[(isize, isize)],
    rng: &mut StdRng,
    attacks: &mut Vec<u64>,
) -> SquareMagic {
    let mask = relevant_mask(sq, dirs);
    let bits = mask.count_ones();
    let shift = 64 - bits;
    let size = 1usize << bits;
    let square = Square::from_index(sq);

    // Reference mapping: subset occupancy -> attack set.
    let mut occs = Vec::with_capacity(size);
    let mut refs = Vec::with_capacity(size);
    for_each_subset(mask, |occ| {
        occs.push(occ);
        refs.push(slider_attacks_slow(square, occ, dirs));
    });

    let mut table = vec![0u64; size];
    let mut used = vec![false; size];
    loop {
        // Sparse candidates converge fastest.
        let magic = rng.gen::<u64>() & rng.gen::<u64>() & rng.gen::<u64>();
        if ((mask.wrapping_mul(magic)) >> 56).count_ones() < 6 {
            continue;
        }
        used.iter_mut().for_each(|u| *u = false);
        let mut ok = true;
        for (i, &occ) in occs.iter().enumerate() {
            let idx = ((occ.wrapping_mul(magic)) >> shift) as usize;
            if used[idx] && table[idx] != refs[i] {
                ok = false;
                break;
            }
            used[idx] = true;
            table[idx] = refs[i];
        }
        if ok {
            let offset = attacks.len();
            attacks.extend_from_slice(&table);
            return SquareMagic {
                mask,
                magic,
                shift,
                offset,
            };
        }
    }
}
