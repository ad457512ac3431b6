//! Zobrist hashing.
//!
//! Provides incrementally-updatable 64-bit position hashes. Keys are
//! generated once from a fixed seed so hashes are reproducible across
//! runs, which the test suite and tree logs rely on.

use std::sync::LazyLock;

use rand::prelude::*;

use crate::types::{Piece, Square, N_PIECE_TYPES};

pub(crate) struct ZobristKeys {
    /// `piece_square[piece][square]`; the Empty row is all zeros so
    /// incremental updates need no special case.
    pub(crate) piece_square: [[u64; 64]; N_PIECE_TYPES],
    /// XOR-ed in when White is to move.
    pub(crate) white_to_move: u64,
    /// One key per castle-mask value.
    pub(crate) castle_mask: [u64; 16],
    /// `ep_file[file + 1]`; index 0 means no en-passant square.
    pub(crate) ep_file: [u64; 9],
    /// `move_cnt[min(half_move_clock, 100)]`, used by the history hash.
    pub(crate) move_cnt: [u64; 101],
}

impl ZobristKeys {
    fn new() -> Self {
        let mut rng = StdRng::seed_from_u64(0xde5c_ca11_ab1e_5eed);
        let mut piece_square = [[0u64; 64]; N_PIECE_TYPES];
        for row in piece_square.iter_mut().skip(1) {
            for key in row.iter_mut() {
                *key = rng.gen();
            }
        }
        let white_to_move = rng.gen();
        let mut castle_mask = [0u64; 16];
        for key in &mut castle_mask {
            *key = rng.gen();
        }
        let mut ep_file = [0u64; 9];
        // Index 0 (no ep square) hashes to zero so that clearing the ep
        // square is a plain XOR of the old key.
        for key in ep_file.iter_mut().skip(1) {
            *key = rng.gen();
        }
        let mut move_cnt = [0u64; 101];
        for key in &mut move_cnt {
            *key = rng.gen();
        }
        ZobristKeys {
            piece_square,
            white_to_move,
            castle_mask,
            ep_file,
            move_cnt,
        }
    }
}

pub(crate) static ZOBRIST: LazyLock<ZobristKeys> = LazyLock::new(ZobristKeys::new);

/// Key for a piece on a square.
#[inline]
#[must_use]
pub fn piece_square_key(piece: Piece, sq: Square) -> u64 {
    ZOBRIST.piece_square[piece.index()][sq.as_index()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_piece_hashes_to_zero() {
        for sq in 0..64 {
            assert_eq!(piece_square_key(Piece::Empty, Square::from_index(sq)), 0);
        }
    }

    #[test]
    fn keys_are_distinct() {
        // A collision among this few keys would mean a broken generator.
        let mut seen = std::collections::HashSet::new();
        for p in 1..N_PIECE_TYPES {
            for sq in 0..64 {
                assert!(seen.insert(ZOBRIST.piece_square[p][sq]));
            }
        }
        assert!(seen.insert(ZOBRIST.white_to_move));
        for k in &ZOBRIST.move_cnt {
            assert!(seen.insert(*k));
        }
    }

    #[test]
    fn no_ep_key_is_zero() {
        assert_eq!(ZOBRIST.ep_file[0], 0);
    }
}
