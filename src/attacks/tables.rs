//! Precomputed leaper attacks and inter-square geometry tables.

use std::sync::LazyLock;

use crate::types::Square;

pub(crate) static KNIGHT_ATTACKS: LazyLock<[u64; 64]> = LazyLock::new(|| {
    let deltas = [
        (2, 1),
        (1, 2),
        (-1, 2),
        (-2, 1),
        (-2, -1),
        (-1, -2),
        (1, -2),
        (2, -1),
    ];
    leaper_table(&deltas)
});

pub(crate) static KING_ATTACKS: LazyLock<[u64; 64]> = LazyLock::new(|| {
    let deltas = [
        (1, 0),
        (-1, 0),
        (0, 1),
        (0, -1),
        (1, 1),
        (1, -1),
        (-1, 1),
        (-1, -1),
    ];
    leaper_table(&deltas)
});

/// `PAWN_ATTACKS[colour][sq]`: squares a pawn of `colour` (0 = white)
/// on `sq` attacks.
pub(crate) static PAWN_ATTACKS: LazyLock<[[u64; 64]; 2]> = LazyLock::new(|| {
    let white = leaper_table(&[(1, 1), (-1, 1)]);
    let black = leaper_table(&[(1, -1), (-1, -1)]);
    [white, black]
});

/// `PAWN_BLOCKERS[colour][sq]`: the squares on the own and adjacent
/// files strictly ahead of a pawn. Empty of enemy pawns means passed.
pub(crate) static PAWN_BLOCKERS: LazyLock<[[u64; 64]; 2]> = LazyLock::new(|| {
    let mut table = [[0u64; 64]; 2];
    for sq in 0..64usize {
        let x = (sq % 8) as isize;
        let y = (sq / 8) as isize;
        for (c, dir) in [(0usize, 1isize), (1, -1)] {
            let mut mask = 0u64;
            for dx in [-1isize, 0, 1] {
                let nx = x + dx;
                if !(0..8).contains(&nx) {
                    continue;
                }
                let mut ny = y + dir;
                while (0..8).contains(&ny) {
                    mask |= 1u64 << (ny * 8 + nx);
                    ny += dir;
                }
            }
            table[c][sq] = mask;
        }
    }
    table
});

/// Squares strictly between two aligned squares, empty mask otherwise.
pub(crate) static BETWEEN: LazyLock<Box<[[u64; 64]; 64]>> = LazyLock::new(|| {
    let mut table = Box::new([[0u64; 64]; 64]);
    for from in 0..64usize {
        for (dx, dy) in ALL_DIRECTIONS {
            let mut mask = 0u64;
            let mut x = (from % 8) as isize + dx;
            let mut y = (from / 8) as isize + dy;
            while (0..8).contains(&x) && (0..8).contains(&y) {
                let to = (y * 8 + x) as usize;
                table[from][to] = mask;
                mask |= 1u64 << to;
                x += dx;
                y += dy;
            }
        }
    }
    table
});

/// `DIRECTION[from][to]`: the per-step square delta from `from` towards
/// `to` when the squares share a rank, file or diagonal, else 0.
pub(crate) static DIRECTION: LazyLock<Box<[[i8; 64]; 64]>> = LazyLock::new(|| {
    let mut table = Box::new([[0i8; 64]; 64]);
    for from in 0..64usize {
        for (dx, dy) in ALL_DIRECTIONS {
            let step = (dy * 8 + dx) as i8;
            let mut x = (from % 8) as isize + dx;
            let mut y = (from / 8) as isize + dy;
            while (0..8).contains(&x) && (0..8).contains(&y) {
                let to = (y * 8 + x) as usize;
                table[from][to] = step;
                x += dx;
                y += dy;
            }
        }
    }
    table
});

const ALL_DIRECTIONS: [(isize, isize); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

fn leaper_table(deltas: &[(isize, isize)]) -> [u64; 64] {
    let mut attacks = [0u64; 64];
    for (sq, slot) in attacks.iter_mut().enumerate() {
        let x = (sq % 8) as isize;
        let y = (sq / 8) as isize;
        let mut mask = 0u64;
        for &(dx, dy) in deltas {
            let nx = x + dx;
            let ny = y + dy;
            if (0..8).contains(&nx) && (0..8).contains(&ny) {
                mask |= 1u64 << (ny * 8 + nx);
            }
        }
        *slot = mask;
    }
    attacks
}

/// Ray attacks computed by square walking. Used to build and cross-check
/// the magic tables; not on the hot path.
pub(crate) fn slider_attacks_slow(sq: Square, occupied: u64, dirs: &[(isize, isize)]) -> u64 {
    let mut attacks = 0u64;
    for &(dx, dy) in dirs {
        let mut x = (sq.as_index() % 8) as isize + dx;
        let mut y = (sq.as_index() / 8) as isize + dy;
        while (0..8).contains(&x) && (0..8).contains(&y) {
            let bit = 1u64 << (y * 8 + x);
            attacks |= bit;
            if occupied & bit != 0 {
                break;
            }
            x += dx;
            y += dy;
        }
    }
    attacks
}

pub(crate) const ROOK_DIRS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
pub(crate) const BISHOP_DIRS: [(isize, isize); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
