//! Incrementally-updated first-layer state.
//!
//! Each colour perspective keeps a running sum of first-layer weight rows
//! (the accumulator) labelled with the king square it was computed for,
//! plus short queues of feature rows still to be added or subtracted.
//! A stack of snapshots mirrors the search stack: `push` before a move is
//! made, `pop` after it is undone, so undo costs one copy. A king move or
//! queue overflow marks the accumulator stale, and the next evaluation
//! rebuilds it from the piece placement.

use super::net::{feature_index, nn_piece_type, LayerScratch, NetData, N1};
use super::simd;
use crate::bitboard::BitIter;
use crate::constants::MAX_SEARCH_DEPTH;
use crate::types::{Piece, Square};

/// Queue length before an accumulator degrades to a full refresh.
const MAX_INCR: usize = 4;

/// Snapshot stack depth; beyond this, push forces full refreshes.
const MAX_STACK: usize = MAX_SEARCH_DEPTH as usize * 2;

#[derive(Clone, Copy)]
struct FirstLayerState {
    /// Running first-layer sums for this perspective.
    l1_out: [i16; N1],
    to_add: [u16; MAX_INCR],
    to_sub: [u16; MAX_INCR],
    n_add: u8,
    n_sub: u8,
    /// King square `l1_out` was computed for; `None` marks a stale
    /// accumulator that must be rebuilt before use.
    king_sq: Option<Square>,
}

impl FirstLayerState {
    const fn new() -> Self {
        FirstLayerState {
            l1_out: [0; N1],
            to_add: [0; MAX_INCR],
            to_sub: [0; MAX_INCR],
            n_add: 0,
            n_sub: 0,
            king_sq: None,
        }
    }

    fn clear(&mut self) {
        self.n_add = 0;
        self.n_sub = 0;
        self.king_sq = None;
    }
}

/// The evaluator state connected to one `Position` at a time.
pub struct NnState {
    stack: Box<[[FirstLayerState; 2]]>,
    top: usize,
}

impl Default for NnState {
    fn default() -> Self {
        NnState::new()
    }
}

impl NnState {
    #[must_use]
    pub fn new() -> Self {
        NnState {
            stack: vec![[FirstLayerState::new(); 2]; MAX_STACK].into_boxed_slice(),
            top: 0,
        }
    }

    /// Drop all incremental state; the next evaluation is non-incremental.
    pub fn force_full_eval(&mut self) {
        self.top = 0;
        for state in &mut self.stack[0] {
            state.clear();
        }
    }

    /// Snapshot the current state. Called before a move is made.
    pub fn push_state(&mut self) {
        if self.top + 1 >= self.stack.len() {
            self.force_full_eval();
            return;
        }
        self.stack[self.top + 1] = self.stack[self.top];
        self.top += 1;
    }

    /// Return to the previous snapshot. Called after a move is undone.
    pub fn pop_state(&mut self) {
        if self.top > 0 {
            self.top -= 1;
        } else {
            self.force_full_eval();
        }
    }

    /// Record that `sq` changed from `old_piece` to `new_piece`.
    /// King changes are ignored here; king movement is detected at
    /// refresh time by comparing the stored king square.
    pub fn set_piece(&mut self, sq: Square, old_piece: Piece, new_piece: Piece) {
        let is_feature = |p: Piece| !p.is_empty() && !p.is_king();
        for c in 0..2 {
            let state = &mut self.stack[self.top][c];
            let Some(king_sq) = state.king_sq else {
                continue;
            };
            if is_feature(old_piece) {
                let idx = feature_index(king_sq, nn_piece_type(old_piece), sq, c == 0) as u16;
                if (state.n_sub as usize) < MAX_INCR {
                    state.to_sub[state.n_sub as usize] = idx;
                    state.n_sub += 1;
                } else {
                    state.clear();
                    continue;
                }
            }
            if is_feature(new_piece) {
                let idx = feature_index(king_sq, nn_piece_type(new_piece), sq, c == 0) as u16;
                if (state.n_add as usize) < MAX_INCR {
                    state.to_add[state.n_add as usize] = idx;
                    state.n_add += 1;
                } else {
                    state.clear();
                }
            }
        }
    }

    /// Bring both accumulators up to date: flush pending queues, or
    /// rebuild from scratch where the king moved or the queue overflowed.
    pub(crate) fn update(
        &mut self,
        king_sqs: [Square; 2],
        occupied_non_king: u64,
        piece_at: &[Piece; 64],
        net: &NetData,
    ) {
        let mut do_full = [false; 2];
        for c in 0..2 {
            let state = &mut self.stack[self.top][c];
            do_full[c] = state.king_sq != Some(king_sqs[c]);
            if !do_full[c] {
                let n_add = state.n_add as usize;
                let n_sub = state.n_sub as usize;
                let (adds, subs) = (state.to_add, state.to_sub);
                simd::add_sub_rows(
                    &mut state.l1_out,
                    &net.weight1,
                    N1,
                    &adds[..n_add],
                    &subs[..n_sub],
                );
            }
            state.n_add = 0;
            state.n_sub = 0;
        }

        for c in 0..2 {
            if !do_full[c] {
                continue;
            }
            let state = &mut self.stack[self.top][c];
            state.l1_out.copy_from_slice(&net.bias1);
            state.king_sq = Some(king_sqs[c]);
            for sq in BitIter(occupied_non_king) {
                let pt = nn_piece_type(piece_at[sq.as_index()]);
                let idx = feature_index(king_sqs[c], pt, sq, c == 0) as u16;
                simd::add_sub_rows(&mut state.l1_out, &net.weight1, N1, &[idx], &[]);
            }
        }
    }

    /// Evaluate the full network for the current placement.
    /// Returns centipawns from the side to move's point of view.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn eval(
        &mut self,
        king_sqs: [Square; 2],
        occupied_non_king: u64,
        piece_at: &[Piece; 64],
        white_move: bool,
        net: &NetData,
        scratch: &mut LayerScratch,
    ) -> i32 {
        self.update(king_sqs, occupied_non_king, piece_at, net);
        let mut clipped = [0i8; 2 * N1];
        for c in 0..2 {
            let persp = if white_move { c } else { 1 - c };
            let acc = &self.stack[self.top][persp].l1_out;
            simd::scale_clip_pack(&mut clipped[c * N1..(c + 1) * N1], acc);
        }
        net.eval_layers(&clipped, scratch)
    }
}
