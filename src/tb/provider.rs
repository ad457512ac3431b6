//! The tablebase probe surface the core consumes.
//!
//! The engine does not read tablebase files itself; a backend supplies
//! the four probe functions and the per-material DTZ bounds. All scores
//! are already ply-adjusted by the backend, following the `MATE0`
//! conventions. Probes return `None` whenever the backend has nothing:
//! missing files or paths are not errors, the search simply continues
//! without the hint.

use crate::material::MatId;
use crate::position::Position;

/// Provider of tablebase probes.
///
/// Castling availability is handled by the caller: the underlying table
/// formats assume no castling rights, so the adjudicator never probes a
/// position that still has any.
pub trait TbBackend: Send + Sync {
    /// Largest piece count covered by DTM (distance to mate) tables.
    fn max_dtm_men(&self) -> u32 {
        0
    }

    /// Largest piece count covered by WDL/DTZ tables.
    fn max_wdl_men(&self) -> u32 {
        0
    }

    /// Distance-to-mate probe: signed score, `+-(MATE0 - dist - ply)`.
    fn gtb_probe_dtm(&self, pos: &Position, ply: i32) -> Option<i32>;

    /// Win/draw/loss probe with mate-bound scoring:
    /// 0 for draw, `+-(MATE0 - ply - max_dtm_for_material)` otherwise.
    fn gtb_probe_wdl(&self, pos: &Position, ply: i32) -> Option<i32>;

    /// WDL probe returning `(score, eval_hint)`; the hint encodes how
    /// far a drawn position is from flipping into a win or loss.
    fn rtb_probe_wdl(&self, pos: &Position, ply: i32) -> Option<(i32, i32)>;

    /// DTZ probe returning `(score, eval_hint)`. If `|dtz| <= 100` but
    /// `dtz + halfmove_clock > 100` the result is a draw whose hint
    /// encodes the frustration distance.
    fn rtb_probe_dtz(&self, pos: &Position, ply: i32) -> Option<(i32, i32)>;

    /// Conservative upper bound on DTZ for one material class, in plies.
    fn max_dtz(&self, mat_id: MatId) -> Option<i32> {
        let _ = mat_id;
        None
    }
}

/// Backend used when no tablebase paths are configured.
pub struct NullBackend;

impl TbBackend for NullBackend {
    fn gtb_probe_dtm(&self, _pos: &Position, _ply: i32) -> Option<i32> {
        None
    }

    fn gtb_probe_wdl(&self, _pos: &Position, _ply: i32) -> Option<i32> {
        None
    }

    fn rtb_probe_wdl(&self, _pos: &Position, _ply: i32) -> Option<(i32, i32)> {
        None
    }

    fn rtb_probe_dtz(&self, _pos: &Position, _ply: i32) -> Option<(i32, i32)> {
        None
    }
}
