//! Tablebase adjudication.
//!
//! Reconciles DTM/WDL/DTZ probes with the 50-move rule and the search
//! window, restricts root moves to win-preserving ones when only partial
//! information is available, and extends principal variations with known
//! mating lines.

mod provider;

pub use provider::{NullBackend, TbBackend};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::constants::{is_lose_score, is_win_score, MATE0};
use crate::material::MatId;
use crate::movegen::legal_moves;
use crate::position::Position;
use crate::tt::BoundType;
use crate::types::{Move, Piece};

static BACKEND: Lazy<RwLock<Arc<dyn TbBackend>>> =
    Lazy::new(|| RwLock::new(Arc::new(NullBackend)));

/// Piece-count limit of the installed tables. Also consumed by the
/// history hash to decide when the half-move clock must be folded in
/// exactly.
static MAX_PIECES: AtomicU32 = AtomicU32::new(4);

/// Install a backend. Called at start-up and whenever the tablebase
/// paths change; the front-end quiesces the workers first.
pub fn initialize(backend: Arc<dyn TbBackend>) {
    let men = 4.max(backend.max_dtm_men()).max(backend.max_wdl_men());
    MAX_PIECES.store(men, Ordering::Relaxed);
    *BACKEND.write() = backend;
    max_sub_mate_cache().lock().clear();
}

#[must_use]
pub fn max_pieces() -> u32 {
    MAX_PIECES.load(Ordering::Relaxed)
}

fn backend() -> Arc<dyn TbBackend> {
    BACKEND.read().clone()
}

/// A tablebase verdict: a score with a bound type, plus an eval hint
/// describing how close a drawn position is to a win or loss.
#[derive(Clone, Copy, Debug)]
pub struct TbResult {
    score: i32,
    bound: BoundType,
    eval_hint: i32,
}

impl TbResult {
    #[must_use]
    pub fn score(&self) -> i32 {
        self.score
    }

    #[must_use]
    pub fn bound(&self) -> BoundType {
        self.bound
    }

    /// Pseudo-distance used by the swindle scoring of drawn positions.
    #[must_use]
    pub fn eval_hint(&self) -> i32 {
        self.eval_hint
    }

    fn exact(score: i32) -> Self {
        TbResult {
            score,
            bound: BoundType::Exact,
            eval_hint: 0,
        }
    }
}

/// Margin in plies before a DTM win runs into the 50-move rule. When
/// negative the win is not realisable; the hint records how close it
/// came.
fn rule50_margin(dtm_score: i32, ply: i32, hmc: i32, hint: &mut i32) -> i32 {
    let margin = (100 - hmc) - (MATE0 - 1 - dtm_score.abs() - ply);
    if margin < 0 {
        // Positive hint: the side to move is the frustrated winner.
        let new_hint = if dtm_score > 0 { -margin } else { margin };
        if *hint == 0 || new_hint.abs() < hint.abs() {
            *hint = new_hint;
        }
    }
    margin
}

/// Probe the installed tables for a definitive or bounded score.
///
/// The decision ladder: on-demand DTM for very small positions; WDL,
/// trusted when drawn or when the clock is zero and otherwise checked
/// against the window; DTM first when the window is already in the mate
/// range; DTZ; DTM last. Positions with castling rights are never
/// probed.
#[must_use]
pub fn tb_probe(pos: &mut Position, ply: i32, alpha: i32, beta: i32) -> Option<TbResult> {
    if pos.castle_mask() != 0 {
        return None;
    }
    let n_pieces = pos.n_pieces();
    if n_pieces > max_pieces() {
        return None;
    }
    let backend = backend();
    let hmc = i32::from(pos.half_move_clock());
    let mut hint = 0i32;

    // On-demand DTM for tiny endings.
    let mut has_dtm = false;
    let mut dtm_bound = BoundType::Empty;
    if n_pieces <= 4 && n_pieces <= backend.max_dtm_men() {
        if let Some(dtm) = backend.gtb_probe_dtm(pos, ply) {
            if dtm == 0 || rule50_margin(dtm, ply, hmc, &mut hint) >= 0 {
                return Some(TbResult::exact(dtm));
            }
            has_dtm = true;
            dtm_bound = if dtm > 0 {
                BoundType::Lower
            } else {
                BoundType::Upper
            };
        }
    }

    // WDL. Trust only draws and zero-clock results outright; otherwise
    // the 50-move rule may turn the nominal result into a draw.
    let mut has_result: Option<TbResult> = None;
    let mut check_bound = None;
    let wdl = if n_pieces <= backend.max_wdl_men() {
        backend
            .rtb_probe_wdl(pos, ply)
            .map(|(score, h)| {
                if h != 0 && (hint == 0 || h.abs() < hint.abs()) {
                    hint = h;
                }
                score
            })
            .or_else(|| backend.gtb_probe_wdl(pos, ply))
    } else {
        None
    };
    if let Some(wdl_score) = wdl {
        if wdl_score == 0 || hmc == 0 {
            has_result = Some(TbResult {
                score: wdl_score,
                bound: match wdl_score.cmp(&0) {
                    std::cmp::Ordering::Greater => BoundType::Lower,
                    std::cmp::Ordering::Less => BoundType::Upper,
                    std::cmp::Ordering::Equal => BoundType::Exact,
                },
                eval_hint: hint,
            });
        } else {
            check_bound = Some(wdl_score);
        }
    }
    if let Some(wdl_score) = check_bound {
        // The nominal result could be spoiled by the 50-move rule; if it
        // crosses the zero line relative to the window, a draw bound is
        // enough to cut off.
        if wdl_score > 0 && beta <= 0 {
            return Some(TbResult {
                score: 0,
                bound: BoundType::Lower,
                eval_hint: hint,
            });
        }
        if wdl_score < 0 && alpha >= 0 {
            return Some(TbResult {
                score: 0,
                bound: BoundType::Upper,
                eval_hint: hint,
            });
        }
    }

    let mut frustrated = false;
    if let Some(res) = has_result {
        match res.bound {
            BoundType::Lower if res.score >= beta => return Some(res),
            BoundType::Upper if res.score <= alpha => return Some(res),
            BoundType::Exact => {
                if res.eval_hint == 0 {
                    return Some(res);
                }
                // Frustrated draw: keep probing for the exact distance
                // only when the window reaches into the frustrated band.
                if res.eval_hint > 0 && beta <= crate::constants::MIN_FRUSTRATED {
                    return Some(res);
                }
                if res.eval_hint < 0 && alpha >= -crate::constants::MIN_FRUSTRATED {
                    return Some(res);
                }
                frustrated = true;
            }
            _ => {}
        }
    }

    // When hunting a fastest mate (or a frustrated draw), DTM quality
    // matters more than DTZ.
    let dtm_first = frustrated || is_lose_score(alpha) || is_win_score(beta);
    if dtm_first && !has_dtm && n_pieces <= backend.max_dtm_men() {
        if let Some(dtm) = backend.gtb_probe_dtm(pos, ply) {
            if dtm == 0 || rule50_margin(dtm, ply, hmc, &mut hint) >= 0 {
                return Some(TbResult::exact(dtm));
            }
            has_dtm = true;
            dtm_bound = if dtm > 0 {
                BoundType::Lower
            } else {
                BoundType::Upper
            };
        }
    }

    // DTZ: a win within the zeroing horizon, bounded through the
    // worst-case mate length of the sub-endgames.
    if n_pieces <= backend.max_wdl_men() {
        if let Some((dtz_score, h)) = backend.rtb_probe_dtz(pos, ply) {
            if h != 0 && (hint == 0 || h.abs() < hint.abs()) {
                hint = h;
            }
            let bound = match dtz_score.cmp(&0) {
                std::cmp::Ordering::Greater => BoundType::Lower,
                std::cmp::Ordering::Less => BoundType::Upper,
                std::cmp::Ordering::Equal => BoundType::Exact,
            };
            let res = TbResult {
                score: dtz_score,
                bound,
                eval_hint: hint,
            };
            match bound {
                BoundType::Exact => return Some(res),
                BoundType::Lower if dtz_score >= beta => return Some(res),
                BoundType::Upper if dtz_score <= alpha => return Some(res),
                _ => has_result = Some(res),
            }
        }
    }

    if !dtm_first && !has_dtm && n_pieces <= backend.max_dtm_men() {
        if let Some(dtm) = backend.gtb_probe_dtm(pos, ply) {
            if dtm == 0 || rule50_margin(dtm, ply, hmc, &mut hint) >= 0 {
                return Some(TbResult::exact(dtm));
            }
            has_dtm = true;
            dtm_bound = if dtm > 0 {
                BoundType::Lower
            } else {
                BoundType::Upper
            };
        }
    }

    if let Some(res) = has_result {
        return Some(res);
    }
    if has_dtm {
        // The mate exists but the 50-move rule intervenes: a draw bound
        // in the direction of the spoiled win.
        return Some(TbResult {
            score: 0,
            bound: dtm_bound,
            eval_hint: hint,
        });
    }
    None
}

/// Convert a raw DTZ distance into a bounded mate score using the
/// worst-case mate length of every sub-endgame reachable by a capture
/// or promotion. Positive `dtz` means the side to move wins.
#[must_use]
pub fn dtz_to_score(pos: &Position, ply: i32, dtz: i32) -> i32 {
    let mat_id = pos.material_id();
    let pawn_moves = remaining_pawn_moves(pos);
    let bound = max_sub_mate(mat_id, pawn_moves);
    let sgn = if dtz >= 0 { 1 } else { -1 };
    // Mates further away than the search horizon land in the frustrated
    // band: still strongly preferred over a plain draw, still ordered by
    // distance, but not reported as forced wins.
    let raw = MATE0 - 1 - ply - dtz.abs() - bound;
    sgn * raw.max(crate::constants::MIN_FRUSTRATED)
}

/// Total pawn advances still available on the board.
fn remaining_pawn_moves(pos: &Position) -> i32 {
    let mut moves = 0i32;
    for sq in crate::bitboard::BitIter(pos.piece_type_bb(Piece::WPawn)) {
        moves += 7 - sq.y() as i32 - 1;
    }
    for sq in crate::bitboard::BitIter(pos.piece_type_bb(Piece::BPawn)) {
        moves += sq.y() as i32 - 1;
    }
    moves.max(0)
}

type SubMateCache = Mutex<HashMap<(u64, i32), i32>>;

fn max_sub_mate_cache() -> &'static SubMateCache {
    static CACHE: Lazy<SubMateCache> = Lazy::new(|| Mutex::new(HashMap::new()));
    &CACHE
}

/// Conservative upper bound, in plies, on the time to mate from any
/// position with this material, passing through every sub-endgame
/// reachable by captures, promotions and at most `pawn_moves` pawn
/// advances. Memoised per (material, budget).
#[must_use]
pub fn max_sub_mate(mat_id: MatId, pawn_moves: i32) -> i32 {
    if let Some(v) = max_sub_mate_cache().lock().get(&(mat_id.value(), pawn_moves)) {
        return *v;
    }
    let result = compute_max_sub_mate(mat_id, pawn_moves);
    max_sub_mate_cache()
        .lock()
        .insert((mat_id.value(), pawn_moves), result);
    result
}

fn compute_max_sub_mate(mat_id: MatId, pawn_moves: i32) -> i32 {
    if mat_id.value() == 0 {
        return 0;
    }
    let phase = phase_dtz_bound(mat_id);
    let mut best = 0i32;

    // Pawn advance: same material, one less push in the budget.
    let has_pawns =
        mat_id.count(Piece::WPawn) > 0 || mat_id.count(Piece::BPawn) > 0;
    if has_pawns && pawn_moves > 0 {
        best = best.max(max_sub_mate(mat_id, pawn_moves - 1));
    }

    // Captures: any non-king piece can disappear.
    for piece in [
        Piece::WQueen,
        Piece::WRook,
        Piece::WBishop,
        Piece::WKnight,
        Piece::WPawn,
        Piece::BQueen,
        Piece::BRook,
        Piece::BBishop,
        Piece::BKnight,
        Piece::BPawn,
    ] {
        if mat_id.count(piece) > 0 {
            let mut sub = mat_id;
            sub.remove_piece(piece);
            best = best.max(max_sub_mate(sub, pawn_moves));
        }
    }

    // Promotions: a pawn becomes any piece.
    for (pawn, options) in [
        (
            Piece::WPawn,
            [Piece::WQueen, Piece::WRook, Piece::WBishop, Piece::WKnight],
        ),
        (
            Piece::BPawn,
            [Piece::BQueen, Piece::BRook, Piece::BBishop, Piece::BKnight],
        ),
    ] {
        if mat_id.count(pawn) > 0 {
            for promo in options {
                let mut sub = mat_id;
                sub.remove_piece(pawn);
                sub.add_piece(promo);
                best = best.max(max_sub_mate(sub, pawn_moves));
            }
        }
    }

    phase + best
}

/// Per-material DTZ phase bound: backend knowledge when available, the
/// 50-move horizon otherwise.
fn phase_dtz_bound(mat_id: MatId) -> i32 {
    backend().max_dtz(mat_id).unwrap_or(100)
}

/// At a root the tables call won, keep only the moves that preserve the
/// win so the searcher refines inside them. Returns `None` when the
/// root is not a proven win or every move already makes measurable
/// progress.
#[must_use]
pub fn get_search_moves(pos: &mut Position) -> Option<Vec<Move>> {
    let ply = 0;
    let root = tb_probe(pos, ply, -MATE0, MATE0)?;
    if root.bound() == BoundType::Upper {
        return None;
    }
    let root_score = root.score();
    if !is_win_score(root_score) {
        return None;
    }

    let moves = legal_moves(pos);
    let mut keep = Vec::new();
    let mut has_progress = false;
    for sm in &moves {
        let ui = pos.make_move(sm.mv);
        let mut bad = false;
        if let Some(ent) = tb_probe(pos, ply + 1, -MATE0, MATE0) {
            let score = -ent.score();
            let ty = ent.bound();
            if score >= root_score && (ty == BoundType::Exact || ty == BoundType::Upper) {
                has_progress = true;
            }
            // One point of slack covers the +-1 uncertainty of DTZ.
            if score < root_score - 1 {
                bad = true;
            }
        }
        pos.unmake_move(sm.mv, &ui);
        if !bad {
            keep.push(sm.mv);
        }
    }
    if has_progress || keep.is_empty() {
        None
    } else {
        Some(keep)
    }
}

/// Replace the tail of a PV with a known optimal mating sequence when
/// the line enters the tables within the 50-move window.
pub fn extend_pv(root_pos: &Position, pv: &mut Vec<Move>) {
    let mut pos = root_pos.clone();
    let mut ply = 0i32;
    let mut score = 0i32;
    let mut entered = false;
    let mut idx = 0usize;
    while idx < pv.len() {
        let m = pv[idx];
        let _ = pos.make_move(m);
        idx += 1;
        if let Some(dtm) = backend().gtb_probe_dtm(&pos, ply) {
            if is_win_score(dtm.abs())
                && MATE0 - 1 - dtm.abs() - ply <= 100 - i32::from(pos.half_move_clock())
            {
                pv.truncate(idx);
                score = dtm;
                entered = true;
                break;
            }
        }
    }
    if !entered {
        match backend().gtb_probe_dtm(&pos, ply) {
            Some(dtm)
                if is_win_score(dtm.abs())
                    && MATE0 - 1 - dtm.abs() - ply
                        <= 100 - i32::from(pos.half_move_clock()) =>
            {
                score = dtm;
            }
            _ => return,
        }
    }
    if !pos.is_white_move() {
        score = -score;
    }

    // Greedily follow moves that keep the same mate distance. The line
    // cannot be longer than the 50-move window allows.
    while pv.len() < 2 * crate::constants::MAX_SEARCH_DEPTH as usize {
        let moves = legal_moves(&mut pos);
        let mut extended = false;
        for sm in &moves {
            let ui = pos.make_move(sm.mv);
            if let Some(mut new_score) = backend().gtb_probe_dtm(&pos, ply + 1) {
                if !pos.is_white_move() {
                    new_score = -new_score;
                }
                if new_score == score {
                    pv.push(sm.mv);
                    ply += 1;
                    extended = true;
                    break;
                }
            }
            pos.unmake_move(sm.mv, &ui);
        }
        if !extended {
            break;
        }
    }
}
