//! Iterative-deepening principal-variation search.
//!
//! The node pipeline, in order: draw adjudication, mate-distance
//! pruning, transposition probe, tablebase probe, static evaluation,
//! reverse futility pruning, razoring, null-move pruning with
//! verification, internal iterative deepening, then the move loop with
//! late-move pruning, futility pruning, extensions and late-move
//! reductions. Quiescence explores captures (SEE-pruned) and first-ply
//! checks. Depths are measured in fractional plies (`PLY` units).
//!
//! Cancellation is cooperative: a shared stop flag is polled every few
//! hundred nodes, and an aborted search unwinds without trusting any
//! score from the cut subtree.

pub mod time;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::constants::{is_lose_score, is_win_score, MATE0, MAX_SEARCH_DEPTH, PLY};
use crate::eval::Evaluate;
use crate::history::{History, KillerTable};
use crate::movegen::{
    check_evasions, gives_check, in_check, is_legal, legal_moves, pseudo_legal_captures,
    pseudo_legal_moves, square_attacked,
};
use crate::params::parameters;
use crate::position::{piece_value, Position, UndoInfo};
use crate::see::see;
use crate::tt::{BoundType, TranspositionTable, TtEntry};
use crate::types::{pick_best, Move, MoveList, Piece, EMPTY_MOVE};

/// Snapshot of the registry parameters the search reads. Taken once per
/// search while the workers are quiesced.
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub aspiration_window: i32,
    pub root_lmr_move_count: i32,
    pub razor_margin: [i32; 2],
    pub reverse_futility_margin: [i32; 4],
    pub futility_margin: [i32; 4],
    pub lmp_move_count_limit: [i32; 4],
    pub lmr_move_count_limit: [i32; 2],
    pub quiesce_max_sort_moves: i32,
    pub delta_pruning_margin: i32,
    pub use_null_move: bool,
    pub min_probe_depth: i32,
    pub multi_pv: usize,
}

impl SearchParams {
    #[must_use]
    pub fn from_registry() -> Self {
        let p = parameters();
        SearchParams {
            aspiration_window: p.get_int("AspirationWindow"),
            root_lmr_move_count: p.get_int("RootLMRMoveCount"),
            razor_margin: [p.get_int("RazorMargin1"), p.get_int("RazorMargin2")],
            reverse_futility_margin: [
                p.get_int("ReverseFutilityMargin1"),
                p.get_int("ReverseFutilityMargin2"),
                p.get_int("ReverseFutilityMargin3"),
                p.get_int("ReverseFutilityMargin4"),
            ],
            futility_margin: [
                p.get_int("FutilityMargin1"),
                p.get_int("FutilityMargin2"),
                p.get_int("FutilityMargin3"),
                p.get_int("FutilityMargin4"),
            ],
            lmp_move_count_limit: [
                p.get_int("LMPMoveCountLimit1"),
                p.get_int("LMPMoveCountLimit2"),
                p.get_int("LMPMoveCountLimit3"),
                p.get_int("LMPMoveCountLimit4"),
            ],
            lmr_move_count_limit: [
                p.get_int("LMRMoveCountLimit1"),
                p.get_int("LMRMoveCountLimit2"),
            ],
            quiesce_max_sort_moves: p.get_int("QuiesceMaxSortMoves"),
            delta_pruning_margin: p.get_int("DeltaPruningMargin"),
            use_null_move: p.get_bool("UseNullMove"),
            min_probe_depth: p.get_int("MinProbeDepth"),
            multi_pv: p.get_int("MultiPV") as usize,
        }
    }
}

/// Limits for one search invocation.
#[derive(Clone, Default)]
pub struct SearchLimits {
    /// Maximum depth in plies (0 = engine maximum).
    pub max_depth: i32,
    /// Node budget (0 = unlimited).
    pub max_nodes: u64,
    /// Soft time budget: no new iteration after this.
    pub soft_time_ms: Option<u64>,
    /// Hard time budget: abort mid-iteration.
    pub hard_time_ms: Option<u64>,
    /// Restrict the root to these moves (UCI `searchmoves`).
    pub search_moves: Option<Vec<Move>>,
    /// Stop as soon as a mate within this many moves is proven.
    pub mate_in: Option<i32>,
}

/// One completed iteration, for `info` reporting.
#[derive(Clone, Debug)]
pub struct SearchReport {
    pub depth: i32,
    pub seldepth: i32,
    pub multi_pv_index: usize,
    pub score: i32,
    pub bound: BoundType,
    pub nodes: u64,
    pub time_ms: u64,
    pub tb_hits: u64,
    pub hashfull: u32,
    pub pv: Vec<Move>,
}

pub type InfoCallback = Arc<dyn Fn(&SearchReport) + Send + Sync>;

/// Outcome of a finished search.
#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub best_move: Option<Move>,
    pub ponder_move: Option<Move>,
    pub score: i32,
    pub depth: i32,
    pub nodes: u64,
}

/// Stop-flag poll interval in nodes.
const POLL_INTERVAL: u64 = 1024;

/// Per-worker searcher. Owns its position, evaluator and heuristic
/// tables; shares only the transposition table and the stop flag.
pub struct Searcher {
    pub(crate) pos: Position,
    eval: Evaluate,
    tt: Arc<TranspositionTable>,
    history: History,
    killers: KillerTable,
    params: SearchParams,
    stop: Arc<AtomicBool>,

    /// Zobrist hashes of the game so far plus the current search path;
    /// used for repetition adjudication.
    hash_history: Vec<u64>,
    /// Length of the game-history prefix in `hash_history`.
    game_history_len: usize,

    nodes: u64,
    tb_hits: u64,
    seldepth: i32,
    next_poll: u64,
    aborted: bool,
    start: Instant,
    hard_deadline_ms: Option<u64>,
    max_nodes: u64,

    /// Ply-indexed static evals for the improving heuristic.
    eval_stack: [i32; MAX_SEARCH_DEPTH as usize + 2],
    /// Ply-indexed capture squares for recapture extensions.
    capture_sq_stack: [i32; MAX_SEARCH_DEPTH as usize + 2],
    /// Ordered-mode round-robin gate and this worker's id.
    ordered_gate: Option<(Arc<crate::smp::OrderedGate>, usize)>,
}

impl Searcher {
    #[must_use]
    pub fn new(pos: Position, eval: Evaluate, tt: Arc<TranspositionTable>) -> Self {
        Searcher {
            pos,
            eval,
            tt,
            history: History::new(),
            killers: KillerTable::new(),
            params: SearchParams::from_registry(),
            stop: Arc::new(AtomicBool::new(false)),
            hash_history: Vec::new(),
            game_history_len: 0,
            nodes: 0,
            tb_hits: 0,
            seldepth: 0,
            next_poll: POLL_INTERVAL,
            aborted: false,
            start: Instant::now(),
            hard_deadline_ms: None,
            max_nodes: 0,
            eval_stack: [0; MAX_SEARCH_DEPTH as usize + 2],
            capture_sq_stack: [-1; MAX_SEARCH_DEPTH as usize + 2],
            ordered_gate: None,
        }
    }

    /// Serialise this worker through a round-robin gate (ordered mode).
    pub fn set_ordered_gate(
        &mut self,
        gate: Option<(Arc<crate::smp::OrderedGate>, usize)>,
    ) {
        self.ordered_gate = gate;
    }

    /// Install a new root position together with the game's repetition
    /// history (Zobrist hashes of all positions so far, oldest first,
    /// the root included).
    pub fn set_position(&mut self, pos: Position, history: Vec<u64>) {
        self.pos = pos;
        self.hash_history = history;
        self.game_history_len = self.hash_history.len();
    }

    pub fn set_stop_flag(&mut self, stop: Arc<AtomicBool>) {
        self.stop = stop;
    }

    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn set_contempt(&mut self, white_contempt: i32) {
        self.eval.set_contempt(white_contempt);
    }

    #[must_use]
    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    pub fn new_game(&mut self) {
        self.history.clear();
        self.killers.clear();
        self.eval.clear_hash();
    }

    // ========================================================================
    // Iterative deepening driver
    // ========================================================================

    /// Run a search and return the best move found.
    pub fn search(
        &mut self,
        limits: &SearchLimits,
        info_cb: Option<InfoCallback>,
    ) -> SearchResult {
        if let Some((gate, id)) = &self.ordered_gate {
            // Ordered mode: wait for the first slice before touching any
            // shared state.
            gate.acquire(*id);
        }
        self.params = SearchParams::from_registry();
        self.eval.refresh_params();
        self.nodes = 0;
        self.tb_hits = 0;
        self.aborted = false;
        self.next_poll = POLL_INTERVAL;
        self.start = Instant::now();
        self.hard_deadline_ms = limits.hard_time_ms;
        self.max_nodes = limits.max_nodes;
        self.hash_history.truncate(self.game_history_len);
        self.tt.next_generation();
        if !self.pos.has_evaluator() {
            // The evaluator state rides inside the position so that
            // make/unmake keep the accumulators current.
            self.pos
                .connect_evaluator(Some(Box::new(crate::eval::nn::NnState::new())));
        }

        let max_depth = if limits.max_depth > 0 {
            limits.max_depth.min(MAX_SEARCH_DEPTH)
        } else {
            MAX_SEARCH_DEPTH
        };

        // Root move set: explicit restriction, else tablebase-filtered,
        // else all legal moves.
        let mut root_moves: Vec<Move> = match &limits.search_moves {
            Some(ms) => ms.clone(),
            None => match crate::tb::get_search_moves(&mut self.pos) {
                Some(ms) => {
                    self.tb_hits += 1;
                    ms
                }
                None => legal_moves(&mut self.pos).iter().map(|sm| sm.mv).collect(),
            },
        };
        if root_moves.is_empty() {
            return SearchResult::default();
        }

        let multi_pv = self.params.multi_pv.min(root_moves.len()).max(1);
        let mut result = SearchResult {
            best_move: Some(root_moves[0]),
            ..Default::default()
        };
        let mut prev_score = 0i32;

        'deepening: for depth in 1..=max_depth {
            let mut excluded: Vec<Move> = Vec::new();
            for pv_index in 0..multi_pv {
                let candidates: Vec<Move> = root_moves
                    .iter()
                    .copied()
                    .filter(|m| !excluded.contains(m))
                    .collect();
                if candidates.is_empty() {
                    break;
                }
                let (score, best) =
                    self.root_iteration(depth, prev_score, &candidates);
                if self.aborted {
                    break 'deepening;
                }
                let Some(best) = best else { break 'deepening };

                if pv_index == 0 {
                    prev_score = score;
                    result.score = score;
                    result.depth = depth;
                    result.best_move = Some(best);
                    // Keep the best move in front for the next iteration.
                    if let Some(idx) = root_moves.iter().position(|&m| m == best) {
                        root_moves.remove(idx);
                        root_moves.insert(0, best);
                    }
                }
                excluded.push(best);

                if let Some(cb) = &info_cb {
                    let pv = self.extract_pv(best, depth);
                    cb(&SearchReport {
                        depth,
                        seldepth: self.seldepth,
                        multi_pv_index: pv_index,
                        score,
                        bound: BoundType::Exact,
                        nodes: self.nodes,
                        time_ms: self.start.elapsed().as_millis() as u64,
                        tb_hits: self.tb_hits,
                        hashfull: self.tt.hashfull_per_mille(),
                        pv,
                    });
                }

                if let Some(mate_in) = limits.mate_in {
                    if is_win_score(score) && (MATE0 - score) <= mate_in * 2 {
                        break 'deepening;
                    }
                }
            }

            // One root move: no point iterating deeper on a clock.
            if root_moves.len() == 1 && limits.soft_time_ms.is_some() {
                break;
            }
            if let Some(soft) = limits.soft_time_ms {
                if self.start.elapsed().as_millis() as u64 >= soft {
                    break;
                }
            }
            if is_win_score(prev_score.abs()) && depth > 2 * (MATE0 - prev_score.abs()) {
                // The mate is proven deeper than twice its distance.
                break;
            }
        }

        result.nodes = self.nodes;
        result.ponder_move = result.best_move.and_then(|m| self.ponder_from_tt(m));
        result
    }

    /// One aspiration-windowed root search over `candidates`.
    /// Returns the score and best move, or `None` when aborted before
    /// any move finished.
    fn root_iteration(
        &mut self,
        depth: i32,
        prev_score: i32,
        candidates: &[Move],
    ) -> (i32, Option<Move>) {
        let mut delta = self.params.aspiration_window;
        let mut alpha = if depth > 1 {
            (prev_score - delta).max(-MATE0)
        } else {
            -MATE0
        };
        let mut beta = if depth > 1 {
            (prev_score + delta).min(MATE0)
        } else {
            MATE0
        };
        let mut fail_highs = 0u32;

        loop {
            let (score, best) = self.search_root_window(depth, alpha, beta, candidates);
            if self.aborted {
                return (score, best);
            }
            if score <= alpha {
                // Fail low: widen down, keep the upper bound.
                beta = (alpha + beta) / 2;
                delta *= 4;
                alpha = (score - delta).max(-MATE0);
            } else if score >= beta {
                fail_highs += 1;
                if fail_highs >= 2 {
                    // Second fail high: open the window fully.
                    alpha = -MATE0;
                    beta = MATE0;
                } else {
                    delta *= 4;
                    beta = (score + delta).min(MATE0);
                }
            } else {
                return (score, best);
            }
        }
    }

    fn search_root_window(
        &mut self,
        depth: i32,
        mut alpha: i32,
        beta: i32,
        candidates: &[Move],
    ) -> (i32, Option<Move>) {
        let mut best_move = None;
        let mut best_score = -MATE0;
        self.seldepth = 0;

        // Order: previous best first (candidates arrive pre-ordered),
        // then by shallow history/capture scores.
        for (idx, &m) in candidates.iter().enumerate() {
            let gives = gives_check(&self.pos, m);
            let ui = self.pos.make_move(m);
            self.hash_history.push(self.pos.zobrist_hash());
            self.capture_sq_stack[0] = capture_square(&ui, m);

            let new_depth = depth * PLY - PLY + if gives { PLY } else { 0 };
            let mut score;
            if idx == 0 {
                score = -self.alphabeta(new_depth, -beta, -alpha, 1, true, EMPTY_MOVE);
            } else {
                // Root LMR for late quiet moves.
                let mut reduced = new_depth;
                if idx as i32 >= self.params.root_lmr_move_count
                    && depth >= 3
                    && ui.captured_piece.is_empty()
                    && !gives
                {
                    reduced -= PLY;
                }
                score = -self.alphabeta(reduced, -alpha - 1, -alpha, 1, true, EMPTY_MOVE);
                if !self.aborted && score > alpha && reduced < new_depth {
                    score = -self.alphabeta(new_depth, -alpha - 1, -alpha, 1, true, EMPTY_MOVE);
                }
                if !self.aborted && score > alpha && score < beta {
                    score = -self.alphabeta(new_depth, -beta, -alpha, 1, true, EMPTY_MOVE);
                }
            }

            self.hash_history.pop();
            self.pos.unmake_move(m, &ui);

            if self.aborted {
                // Scores from the cut subtree are not trusted.
                return (best_score, best_move);
            }

            if score > best_score {
                best_score = score;
                best_move = Some(m);
            }
            if score > alpha {
                alpha = score;
                if score >= beta {
                    break;
                }
            }
        }

        // Store the root result for PV extraction.
        if let Some(best) = best_move {
            let mut entry = TtEntry::empty();
            entry.set_score(best_score, 0);
            entry.set_depth(depth * PLY);
            entry.set_bound(BoundType::Exact);
            entry.set_best_move(best);
            self.tt.store(self.pos.history_hash(), &entry);
        }
        (best_score, best_move)
    }

    // ========================================================================
    // Alpha-beta
    // ========================================================================

    #[allow(clippy::too_many_lines, clippy::too_many_arguments)]
    fn alphabeta(
        &mut self,
        depth: i32,
        mut alpha: i32,
        mut beta: i32,
        ply: i32,
        allow_null: bool,
        excluded: Move,
    ) -> i32 {
        debug_assert!(alpha < beta);
        let is_pv = beta > alpha + 1;

        self.nodes += 1;
        if self.nodes >= self.next_poll {
            self.next_poll = self.nodes + POLL_INTERVAL;
            if self.should_abort() {
                self.aborted = true;
                return 0;
            }
        }

        if depth < PLY || ply >= MAX_SEARCH_DEPTH {
            return self.quiesce(alpha, beta, ply, 0);
        }

        // Draw adjudication before anything else.
        if let Some(score) = self.draw_score(ply) {
            return score;
        }

        // Mate-distance pruning.
        alpha = alpha.max(-(MATE0 - ply));
        beta = beta.min(MATE0 - ply - 1);
        if alpha >= beta {
            return alpha;
        }

        let hash_key = self.pos.history_hash();
        let checked = in_check(&self.pos);

        // Transposition probe. Cutoffs and stores are disabled while an
        // exclusion search is running; its results describe a different
        // move set.
        let mut tt_move = EMPTY_MOVE;
        let mut tt_eval = None;
        let mut tt_score = 0;
        let mut tt_bound = BoundType::Empty;
        let mut tt_depth = 0;
        if let Some(entry) = self.tt.probe(hash_key) {
            tt_move = entry.best_move();
            tt_eval = entry.static_eval();
            tt_score = entry.score(ply);
            tt_bound = entry.bound();
            tt_depth = entry.depth();
            if !is_pv && excluded.is_empty() && entry.depth() >= depth {
                let score = tt_score;
                let cutoff = match entry.bound() {
                    BoundType::Exact => true,
                    BoundType::Lower => score >= beta,
                    BoundType::Upper => score <= alpha,
                    BoundType::Empty => false,
                };
                if cutoff {
                    return score;
                }
            }
        }

        // Tablebase probe.
        if excluded.is_empty()
            && self.pos.n_pieces() <= crate::tb::max_pieces()
            && depth >= self.params.min_probe_depth * PLY
            && self.pos.castle_mask() == 0
        {
            if let Some(tb) = crate::tb::tb_probe(&mut self.pos, ply, alpha, beta) {
                self.tb_hits += 1;
                let score = tb.score();
                match tb.bound() {
                    BoundType::Exact => {
                        if score == 0 && tb.eval_hint() != 0 {
                            // A frustrated draw: score it inside the
                            // swindle band so the search keeps pressing.
                            let ev = self.eval.eval_pos(&mut self.pos);
                            return crate::eval::swindle_score(ev, tb.eval_hint());
                        }
                        return score;
                    }
                    BoundType::Lower if score >= beta => return score,
                    BoundType::Upper if score <= alpha => return score,
                    _ => {}
                }
            }
        }

        // Static eval, cached in the ply slot.
        let static_eval = if checked {
            -MATE0
        } else {
            tt_eval.unwrap_or_else(|| self.eval.eval_pos(&mut self.pos))
        };
        self.eval_stack[ply as usize] = static_eval;
        let improving = !checked
            && ply >= 2
            && static_eval > self.eval_stack[ply as usize - 2];

        let depth_plies = depth / PLY;

        // Reverse futility pruning (static null move).
        if !is_pv
            && !checked
            && depth_plies <= 4
            && !is_win_score(beta)
            && !is_lose_score(beta)
        {
            let margin = self.params.reverse_futility_margin[(depth_plies - 1).clamp(0, 3) as usize];
            if static_eval - margin >= beta {
                return static_eval;
            }
        }

        // Razoring.
        if !is_pv && !checked && depth_plies <= 2 && tt_move.is_empty() {
            let margin = self.params.razor_margin[(depth_plies - 1).clamp(0, 1) as usize];
            if static_eval + margin <= alpha {
                let score = self.quiesce(alpha, beta, ply, 0);
                if self.aborted || score <= alpha {
                    return score;
                }
            }
        }

        // Null-move pruning.
        if self.params.use_null_move
            && allow_null
            && !is_pv
            && !checked
            && depth_plies >= 2
            && static_eval >= beta
            && self.has_non_pawn_material()
            && !is_lose_score(beta)
        {
            let reduction = 3 * PLY + depth / 6;
            let ui = self.pos.make_null_move();
            self.hash_history.push(self.pos.zobrist_hash());
            let score =
                -self.alphabeta(depth - PLY - reduction, -beta, -beta + 1, ply + 1, false, EMPTY_MOVE);
            self.hash_history.pop();
            self.pos.unmake_null_move(&ui);
            if self.aborted {
                return 0;
            }
            if score >= beta {
                if depth_plies >= 6 {
                    // Verification search at higher depth, null disabled.
                    let v = self.alphabeta(depth - reduction, beta - 1, beta, ply, false, EMPTY_MOVE);
                    if self.aborted {
                        return 0;
                    }
                    if v >= beta {
                        return beta;
                    }
                } else {
                    return beta;
                }
            }
        }

        // Internal iterative deepening.
        if is_pv && tt_move.is_empty() && depth_plies >= 5 && excluded.is_empty() {
            let _ = self.alphabeta(depth - 2 * PLY, alpha, beta, ply, true, EMPTY_MOVE);
            if self.aborted {
                return 0;
            }
            if let Some(entry) = self.tt.probe(hash_key) {
                tt_move = entry.best_move();
            }
        }

        // Singular extension check: if every alternative to the hash
        // move fails well below its score, the hash move is forced and
        // deserves more depth.
        let mut singular_extension = 0;
        if excluded.is_empty()
            && !tt_move.is_empty()
            && depth_plies >= 8
            && tt_bound != BoundType::Upper
            && tt_bound != BoundType::Empty
            && tt_depth >= depth - 3 * PLY
            && !is_win_score(tt_score)
            && !is_lose_score(tt_score)
        {
            let target = tt_score - 2 * depth_plies;
            let v = self.alphabeta(depth / 2, target - 1, target, ply, false, tt_move);
            if self.aborted {
                return 0;
            }
            if v < target {
                singular_extension = PLY;
            }
        }

        // Generate and order.
        let mut moves = if checked {
            check_evasions(&self.pos)
        } else {
            pseudo_legal_moves(&self.pos)
        };
        self.order_moves(&mut moves, tt_move, ply);

        let mut best_score = -MATE0;
        let mut best_move = EMPTY_MOVE;
        let mut bound = BoundType::Upper;
        let mut legal_moves_found = 0u32;
        let mut quiets_tried: Vec<(Piece, Move)> = Vec::new();
        let wtm = self.pos.is_white_move();

        for i in 0..moves.len() {
            pick_best(&mut moves, i);
            let m = moves[i].mv;
            if m == excluded {
                continue;
            }
            let moving_piece = self.pos.get_piece(m.from());
            let captured = self.pos.get_piece(m.to());
            let is_capture = !captured.is_empty()
                || (moving_piece.is_pawn() && Some(m.to()) == self.pos.ep_square());
            let is_quiet = !is_capture && !m.is_promotion();
            let gives = gives_check(&self.pos, m);

            // Late move pruning.
            if !is_pv
                && !checked
                && !gives
                && is_quiet
                && depth_plies <= 4
                && legal_moves_found > 0
                && !improving
            {
                let limit =
                    self.params.lmp_move_count_limit[(depth_plies - 1).clamp(0, 3) as usize];
                if quiets_tried.len() as i32 >= limit {
                    continue;
                }
            }

            // Futility pruning.
            if !is_pv
                && !checked
                && !gives
                && is_quiet
                && depth_plies <= 4
                && legal_moves_found > 0
                && !is_lose_score(alpha)
            {
                let margin =
                    self.params.futility_margin[(depth_plies - 1).clamp(0, 3) as usize];
                if static_eval + margin <= alpha {
                    continue;
                }
            }

            self.tt.prefetch(self.pos.hash_after_move(m));
            let ui = self.pos.make_move(m);
            if square_attacked(&self.pos, self.pos.king_sq(wtm), !wtm) {
                self.pos.unmake_move(m, &ui);
                continue;
            }
            legal_moves_found += 1;
            self.hash_history.push(self.pos.zobrist_hash());
            self.capture_sq_stack[ply as usize] = capture_square(&ui, m);

            // Extensions: a full ply for checks and singular hash moves,
            // half a ply for recaptures and passed-pawn pushes.
            let mut extension = 0;
            if gives {
                extension += PLY;
            } else if m == tt_move && singular_extension > 0 {
                extension += singular_extension;
            } else if ply >= 1
                && !ui.captured_piece.is_empty()
                && self.capture_sq_stack[ply as usize - 1] == m.to().as_index() as i32
            {
                extension += PLY / 2;
            } else if moving_piece.is_pawn() && is_passed_push(&self.pos, m, wtm) {
                extension += PLY / 2;
            }
            let new_depth = depth - PLY + extension;

            // Late move reductions for quiet late moves.
            let mut reduction = 0;
            if is_quiet
                && !checked
                && !gives
                && extension == 0
                && depth_plies >= 3
                && legal_moves_found as i32 > self.params.lmr_move_count_limit[0]
                && self.killers.score(ply, m) == 0
            {
                reduction = PLY;
                if legal_moves_found as i32 > self.params.lmr_move_count_limit[1] {
                    reduction = 2 * PLY;
                }
                if self.history.score(moving_piece, m) > 40 {
                    reduction -= PLY / 2;
                }
            }

            let mut score;
            if legal_moves_found == 1 {
                score = -self.alphabeta(new_depth, -beta, -alpha, ply + 1, true, EMPTY_MOVE);
            } else {
                score =
                    -self.alphabeta(new_depth - reduction, -alpha - 1, -alpha, ply + 1, true, EMPTY_MOVE);
                if !self.aborted && score > alpha && reduction > 0 {
                    score = -self.alphabeta(new_depth, -alpha - 1, -alpha, ply + 1, true, EMPTY_MOVE);
                }
                if !self.aborted && is_pv && score > alpha && score < beta {
                    score = -self.alphabeta(new_depth, -beta, -alpha, ply + 1, true, EMPTY_MOVE);
                }
            }

            self.hash_history.pop();
            self.pos.unmake_move(m, &ui);
            if self.aborted {
                return 0;
            }

            if is_quiet {
                quiets_tried.push((moving_piece, m));
            }

            if score > best_score {
                best_score = score;
                best_move = m;
            }
            if score > alpha {
                alpha = score;
                bound = BoundType::Exact;
                if score >= beta {
                    bound = BoundType::Lower;
                    if is_quiet {
                        self.killers.add_killer(ply, m);
                        self.history.add_success(moving_piece, m);
                        for &(p, q) in &quiets_tried {
                            if q != m {
                                self.history.add_fail(p, q);
                            }
                        }
                    }
                    break;
                }
            }
        }

        if legal_moves_found == 0 {
            if !excluded.is_empty() {
                // Only the excluded move was playable: it is singular.
                return alpha;
            }
            // Checkmate or stalemate. In-check evasion lists are already
            // exhaustive; otherwise re-test for check.
            return if checked || in_check(&self.pos) {
                -(MATE0 - ply)
            } else {
                0
            };
        }

        if excluded.is_empty() {
            let mut entry = TtEntry::empty();
            entry.set_score(best_score, ply);
            entry.set_depth(depth);
            entry.set_bound(bound);
            entry.set_best_move(best_move);
            if !checked {
                entry.set_static_eval(static_eval);
            }
            self.tt.store(hash_key, &entry);
        }

        best_score
    }

    // ========================================================================
    // Quiescence
    // ========================================================================

    fn quiesce(&mut self, mut alpha: i32, beta: i32, ply: i32, qply: i32) -> i32 {
        self.nodes += 1;
        self.seldepth = self.seldepth.max(ply);
        if self.nodes >= self.next_poll {
            self.next_poll = self.nodes + POLL_INTERVAL;
            if self.should_abort() {
                self.aborted = true;
                return 0;
            }
        }
        if ply >= MAX_SEARCH_DEPTH {
            return self.eval.eval_pos(&mut self.pos);
        }
        if let Some(score) = self.draw_score(ply) {
            return score;
        }

        let checked = in_check(&self.pos);
        let mut best_score = -MATE0;
        if !checked {
            let stand_pat = self.eval.eval_pos(&mut self.pos);
            if stand_pat >= beta {
                return stand_pat;
            }
            // Delta pruning: even the largest possible swing cannot
            // reach alpha.
            let best_capture = self.largest_victim_value();
            if stand_pat + best_capture + self.params.delta_pruning_margin <= alpha {
                return stand_pat;
            }
            best_score = stand_pat;
            alpha = alpha.max(stand_pat);
        }

        let mut moves = if checked {
            check_evasions(&self.pos)
        } else {
            let mut captures = pseudo_legal_captures(&self.pos);
            if qply == 0 {
                self.append_checking_quiets(&mut captures);
            }
            captures
        };
        self.order_qmoves(&mut moves);

        let wtm = self.pos.is_white_move();
        let mut legal_found = 0u32;
        let sort_limit = self.params.quiesce_max_sort_moves as usize;

        for i in 0..moves.len() {
            if i < sort_limit {
                pick_best(&mut moves, i);
            }
            let m = moves[i].mv;
            let moving_piece = self.pos.get_piece(m.from());
            let captured = self.pos.get_piece(m.to());
            let is_capture = !captured.is_empty()
                || (moving_piece.is_pawn() && Some(m.to()) == self.pos.ep_square());

            // Skip losing captures.
            if !checked && is_capture && !m.is_promotion() && see(&mut self.pos, m, -1, 0) < 0 {
                continue;
            }

            let ui = self.pos.make_move(m);
            if square_attacked(&self.pos, self.pos.king_sq(wtm), !wtm) {
                self.pos.unmake_move(m, &ui);
                continue;
            }
            legal_found += 1;
            self.hash_history.push(self.pos.zobrist_hash());
            let score = -self.quiesce(-beta, -alpha, ply + 1, qply + 1);
            self.hash_history.pop();
            self.pos.unmake_move(m, &ui);
            if self.aborted {
                return 0;
            }

            if score > best_score {
                best_score = score;
            }
            if score > alpha {
                alpha = score;
                if score >= beta {
                    break;
                }
            }
        }

        if checked && legal_found == 0 {
            return -(MATE0 - ply);
        }
        best_score
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn should_abort(&self) -> bool {
        if let Some((gate, id)) = &self.ordered_gate {
            gate.yield_turn(*id);
        }
        if self.stop.load(Ordering::Acquire) {
            return true;
        }
        if self.max_nodes > 0 && self.nodes >= self.max_nodes {
            return true;
        }
        if let Some(hard) = self.hard_deadline_ms {
            if self.start.elapsed().as_millis() as u64 >= hard {
                return true;
            }
        }
        false
    }

    /// Draw adjudication: 50-move rule (unless the side to move is
    /// mated on the spot), repetition within the tree, threefold against
    /// the game history, and insufficient material.
    fn draw_score(&mut self, ply: i32) -> Option<i32> {
        if ply == 0 {
            return None;
        }
        if self.pos.half_move_clock() >= 100 {
            // A mate on the board trumps the clock.
            if in_check(&self.pos) {
                let mut evasions = check_evasions(&self.pos);
                crate::movegen::remove_illegal(&mut self.pos, &mut evasions);
                if evasions.is_empty() {
                    return Some(-(MATE0 - ply));
                }
            }
            return Some(0);
        }
        let current = *self.hash_history.last()?;
        let len = self.hash_history.len();
        // Walk backwards two plies at a time; stop at zeroing moves.
        let mut reps = 0;
        let clock = usize::from(self.pos.half_move_clock());
        let reach = clock.min(len.saturating_sub(1));
        let mut i = 2;
        while i <= reach {
            if self.hash_history[len - 1 - i] == current {
                let in_tree = len - 1 - i >= self.game_history_len;
                if in_tree {
                    // Twofold inside the search tree is a draw.
                    return Some(0);
                }
                reps += 1;
                if reps >= 2 {
                    return Some(0);
                }
            }
            i += 2;
        }
        if self.insufficient_material() {
            return Some(0);
        }
        None
    }

    fn insufficient_material(&self) -> bool {
        let pos = &self.pos;
        if pos.piece_type_bb_multi(&[
            Piece::WPawn,
            Piece::BPawn,
            Piece::WRook,
            Piece::BRook,
            Piece::WQueen,
            Piece::BQueen,
        ]) != 0
        {
            return false;
        }
        let minors = pos.piece_type_bb_multi(&[
            Piece::WBishop,
            Piece::BBishop,
            Piece::WKnight,
            Piece::BKnight,
        ]);
        let n_minors = crate::bitboard::bit_count(minors);
        if n_minors <= 1 {
            return true;
        }
        let knights =
            pos.piece_type_bb_multi(&[Piece::WKnight, Piece::BKnight]);
        if knights == 0 && n_minors == 2 {
            let bishops = pos.piece_type_bb_multi(&[Piece::WBishop, Piece::BBishop]);
            let dark = bishops & crate::bitboard::DARK_SQUARES;
            return dark == 0 || dark == bishops;
        }
        false
    }

    fn has_non_pawn_material(&self) -> bool {
        let wtm = self.pos.is_white_move();
        let (mtrl, pawns) = if wtm {
            (self.pos.w_mtrl(), self.pos.w_mtrl_pawns())
        } else {
            (self.pos.b_mtrl(), self.pos.b_mtrl_pawns())
        };
        mtrl > pawns
    }

    /// Assign ordering scores: TT move, winning captures by MVV/LVA,
    /// killers, history, losing captures last.
    fn order_moves(&mut self, moves: &mut MoveList, tt_move: Move, ply: i32) {
        for sm in moves.iter_mut() {
            let m = sm.mv;
            if m == tt_move {
                sm.score = 1_000_000;
                continue;
            }
            let captured = self.pos.get_piece(m.to());
            let mover = self.pos.get_piece(m.from());
            if !captured.is_empty() || (mover.is_pawn() && Some(m.to()) == self.pos.ep_square()) {
                let victim = if captured.is_empty() {
                    100
                } else {
                    piece_value(captured)
                };
                let exchange = see(&mut self.pos, m, -1, 0);
                if exchange >= 0 {
                    sm.score = 100_000 + victim * 16 - piece_value(mover) / 64;
                } else {
                    sm.score = -100_000 + victim;
                }
                continue;
            }
            if m.is_promotion() {
                sm.score = 90_000 + piece_value(m.promote_to());
                continue;
            }
            let killer = self.killers.score(ply, m);
            if killer > 0 {
                sm.score = 80_000 + killer;
            } else {
                sm.score = self.history.score(mover, m);
            }
        }
    }

    fn order_qmoves(&mut self, moves: &mut MoveList) {
        for sm in moves.iter_mut() {
            let m = sm.mv;
            let captured = self.pos.get_piece(m.to());
            let mover = self.pos.get_piece(m.from());
            let victim = if captured.is_empty() {
                if mover.is_pawn() && Some(m.to()) == self.pos.ep_square() {
                    100
                } else {
                    0
                }
            } else {
                piece_value(captured)
            };
            sm.score = victim * 16 - piece_value(mover) / 64;
        }
    }

    /// Non-capture check-giving moves, appended for the first ply of
    /// quiescence.
    fn append_checking_quiets(&mut self, moves: &mut MoveList) {
        let all = pseudo_legal_moves(&self.pos);
        for sm in &all {
            let m = sm.mv;
            let captured = self.pos.get_piece(m.to());
            let mover = self.pos.get_piece(m.from());
            let is_capture = !captured.is_empty()
                || (mover.is_pawn() && Some(m.to()) == self.pos.ep_square());
            if !is_capture && !m.is_promotion() && gives_check(&self.pos, m) {
                if moves.try_push(crate::types::ScoredMove { mv: m, score: 0 }).is_err() {
                    break;
                }
            }
        }
    }

    fn largest_victim_value(&self) -> i32 {
        let enemy_wtm = !self.pos.is_white_move();
        let pieces: [Piece; 5] = if enemy_wtm {
            [
                Piece::WQueen,
                Piece::WRook,
                Piece::WBishop,
                Piece::WKnight,
                Piece::WPawn,
            ]
        } else {
            [
                Piece::BQueen,
                Piece::BRook,
                Piece::BBishop,
                Piece::BKnight,
                Piece::BPawn,
            ]
        };
        for p in pieces {
            if self.pos.piece_type_bb(p) != 0 {
                return piece_value(p);
            }
        }
        0
    }

    /// Walk the TT to recover the principal variation after `best`.
    fn extract_pv(&mut self, best: Move, max_len: i32) -> Vec<Move> {
        let mut pv = vec![best];
        let mut undo: Vec<(Move, UndoInfo)> = Vec::new();
        let ui = self.pos.make_move(best);
        undo.push((best, ui));

        let mut seen = vec![self.pos.history_hash()];
        while (pv.len() as i32) < max_len.max(2) * 2 {
            let Some(entry) = self.tt.probe(self.pos.history_hash()) else {
                break;
            };
            let m = entry.best_move();
            if m.is_empty() {
                break;
            }
            let checked = in_check(&self.pos);
            if !is_legal(&mut self.pos, m, checked) {
                break;
            }
            let ui = self.pos.make_move(m);
            undo.push((m, ui));
            pv.push(m);
            let h = self.pos.history_hash();
            if seen.contains(&h) {
                break;
            }
            seen.push(h);
        }

        for (m, ui) in undo.into_iter().rev() {
            self.pos.unmake_move(m, &ui);
        }
        pv
    }

    fn ponder_from_tt(&mut self, best: Move) -> Option<Move> {
        let pv = self.extract_pv(best, 2);
        pv.get(1).copied()
    }
}

/// True if the pawn that just arrived on `m.to()` is a passed pawn on
/// the opponent's half of the board. Called on the position after the
/// move, for the side that made it.
fn is_passed_push(pos: &Position, m: Move, white: bool) -> bool {
    let to = m.to();
    let rank_ok = if white { to.y() >= 4 } else { to.y() <= 3 };
    if !rank_ok {
        return false;
    }
    let enemy_pawns = pos.piece_type_bb(if white { Piece::BPawn } else { Piece::WPawn });
    crate::attacks::pawn_blocker_mask(to, white) & enemy_pawns == 0
}

fn capture_square(ui: &UndoInfo, m: Move) -> i32 {
    if ui.captured_piece.is_empty() {
        -1
    } else {
        m.to().as_index() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::nn::NetData;

    fn make_searcher(fen: &str) -> Searcher {
        let pos: Position = fen.parse().expect("valid fen");
        let eval = Evaluate::new(NetData::from_embedded());
        let tt = Arc::new(TranspositionTable::new(8));
        let mut searcher = Searcher::new(pos.clone(), eval, tt);
        searcher.set_position(pos, Vec::new());
        searcher
    }

    fn depth_limits(depth: i32) -> SearchLimits {
        SearchLimits {
            max_depth: depth,
            ..Default::default()
        }
    }

    #[test]
    fn finds_mate_in_one() {
        let mut s = make_searcher("6k1/5ppp/8/8/8/8/8/1Q2K3 w - - 0 1");
        let r = s.search(&depth_limits(4), None);
        assert_eq!(r.best_move.unwrap().to_string(), "b1b8");
        assert!(is_win_score(r.score), "score {}", r.score);
    }

    #[test]
    fn finds_mate_in_two() {
        // Classic back-rank battery.
        let mut s = make_searcher("3r2k1/5ppp/8/8/8/8/1R6/1R4K1 w - - 0 1");
        let r = s.search(&depth_limits(6), None);
        assert!(is_win_score(r.score), "score {}", r.score);
    }

    #[test]
    fn mate_score_encodes_distance() {
        let mut s = make_searcher("6k1/5ppp/8/8/8/8/8/1Q2K3 w - - 0 1");
        let r = s.search(&depth_limits(6), None);
        // Mate in 1 ply.
        assert_eq!(r.score, MATE0 - 1);
    }

    #[test]
    fn stalemate_is_draw() {
        // Black to move is stalemated after any non-progress; search the
        // stalemating side: white plays into a draw at best.
        let mut s = make_searcher("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1");
        let r = s.search(&depth_limits(4), None);
        // Black has no legal moves: stalemate, no best move.
        assert!(r.best_move.is_none());
    }

    #[test]
    fn fifty_move_rule_draws() {
        let mut s = make_searcher("4k3/8/8/8/8/8/R7/4K3 w - - 99 80");
        let r = s.search(&depth_limits(4), None);
        // Any quiet rook move hits the 100-ply clock: draw score.
        assert_eq!(r.score, 0);
    }

    #[test]
    fn mate_in_one_beats_fifty_move_rule() {
        let mut s = make_searcher("3k4/1R6/R7/8/8/8/8/1K6 w - - 100 80");
        let r = s.search(&depth_limits(6), None);
        assert!(is_win_score(r.score), "score {}", r.score);
        assert_eq!(r.score, MATE0 - 1);
    }

    #[test]
    fn single_thread_search_is_deterministic() {
        let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3";
        let run = || {
            let mut s = make_searcher(fen);
            let r = s.search(&depth_limits(6), None);
            (r.best_move, r.score)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn stop_flag_interrupts() {
        let mut s = make_searcher(crate::position::START_FEN);
        s.stop_flag().store(true, Ordering::Release);
        let r = s.search(&depth_limits(30), None);
        // The first shallow iterations may complete before the poll
        // fires; the search must still return promptly.
        assert!(r.depth <= 3);
    }

    #[test]
    fn node_limit_bounds_search() {
        let mut s = make_searcher(crate::position::START_FEN);
        let limits = SearchLimits {
            max_depth: 30,
            max_nodes: 20_000,
            ..Default::default()
        };
        let r = s.search(&limits, None);
        assert!(r.nodes < 20_000 + POLL_INTERVAL * 2);
        assert!(r.best_move.is_some());
    }

    #[test]
    fn threefold_repetition_is_draw() {
        // Shuffling rooks: the searcher should see repetition draws.
        let mut s = make_searcher("7k/5RR1/8/8/8/8/q3q3/2K5 w - - 0 1");
        let r = s.search(&depth_limits(8), None);
        // White is down two queens but can force perpetual shuffling:
        // best play holds a draw.
        assert_eq!(r.score, 0, "expected draw, got {}", r.score);
    }

    #[test]
    fn searchmoves_restricts_root() {
        let mut s = make_searcher(crate::position::START_FEN);
        let only = crate::movegen::parse_uci_move(&s.pos, "a2a3").unwrap();
        let limits = SearchLimits {
            max_depth: 3,
            search_moves: Some(vec![only]),
            ..Default::default()
        };
        let r = s.search(&limits, None);
        assert_eq!(r.best_move, Some(only));
    }

    #[test]
    fn reports_arrive_per_iteration() {
        use std::sync::atomic::AtomicUsize;
        let mut s = make_searcher(crate::position::START_FEN);
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&count);
        let cb: InfoCallback = Arc::new(move |report| {
            assert!(report.depth >= 1);
            assert!(!report.pv.is_empty());
            c2.fetch_add(1, Ordering::SeqCst);
        });
        let _ = s.search(&depth_limits(5), Some(cb));
        assert!(count.load(Ordering::SeqCst) >= 5);
    }
}
