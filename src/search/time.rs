//! Time allocation for timed games.
//!
//! The planning formula and its knobs reproduce observed behaviour
//! rather than an idealised model; several parameter interactions at
//! very small time controls are intentional.

use crate::params::parameters;

/// Clock state handed in by the front-end, all in milliseconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeControl {
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: u64,
    pub binc: u64,
    pub moves_to_go: Option<u32>,
    pub movetime: Option<u64>,
    pub infinite: bool,
    pub ponder: bool,
}

/// Soft and hard budgets for one move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePlan {
    /// Do not start a new iteration after this.
    pub soft_ms: u64,
    /// Abort the search outright at this point.
    pub hard_ms: u64,
}

/// Compute the per-move budget from the clock.
/// Returns `None` for infinite or untimed searches.
#[must_use]
pub fn plan_time(tc: &TimeControl, white_to_move: bool) -> Option<TimePlan> {
    if tc.infinite {
        return None;
    }
    if let Some(movetime) = tc.movetime {
        return Some(TimePlan {
            soft_ms: movetime,
            hard_ms: movetime,
        });
    }
    let remaining = if white_to_move { tc.wtime } else { tc.btime }?;
    let inc = if white_to_move { tc.winc } else { tc.binc };

    let p = parameters();
    let max_remaining_moves = p.get_int("TimeMaxRemainingMoves") as u64;
    let buffer = p.get_int("BufferTime") as u64;
    let min_usage = p.get_int("MinTimeUsage") as u64;
    let mut max_usage = p.get_int("MaxTimeUsage") as u64;
    let ponder_hit_rate = p.get_int("TimePonderHitRate") as u64;

    let usable = remaining.saturating_sub(buffer);
    let moves_to_go = u64::from(tc.moves_to_go.unwrap_or(max_remaining_moves as u32))
        .min(max_remaining_moves)
        .max(1);

    let mut planned = usable / (max_remaining_moves - moves_to_go + 1) + inc;
    if tc.ponder {
        // Pondering recovers a fraction of the planned time on average.
        planned = planned * 100 / (100 - ponder_hit_rate).max(1);
    }
    planned = planned.min(usable).max(1);

    if max_usage * planned / 100 > usable {
        max_usage = (usable * 100 / planned.max(1)).max(100);
    }

    Some(TimePlan {
        soft_ms: (planned * min_usage / 100).max(1),
        hard_ms: (planned * max_usage / 100).clamp(1, usable.max(1)),
    })
}
