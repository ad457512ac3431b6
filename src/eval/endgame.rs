//! Special-case endgame knowledge.
//!
//! For a fixed set of material configurations the network score is
//! replaced or rescaled using closed-form rules: generic mating drives,
//! the KBN mating corner, wrong-bishop rook-pawn draws, Philidor-style
//! rook endings and a handful of fortress shapes. Handlers are written
//! for White as the strong side; Black-strong configurations go through
//! the same handlers with a mirrored view and a negated score.
//!
//! All scores are from White's point of view.

use crate::bitboard::{bit_count, first_bit, DARK_SQUARES};
use crate::material::{MatId, MI_BB, MI_BN, MI_BP, MI_BQ, MI_BR, MI_WB, MI_WN, MI_WP, MI_WQ, MI_WR};
use crate::params::parameters;
use crate::position::Position;
use crate::types::{Piece, Square};

/// True if the current material configuration has special handling.
#[must_use]
pub fn is_end_game_material(mat_id: MatId) -> bool {
    let id = mat_id.value();
    SPECIAL_IDS.iter().any(|&f| f(id))
}

type IdPredicate = fn(u64) -> bool;

/// Material ids with special knowledge, either orientation.
static SPECIAL_IDS: &[IdPredicate] = &[
    |id| id == 0,                                        // KK
    |id| id == MI_WN || id == MI_BN,                     // KNK
    |id| id == MI_WB || id == MI_BB,                     // KBK
    |id| id == MI_WQ || id == MI_BQ,                     // KQK
    |id| id == MI_WR || id == MI_BR,                     // KRK
    |id| id == MI_WP || id == MI_BP,                     // KPK
    |id| id == MI_WQ + MI_BP || id == MI_BQ + MI_WP,     // KQKP
    |id| id == MI_WR + MI_BP || id == MI_BR + MI_WP,     // KRKP
    |id| id == MI_WB + MI_WN || id == MI_BB + MI_BN,     // KBNK
    |id| id == 2 * MI_WB || id == 2 * MI_BB,             // KBBK
    |id| id == MI_WR + MI_BB || id == MI_BR + MI_WB,     // KRKB
    |id| id == MI_WR + MI_BN || id == MI_BR + MI_WN,     // KRKN
    |id| id == MI_WR + MI_WP + MI_BR || id == MI_BR + MI_BP + MI_WR, // KRPKR
    |id| {
        id == MI_WR + 2 * MI_WP + MI_BR + MI_BP || id == MI_BR + 2 * MI_BP + MI_WR + MI_WP
    }, // KRPPKRP
    |id| id == MI_WQ + MI_BR + MI_BP || id == MI_BQ + MI_WR + MI_WP, // KQKRP
    |id| id == MI_WB + MI_WP + MI_BB || id == MI_BB + MI_BP + MI_WB, // KBPKB
    |id| id == MI_WB + MI_WP + MI_BN || id == MI_BB + MI_BP + MI_WN, // KBPKN
    |id| id == MI_WN + MI_WP || id == MI_BN + MI_BP,     // KNPK
    |id| id == MI_WN + MI_WP + MI_BB || id == MI_BN + MI_BP + MI_WB, // KNPKB
    |id| id == MI_WB + MI_WP || id == MI_BB + MI_BP,     // KBPK (wrong bishop)
    |id| id == MI_WB + MI_WP + MI_BP || id == MI_BB + MI_BP + MI_WP, // KBPKP fortress
];

/// A board view that may be colour-mirrored; all handlers see White as
/// the strong side.
struct View<'a> {
    pos: &'a Position,
    mirrored: bool,
}

impl View<'_> {
    /// Material difference for the strong (viewed-white) side.
    fn mtrl_diff(&self) -> i32 {
        let d = self.pos.w_mtrl() - self.pos.b_mtrl();
        if self.mirrored {
            -d
        } else {
            d
        }
    }

    fn sq(&self, piece: Piece) -> Square {
        let p = if self.mirrored { piece.mirror() } else { piece };
        let sq = first_bit(self.pos.piece_type_bb(p));
        if self.mirrored {
            sq.mirror_y()
        } else {
            sq
        }
    }

    fn pawn_bb(&self, white: bool) -> u64 {
        let p = if white == !self.mirrored {
            Piece::WPawn
        } else {
            Piece::BPawn
        };
        let bb = self.pos.piece_type_bb(p);
        if self.mirrored {
            bb.swap_bytes()
        } else {
            bb
        }
    }

    fn white_move(&self) -> bool {
        self.pos.is_white_move() != self.mirrored
    }
}

/// Apply endgame knowledge to `score` (White's point of view).
#[must_use]
pub fn end_game_eval(pos: &Position, score: i32) -> i32 {
    let id = pos.material_id().value();

    // Drawn bare-material cases.
    if id == 0 || id == MI_WN || id == MI_BN || id == MI_WB || id == MI_BB {
        return 0;
    }

    if let Some(v) = eval_oriented(pos, score, false) {
        return v;
    }
    if let Some(v) = eval_oriented(pos, -score, true).map(|v| -v) {
        return v;
    }
    score
}

/// Handlers with White as the strong side; `mirrored` flips the board.
fn eval_oriented(pos: &Position, score: i32, mirrored: bool) -> Option<i32> {
    let raw = pos.material_id();
    let id = if mirrored { raw.mirror() } else { raw }.value();
    let view = View { pos, mirrored };

    if id == MI_WQ || id == MI_WR {
        let wk = view.sq(Piece::WKing);
        let bk = view.sq(Piece::BKing);
        return Some(score.max(view.mtrl_diff()) + mate_eval(wk, bk));
    }
    if id == 2 * MI_WB {
        let bishops = if mirrored {
            pos.piece_type_bb(Piece::BBishop)
        } else {
            pos.piece_type_bb(Piece::WBishop)
        };
        let dark = bit_count(bishops & DARK_SQUARES);
        if dark == 0 || dark == bit_count(bishops) {
            return Some(0); // same-coloured bishops cannot mate
        }
        return Some(
            score.max(view.mtrl_diff()) + mate_eval(view.sq(Piece::WKing), view.sq(Piece::BKing)),
        );
    }
    if id == MI_WB + MI_WN {
        return Some(kbnk_eval(&view, score));
    }
    if id == MI_WP {
        return Some(kpk_eval(&view));
    }
    if id == MI_WR + MI_BP {
        return Some(krkp_eval(&view, score));
    }
    if id == MI_WQ + MI_BP {
        return Some(kqkp_eval(&view, score));
    }
    if id == MI_WR + MI_BB {
        // Generally drawn; keep a nudge for the rook side.
        return Some(score / 8);
    }
    if id == MI_WR + MI_BN {
        let bk = view.sq(Piece::BKing);
        let n = view.sq(Piece::BKnight);
        // A knight separated from its king tends to be lost.
        let separation = bk.distance(n) as i32;
        return Some(score / 8 + (separation - 3).max(0) * 8);
    }
    if id == MI_WR + MI_WP + MI_BR {
        return Some(krpkr_eval(&view, score));
    }
    if id == MI_WQ + MI_BR + MI_BP {
        return Some(kqkrp_eval(&view, score));
    }
    if id == MI_WB + MI_WP {
        return Some(kbpk_eval(&view, score));
    }
    if id == MI_WB + MI_WP + MI_BB {
        return Some(kbpkb_eval(&view, score));
    }
    if id == MI_WB + MI_WP + MI_BN {
        // The knight can usually sacrifice itself for the pawn.
        return Some(score.min(score / 4 + 30));
    }
    if id == MI_WN + MI_WP {
        return Some(knpk_eval(&view, score));
    }
    if id == MI_WN + MI_WP + MI_BB {
        // Bishop controls the promotion path in most shapes.
        return Some(score / 8);
    }
    if id == MI_WR + 2 * MI_WP + MI_BR + MI_BP {
        // Extra-pawn rook ending: winning chances but heavily drawish.
        return Some(score / 2 + 20);
    }
    if id == MI_WB + MI_WP + MI_BP {
        return Some(kbp_kp_eval(&view, score));
    }
    None
}

/// KBP vs KP: a blocked pawn whose blocker the bishop can never attack,
/// with the defending king holding the blockade, is a fortress.
fn kbp_kp_eval(view: &View<'_>, score: i32) -> i32 {
    let bishop = view.sq(Piece::WBishop);
    let w_pawn = view.sq(Piece::WPawn);
    let b_pawn = view.sq(Piece::BPawn);
    let bk = view.sq(Piece::BKing);
    if w_pawn.y() < 7 && b_pawn == w_pawn.offset(8) {
        let blocker_wrong_colour = b_pawn.is_dark() != bishop.is_dark();
        if blocker_wrong_colour && bk.distance(b_pawn) <= 1 {
            return 0;
        }
    }
    score / 2
}

/// Drive the losing king towards the edge and the winning king close.
fn mate_eval(wk: Square, bk: Square) -> i32 {
    let centre_dist = |sq: Square| {
        let dx = (sq.x() as i32 * 2 - 7).abs();
        let dy = (sq.y() as i32 * 2 - 7).abs();
        dx.max(dy)
    };
    470 + centre_dist(bk) * 28 - wk.distance(bk) as i32 * 12
}

/// KBN vs K: mate only works in the corners of the bishop's colour.
fn kbnk_eval(view: &View<'_>, score: i32) -> i32 {
    let wk = view.sq(Piece::WKing);
    let bk = view.sq(Piece::BKing);
    let bishop = view.sq(Piece::WBishop);
    // The table measures distance to the light corners h1/a8; mirror the
    // defending king left-right when the bishop is dark-squared so the
    // mating corners line up with the table.
    let target_bk = if bishop.is_dark() { bk.mirror_x() } else { bk };
    let corner_dist = DIST_TO_H1_A8[target_bk.x()][target_bk.y()];
    score.max(0) + 300 + (7 - corner_dist) * 28 - wk.distance(bk) as i32 * 12
}

/// Chebyshev distance to the h1-a8 diagonal corners (h1 and a8).
static DIST_TO_H1_A8: [[i32; 8]; 8] = {
    let mut t = [[0i32; 8]; 8];
    let mut x = 0;
    while x < 8 {
        let mut y = 0;
        while y < 8 {
            let dh1 = if 7 - x > y { 7 - x } else { y } as i32;
            let da8 = if x > 7 - y { x } else { 7 - y } as i32;
            t[x][y] = if dh1 < da8 { dh1 } else { da8 };
            y += 1;
        }
        x += 1;
    }
    t
};

/// King and pawn vs king, closed form. Not a bitbase: the rule of the
/// square plus king-in-front rules cover the bulk of positions; the
/// remainder lean on the search.
fn kpk_eval(view: &View<'_>) -> i32 {
    let wk = view.sq(Piece::WKing);
    let bk = view.sq(Piece::BKing);
    let pawn = view.sq(Piece::WPawn);
    let wtm = view.white_move();

    // Rook pawn with the defender in the corner is a known draw.
    if pawn.x() == 0 || pawn.x() == 7 {
        let corner = Square::from_xy(pawn.x(), 7);
        if bk.distance(corner) <= 1 || (bk.x() == pawn.x() && bk.y() > pawn.y()) {
            return 0;
        }
    }

    let promo_sq = Square::from_xy(pawn.x(), 7);
    let pawn_steps = (7 - pawn.y()) as i32 - i32::from(pawn.y() == 1);
    let bk_steps = bk.distance(promo_sq) as i32 - i32::from(!wtm);

    // Unreachable pawn: promotion decides.
    if bk_steps > pawn_steps {
        return 700 + (pawn.y() as i32) * 12;
    }

    // King two squares in front of the pawn (not a rook pawn) wins.
    if pawn.x() != 0 && pawn.x() != 7 {
        let in_front = wk.x().abs_diff(pawn.x()) <= 1 && wk.y() >= pawn.y() + 2 && wk.y() <= 7;
        let opposition = wk.y() > bk.y() || (wtm != (wk.distance(bk) % 2 == 0));
        if in_front && wk.y() as i32 - pawn.y() as i32 <= 3 && opposition {
            return 600 + (pawn.y() as i32) * 12;
        }
    }

    // Otherwise give a modest pull for the pawn side; the search sorts
    // out the rest.
    30 + (pawn.y() as i32) * 8
}

/// KR vs KP: usually a win for the rook, but a far-advanced supported
/// pawn with a distant strong king draws or even wins for the pawn.
fn krkp_eval(view: &View<'_>, score: i32) -> i32 {
    let wk = view.sq(Piece::WKing);
    let bk = view.sq(Piece::BKing);
    let pawn = view.sq(Piece::BPawn);
    let promo = Square::from_xy(pawn.x(), 0);
    let pawn_dist = pawn.y() as i32;
    let king_supports = bk.distance(pawn) <= 1 && bk.distance(promo) <= 2;
    let rook_bonus = parameters().get_int("RookVsPawnBonus");

    if pawn_dist <= 2 && king_supports && wk.distance(promo) > 3 {
        // Pawn about to promote with king cover.
        return score / 8;
    }
    score.max(view.mtrl_diff()) + rook_bonus - (wk.distance(pawn) as i32 * 4).min(24)
        + pawn_dist * 8
}

/// KQ vs KP: drawn fortresses with a/c/f/h pawns on the seventh.
fn kqkp_eval(view: &View<'_>, score: i32) -> i32 {
    let wk = view.sq(Piece::WKing);
    let pawn = view.sq(Piece::BPawn);
    let bk = view.sq(Piece::BKing);
    let fortress_file = matches!(pawn.x(), 0 | 2 | 5 | 7);
    if fortress_file && pawn.y() == 1 && bk.distance(pawn) <= 1 && wk.distance(pawn) > 4 {
        return score / 16;
    }
    score.max(0) + 300 - wk.distance(pawn) as i32 * 10
}

/// KRP vs KR: the Philidor defence draws when the defending king stands
/// on the promotion path.
fn krpkr_eval(view: &View<'_>, score: i32) -> i32 {
    let pawn = view.sq(Piece::WPawn);
    let bk = view.sq(Piece::BKing);
    let path_blocked = bk.x().abs_diff(pawn.x()) <= 1 && bk.y() > pawn.y();
    if path_blocked {
        return score / 8;
    }
    let bonus = parameters().get_int("RookVsPawnBonus") / 2;
    score / 2 + bonus + (pawn.y() as i32) * 6
}

/// KQ vs KR+P: rook protected by the pawn with the king nearby is a
/// fortress.
fn kqkrp_eval(view: &View<'_>, score: i32) -> i32 {
    let rook = view.sq(Piece::BRook);
    let bk = view.sq(Piece::BKing);
    let pawns = view.pawn_bb(false);
    // A black pawn defends the rook if the rook stands on a square that
    // a white pawn would attack from the pawn's square, i.e. the pawn is
    // one of the squares a white pawn on the rook square attacks.
    let defended = (crate::attacks::pawn_attacks(rook, true) & pawns) != 0;
    if defended && bk.distance(rook) <= 2 {
        return score / 16;
    }
    score
}

/// Lone bishop and pawn: the wrong-colour rook pawn is a draw when the
/// defending king reaches the corner.
fn kbpk_eval(view: &View<'_>, score: i32) -> i32 {
    let bishop = view.sq(Piece::WBishop);
    let pawn = view.sq(Piece::WPawn);
    let bk = view.sq(Piece::BKing);
    if pawn.x() == 0 || pawn.x() == 7 {
        let corner = Square::from_xy(pawn.x(), 7);
        let wrong_bishop = corner.is_dark() != bishop.is_dark();
        if wrong_bishop && bk.distance(corner) <= 1 {
            return 0;
        }
    }
    score.max(0) + 200 + (pawn.y() as i32) * 10
}

/// KBP vs KB: opposite-coloured bishops blockade; same colour usually
/// converts unless the defender controls the path.
fn kbpkb_eval(view: &View<'_>, score: i32) -> i32 {
    let w_bishop = view.sq(Piece::WBishop);
    let b_bishop = view.sq(Piece::BBishop);
    let pawn = view.sq(Piece::WPawn);
    let bk = view.sq(Piece::BKing);
    if w_bishop.is_dark() != b_bishop.is_dark() {
        return score / 8;
    }
    if bk.x().abs_diff(pawn.x()) <= 1 && bk.y() > pawn.y() {
        return score / 8;
    }
    score / 2
}

/// Knight and pawn: the a7/h7 pawn cannot be escorted when the defender
/// holds the corner.
fn knpk_eval(view: &View<'_>, score: i32) -> i32 {
    let pawn = view.sq(Piece::WPawn);
    let bk = view.sq(Piece::BKing);
    if (pawn.x() == 0 || pawn.x() == 7) && pawn.y() == 6 {
        let corner = Square::from_xy(pawn.x(), 7);
        if bk.distance(corner) <= 1 {
            return 0;
        }
    }
    score.max(0) + 100 + (pawn.y() as i32) * 10
}
