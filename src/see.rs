//! Static exchange evaluation.
//!
//! Resolves the capture sequence on one square, each side recapturing
//! with its least valuable attacker, and returns the material balance
//! for the side making the first capture. X-ray attackers are uncovered
//! automatically because sliders are queried against the shrinking
//! occupancy.
//!
//! The `alpha`/`beta` window is an admissibility contract, not a
//! requirement: any return value on the correct side of the window is
//! acceptable, and the exact value always is. The implementation stops
//! resolving once further exchanges cannot change the sign.

use crate::bitboard::{first_bit, square_bb};
use crate::movegen::attackers_of_colour;
use crate::position::{piece_value, Position, KING_SEE_VALUE};
use crate::types::{Move, Piece};

fn see_value(piece: Piece) -> i32 {
    if piece.is_king() {
        KING_SEE_VALUE
    } else {
        piece_value(piece)
    }
}

/// Exchange value of the capture `m` in centipawns for the side to move.
/// `see(m, -inf, inf)` is the exact exchange score; windowed calls may
/// return any admissible value with the same relation to the window.
#[must_use]
pub fn see(pos: &mut Position, m: Move, alpha: i32, beta: i32) -> i32 {
    debug_assert!(alpha < beta);
    const MAX_EXCHANGE: usize = 32;

    let captured = pos.get_piece(m.to());
    let is_ep = pos.get_piece(m.from()).is_pawn() && Some(m.to()) == pos.ep_square();
    let first_gain = if is_ep { 100 } else { see_value(captured) };

    // Apply the first capture with the cheap SEE make; the swap loop
    // below then only removes attackers from a local occupancy copy.
    let ui = pos.make_see_move(m);

    let target = m.to();
    let mut gain = [0i32; MAX_EXCHANGE];
    let mut depth = 0usize;
    gain[0] = first_gain;

    let mut occupied = pos.occupied_bb();
    let mut attacker_val = see_value(pos.get_piece(target));
    let mut side = pos.is_white_move();

    loop {
        let attackers = attackers_of_colour(pos, target, occupied, side) & occupied;
        if attackers == 0 {
            break;
        }
        let (piece, from_bb) = least_valuable(pos, attackers, side);

        // A king cannot recapture while the square is still defended.
        if piece.is_king() {
            let defenders = attackers_of_colour(pos, target, occupied, !side) & occupied;
            if defenders != 0 {
                break;
            }
        }

        depth += 1;
        if depth + 1 >= MAX_EXCHANGE {
            break;
        }
        gain[depth] = attacker_val - gain[depth - 1];

        // Both stopping and continuing lose for the side to move here;
        // deeper exchanges cannot change the result.
        if (-gain[depth - 1]).max(gain[depth]) < 0 {
            break;
        }

        occupied ^= from_bb;
        attacker_val = see_value(piece);
        side = !side;
    }

    while depth > 0 {
        depth -= 1;
        gain[depth] = -(-gain[depth]).max(gain[depth + 1]);
    }

    pos.unmake_see_move(m, &ui);
    gain[0]
}

fn least_valuable(pos: &Position, attackers: u64, white: bool) -> (Piece, u64) {
    let order = if white {
        [
            Piece::WPawn,
            Piece::WKnight,
            Piece::WBishop,
            Piece::WRook,
            Piece::WQueen,
            Piece::WKing,
        ]
    } else {
        [
            Piece::BPawn,
            Piece::BKnight,
            Piece::BBishop,
            Piece::BRook,
            Piece::BQueen,
            Piece::BKing,
        ]
    };
    for piece in order {
        let subset = attackers & pos.piece_type_bb(piece);
        if subset != 0 {
            return (piece, square_bb(first_bit(subset)));
        }
    }
    unreachable!("least_valuable called with empty attacker set");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::parse_uci_move;

    const INF: i32 = 30000;

    fn pos(fen: &str) -> Position {
        fen.parse().expect("valid fen")
    }

    fn see_of(fen: &str, mv: &str) -> i32 {
        let mut p = pos(fen);
        let m = parse_uci_move(&p, mv).expect("legal move");
        see(&mut p, m, -INF, INF)
    }

    #[test]
    fn undefended_pawn_wins_a_pawn() {
        assert_eq!(see_of("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1", "e4d5"), 100);
    }

    #[test]
    fn defended_pawn_is_even_for_a_pawn() {
        assert_eq!(
            see_of("4k3/8/2p5/3p4/4P3/8/8/4K3 w - - 0 1", "e4d5"),
            0
        );
    }

    #[test]
    fn knight_takes_defended_pawn_loses() {
        let v = see_of("4k3/8/2p5/3p4/4N3/8/8/4K3 w - - 0 1", "e4d5");
        assert_eq!(v, 100 - 398);
    }

    #[test]
    fn queen_takes_rook_defended_by_pawn() {
        let v = see_of("4k3/8/1p6/2r5/3Q4/8/8/4K3 w - - 0 1", "d4c5");
        assert_eq!(v, 607 - 1254);
    }

    #[test]
    fn xray_recapture_counts() {
        // Rook takes rook; a second black rook behind recaptures.
        let v = see_of("3r4/3r4/8/8/8/8/8/3RK2k w - - 0 1", "d1d7");
        assert_eq!(v, 607 - 607);
    }

    #[test]
    fn xray_battery_wins() {
        // Doubled white rooks beat a defended black rook.
        let v = see_of("3r4/3r4/8/8/8/3R4/3R4/4K2k w - - 0 1", "d3d7");
        assert_eq!(v, 607);
        // Lone rook takes an undefended rook through nobody.
        let v = see_of("3r4/8/8/8/8/8/3R4/4K2k w - - 0 1", "d2d8");
        assert_eq!(v, 607);
    }

    #[test]
    fn en_passant_exchange() {
        assert_eq!(
            see_of("4k3/8/8/3Pp3/8/8/8/4K3 w - e6 0 1", "d5e6"),
            100
        );
        assert_eq!(
            see_of("4k3/5p2/8/3Pp3/8/8/8/4K3 w - e6 0 1", "d5e6"),
            0
        );
    }

    #[test]
    fn king_cannot_recapture_defended_square() {
        // Pawn takes pawn next to the black king, protected by a rook:
        // the king may not recapture while the rook defends.
        let v = see_of("8/5k2/4p3/3P4/8/8/8/4R1K1 w - - 0 1", "d5e6");
        assert_eq!(v, 100);
    }

    #[test]
    fn windowed_call_agrees_in_sign() {
        let cases = [
            ("4k3/8/2p5/3p4/4N3/8/8/4K3 w - - 0 1", "e4d5"),
            ("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1", "e4d5"),
            ("4k3/8/1p6/2r5/3Q4/8/8/4K3 w - - 0 1", "d4c5"),
        ];
        for (fen, mvs) in cases {
            let mut p = pos(fen);
            let m = parse_uci_move(&p, mvs).unwrap();
            let full = see(&mut p, m, -INF, INF);
            for (a, b) in [(-50, 50), (0, 1), (-1, 0), (-500, 500)] {
                let windowed = see(&mut p, m, a, b);
                assert_eq!(windowed <= a, full <= a, "{fen} {mvs} ({a},{b})");
                assert_eq!(windowed >= b, full >= b, "{fen} {mvs} ({a},{b})");
            }
        }
    }

    #[test]
    fn see_leaves_position_untouched() {
        let fen = "4k3/8/2p5/3p4/4N3/8/8/4K3 w - - 0 1";
        let mut p = pos(fen);
        let m = parse_uci_move(&p, "e4d5").unwrap();
        let before = p.clone();
        let _ = see(&mut p, m, -INF, INF);
        assert_eq!(p, before);
    }
}
