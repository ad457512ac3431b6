//! Move generation and legality tests.
//!
//! Generation is pseudo-legal: moves obey piece movement rules (castling
//! and en passant included) but may leave the own king in check.
//! `remove_illegal` filters by make/test/unmake. `check_evasions`
//! generates the restricted move set while in check.

use crate::attacks::{
    between, bishop_attacks, king_attacks, knight_attacks, pawn_attacks, queen_attacks,
    rook_attacks,
};
use crate::bitboard::{square_bb, BitIter};
use crate::position::{MoveParseError, Position, A1_CASTLE, A8_CASTLE, H1_CASTLE, H8_CASTLE};
use crate::types::{push_move, Move, MoveList, Piece, Square};

/// True if `sq` is attacked by any piece of the given colour.
#[must_use]
pub fn square_attacked(pos: &Position, sq: Square, by_white: bool) -> bool {
    attackers_of_colour(pos, sq, pos.occupied_bb(), by_white) != 0
}

/// All pieces of one colour attacking `sq` under the given occupancy.
#[must_use]
pub fn attackers_of_colour(pos: &Position, sq: Square, occupied: u64, by_white: bool) -> u64 {
    let (king, queen, rook, bishop, knight, pawn) = if by_white {
        (
            Piece::WKing,
            Piece::WQueen,
            Piece::WRook,
            Piece::WBishop,
            Piece::WKnight,
            Piece::WPawn,
        )
    } else {
        (
            Piece::BKing,
            Piece::BQueen,
            Piece::BRook,
            Piece::BBishop,
            Piece::BKnight,
            Piece::BPawn,
        )
    };
    let mut attackers = 0u64;
    attackers |= king_attacks(sq) & pos.piece_type_bb(king);
    attackers |= knight_attacks(sq) & pos.piece_type_bb(knight);
    // A pawn of `by_white` colour attacks sq iff it sits on a square a
    // pawn of the opposite colour on sq would attack.
    attackers |= pawn_attacks(sq, !by_white) & pos.piece_type_bb(pawn);
    let rq = pos.piece_type_bb(rook) | pos.piece_type_bb(queen);
    let bq = pos.piece_type_bb(bishop) | pos.piece_type_bb(queen);
    attackers |= rook_attacks(sq, occupied) & rq;
    attackers |= bishop_attacks(sq, occupied) & bq;
    attackers
}

/// True if the side to move is in check.
#[must_use]
pub fn in_check(pos: &Position) -> bool {
    let wtm = pos.is_white_move();
    square_attacked(pos, pos.king_sq(wtm), !wtm)
}

/// Every pseudo-legal move for the side to move.
#[must_use]
pub fn pseudo_legal_moves(pos: &Position) -> MoveList {
    let mut moves = MoveList::new();
    let wtm = pos.is_white_move();
    let own = pos.colour_bb(wtm);
    let occupied = pos.occupied_bb();
    let targets = !own;

    gen_pawn_moves(pos, &mut moves, false);
    gen_piece_moves(pos, &mut moves, targets, occupied);
    gen_castling(pos, &mut moves);
    moves
}

/// Captures and promotions only, for quiescence.
#[must_use]
pub fn pseudo_legal_captures(pos: &Position) -> MoveList {
    let mut moves = MoveList::new();
    let wtm = pos.is_white_move();
    let enemy = pos.colour_bb(!wtm);
    let occupied = pos.occupied_bb();

    gen_pawn_moves(pos, &mut moves, true);
    gen_piece_moves(pos, &mut moves, enemy, occupied);
    moves
}

fn gen_piece_moves(pos: &Position, moves: &mut MoveList, targets: u64, occupied: u64) {
    let wtm = pos.is_white_move();
    let (queen, rook, bishop, knight) = if wtm {
        (Piece::WQueen, Piece::WRook, Piece::WBishop, Piece::WKnight)
    } else {
        (Piece::BQueen, Piece::BRook, Piece::BBishop, Piece::BKnight)
    };

    for from in BitIter(pos.piece_type_bb(knight)) {
        for to in BitIter(knight_attacks(from) & targets) {
            push_move(moves, Move::new(from, to, Piece::Empty));
        }
    }
    for from in BitIter(pos.piece_type_bb(bishop)) {
        for to in BitIter(bishop_attacks(from, occupied) & targets) {
            push_move(moves, Move::new(from, to, Piece::Empty));
        }
    }
    for from in BitIter(pos.piece_type_bb(rook)) {
        for to in BitIter(rook_attacks(from, occupied) & targets) {
            push_move(moves, Move::new(from, to, Piece::Empty));
        }
    }
    for from in BitIter(pos.piece_type_bb(queen)) {
        for to in BitIter(queen_attacks(from, occupied) & targets) {
            push_move(moves, Move::new(from, to, Piece::Empty));
        }
    }
    let from = pos.king_sq(wtm);
    for to in BitIter(king_attacks(from) & targets) {
        push_move(moves, Move::new(from, to, Piece::Empty));
    }
}

fn gen_pawn_moves(pos: &Position, moves: &mut MoveList, captures_only: bool) {
    let wtm = pos.is_white_move();
    let pawns = pos.piece_type_bb(if wtm { Piece::WPawn } else { Piece::BPawn });
    let occupied = pos.occupied_bb();
    let enemy = pos.colour_bb(!wtm);
    let ep_bb = pos.ep_square().map_or(0, square_bb);

    for from in BitIter(pawns) {
        let y = from.y();
        let promote_rank = if wtm { y == 6 } else { y == 1 };

        // Captures (including en passant).
        for to in BitIter(pawn_attacks(from, wtm) & (enemy | ep_bb)) {
            if promote_rank {
                push_promotions(moves, from, to, wtm);
            } else {
                push_move(moves, Move::new(from, to, Piece::Empty));
            }
        }

        if captures_only && !promote_rank {
            continue;
        }

        // Pushes.
        let one = if wtm { from.offset(8) } else { from.offset(-8) };
        if occupied & square_bb(one) == 0 {
            if promote_rank {
                push_promotions(moves, from, one, wtm);
            } else if !captures_only {
                push_move(moves, Move::new(from, one, Piece::Empty));
                let start_rank = if wtm { y == 1 } else { y == 6 };
                if start_rank {
                    let two = if wtm { from.offset(16) } else { from.offset(-16) };
                    if occupied & square_bb(two) == 0 {
                        push_move(moves, Move::new(from, two, Piece::Empty));
                    }
                }
            }
        }
    }
}

fn push_promotions(moves: &mut MoveList, from: Square, to: Square, white: bool) {
    let promos = if white {
        [Piece::WQueen, Piece::WRook, Piece::WBishop, Piece::WKnight]
    } else {
        [Piece::BQueen, Piece::BRook, Piece::BBishop, Piece::BKnight]
    };
    for p in promos {
        push_move(moves, Move::new(from, to, p));
    }
}

fn gen_castling(pos: &Position, moves: &mut MoveList) {
    let wtm = pos.is_white_move();
    let occupied = pos.occupied_bb();
    let (short_bit, long_bit, king_from) = if wtm {
        (H1_CASTLE, A1_CASTLE, Square::from_xy(4, 0))
    } else {
        (H8_CASTLE, A8_CASTLE, Square::from_xy(4, 7))
    };
    if pos.castle_mask() & short_bit != 0 {
        let f = king_from.offset(1);
        let g = king_from.offset(2);
        if occupied & (square_bb(f) | square_bb(g)) == 0
            && !square_attacked(pos, king_from, !wtm)
            && !square_attacked(pos, f, !wtm)
            && !square_attacked(pos, g, !wtm)
        {
            push_move(moves, Move::new(king_from, g, Piece::Empty));
        }
    }
    if pos.castle_mask() & long_bit != 0 {
        let d = king_from.offset(-1);
        let c = king_from.offset(-2);
        let b = king_from.offset(-3);
        if occupied & (square_bb(d) | square_bb(c) | square_bb(b)) == 0
            && !square_attacked(pos, king_from, !wtm)
            && !square_attacked(pos, d, !wtm)
            && !square_attacked(pos, c, !wtm)
        {
            push_move(moves, Move::new(king_from, c, Piece::Empty));
        }
    }
}

/// Moves that can resolve a check: king moves, captures of a single
/// checker, and interpositions. In the degenerate case where the
/// opposite king can be captured (an illegal position mid-validation),
/// the capture of that king is returned as the only move.
#[must_use]
pub fn check_evasions(pos: &Position) -> MoveList {
    let wtm = pos.is_white_move();
    let opp_king_sq = pos.king_sq(!wtm);
    let our_attackers = attackers_of_colour(pos, opp_king_sq, pos.occupied_bb(), wtm);
    if our_attackers != 0 {
        let mut moves = MoveList::new();
        let from = crate::bitboard::first_bit(our_attackers);
        push_move(&mut moves, Move::new(from, opp_king_sq, Piece::Empty));
        return moves;
    }

    let king_sq = pos.king_sq(wtm);
    let checkers = attackers_of_colour(pos, king_sq, pos.occupied_bb(), !wtm);
    if checkers == 0 {
        return pseudo_legal_moves(pos);
    }

    let mut moves = MoveList::new();
    let occupied = pos.occupied_bb();
    let own = pos.colour_bb(wtm);

    // King steps.
    for to in BitIter(king_attacks(king_sq) & !own) {
        push_move(&mut moves, Move::new(king_sq, to, Piece::Empty));
    }

    if crate::bitboard::bit_count(checkers) > 1 {
        return moves;
    }

    // Single checker: capture it or block the ray.
    let checker_sq = crate::bitboard::first_bit(checkers);
    let block_mask = between(king_sq, checker_sq);
    let target_mask = checkers | block_mask;

    let wtm_pieces = if wtm {
        [Piece::WQueen, Piece::WRook, Piece::WBishop, Piece::WKnight]
    } else {
        [Piece::BQueen, Piece::BRook, Piece::BBishop, Piece::BKnight]
    };
    for piece in wtm_pieces {
        for from in BitIter(pos.piece_type_bb(piece)) {
            let att = match piece.kind() {
                crate::types::PieceKind::Queen => queen_attacks(from, occupied),
                crate::types::PieceKind::Rook => rook_attacks(from, occupied),
                crate::types::PieceKind::Bishop => bishop_attacks(from, occupied),
                _ => knight_attacks(from),
            };
            for to in BitIter(att & target_mask) {
                push_move(&mut moves, Move::new(from, to, Piece::Empty));
            }
        }
    }

    // Pawns: captures of the checker, blocking pushes, en passant when
    // the checker is the double-pushed pawn.
    let pawns = pos.piece_type_bb(if wtm { Piece::WPawn } else { Piece::BPawn });
    for from in BitIter(pawns) {
        let promote_rank = if wtm { from.y() == 6 } else { from.y() == 1 };
        for to in BitIter(pawn_attacks(from, wtm) & checkers) {
            if promote_rank {
                push_promotions(&mut moves, from, to, wtm);
            } else {
                push_move(&mut moves, Move::new(from, to, Piece::Empty));
            }
        }
        let one = if wtm { from.offset(8) } else { from.offset(-8) };
        if occupied & square_bb(one) == 0 {
            if square_bb(one) & block_mask != 0 {
                if promote_rank {
                    push_promotions(&mut moves, from, one, wtm);
                } else {
                    push_move(&mut moves, Move::new(from, one, Piece::Empty));
                }
            }
            let start_rank = if wtm { from.y() == 1 } else { from.y() == 6 };
            if start_rank {
                let two = if wtm { from.offset(16) } else { from.offset(-16) };
                if occupied & square_bb(two) == 0 && square_bb(two) & block_mask != 0 {
                    push_move(&mut moves, Move::new(from, two, Piece::Empty));
                }
            }
        }
        if let Some(ep) = pos.ep_square() {
            let captured_sq = if wtm { ep.offset(-8) } else { ep.offset(8) };
            if captured_sq == checker_sq && pawn_attacks(from, wtm) & square_bb(ep) != 0 {
                push_move(&mut moves, Move::new(from, ep, Piece::Empty));
            }
        }
    }

    moves
}

/// Remove every move that leaves the own king attacked.
pub fn remove_illegal(pos: &mut Position, moves: &mut MoveList) {
    let mut i = 0;
    while i < moves.len() {
        let m = moves[i].mv;
        if is_legal_after_make(pos, m) {
            i += 1;
        } else {
            moves.swap_remove(i);
        }
    }
}

fn is_legal_after_make(pos: &mut Position, m: Move) -> bool {
    let wtm = pos.is_white_move();
    let ui = pos.make_move(m);
    let legal = !square_attacked(pos, pos.king_sq(wtm), !wtm);
    pos.unmake_move(m, &ui);
    legal
}

/// All strictly legal moves.
#[must_use]
pub fn legal_moves(pos: &mut Position) -> MoveList {
    let mut moves = if in_check(pos) {
        check_evasions(pos)
    } else {
        pseudo_legal_moves(pos)
    };
    remove_illegal(pos, &mut moves);
    moves
}

/// Validate a move from the transposition table before replaying it:
/// the move must be pseudo-legal in this position and must not leave the
/// king in check.
#[must_use]
pub fn is_legal(pos: &mut Position, m: Move, pos_in_check: bool) -> bool {
    if m.is_empty() {
        return false;
    }
    let p = pos.get_piece(m.from());
    if p.is_empty() || !p.has_colour(pos.is_white_move()) {
        return false;
    }
    let candidates = if pos_in_check {
        check_evasions(pos)
    } else {
        pseudo_legal_moves(pos)
    };
    if !candidates.iter().any(|sm| sm.mv == m) {
        return false;
    }
    is_legal_after_make(pos, m)
}

/// Does `m` give check? Computed without making the move; agrees with
/// `in_check` after make for every pseudo-legal move.
#[must_use]
pub fn gives_check(pos: &Position, m: Move) -> bool {
    let wtm = pos.is_white_move();
    let king_sq = pos.king_sq(!wtm);
    let p = pos.get_piece(m.from());
    let from_bb = square_bb(m.from());
    let to_bb = square_bb(m.to());

    let mut occupied = (pos.occupied_bb() & !from_bb) | to_bb;

    // Adjusted attacker sets for the position after the move.
    let (queen, rook, bishop, knight, pawn) = if wtm {
        (
            Piece::WQueen,
            Piece::WRook,
            Piece::WBishop,
            Piece::WKnight,
            Piece::WPawn,
        )
    } else {
        (
            Piece::BQueen,
            Piece::BRook,
            Piece::BBishop,
            Piece::BKnight,
            Piece::BPawn,
        )
    };
    let placed = if m.is_promotion() { m.promote_to() } else { p };
    let mut rq = (pos.piece_type_bb(rook) | pos.piece_type_bb(queen)) & !from_bb;
    let mut bq = (pos.piece_type_bb(bishop) | pos.piece_type_bb(queen)) & !from_bb;
    let mut n = pos.piece_type_bb(knight) & !from_bb;
    let mut pawns = pos.piece_type_bb(pawn) & !from_bb;
    match placed.kind() {
        crate::types::PieceKind::Queen => {
            rq |= to_bb;
            bq |= to_bb;
        }
        crate::types::PieceKind::Rook => rq |= to_bb,
        crate::types::PieceKind::Bishop => bq |= to_bb,
        crate::types::PieceKind::Knight => n |= to_bb,
        crate::types::PieceKind::Pawn => pawns |= to_bb,
        crate::types::PieceKind::King => {
            // Castling: account for the rook's new square.
            let delta = m.to().as_index() as i32 - m.from().as_index() as i32;
            if delta == 2 {
                let rook_from = square_bb(m.to().offset(1));
                let rook_to = square_bb(m.to().offset(-1));
                rq = (rq & !rook_from) | rook_to;
                occupied = (occupied & !rook_from) | rook_to;
            } else if delta == -2 {
                let rook_from = square_bb(m.to().offset(-2));
                let rook_to = square_bb(m.to().offset(1));
                rq = (rq & !rook_from) | rook_to;
                occupied = (occupied & !rook_from) | rook_to;
            }
        }
    }

    // En passant also vacates the captured pawn's square.
    if p.is_pawn() && Some(m.to()) == pos.ep_square() {
        let cap_bb = square_bb(if wtm { m.to().offset(-8) } else { m.to().offset(8) });
        occupied &= !cap_bb;
    }

    (rook_attacks(king_sq, occupied) & rq != 0)
        || (bishop_attacks(king_sq, occupied) & bq != 0)
        || (knight_attacks(king_sq) & n != 0)
        || (pawn_attacks(king_sq, !wtm) & pawns != 0)
}

/// Parse a UCI long-algebraic move string against the legal moves of a
/// position.
pub fn parse_uci_move(pos: &Position, s: &str) -> Result<Move, MoveParseError> {
    let bytes = s.as_bytes();
    if !(4..=5).contains(&bytes.len()) {
        return Err(MoveParseError::BadFormat(s.to_owned()));
    }
    let from: Square = s[0..2]
        .parse()
        .map_err(|_| MoveParseError::BadFormat(s.to_owned()))?;
    let to: Square = s[2..4]
        .parse()
        .map_err(|_| MoveParseError::BadFormat(s.to_owned()))?;
    let promo = if bytes.len() == 5 {
        let wtm = pos.is_white_move();
        match bytes[4] {
            b'q' => Piece::make(crate::types::PieceKind::Queen, wtm),
            b'r' => Piece::make(crate::types::PieceKind::Rook, wtm),
            b'b' => Piece::make(crate::types::PieceKind::Bishop, wtm),
            b'n' => Piece::make(crate::types::PieceKind::Knight, wtm),
            _ => return Err(MoveParseError::BadFormat(s.to_owned())),
        }
    } else {
        Piece::Empty
    };
    let m = Move::new(from, to, promo);
    let mut scratch = pos.clone();
    if legal_moves(&mut scratch).iter().any(|sm| sm.mv == m) {
        Ok(m)
    } else {
        Err(MoveParseError::Illegal(s.to_owned()))
    }
}

/// Leaf count after `depth` plies. The standard move-generator test.
#[must_use]
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let moves = legal_moves(pos);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0;
    for sm in &moves {
        let ui = pos.make_move(sm.mv);
        nodes += perft(pos, depth - 1);
        pos.unmake_move(sm.mv, &ui);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_FEN;

    fn pos(fen: &str) -> Position {
        fen.parse().expect("valid fen")
    }

    #[test]
    fn twenty_moves_from_start() {
        let mut p = pos(START_FEN);
        assert_eq!(legal_moves(&mut p).len(), 20);
    }

    #[test]
    fn in_check_detection() {
        assert!(!in_check(&pos(START_FEN)));
        assert!(in_check(&pos("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")));
    }

    #[test]
    fn evasions_match_filtered_generation() {
        let fens = [
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
            "rnbqkbnr/ppp1pppp/8/1B1p4/4P3/8/PPPP1PPP/RNBQK1NR b KQkq - 1 2",
            "4k3/8/8/8/7b/8/5N2/4K3 w - - 0 1",
            "4k3/8/8/8/8/8/2n5/4K3 w - - 0 1",
        ];
        for fen in fens {
            let mut p = pos(fen);
            assert!(in_check(&p), "{fen}");
            let mut evasions = check_evasions(&p);
            remove_illegal(&mut p, &mut evasions);
            let mut all = pseudo_legal_moves(&p);
            remove_illegal(&mut p, &mut all);
            let mut ev: Vec<String> = evasions.iter().map(|m| m.mv.to_string()).collect();
            let mut al: Vec<String> = all.iter().map(|m| m.mv.to_string()).collect();
            ev.sort();
            al.sort();
            assert_eq!(ev, al, "{fen}");
        }
    }

    #[test]
    fn double_check_only_king_moves() {
        // Rook on e8 and knight on f3 both check the king on e1.
        let mut p = pos("4R3/8/8/8/8/5N2/8/K3k3 b - - 0 1");
        assert!(in_check(&p));
        let mut evasions = check_evasions(&p);
        remove_illegal(&mut p, &mut evasions);
        for sm in &evasions {
            assert_eq!(p.get_piece(sm.mv.from()), Piece::BKing);
        }
    }

    #[test]
    fn capturable_king_returns_single_move() {
        // Black king en prise with White to move: an illegal position
        // that move generation must resolve by capturing the king.
        let bad = pos("R3k3/8/8/8/8/8/8/4K3 w - - 0 1");
        let evasions = check_evasions(&bad);
        assert_eq!(evasions.len(), 1);
        assert_eq!(evasions[0].mv.to(), Square::from_xy(4, 7));
    }

    #[test]
    fn gives_check_agrees_with_make() {
        let fens = [
            START_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
            "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1",
            "n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1",
            "2r3k1/5pp1/8/8/8/8/Q4PPP/6K1 w - - 0 1",
        ];
        for fen in fens {
            let mut p = pos(fen);
            let moves = legal_moves(&mut p);
            for sm in &moves {
                let predicted = gives_check(&p, sm.mv);
                let ui = p.make_move(sm.mv);
                let actual = in_check(&p);
                p.unmake_move(sm.mv, &ui);
                assert_eq!(predicted, actual, "{fen} {}", sm.mv);
            }
        }
    }

    #[test]
    fn castling_blocked_through_check() {
        // Black rook on e8... use a rook eyeing f1.
        let mut p = pos("4k3/8/8/8/8/8/5r2/R3K2R w KQ - 0 1");
        let moves = legal_moves(&mut p);
        assert!(!moves.iter().any(|m| m.mv.to_string() == "e1g1"));
        // Queenside transit square d1 is fine in this position? The rook
        // on f2 does not attack d1, so O-O-O is available.
        assert!(moves.iter().any(|m| m.mv.to_string() == "e1c1"));
    }

    #[test]
    fn parse_uci_move_validates() {
        let p = pos(START_FEN);
        assert!(parse_uci_move(&p, "e2e4").is_ok());
        assert!(parse_uci_move(&p, "e2e5").is_err());
        assert!(parse_uci_move(&p, "xyz").is_err());
    }

    #[test]
    fn perft_start_shallow() {
        let mut p = pos(START_FEN);
        assert_eq!(perft(&mut p, 1), 20);
        assert_eq!(perft(&mut p, 2), 400);
        assert_eq!(perft(&mut p, 3), 8902);
    }
}
