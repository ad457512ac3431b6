//! FEN parsing and formatting.
//!
//! Parsing validates structure (exactly one king per side, no pawns on
//! the back ranks) and canonicalises the position: castle rights without
//! the king and rook on their home squares are dropped, and an
//! en-passant square that cannot actually be captured is cleared, so
//! parse-then-emit is the identity on canonical FEN strings.

use std::str::FromStr;

use super::{FenError, Position, A1_CASTLE, A8_CASTLE, H1_CASTLE, H8_CASTLE};
use crate::attacks::pawn_attacks;
use crate::bitboard::bit_count;
use crate::types::{Piece, Square};

pub(crate) fn parse_fen(fen: &str) -> Result<Position, FenError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if !(4..=6).contains(&fields.len()) {
        return Err(FenError::WrongFieldCount(fields.len()));
    }

    let mut pos = Position::empty();

    // Piece placement, rank 8 first.
    let ranks: Vec<&str> = fields[0].split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::BadRankLength);
    }
    for (i, rank) in ranks.iter().enumerate() {
        let y = 7 - i;
        let mut x = 0usize;
        for c in rank.chars() {
            if let Some(skip) = c.to_digit(10) {
                x += skip as usize;
            } else {
                let piece = Piece::from_char(c).ok_or(FenError::BadPiece(c))?;
                if x >= 8 {
                    return Err(FenError::BadRankLength);
                }
                if piece.is_pawn() && (y == 0 || y == 7) {
                    return Err(FenError::PawnOnBackRank);
                }
                pos.set_piece(Square::from_xy(x, y), piece);
                x += 1;
            }
        }
        if x != 8 {
            return Err(FenError::BadRankLength);
        }
    }

    for king in [Piece::WKing, Piece::BKing] {
        match bit_count(pos.piece_type_bb(king)) {
            0 => return Err(FenError::MissingKing),
            1 => {}
            _ => return Err(FenError::TooManyKings),
        }
    }

    match fields[1] {
        "w" => pos.set_white_move(true),
        "b" => pos.set_white_move(false),
        other => return Err(FenError::BadSideToMove(other.to_owned())),
    }

    let mut mask = 0u8;
    if fields[2] != "-" {
        for c in fields[2].chars() {
            mask |= match c {
                'K' => H1_CASTLE,
                'Q' => A1_CASTLE,
                'k' => H8_CASTLE,
                'q' => A8_CASTLE,
                _ => return Err(FenError::BadCastling(fields[2].to_owned())),
            };
        }
    }
    pos.set_castle_mask(canonical_castle_mask(&pos, mask));

    if fields[3] != "-" {
        let sq: Square = fields[3]
            .parse()
            .map_err(|_| FenError::BadEpSquare(fields[3].to_owned()))?;
        let expected_rank = if pos.is_white_move() { 5 } else { 2 };
        if sq.y() != expected_rank {
            return Err(FenError::BadEpSquare(fields[3].to_owned()));
        }
        if ep_capturable(&pos, sq) {
            pos.set_ep_square(Some(sq));
        }
    }

    if fields.len() > 4 {
        let clock: u16 = fields[4]
            .parse()
            .map_err(|_| FenError::BadClock(fields[4].to_owned()))?;
        pos.set_half_move_clock(clock);
    }
    if fields.len() > 5 {
        let counter: u16 = fields[5]
            .parse()
            .map_err(|_| FenError::BadClock(fields[5].to_owned()))?;
        pos.set_full_move_counter(counter.max(1));
    }

    Ok(pos)
}

/// Keep only castle rights whose king and rook still sit on their home
/// squares.
fn canonical_castle_mask(pos: &Position, mask: u8) -> u8 {
    let mut out = 0u8;
    let wk = pos.get_piece(Square::from_xy(4, 0)) == Piece::WKing;
    let bk = pos.get_piece(Square::from_xy(4, 7)) == Piece::BKing;
    if wk && pos.get_piece(Square::from_xy(0, 0)) == Piece::WRook {
        out |= mask & A1_CASTLE;
    }
    if wk && pos.get_piece(Square::from_xy(7, 0)) == Piece::WRook {
        out |= mask & H1_CASTLE;
    }
    if bk && pos.get_piece(Square::from_xy(0, 7)) == Piece::BRook {
        out |= mask & A8_CASTLE;
    }
    if bk && pos.get_piece(Square::from_xy(7, 7)) == Piece::BRook {
        out |= mask & H8_CASTLE;
    }
    out
}

/// True if the side to move has a pawn that could capture on the
/// en-passant square, ignoring king safety, and the double-pushed pawn
/// is actually present.
pub(super) fn ep_capturable(pos: &Position, ep: Square) -> bool {
    let wtm = pos.is_white_move();
    let (our_pawn, their_pawn) = if wtm {
        (Piece::WPawn, Piece::BPawn)
    } else {
        (Piece::BPawn, Piece::WPawn)
    };
    // The pawn that just double-pushed sits in front of the ep square
    // from the mover's point of view.
    let pushed_sq = if wtm { ep.offset(-8) } else { ep.offset(8) };
    if pos.get_piece(pushed_sq) != their_pawn {
        return false;
    }
    // A capturing pawn attacks the ep square.
    pawn_attacks(ep, !wtm) & pos.piece_type_bb(our_pawn) != 0
}

impl Position {
    /// The position as a FEN string.
    #[must_use]
    pub fn to_fen(&self) -> String {
        let mut out = String::with_capacity(90);
        for y in (0..8).rev() {
            let mut empty = 0;
            for x in 0..8 {
                let p = self.get_piece(Square::from_xy(x, y));
                if p.is_empty() {
                    empty += 1;
                } else {
                    if empty > 0 {
                        out.push(char::from_digit(empty, 10).expect("digit"));
                        empty = 0;
                    }
                    out.push(p.to_char());
                }
            }
            if empty > 0 {
                out.push(char::from_digit(empty, 10).expect("digit"));
            }
            if y > 0 {
                out.push('/');
            }
        }

        out.push(' ');
        out.push(if self.is_white_move() { 'w' } else { 'b' });

        out.push(' ');
        if self.castle_mask() == 0 {
            out.push('-');
        } else {
            if self.castle_mask() & H1_CASTLE != 0 {
                out.push('K');
            }
            if self.castle_mask() & A1_CASTLE != 0 {
                out.push('Q');
            }
            if self.castle_mask() & H8_CASTLE != 0 {
                out.push('k');
            }
            if self.castle_mask() & A8_CASTLE != 0 {
                out.push('q');
            }
        }

        out.push(' ');
        match self.ep_square() {
            Some(sq) => out.push_str(&sq.to_string()),
            None => out.push('-'),
        }

        out.push_str(&format!(
            " {} {}",
            self.half_move_clock(),
            self.full_move_counter()
        ));
        out
    }
}

impl FromStr for Position {
    type Err = FenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fen(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_FEN;

    #[test]
    fn start_position_round_trip() {
        let pos: Position = START_FEN.parse().unwrap();
        assert_eq!(pos.to_fen(), START_FEN);
        assert_eq!(pos.zobrist_hash(), pos.compute_zobrist_hash());
        assert_eq!(pos.w_mtrl(), 1254 + 2 * 607 + 2 * 398 + 2 * 398 + 8 * 100);
    }

    #[test]
    fn kiwipete_round_trip() {
        let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
        let pos: Position = fen.parse().unwrap();
        assert_eq!(pos.to_fen(), fen);
    }

    #[test]
    fn uncapturable_ep_square_is_dropped() {
        // No black pawn can take on e3.
        let pos: Position =
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1".parse().unwrap();
        assert_eq!(pos.ep_square(), None);
        assert!(pos.to_fen().contains(" b KQkq - "));
    }

    #[test]
    fn capturable_ep_square_is_kept() {
        let fen = "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3";
        let pos: Position = fen.parse().unwrap();
        assert_eq!(pos.ep_square(), Some(Square::from_xy(5, 5)));
        assert_eq!(pos.to_fen(), fen);
    }

    #[test]
    fn bogus_castle_rights_are_dropped() {
        let pos: Position = "4k3/8/8/8/8/8/8/4K3 w KQkq - 0 1".parse().unwrap();
        assert_eq!(pos.castle_mask(), 0);
    }

    #[test]
    fn rejects_malformed_fens() {
        assert!("".parse::<Position>().is_err());
        assert!("8/8/8/8/8/8/8 w - - 0 1".parse::<Position>().is_err());
        assert!("9/8/8/8/8/8/8/8 w - - 0 1".parse::<Position>().is_err());
        assert!("8/8/8/8/8/8/8/4K3 w - - 0 1".parse::<Position>().is_err()); // no black king
        assert!("4k3/8/8/8/8/8/8/4K3 x - - 0 1".parse::<Position>().is_err());
        assert!("Pkp5/8/8/8/8/8/8/4K3 w - - 0 1".parse::<Position>().is_err()); // pawn on rank 8
    }

    #[test]
    fn parse_does_not_require_clock_fields() {
        let pos: Position = "4k3/8/8/8/8/8/8/4K3 w - -".parse().unwrap();
        assert_eq!(pos.half_move_clock(), 0);
        assert_eq!(pos.full_move_counter(), 1);
    }
}
