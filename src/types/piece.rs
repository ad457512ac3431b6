//! Piece encoding.
//!
//! A piece is one of 13 values: empty plus {king, queen, rook, bishop,
//! knight, pawn} for each colour. White pieces come first so the colour
//! test is a cheap range check, and the discriminant doubles as an index
//! into per-piece tables (bitboards, Zobrist keys, material digits).

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Piece {
    Empty = 0,
    WKing = 1,
    WQueen = 2,
    WRook = 3,
    WBishop = 4,
    WKnight = 5,
    WPawn = 6,
    BKing = 7,
    BQueen = 8,
    BRook = 9,
    BBishop = 10,
    BKnight = 11,
    BPawn = 12,
}

pub const N_PIECE_TYPES: usize = 13;

impl Piece {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Reconstruct from a stored index. Panics on values outside [0, 12].
    #[inline]
    #[must_use]
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Piece::Empty,
            1 => Piece::WKing,
            2 => Piece::WQueen,
            3 => Piece::WRook,
            4 => Piece::WBishop,
            5 => Piece::WKnight,
            6 => Piece::WPawn,
            7 => Piece::BKing,
            8 => Piece::BQueen,
            9 => Piece::BRook,
            10 => Piece::BBishop,
            11 => Piece::BKnight,
            12 => Piece::BPawn,
            _ => panic!("piece index out of range: {idx}"),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Piece::Empty)
    }

    #[inline]
    #[must_use]
    pub const fn is_white(self) -> bool {
        (self as u8) >= 1 && (self as u8) <= 6
    }

    #[inline]
    #[must_use]
    pub const fn is_black(self) -> bool {
        (self as u8) >= 7
    }

    /// True if the piece belongs to the side given by `white`.
    #[inline]
    #[must_use]
    pub const fn has_colour(self, white: bool) -> bool {
        if white {
            self.is_white()
        } else {
            self.is_black()
        }
    }

    /// The same piece kind for the opposite colour. Empty maps to itself.
    #[inline]
    #[must_use]
    pub fn mirror(self) -> Self {
        match self as u8 {
            0 => Piece::Empty,
            v if v <= 6 => Piece::from_index((v + 6) as usize),
            v => Piece::from_index((v - 6) as usize),
        }
    }

    /// King/queen/rook/bishop/knight/pawn of the requested colour.
    #[inline]
    #[must_use]
    pub fn make(kind: PieceKind, white: bool) -> Self {
        let base = if white { 0 } else { 6 };
        Piece::from_index(base + kind as usize)
    }

    #[inline]
    #[must_use]
    pub fn kind(self) -> PieceKind {
        debug_assert!(!self.is_empty());
        let v = self as u8;
        let k = if v > 6 { v - 6 } else { v };
        match k {
            1 => PieceKind::King,
            2 => PieceKind::Queen,
            3 => PieceKind::Rook,
            4 => PieceKind::Bishop,
            5 => PieceKind::Knight,
            _ => PieceKind::Pawn,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_pawn(self) -> bool {
        matches!(self, Piece::WPawn | Piece::BPawn)
    }

    #[inline]
    #[must_use]
    pub const fn is_king(self) -> bool {
        matches!(self, Piece::WKing | Piece::BKing)
    }

    /// FEN character for the piece.
    #[must_use]
    pub fn to_char(self) -> char {
        match self {
            Piece::Empty => '.',
            Piece::WKing => 'K',
            Piece::WQueen => 'Q',
            Piece::WRook => 'R',
            Piece::WBishop => 'B',
            Piece::WKnight => 'N',
            Piece::WPawn => 'P',
            Piece::BKing => 'k',
            Piece::BQueen => 'q',
            Piece::BRook => 'r',
            Piece::BBishop => 'b',
            Piece::BKnight => 'n',
            Piece::BPawn => 'p',
        }
    }

    /// Piece from a FEN character, or `None` for anything unrecognised.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'K' => Piece::WKing,
            'Q' => Piece::WQueen,
            'R' => Piece::WRook,
            'B' => Piece::WBishop,
            'N' => Piece::WKnight,
            'P' => Piece::WPawn,
            'k' => Piece::BKing,
            'q' => Piece::BQueen,
            'r' => Piece::BRook,
            'b' => Piece::BBishop,
            'n' => Piece::BKnight,
            'p' => Piece::BPawn,
            _ => return None,
        })
    }
}

/// Colour-independent piece kind, numbered to match the white piece codes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum PieceKind {
    King = 1,
    Queen = 2,
    Rook = 3,
    Bishop = 4,
    Knight = 5,
    Pawn = 6,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_checks() {
        assert!(Piece::WQueen.is_white());
        assert!(!Piece::WQueen.is_black());
        assert!(Piece::BPawn.is_black());
        assert!(!Piece::Empty.is_white());
        assert!(!Piece::Empty.is_black());
    }

    #[test]
    fn mirror_is_involution() {
        for idx in 0..N_PIECE_TYPES {
            let p = Piece::from_index(idx);
            assert_eq!(p.mirror().mirror(), p);
            if !p.is_empty() {
                assert_eq!(p.mirror().is_white(), p.is_black());
            }
        }
    }

    #[test]
    fn fen_chars_round_trip() {
        for idx in 1..N_PIECE_TYPES {
            let p = Piece::from_index(idx);
            assert_eq!(Piece::from_char(p.to_char()), Some(p));
        }
        assert_eq!(Piece::from_char('x'), None);
    }

    #[test]
    fn make_and_kind() {
        assert_eq!(Piece::make(PieceKind::Rook, true), Piece::WRook);
        assert_eq!(Piece::make(PieceKind::Rook, false), Piece::BRook);
        assert_eq!(Piece::BKnight.kind(), PieceKind::Knight);
    }
}
