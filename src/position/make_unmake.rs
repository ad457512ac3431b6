//! Applying and reverting moves.
//!
//! `make_move` requires a pseudo-legal move; anything else is a
//! programmer error. All incremental state (hashes, material, castle
//! rights, evaluator accumulators) is kept in sync through the setter
//! methods, so `unmake_move` restores the position exactly by applying
//! the inverse operations.

use super::{Position, UndoInfo, A1_CASTLE, A8_CASTLE, H1_CASTLE, H8_CASTLE};
use crate::attacks::pawn_attacks;
use crate::types::{Move, Piece, Square};

/// Castle-right bits that survive a piece moving from or to each square.
static CASTLE_SQ_MASK: [u8; 64] = build_castle_sq_mask();

const fn build_castle_sq_mask() -> [u8; 64] {
    let mut table = [0xffu8; 64];
    table[0] = 0xff & !A1_CASTLE; // a1
    table[4] = 0xff & !(A1_CASTLE | H1_CASTLE); // e1
    table[7] = 0xff & !H1_CASTLE; // h1
    table[56] = 0xff & !A8_CASTLE; // a8
    table[60] = 0xff & !(A8_CASTLE | H8_CASTLE); // e8
    table[63] = 0xff & !H8_CASTLE; // h8
    table
}

impl Position {
    /// Apply a pseudo-legal move. Returns the undo record for
    /// [`Position::unmake_move`].
    pub fn make_move(&mut self, m: Move) -> UndoInfo {
        if let Some(nn) = self.nn.as_mut() {
            nn.push_state();
        }

        let ui = UndoInfo {
            captured_piece: self.get_piece(m.to()),
            castle_mask: self.castle_mask(),
            ep_square: self.ep_square(),
            half_move_clock: self.half_move_clock(),
        };

        let wtm = self.white_move;
        let p = self.get_piece(m.from());
        debug_assert!(
            !p.is_empty() && p.has_colour(wtm),
            "make_move: no own piece on {}",
            m.from()
        );

        let is_ep_capture = p.is_pawn() && Some(m.to()) == self.ep_square();
        let is_capture = !ui.captured_piece.is_empty() || is_ep_capture;

        // Castling: the rook moves too.
        if p.is_king() {
            let from = m.from().as_index() as i32;
            let to = m.to().as_index() as i32;
            if to - from == 2 {
                // O-O
                let rook = self.get_piece(m.to().offset(1));
                self.set_piece(m.to().offset(1), Piece::Empty);
                self.set_piece(m.to().offset(-1), rook);
            } else if to - from == -2 {
                // O-O-O
                let rook = self.get_piece(m.to().offset(-2));
                self.set_piece(m.to().offset(-2), Piece::Empty);
                self.set_piece(m.to().offset(1), rook);
            }
        }

        // En passant: remove the captured pawn from its own square.
        if is_ep_capture {
            let cap_sq = if wtm { m.to().offset(-8) } else { m.to().offset(8) };
            self.set_piece(cap_sq, Piece::Empty);
        }

        // New en-passant square after a double pawn push, only when an
        // enemy pawn could actually capture there.
        let mut new_ep = None;
        if p.is_pawn() {
            let dy = m.to().y() as i32 - m.from().y() as i32;
            if dy == 2 || dy == -2 {
                let ep_sq = Square::from_xy(m.from().x(), (m.from().y() as i32 + dy / 2) as usize);
                let enemy_pawns =
                    self.piece_type_bb(if wtm { Piece::BPawn } else { Piece::WPawn });
                if pawn_attacks(ep_sq, wtm) & enemy_pawns != 0 {
                    new_ep = Some(ep_sq);
                }
            }
        }

        self.half_move_clock = if p.is_pawn() || is_capture {
            0
        } else {
            self.half_move_clock + 1
        };
        if !wtm {
            self.full_move_counter += 1;
        }

        let mask = self.castle_mask()
            & CASTLE_SQ_MASK[m.from().as_index()]
            & CASTLE_SQ_MASK[m.to().as_index()];
        self.set_castle_mask(mask);

        self.set_piece(m.from(), Piece::Empty);
        let placed = if m.is_promotion() { m.promote_to() } else { p };
        self.set_piece(m.to(), placed);

        self.set_ep_square(new_ep);
        self.set_white_move(!wtm);
        self.debug_assert_consistent();
        ui
    }

    /// Exact inverse of [`Position::make_move`].
    pub fn unmake_move(&mut self, m: Move, ui: &UndoInfo) {
        self.set_white_move(!self.white_move);
        let wtm = self.white_move;

        let p = self.get_piece(m.to());
        let moved = if m.is_promotion() {
            if wtm {
                Piece::WPawn
            } else {
                Piece::BPawn
            }
        } else {
            p
        };

        self.set_piece(m.from(), moved);
        self.set_piece(m.to(), ui.captured_piece);

        if moved.is_king() {
            let from = m.from().as_index() as i32;
            let to = m.to().as_index() as i32;
            if to - from == 2 {
                let rook = self.get_piece(m.to().offset(-1));
                self.set_piece(m.to().offset(-1), Piece::Empty);
                self.set_piece(m.to().offset(1), rook);
            } else if to - from == -2 {
                let rook = self.get_piece(m.to().offset(1));
                self.set_piece(m.to().offset(1), Piece::Empty);
                self.set_piece(m.to().offset(-2), rook);
            }
        }

        if moved.is_pawn() && Some(m.to()) == ui.ep_square {
            let cap_sq = if wtm { m.to().offset(-8) } else { m.to().offset(8) };
            let pawn = if wtm { Piece::BPawn } else { Piece::WPawn };
            self.set_piece(cap_sq, pawn);
        }

        self.set_castle_mask(ui.castle_mask);
        self.set_ep_square(ui.ep_square);
        self.half_move_clock = ui.half_move_clock;
        if !wtm {
            self.full_move_counter -= 1;
        }

        if let Some(nn) = self.nn.as_mut() {
            nn.pop_state();
        }
        self.debug_assert_consistent();
    }

    /// Null move: pass the turn. The en-passant square is cleared.
    pub fn make_null_move(&mut self) -> UndoInfo {
        if let Some(nn) = self.nn.as_mut() {
            nn.push_state();
        }
        let ui = UndoInfo {
            captured_piece: Piece::Empty,
            castle_mask: self.castle_mask(),
            ep_square: self.ep_square(),
            half_move_clock: self.half_move_clock(),
        };
        self.set_ep_square(None);
        self.set_white_move(!self.white_move);
        ui
    }

    pub fn unmake_null_move(&mut self, ui: &UndoInfo) {
        self.set_white_move(!self.white_move);
        self.set_ep_square(ui.ep_square);
        self.half_move_clock = ui.half_move_clock;
        if let Some(nn) = self.nn.as_mut() {
            nn.pop_state();
        }
    }

    /// Cheap make used by SEE: placement and bitboards only. Hashes,
    /// material sums and the evaluator are untouched.
    pub(crate) fn make_see_move(&mut self, m: Move) -> UndoInfo {
        let ui = UndoInfo {
            captured_piece: self.get_piece(m.to()),
            castle_mask: 0,
            ep_square: None,
            half_move_clock: 0,
        };
        let p = self.get_piece(m.from());
        if p.is_pawn() && Some(m.to()) == self.ep_square() {
            let cap_sq = if self.white_move {
                m.to().offset(-8)
            } else {
                m.to().offset(8)
            };
            self.set_see_piece(cap_sq, Piece::Empty);
        }
        self.set_see_piece(m.from(), Piece::Empty);
        self.set_see_piece(m.to(), p);
        self.white_move = !self.white_move;
        ui
    }

    pub(crate) fn unmake_see_move(&mut self, m: Move, ui: &UndoInfo) {
        self.white_move = !self.white_move;
        let p = self.get_piece(m.to());
        self.set_see_piece(m.from(), p);
        self.set_see_piece(m.to(), ui.captured_piece);
        if p.is_pawn() && Some(m.to()) == self.ep_square() {
            let cap_sq = if self.white_move {
                m.to().offset(-8)
            } else {
                m.to().offset(8)
            };
            let pawn = if self.white_move {
                Piece::BPawn
            } else {
                Piece::WPawn
            };
            self.set_see_piece(cap_sq, pawn);
        }
    }
}
