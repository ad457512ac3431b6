//! Position invariants: make/unmake restoration, incremental hash and
//! material consistency, round-trip laws.

use proptest::prelude::*;

use sable::material::MatId;
use sable::movegen::{gives_check, in_check, legal_moves};
use sable::position::{Position, START_FEN};
use sable::types::Piece;

fn recompute_material_id(pos: &Position) -> MatId {
    let mut id = MatId::empty();
    for sq in 0..64 {
        let p = pos.get_piece(sable::types::Square::from_index(sq));
        if !p.is_empty() {
            id.add_piece(p);
        }
    }
    id
}

fn recompute_material_sums(pos: &Position) -> (i32, i32, i32, i32) {
    use sable::position::piece_value;
    let (mut w, mut b, mut wp, mut bp) = (0, 0, 0, 0);
    for sq in 0..64 {
        let p = pos.get_piece(sable::types::Square::from_index(sq));
        if p.is_empty() {
            continue;
        }
        let v = piece_value(p);
        if p.is_white() {
            w += v;
            if p.is_pawn() {
                wp += v;
            }
        } else {
            b += v;
            if p.is_pawn() {
                bp += v;
            }
        }
    }
    (w, b, wp, bp)
}

/// Drive a pseudo-random walk of legal moves, checking invariants after
/// every make and unmake.
fn random_walk(fen: &str, seeds: &[u8]) {
    let mut pos: Position = fen.parse().expect("valid fen");
    for &seed in seeds {
        let snapshot = pos.clone();
        let moves = legal_moves(&mut pos);
        if moves.is_empty() {
            break;
        }
        let m = moves[seed as usize % moves.len()].mv;

        // gives_check must agree with in_check after make.
        let predicted = gives_check(&pos, m);

        let ui = pos.make_move(m);
        assert_eq!(in_check(&pos), predicted, "gives_check disagreed for {m}");
        assert_eq!(pos.zobrist_hash(), pos.compute_zobrist_hash());
        assert_eq!(pos.pawn_zobrist_hash(), pos.compute_pawn_hash());
        assert_eq!(pos.material_id(), recompute_material_id(&pos));
        let (w, b, wp, bp) = recompute_material_sums(&pos);
        assert_eq!(pos.w_mtrl(), w);
        assert_eq!(pos.b_mtrl(), b);
        assert_eq!(pos.w_mtrl_pawns(), wp);
        assert_eq!(pos.b_mtrl_pawns(), bp);

        pos.unmake_move(m, &ui);
        assert_eq!(pos, snapshot, "unmake did not restore after {m}");
        assert_eq!(pos.w_mtrl(), snapshot.w_mtrl());
        assert_eq!(pos.b_mtrl(), snapshot.b_mtrl());

        // Re-make so the walk continues.
        let _ = pos.make_move(m);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn make_unmake_restores_everything(seeds in prop::collection::vec(any::<u8>(), 1..60)) {
        random_walk(START_FEN, &seeds);
    }

    #[test]
    fn make_unmake_from_kiwipete(seeds in prop::collection::vec(any::<u8>(), 1..40)) {
        random_walk(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            &seeds,
        );
    }

    #[test]
    fn serialize_round_trips_along_games(seeds in prop::collection::vec(any::<u8>(), 1..30)) {
        let mut pos: Position = START_FEN.parse().unwrap();
        for &seed in &seeds {
            let moves = legal_moves(&mut pos);
            if moves.is_empty() {
                break;
            }
            let m = moves[seed as usize % moves.len()].mv;
            let _ = pos.make_move(m);
            let restored = Position::deserialize(&pos.serialize());
            prop_assert_eq!(&pos, &restored);
        }
    }

    #[test]
    fn fen_round_trips_along_games(seeds in prop::collection::vec(any::<u8>(), 1..30)) {
        let mut pos: Position = START_FEN.parse().unwrap();
        for &seed in &seeds {
            let moves = legal_moves(&mut pos);
            if moves.is_empty() {
                break;
            }
            let m = moves[seed as usize % moves.len()].mv;
            let _ = pos.make_move(m);
            let fen = pos.to_fen();
            let reparsed: Position = fen.parse().unwrap();
            prop_assert_eq!(&pos, &reparsed, "fen: {}", fen);
        }
    }
}

#[test]
fn material_id_mirror_law() {
    let fens = [
        START_FEN,
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "4k3/8/8/8/8/8/8/Q3K3 w - - 0 1",
    ];
    for fen in fens {
        let pos: Position = fen.parse().unwrap();
        // Mirroring the board colours mirrors the material id.
        let mut mirrored = Position::empty();
        for sq in 0..64 {
            let p = pos.get_piece(sable::types::Square::from_index(sq));
            if !p.is_empty() {
                mirrored.set_piece(
                    sable::types::Square::from_index(sq ^ 56),
                    p.mirror(),
                );
            }
        }
        assert_eq!(
            mirrored.material_id(),
            pos.material_id().mirror(),
            "{fen}"
        );
    }
}

#[test]
fn history_hash_clock_buckets() {
    // Many pieces: the clock only matters from 40 plies on.
    let base = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -";
    let at = |clock: u16| -> u64 {
        let fen = format!("{base} {clock} 1");
        fen.parse::<Position>().unwrap().history_hash()
    };
    assert_eq!(at(0), at(17));
    assert_eq!(at(0), at(39));
    // Buckets of ten between 40 and 79.
    assert_eq!(at(41), at(49));
    assert_ne!(at(49), at(50));
    assert_ne!(at(0), at(45));
    // Exact from 80 up.
    assert_ne!(at(80), at(81));

    // Few pieces (tablebase range): always exact.
    let tb = |clock: u16| -> u64 {
        let fen = format!("4k3/8/8/8/8/8/8/R3K3 w - - {clock} 1");
        fen.parse::<Position>().unwrap().history_hash()
    };
    assert_ne!(tb(0), tb(1));
    assert_ne!(tb(1), tb(2));
    // Clamped at 100.
    assert_eq!(tb(100), tb(120));
}

#[test]
fn zobrist_depends_on_all_hash_fields() {
    let with_castle: Position = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1".parse().unwrap();
    let without: Position = "r3k2r/8/8/8/8/8/8/R3K2R w - - 0 1".parse().unwrap();
    assert_ne!(with_castle.zobrist_hash(), without.zobrist_hash());

    let white: Position = "4k3/8/8/8/8/8/8/4K3 w - - 0 1".parse().unwrap();
    let black: Position = "4k3/8/8/8/8/8/8/4K3 b - - 0 1".parse().unwrap();
    assert_ne!(white.zobrist_hash(), black.zobrist_hash());
}

#[test]
fn insufficient_material_positions_eval_as_draws() {
    use sable::eval::endgame::{end_game_eval, is_end_game_material};
    for fen in [
        "4k3/8/8/8/8/8/8/4K3 w - - 0 1",
        "4k3/8/8/8/8/8/8/2B1K3 w - - 0 1",
        "4kn2/8/8/8/8/8/8/4K3 b - - 0 1",
    ] {
        let pos: Position = fen.parse().unwrap();
        assert!(is_end_game_material(pos.material_id()), "{fen}");
        assert_eq!(end_game_eval(&pos, 123), 0, "{fen}");
    }
}

#[test]
fn piece_bb_union_queries() {
    let pos = Position::start();
    let rooks_queens = pos.piece_type_bb_multi(&[Piece::WRook, Piece::WQueen]);
    assert_eq!(rooks_queens.count_ones(), 3);
    assert_eq!(pos.occupied_bb().count_ones(), 32);
}
