use criterion::{criterion_group, criterion_main, Criterion};

use sable::movegen::perft;
use sable::position::Position;

fn perft_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("perft");
    group.sample_size(10);

    group.bench_function("start_depth_4", |b| {
        let mut pos = Position::start();
        b.iter(|| perft(&mut pos, 4));
    });

    group.bench_function("kiwipete_depth_3", |b| {
        let mut pos: Position =
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"
                .parse()
                .unwrap();
        b.iter(|| perft(&mut pos, 3));
    });

    group.finish();
}

fn eval_benchmarks(c: &mut Criterion) {
    use sable::eval::nn::{NetData, NET_DATA_SIZE};
    use sable::eval::Evaluate;

    let net = NetData::from_bytes(&vec![0u8; NET_DATA_SIZE]).unwrap();
    let mut eval = Evaluate::new(net);
    let mut pos = Position::start();

    c.bench_function("eval_start_position", |b| {
        b.iter(|| {
            eval.clear_hash();
            eval.eval_pos(&mut pos)
        });
    });
}

criterion_group!(benches, perft_benchmarks, eval_benchmarks);
criterion_main!(benches);
