use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fastrand::Rng;
use nested_automata::{
    prelude::*,
    random::{generate_random_net, generate_random_nwa, RandomNwaShape},
};

fn bench_minimize_flat(c: &mut Criterion) {
    let nwa = generate_random_nwa(&mut Rng::with_seed(1), &RandomNwaShape::flat(12, 2)).unwrap();
    let cancel = CancelToken::new();
    c.bench_function("minimize_flat_12", |b| {
        b.iter(|| {
            MinimizeNwaMaxSat::new(black_box(&nwa), &StringFactory, MinimizeOptions::default(), &cancel)
                .unwrap()
                .into_result()
        })
    });
}

fn bench_minimize_nested(c: &mut Criterion) {
    let nwa = generate_random_nwa(&mut Rng::with_seed(2), &RandomNwaShape::nested(8, 2)).unwrap();
    let cancel = CancelToken::new();
    c.bench_function("minimize_nested_8", |b| {
        b.iter(|| {
            MinimizeNwaMaxSat::new(black_box(&nwa), &StringFactory, MinimizeOptions::default(), &cancel)
                .unwrap()
                .into_result()
        })
    });
}

fn bench_direct_simulation(c: &mut Criterion) {
    let nwa = generate_random_nwa(&mut Rng::with_seed(3), &RandomNwaShape::flat(30, 3)).unwrap();
    let cancel = CancelToken::new();
    c.bench_function("direct_simulation_30", |b| {
        b.iter(|| {
            ReduceDirectSimulation::new(black_box(&nwa), &StringFactory, &cancel)
                .unwrap()
                .into_result()
        })
    });
}

fn bench_unfolding(c: &mut Criterion) {
    let net = generate_random_net(&mut Rng::with_seed(4), 3, 4, 12, 3, 0.3).unwrap();
    let cancel = CancelToken::new();
    c.bench_function("unfold_3x4", |b| {
        b.iter(|| {
            PetriNetUnfolder::new(black_box(&net), UnfoldingOptions::default(), &cancel)
                .unwrap()
                .into_result()
        })
    });
}

criterion_group!(
    benches,
    bench_minimize_flat,
    bench_minimize_nested,
    bench_direct_simulation,
    bench_unfolding
);
criterion_main!(benches);
