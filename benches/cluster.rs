use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vidsearch::cluster::{SimilarityEdge, build_groups};

// 每个视频随机连接最多 5 个已有视频，模拟 top-k 搜索产生的相似边
fn generate_edges(n: usize) -> Vec<SimilarityEdge> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut edges = vec![];
    for id in 2..=n {
        for _ in 0..rng.random_range(0..=5) {
            let other = rng.random_range(1..id);
            edges.push(SimilarityEdge::new(id, other, rng.random_range(0.9..1.0)));
        }
    }
    edges
}

fn bench_build_groups(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_groups");
    for n in [1_000, 10_000, 100_000] {
        let edges = generate_edges(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &edges, |b, edges| {
            b.iter(|| build_groups(black_box(1..=n), black_box(edges)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_groups);
criterion_main!(benches);
