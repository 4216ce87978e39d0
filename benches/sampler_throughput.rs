//! Throughput of graph-communication sampling and joint batch drawing
//! on cooperative navigation, for a few team sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use graphmarl::env::CooperativeNavigation;
use graphmarl::graph::{FixedGraph, StochasticGraph, CommunicationGraph};
use graphmarl::policy::{PolicyKind, UniformPolicy};
use graphmarl::pool::{PoolSpec, ReplayPool};
use graphmarl::sampler::{GraphSampler, Sampler, SamplerAgent, SamplerConfig};

fn sampler(n: usize, graph: Box<dyn CommunicationGraph>) -> GraphSampler {
    let obs = 2 + 2 * n;
    let mut sampler = GraphSampler::new(SamplerConfig::new(25, 64, 64), graph).unwrap();
    let agents = (0..n as u64)
        .map(|i| {
            let spec = PoolSpec::new(10_000, obs, 2)
                .with_opponent_actions((n - 1) * 2)
                .with_graph(n);
            let policy = UniformPolicy::new(obs, 2, i).with_kind(PolicyKind::Joint);
            SamplerAgent::new(policy.into(), ReplayPool::new(spec, i).unwrap())
        })
        .collect();
    sampler
        .initialize(Box::new(CooperativeNavigation::new(n, 0)), agents)
        .unwrap();
    sampler
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_sample");
    for &n in &[2usize, 4, 8] {
        let input = n * (2 + 2 * n);
        group.bench_with_input(BenchmarkId::new("fixed", n), &n, |b, &n| {
            let mut s = sampler(n, Box::new(FixedGraph::uniform(n, input).unwrap()));
            b.iter(|| s.sample().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("stochastic", n), &n, |b, &n| {
            let graph = StochasticGraph::new(input, n, &[64], 1).unwrap();
            let mut s = sampler(n, Box::new(graph));
            b.iter(|| s.sample().unwrap());
        });
    }
    group.finish();
}

fn bench_joint_batch(c: &mut Criterion) {
    let mut s = sampler(4, Box::new(FixedGraph::uniform(4, 40).unwrap()));
    for _ in 0..1000 {
        s.sample().unwrap();
    }
    c.bench_function("random_joint_batch_4_agents", |b| {
        b.iter(|| black_box(s.random_joint_batch().unwrap()))
    });
}

criterion_group!(benches, bench_sample, bench_joint_batch);
criterion_main!(benches);
