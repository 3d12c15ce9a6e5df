use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use desceval_core::{Correspondence, Descriptor, Keypoint};
use desceval_match::{GeometricVerifier, Matcher};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random unit descriptors of the given dimension
fn create_descriptors(count: usize, dim: usize, seed: u64) -> Vec<Descriptor> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut d: Descriptor = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
            d.iter_mut().for_each(|v| *v /= norm);
            d
        })
        .collect()
}

/// Target descriptors as slightly perturbed copies of the reference set
fn perturb(descs: &[Descriptor], amount: f32, seed: u64) -> Vec<Descriptor> {
    let mut rng = StdRng::seed_from_u64(seed);
    descs
        .iter()
        .map(|d| d.iter().map(|v| v + rng.gen_range(-amount..amount)).collect())
        .collect()
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching");

    for &count in &[250usize, 1000, 2000] {
        let reference = create_descriptors(count, 128, 1);
        let target = perturb(&reference, 0.02, 2);

        group.bench_with_input(BenchmarkId::new("ratio_test", count), &count, |b, _| {
            let matcher = Matcher::new(0.8).unwrap();
            b.iter(|| black_box(matcher.match_descriptors(black_box(&reference), black_box(&target))));
        });

        group.bench_with_input(BenchmarkId::new("cross_check", count), &count, |b, _| {
            let matcher = Matcher::new(0.8).unwrap().with_cross_check(true);
            b.iter(|| black_box(matcher.match_descriptors(black_box(&reference), black_box(&target))));
        });
    }

    group.finish();
}

fn bench_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("verification");
    let mut rng = StdRng::seed_from_u64(3);

    for &(count, outlier_pct) in &[(200usize, 10usize), (200, 50), (1000, 30)] {
        let a: Vec<Keypoint> = (0..count)
            .map(|_| Keypoint::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0), 16.0))
            .collect();
        let b: Vec<Keypoint> = a
            .iter()
            .enumerate()
            .map(|(i, kp)| {
                if i * 100 < count * outlier_pct {
                    kp.moved_to(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0))
                } else {
                    kp.moved_to(kp.x * 0.95 + 12.0, kp.y * 1.02 - 4.0)
                }
            })
            .collect();
        let matches: Vec<Correspondence> = (0..count)
            .map(|i| Correspondence { query_idx: i, train_idx: i, distance: 0.0 })
            .collect();

        group.bench_function(format!("{}_matches_{}pct_outliers", count, outlier_pct), |bench| {
            let verifier = GeometricVerifier::new(3.0).unwrap();
            bench.iter(|| black_box(verifier.verify(black_box(&a), black_box(&b), black_box(&matches))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_matching, bench_verification);
criterion_main!(benches);
