//! Benchmarks for tree construction, broad phase and query cycles.
//!
//! Run with: cargo bench -p cd-core

#![allow(
    missing_docs,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::unwrap_used,
    clippy::ignored_unit_patterns
)]

use std::ops::ControlFlow;

use cd_core::{
    BuildConfig, BuildStrategy, CollisionConfig, CollisionEngine, FitMethod, Geom, NarrowPhase,
    ObbTree, Pose, Shape, SphereGrid,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Triangulated sphere of `n × n` latitude/longitude quads.
fn sphere_mesh(n: u32, radius: f64) -> Shape {
    let mut points = Vec::new();
    for j in 0..=n {
        let theta = std::f64::consts::PI * f64::from(j) / f64::from(n);
        for i in 0..=n {
            let phi = std::f64::consts::TAU * f64::from(i) / f64::from(n);
            points.push(Point3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    let mut triangles = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let a = j * (n + 1) + i;
            triangles.push([a, a + 1, a + n + 2]);
            triangles.push([a, a + n + 2, a + n + 1]);
        }
    }
    Shape::trimesh(&points, &triangles).unwrap()
}

fn random_point(rng: &mut StdRng, range: f64) -> Point3<f64> {
    Point3::new(
        rng.gen_range(-range..range),
        rng.gen_range(-range..range),
        rng.gen_range(-range..range),
    )
}

/// Build OBB trees over meshes of growing size with each fitting method.
fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build");

    for n in [8, 16, 32] {
        let mesh = [sphere_mesh(n, 1.0)];
        let triangles = (2 * n * n) as u64;
        group.throughput(Throughput::Elements(triangles));

        for (name, config) in [
            ("covariance", BuildConfig::default()),
            ("calipers", BuildConfig::default().fit(FitMethod::calipers())),
            ("bottom_up", BuildConfig::default().strategy(BuildStrategy::BottomUp)),
            ("parallel", BuildConfig::parallel(4)),
        ] {
            group.bench_with_input(BenchmarkId::new(name, triangles), &mesh, |b, mesh| {
                b.iter(|| black_box(ObbTree::build(mesh, &config)));
            });
        }
    }

    group.finish();
}

/// Lock-step traversal of two overlapping mesh geoms.
fn bench_mesh_mesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_mesh");
    let narrow = NarrowPhase::default();

    for n in [8, 16, 32] {
        let mut a = Geom::new();
        a.add_shape(sphere_mesh(n, 1.0));
        a.build(&BuildConfig::default());
        let mut b = a.clone();
        b.set_position(Point3::new(1.9, 0.1, 0.0));

        group.bench_with_input(BenchmarkId::new("collide", 2 * n * n), &(a, b), |bench, (a, b)| {
            bench.iter(|| black_box(a.collide(b, &narrow)));
        });
    }

    group.finish();
}

/// Full collision cycles over scattered spheres.
fn bench_engine_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_cycle");

    for count in [100, 1000] {
        for (name, config) in [
            ("sap", CollisionConfig::default()),
            ("brute_force", CollisionConfig::default().without_sap()),
            ("sap_4_threads", CollisionConfig::default().with_threads(4)),
        ] {
            if name == "brute_force" && count > 100 {
                continue;
            }

            let mut rng = StdRng::seed_from_u64(7);
            let mut engine = CollisionEngine::new(config).unwrap();
            let range = (count as f64).cbrt() * 1.5;
            for _ in 0..count {
                let mut geom = Geom::at(Pose::from_position(random_point(&mut rng, range)));
                geom.add_sphere(rng.gen_range(0.2..0.6)).unwrap();
                engine.add_geom(geom);
            }

            group.throughput(Throughput::Elements(count));
            group.bench_function(BenchmarkId::new(name, count), |b| {
                b.iter(|| {
                    let mut hits = 0_usize;
                    engine.collide(|_, _, _| {
                        hits += 1;
                        ControlFlow::Continue(())
                    });
                    black_box(hits)
                });
            });
        }
    }

    group.finish();
}

/// Sphere grid queries against brute force.
fn bench_sphere_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("sphere_grid");
    let mut rng = StdRng::seed_from_u64(11);

    let mut grid = SphereGrid::new();
    for _ in 0..10_000 {
        let center = random_point(&mut rng, 20.0);
        grid.add(rng.gen_range(0.05..0.3), center);
    }
    grid.build(0.0);

    let queries: Vec<(f64, Point3<f64>)> = (0..1000)
        .map(|_| (rng.gen_range(0.05..0.5), random_point(&mut rng, 20.0)))
        .collect();
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("grid", |b| {
        b.iter(|| queries.iter().filter(|(r, c)| grid.collide(*r, c)).count());
    });
    group.bench_function("brute_force", |b| {
        b.iter(|| {
            queries
                .iter()
                .filter(|(r, c)| grid.collide_brute_force(*r, c))
                .count()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_tree_build,
    bench_mesh_mesh,
    bench_engine_cycle,
    bench_sphere_grid
);
criterion_main!(benches);
