//! End-to-end tests of query cycles, callbacks and contact persistence.
//!
//! Run with: cargo test -p cd-core --test engine

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use approx::assert_relative_eq;
use cd_core::{
    CdError, CollisionConfig, CollisionEngine, Contact, ContactId, Geom, GeomId, PersistenceConfig,
    Pose,
};
use nalgebra::{Point3, Vector3};

fn ground() -> Geom {
    let mut geom = Geom::new();
    geom.add_plane();
    geom
}

fn crate_at(z: f64, persistence: usize) -> Geom {
    let mut geom = Geom::at(Pose::from_position(Point3::new(0.0, 0.0, z)));
    geom.add_cuboid(1.0, 1.0, 1.0).unwrap();
    geom.set_contact_persistence(persistence);
    geom
}

/// Every pair's contacts from one separation cycle.
fn contacts_by_pair(
    engine: &mut CollisionEngine,
) -> BTreeMap<(GeomId, GeomId), Vec<Contact>> {
    let mut found = BTreeMap::new();
    engine.separate(|_, a, b, contacts| {
        found.insert((a, b), contacts.iter().copied().collect());
        ControlFlow::Continue(())
    });
    found
}

fn ids(contacts: &[Contact]) -> Vec<ContactId> {
    let mut ids: Vec<ContactId> = contacts.iter().map(|c| c.id.unwrap()).collect();
    ids.sort_unstable();
    ids
}

/// Spheres dropped onto a plane in a loose pile.
fn pile(config: CollisionConfig) -> CollisionEngine {
    let mut engine = CollisionEngine::new(config).unwrap();
    engine.add_geom(ground());
    for i in 0..40 {
        let t = f64::from(i);
        let mut ball = Geom::at(Pose::from_position(Point3::new(
            (t * 0.9).sin() * 2.0,
            (t * 1.7).cos() * 2.0,
            0.25 + 0.4 * (t * 0.3).sin().abs(),
        )));
        ball.add_sphere(0.3).unwrap();
        engine.add_geom(ball);
    }
    engine
}

// =============================================================================
// Query cycles
// =============================================================================

#[test]
fn crate_on_ground_reports_upward_contacts() {
    let mut engine = CollisionEngine::new(CollisionConfig::default().without_persistence()).unwrap();
    let floor = engine.add_geom(ground());
    let body = engine.add_geom(crate_at(0.45, 0));

    let found = contacts_by_pair(&mut engine);
    let contacts = &found[&(floor, body)];
    assert_eq!(found.len(), 1);
    assert!(!contacts.is_empty());
    for c in contacts {
        assert_relative_eq!(c.normal, Vector3::z(), epsilon = 1e-9);
        assert_relative_eq!(c.depth, 0.05, epsilon = 1e-9);
        assert!(c.id.is_none());
    }

    let direct = engine.separate_pair(body, floor).unwrap();
    assert!(direct.iter().all(|c| c.normal.z < -0.99));
}

#[test]
fn callback_can_inspect_engine() {
    let mut engine = CollisionEngine::new(CollisionConfig::default()).unwrap();
    engine.add_geom(ground());
    engine.add_geom(crate_at(0.45, 0));
    engine.add_geom(crate_at(5.0, 0));

    let mut heights = Vec::new();
    assert!(engine.collide(|engine, a, b| {
        let a = engine.geom(a).unwrap().pose().position.z;
        let b = engine.geom(b).unwrap().pose().position.z;
        heights.push(a.max(b));
        ControlFlow::Continue(())
    }));
    assert_eq!(heights, vec![0.45]);
}

#[test]
fn unknown_geom_ids_are_errors() {
    let mut engine = CollisionEngine::new(CollisionConfig::default()).unwrap();
    let floor = engine.add_geom(ground());

    assert!(matches!(
        engine.separate_pair(floor, GeomId(7)),
        Err(CdError::InvalidGeomId(7))
    ));
    assert!(engine.set_pose(GeomId(1), Pose::identity()).is_err());
    assert!(engine.rebuild(GeomId(1)).is_err());
    assert!(engine.rebuild(floor).is_ok());
}

#[test]
fn threaded_cycles_match_sequential() {
    let mut sequential = pile(CollisionConfig::default().without_persistence());
    let mut threaded = pile(CollisionConfig::default().without_persistence().with_threads(4));
    let mut brute = pile(CollisionConfig::default().without_persistence().without_sap());

    let expected = contacts_by_pair(&mut sequential);
    assert!(!expected.is_empty());

    for engine in [&mut threaded, &mut brute] {
        let found = contacts_by_pair(engine);
        assert_eq!(found.keys().collect::<Vec<_>>(), expected.keys().collect::<Vec<_>>());
        for (pair, contacts) in &found {
            assert_eq!(contacts.len(), expected[pair].len(), "pair {pair:?}");
        }
    }
}

#[test]
fn threaded_break_invokes_callback_once() {
    let mut engine = pile(CollisionConfig::default().with_threads(4));
    let mut calls = 0;
    assert!(engine.separate(|_, _, _, _| {
        calls += 1;
        ControlFlow::Break(())
    }));
    assert_eq!(calls, 1);
}

// =============================================================================
// Contact persistence
// =============================================================================

#[test]
fn contact_ids_survive_small_motion() {
    let mut engine = CollisionEngine::new(CollisionConfig::default()).unwrap();
    let floor = engine.add_geom(ground());
    let body = engine.add_geom(crate_at(0.45, 4));

    let first = contacts_by_pair(&mut engine)[&(floor, body)].clone();
    assert_eq!(first.len(), 4);
    engine.maintain_contacts();

    engine
        .set_pose(body, Pose::from_position(Point3::new(0.0, 0.0, 0.449)))
        .unwrap();
    let second = contacts_by_pair(&mut engine)[&(floor, body)].clone();
    assert_eq!(ids(&first), ids(&second));
    assert_relative_eq!(second[0].depth, 0.051, epsilon = 1e-9);
    engine.maintain_contacts();

    // Sliding well past the drift distance invalidates every identity.
    engine
        .set_pose(body, Pose::from_position(Point3::new(0.5, 0.0, 0.449)))
        .unwrap();
    let third = contacts_by_pair(&mut engine)[&(floor, body)].clone();
    assert_eq!(third.len(), 4);
    assert!(ids(&third).iter().all(|id| !ids(&first).contains(id)));
}

#[test]
fn separated_pairs_age_out() {
    let config = CollisionConfig {
        persistence: PersistenceConfig {
            max_age: 1,
            ..PersistenceConfig::default()
        },
        ..CollisionConfig::default()
    };
    let mut engine = CollisionEngine::new(config).unwrap();
    engine.add_geom(ground());
    let body = engine.add_geom(crate_at(0.45, 4));

    assert!(engine.separate(|_, _, _, _| ControlFlow::Continue(())));
    let table = engine.contact_persistence().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.active_len(), 1);
    assert_eq!(engine.maintain_contacts().demoted, 1);

    engine
        .set_pose(body, Pose::from_position(Point3::new(0.0, 0.0, 3.0)))
        .unwrap();
    assert!(!engine.separate(|_, _, _, _| ControlFlow::Continue(())));
    assert_eq!(engine.maintain_contacts().removed, 0);
    assert!(!engine.separate(|_, _, _, _| ControlFlow::Continue(())));
    assert_eq!(engine.maintain_contacts().removed, 1);
    assert!(engine.contact_persistence().unwrap().is_empty());
}

#[test]
fn geoms_without_persistence_pass_through() {
    let mut engine = CollisionEngine::new(CollisionConfig::default()).unwrap();
    let floor = engine.add_geom(ground());
    let body = engine.add_geom(crate_at(0.45, 0));

    let found = contacts_by_pair(&mut engine);
    assert!(found[&(floor, body)].iter().all(|c| c.id.is_none()));
    assert!(engine.contact_persistence().unwrap().is_empty());
}
