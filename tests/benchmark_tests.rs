//! Performance benchmarks for the simulation and the wire format

use bincode::{deserialize, serialize};
use serde_json::json;
use server::collision::CollisionDetector;
use server::config::{GameConfig, RoomConfig};
use server::engine::GameEngine;
use server::physics::{BodyKind, PhysicsWorld, RigidBody, Vector2};
use server::registry::RoomRegistry;
use server::room::Room;
use server::slots::Slot;
use shared::{Direction, Packet, Participant, RoomState};
use std::time::Instant;
use tokio::sync::mpsc;

/// Benchmarks a full match tick: physics step plus post-step bookkeeping
#[test]
fn benchmark_engine_tick() {
    let mut engine = GameEngine::new(GameConfig::new().with_seed(7), RoomState::new());
    engine.add_player("a", Slot::Player0);
    engine.add_player("b", Slot::Player1);
    engine.spawn_ball();

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        if i % 3 == 0 {
            let direction = if i % 2 == 0 { Direction::Up } else { Direction::Down };
            engine.process_input("a", direction);
        }
        engine.tick(1.0 / 60.0);
    }

    let duration = start.elapsed();
    println!(
        "Engine tick: {} iterations in {:?} ({:.2} µs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(engine.state().tick, iterations);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks overlap queries over a crowded detector
#[test]
fn benchmark_collision_queries() {
    let mut world = PhysicsWorld::new();
    let mut detector = CollisionDetector::new();
    for i in 0..50 {
        let x = (i % 10) as f32 * 60.0;
        let y = (i / 10) as f32 * 60.0;
        let handle = world.add(RigidBody::circle(BodyKind::Ball, Vector2::new(x, y), 40.0));
        detector.add(handle);
    }

    let iterations = 1_000;
    let start = Instant::now();
    let mut pairs = 0;

    for _ in 0..iterations {
        pairs += detector.collisions(&world).len();
    }

    let duration = start.elapsed();
    println!(
        "Collision queries: {} iterations in {:?} ({} pairs total)",
        iterations, duration, pairs
    );

    assert!(pairs > 0);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks state packet serialization for a busy room
#[test]
fn benchmark_state_serialization() {
    let mut state = RoomState::new();
    for i in 0..2 {
        state
            .participants
            .insert(format!("player{i:03}"), Participant::player(format!("u{i}")));
        state.scoreboard.insert(format!("player{i:03}"), i);
    }
    for i in 0..30 {
        state
            .participants
            .insert(format!("spect{i:04}"), Participant::spectator(format!("s{i}")));
    }
    let packet = Packet::State { state };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let data = serialize(&packet).unwrap();
        let decoded: Packet = deserialize(&data).unwrap();
        assert!(matches!(decoded, Packet::State { .. }));
    }

    let duration = start.elapsed();
    println!(
        "State serialization: {} roundtrips in {:?}",
        iterations, duration
    );

    assert!(duration.as_millis() < 5000);
}

/// Stress test: a flood of messages, valid and invalid, through one room
#[test]
fn stress_test_message_flood() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut room = Room::create(
        &json!({ "instanceId": "flood" }),
        RoomConfig {
            game: GameConfig::new().with_seed(3),
            ..RoomConfig::default()
        },
        RoomRegistry::new(),
        tx,
    )
    .unwrap();
    room.on_join("a", &json!({ "userId": "ua" })).unwrap();
    room.on_join("b", &json!({ "userId": "ub" })).unwrap();
    room.on_join("c", &json!({ "userId": "uc" })).unwrap();

    let payloads = ["1", "-1", "0", "garbage", "{\"x\":1}"];
    let iterations = 50_000;
    let start = Instant::now();

    for i in 0..iterations {
        let payload = payloads[i % payloads.len()];
        room.on_message("a", "playerPosition", payload);
        room.on_message("c", "spectatorCubePosition", r#"{"x": 1.5, "y": 2.5}"#);
        if i % 100 == 0 {
            room.tick(1.0 / 60.0);
        }
    }

    let duration = start.elapsed();
    println!(
        "Message flood: {} iterations in {:?}",
        iterations, duration
    );

    assert_eq!(room.state().player_count(), 2);
    assert!(duration.as_millis() < 5000);
}
