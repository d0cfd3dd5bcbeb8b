//! # Stamp Benchmarks
//!
//! Apply/unapply throughput for stamps of growing size, and the cost of an
//! undo/redo cycle through the router.
//!
//! Run with: `cargo bench -p weft-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;
use weft_core::Session;

fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("id").to_string()
}

/// A session holding a star-shaped `contains` tree of `size` members, a
/// stamp captured from it, and an empty target entity.
fn stamped_session(size: usize) -> (Session, String, String) {
    let mut session = Session::in_memory().expect("session");
    let project = id_of(&session.put("/projects", json!({ "name": "bench" })).expect("project"));
    let entities = format!("/projects/{}/entities", project);
    let relationships = format!("/projects/{}/relationships", project);

    let root = id_of(
        &session
            .put(&entities, json!({ "attrs": { "color": "red" } }))
            .expect("root"),
    );
    for i in 0..size {
        let member = id_of(
            &session
                .put(&entities, json!({ "attrs": { "index": i } }))
                .expect("member"),
        );
        session
            .put(&relationships, json!({ "from_entity": root, "to_entity": member, "kind": "contains" }))
            .expect("edge");
    }
    let stamp = id_of(
        &session
            .put("/stamps", json!({ "name": "bench", "source_entity_id": root }))
            .expect("stamp"),
    );
    let target = id_of(&session.put(&entities, Value::Null).expect("target"));
    (session, stamp, target)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_apply_unapply(c: &mut Criterion) {
    let mut group = c.benchmark_group("stamp_apply_unapply");

    for size in [1, 10, 100].iter() {
        let (mut session, stamp, target) = stamped_session(*size);
        let apply = format!("/stamps/{}/apply/{}", stamp, target);
        let unapply = format!("/stamps/{}/unapply/{}", stamp, target);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let record = session.put(&apply, Value::Null).expect("apply");
                black_box(session.put(&unapply, record).expect("unapply"))
            });
        });
    }

    group.finish();
}

fn bench_undo_redo(c: &mut Criterion) {
    let mut group = c.benchmark_group("stamp_undo_redo");

    for size in [10, 100].iter() {
        let (mut session, stamp, target) = stamped_session(*size);
        session
            .put(&format!("/stamps/{}/apply/{}", stamp, target), Value::Null)
            .expect("apply");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                session.put("/history/undo", Value::Null).expect("undo");
                black_box(session.put("/history/redo", Value::Null).expect("redo"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply_unapply, bench_undo_redo);
criterion_main!(benches);
