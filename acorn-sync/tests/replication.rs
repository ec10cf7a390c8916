//! Cross-tree replication: conflict resolution through the judge, anti-loop
//! guarantees on fully-entangled meshes, and delta sessions.

use std::sync::Arc;

use acorn_core::{Nut, SquabbleDirection, Tree};
use acorn_sync::{push_delta, reconcile, Entangler};
use acorn_trunk_mem::MemoryTrunk;
use serde::{Deserialize, Serialize};
use time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    body: String,
    ts: i64,
}

fn note(body: &str, ts: i64) -> Note {
    Note {
        body: body.into(),
        ts,
    }
}

fn tree() -> Tree<Note> {
    Tree::new(Arc::new(MemoryTrunk::new()))
}

#[test]
fn remote_wins_on_timestamp() {
    let tree = tree();
    let local = tree.stash_with_id("k", note("local", 100)).unwrap();

    let mut incoming = local.clone();
    incoming.payload = note("remote", 200);
    incoming.timestamp += Duration::seconds(60);
    incoming.origin_node_id = "peer".into();

    tree.squabble("k", incoming, SquabbleDirection::UseJudge)
        .unwrap();
    assert_eq!(tree.crack("k").unwrap().unwrap().payload.ts, 200);
}

#[test]
fn stale_remote_loses_on_timestamp() {
    let tree = tree();
    tree.stash_with_id("k", note("local", 100)).unwrap();

    let mut incoming = Nut::new("k", note("stale", 50)).unwrap();
    incoming.timestamp -= Duration::hours(1);
    tree.squabble("k", incoming, SquabbleDirection::UseJudge)
        .unwrap();
    assert_eq!(tree.crack("k").unwrap().unwrap().payload.ts, 100);
}

#[test]
fn entangled_pair_converges_on_stash_and_toss() {
    let a = tree();
    let b = tree();
    Entangler::between(&a, &b);

    a.stash_with_id("x", note("hello", 1)).unwrap();
    assert_eq!(b.crack("x").unwrap().unwrap().payload.body, "hello");

    b.toss("x").unwrap();
    assert!(a.crack("x").unwrap().is_none());
}

#[test]
fn fully_meshed_triangle_applies_each_leaf_exactly_once() {
    let a = tree();
    let b = tree();
    let c = tree();
    Entangler::mesh(&[a.clone(), b.clone(), c.clone()]);

    a.stash_with_id("x", note("v", 1)).unwrap();

    assert_eq!(b.crack("x").unwrap().unwrap().payload.body, "v");
    assert_eq!(c.crack("x").unwrap().unwrap().payload.body, "v");

    // one accepted application per tree, duplicates dropped at the edges
    let accepted: u64 = [&a, &b, &c]
        .iter()
        .map(|t| t.stats().leaves_accepted)
        .sum();
    assert_eq!(accepted, 3);

    let squabbles: u64 = [&b, &c].iter().map(|t| t.stats().squabbles).sum();
    assert_eq!(squabbles, 2);
}

#[test]
fn larger_cyclic_meshes_terminate() {
    let trees: Vec<Tree<Note>> = (0..8).map(|_| tree()).collect();
    Entangler::mesh(&trees);

    trees[0].stash_with_id("x", note("fan", 1)).unwrap();
    for tree in &trees {
        assert_eq!(tree.crack("x").unwrap().unwrap().payload.body, "fan");
        // no tree applied the change more than once
        assert_eq!(tree.stats().leaves_accepted, 1);
    }
}

#[test]
fn push_delta_moves_only_changes_since_the_watermark() {
    let source = tree();
    let target = tree();

    source.stash_with_id("a", note("one", 1)).unwrap();
    source.stash_with_id("b", note("two", 2)).unwrap();
    let report = push_delta(&source, &target).unwrap();
    assert_eq!(report.exported, 2);
    assert_eq!(report.adopted, 2);

    // nothing new: the watermark advanced at completion
    let idle = push_delta(&source, &target).unwrap();
    assert_eq!(idle.exported, 0);

    std::thread::sleep(std::time::Duration::from_millis(5));
    source.stash_with_id("c", note("three", 3)).unwrap();
    let incremental = push_delta(&source, &target).unwrap();
    assert_eq!(incremental.exported, 1);
    assert_eq!(target.crack_all().unwrap().len(), 3);
}

#[test]
fn reconcile_merges_both_directions_through_the_judge() {
    let a = tree();
    let b = tree();

    a.stash_with_id("only-a", note("a", 1)).unwrap();
    b.stash_with_id("only-b", note("b", 2)).unwrap();
    a.stash_with_id("shared", note("old", 3)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    b.stash_with_id("shared", note("new", 4)).unwrap();

    reconcile(&a, &b).unwrap();

    for tree in [&a, &b] {
        assert_eq!(tree.crack_all().unwrap().len(), 3);
        assert_eq!(tree.crack("shared").unwrap().unwrap().payload.body, "new");
    }
}
