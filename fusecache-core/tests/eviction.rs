use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use fusecache_core::{
    encode, CacheConfig, CanonicalKey, EvictionHook, FusionCache, FusionGraph, SignatureId,
    SignatureTable,
};

mod common;
use common::{init_logging, tensor, Gate, GatedBackend, GatedValue, StubBackend, StubProgram};

fn key(s: &str) -> CanonicalKey {
    CanonicalKey::from(s)
}

#[test]
fn table_reports_the_evicted_id() {
    init_logging();
    let table = SignatureTable::new(2);
    let a = table.lookup_or_insert(key("A"));
    let b = table.lookup_or_insert(key("B"));
    assert_eq!((a.id.get(), b.id.get()), (1, 2));
    assert_eq!(table.lookup_or_insert(key("A")).id, a.id);

    let c = table.lookup_or_insert(key("C"));
    assert_eq!(c.id.get(), 3);
    assert_eq!(c.evicted, Some(b.id));
    assert_eq!(table.size(), 2);

    // B comes back with a fresh id; A is now the least recent.
    let b2 = table.lookup_or_insert(key("B"));
    assert_eq!(b2.id.get(), 4);
    assert_eq!(b2.evicted, Some(a.id));
}

#[test]
fn hook_sees_every_eviction_in_order() {
    init_logging();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let table = SignatureTable::new(1);
    let sink = seen.clone();
    table.on_evict(EvictionHook::Callback(Box::new(move |id: SignatureId| {
        sink.lock().unwrap().push(id.get())
    })));
    for k in ["a", "b", "c", "b"] {
        table.lookup_or_insert(key(k));
    }
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn encoded_inputs_and_keys_share_ids() {
    let table = SignatureTable::default();
    let inputs = [tensor(&[3, 4])];
    let via_inputs = table.lookup_inputs(&inputs).unwrap();
    let via_key = table.lookup_or_insert(encode(&inputs).unwrap());
    assert_eq!(via_inputs.id, via_key.id);
    assert_eq!(table.size(), 1);
}

#[test]
fn eviction_reaches_runtimes_of_every_graph() {
    init_logging();
    let cache =
        FusionCache::new(StubBackend::new(3), CacheConfig::default().with_capacity(1)).unwrap();
    let g1 = cache.register_graph(FusionGraph::whole("g1", 1, StubProgram::new("g1")));
    let g2 = cache.register_graph(FusionGraph::whole("g2", 1, StubProgram::new("g2")));

    let a = [tensor(&[8])];
    cache.run(g1, &a).unwrap();
    cache.run(g2, &a).unwrap();
    assert!(cache.backend().evictions().is_empty());

    // A second signature pushes the first one out of the table.
    cache.run(g1, &[tensor(&[2, 4])]).unwrap();
    let mut evicted = cache.backend().evictions();
    evicted.sort();
    assert_eq!(
        evicted,
        vec![
            ("g1".to_string(), SignatureId::from(1)),
            ("g2".to_string(), SignatureId::from(1)),
        ]
    );
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.signature_count(), 1);
}

#[test]
fn evicted_shortcuts_are_not_reused() {
    init_logging();
    let cache =
        FusionCache::new(StubBackend::new(3), CacheConfig::default().with_capacity(1)).unwrap();
    let g = cache.register_graph(FusionGraph::whole("g", 1, StubProgram::new("g")));

    let first = cache.get_or_build_runtime(g, &[tensor(&[8])]).unwrap();
    cache.run(g, &[tensor(&[3])]).unwrap();
    let again = cache.get_or_build_runtime(g, &[tensor(&[8])]).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // [8] was re-interned under a new id and found by heuristics, not by shortcut.
    let stats = cache.stats();
    assert_eq!(stats.shortcut_hits, 0);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.evictions, 2);
    assert_eq!(cache.runtime_count(g).unwrap(), 1);
}

#[test]
fn concurrent_lookups_with_a_tiny_table_stay_consistent() {
    init_logging();
    let cache = Arc::new(
        FusionCache::new(StubBackend::new(3), CacheConfig::default().with_capacity(2)).unwrap(),
    );
    let g = cache.register_graph(FusionGraph::whole("g", 1, StubProgram::new("g")));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let n = 1 + (i + t) % 5;
                    cache.run(g, &[tensor(&[n, n])]).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(cache.signature_count() <= 2);
    assert_eq!(cache.runtime_count(g).unwrap(), 1);
}

#[test]
fn eviction_during_resolution_leaves_no_state() {
    init_logging();
    let cache = Arc::new(
        FusionCache::new(GatedBackend::new(3), CacheConfig::default().with_capacity(1)).unwrap(),
    );
    let g = cache.register_graph(FusionGraph::whole("g", 1, StubProgram::new("g")));

    for round in 0..5 {
        // The second describe happens after interning, before the graph is locked.
        let gate = Gate::new(2);
        let worker = {
            let cache = cache.clone();
            let value = GatedValue::gated(tensor(&[8]), gate.clone());
            std::thread::spawn(move || cache.run(g, &[value]).map(|out| out.len()))
        };
        gate.wait_arrived();
        let interned = cache.live_signatures();
        assert_eq!(interned.len(), 1);
        let worker_id = interned[0];
        cache
            .run(g, &[GatedValue::open(tensor(&[2 + round, 2]))])
            .unwrap();
        gate.release();
        assert_eq!(worker.join().unwrap().unwrap(), 1);

        let live: BTreeSet<SignatureId> = cache.live_signatures().into_iter().collect();
        assert!(!live.contains(&worker_id), "round {round}");
        assert!(cache.backend().stub.held_signatures().is_subset(&live));
        let shortcuts: BTreeSet<SignatureId> = cache.shortcuts(g).unwrap().into_iter().collect();
        assert!(shortcuts.is_subset(&live), "round {round}: {shortcuts:?}");
    }
    assert_eq!(cache.runtime_count(g).unwrap(), 2);
}
