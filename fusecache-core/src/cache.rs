//! The two-level runtime cache.
//!
//! Level one interns the signature of an input set into a small id (see
//! [`SignatureTable`]). Level two maps a registered graph plus that id to a
//! [`KernelRuntime`]: first through a per-graph shortcut keyed by id, then by
//! matching heuristics against every runtime already built for the graph,
//! and finally by building a new one.
//!
//! Lock order is table, then registry, then graph. The eviction hook runs
//! under the table lock and takes graph locks; nothing takes the table lock
//! while holding a graph lock.
//!
//! An id can be evicted between the moment a resolution interns it and the
//! moment that resolution takes the graph lock or launches. The table marks
//! the id dead before the hook runs, so a resolution checks liveness under
//! the graph lock before installing a shortcut, and [`FusionCache::run`]
//! drops the launch state of an id that died while it was in flight.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
};

use log::{debug, info};

use crate::{
    backend::Backend,
    lookup::{EvictionHook, IdLookup},
    runtime::ExecutorLog,
    CacheConfig, Describe, Error, FusionGraph, GraphId, InputDescriptor, KernelRuntime, Result,
    SignatureId, SignatureTable,
};

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resolutions answered by the per-id shortcut.
    pub shortcut_hits: usize,
    /// Resolutions answered by matching an existing runtime's heuristics.
    pub hits: usize,
    /// Resolutions that needed a new runtime.
    pub misses: usize,
    /// Runtimes successfully built.
    pub builds: usize,
    /// Signature ids evicted from the interning table.
    pub evictions: usize,
}

#[derive(Default)]
struct Counters {
    shortcut_hits: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    builds: AtomicUsize,
    evictions: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            shortcut_hits: self.shortcut_hits.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Runtimes built for one graph.
struct GraphRuntimes<B: Backend> {
    graph: Arc<FusionGraph<B::Program>>,
    runtimes: Vec<Arc<KernelRuntime<B>>>,
    shortcut: HashMap<SignatureId, Arc<KernelRuntime<B>>>,
    most_recent: Option<Arc<KernelRuntime<B>>>,
}

type GraphSlot<B> = Arc<Mutex<GraphRuntimes<B>>>;

struct Registry<B: Backend> {
    graphs: RwLock<HashMap<GraphId, GraphSlot<B>>>,
    counters: Counters,
}

impl<B: Backend> Registry<B> {
    fn slots(&self) -> Vec<GraphSlot<B>> {
        self.graphs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Forget `id` in every graph: drop its shortcut and the per-signature
    /// state of every runtime.
    fn evict(&self, id: SignatureId) {
        Counters::bump(&self.counters.evictions);
        for slot in self.slots() {
            let mut entry = lock(&slot);
            entry.shortcut.remove(&id);
            for runtime in &entry.runtimes {
                runtime.evict_cache(id);
            }
        }
    }
}

fn lock<B: Backend>(slot: &GraphSlot<B>) -> MutexGuard<'_, GraphRuntimes<B>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache from (graph, input signature) to compiled kernel runtimes.
pub struct FusionCache<B: Backend> {
    backend: B,
    config: CacheConfig,
    table: SignatureTable,
    registry: Arc<Registry<B>>,
    next_graph: AtomicU64,
    profiling: AtomicBool,
}

impl<B: Backend> FusionCache<B> {
    pub fn new(backend: B, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let table = SignatureTable::new(config.capacity);
        let registry = Arc::new(Registry {
            graphs: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        });
        let hook_registry = registry.clone();
        table.on_evict(EvictionHook::Callback(Box::new(move |id| {
            hook_registry.evict(id)
        })));
        let profiling = AtomicBool::new(config.profiling);
        Ok(Self {
            backend,
            config,
            table,
            registry,
            next_graph: AtomicU64::new(0),
            profiling,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Take ownership of `graph` and return its handle.
    pub fn register_graph(&self, graph: FusionGraph<B::Program>) -> GraphId {
        let id = GraphId::from(self.next_graph.fetch_add(1, Ordering::Relaxed));
        info!(
            "registered {id} (`{}`, {} input(s), segmented: {})",
            graph.name(),
            graph.num_inputs(),
            graph.is_segmented()
        );
        let slot = Arc::new(Mutex::new(GraphRuntimes {
            graph: Arc::new(graph),
            runtimes: Vec::new(),
            shortcut: HashMap::new(),
            most_recent: None,
        }));
        self.registry
            .graphs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);
        id
    }

    fn slot(&self, graph: GraphId) -> Result<GraphSlot<B>> {
        self.registry
            .graphs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&graph)
            .cloned()
            .ok_or_else(|| Error::UnknownGraph(graph).bt())
    }

    /// Find or build the runtime able to run `graph` on `inputs`.
    pub fn get_or_build_runtime(
        &self,
        graph: GraphId,
        inputs: &[B::Value],
    ) -> Result<Arc<KernelRuntime<B>>> {
        self.resolve(graph, inputs).map(|(_, runtime)| runtime)
    }

    /// Resolve the runtime for `inputs` and execute it.
    pub fn run(&self, graph: GraphId, inputs: &[B::Value]) -> Result<Vec<B::Value>> {
        let (id, runtime) = self.resolve(graph, inputs)?;
        let outputs = runtime.execute(inputs, id);
        // The hook may have run before this launch stored state for `id`.
        if !self.table.is_live(id) {
            debug!("{graph}: {id} was evicted while in flight");
            runtime.evict_cache(id);
        }
        outputs
    }

    fn resolve(
        &self,
        graph: GraphId,
        inputs: &[B::Value],
    ) -> Result<(SignatureId, Arc<KernelRuntime<B>>)> {
        let slot = self.slot(graph)?;
        let num_inputs = lock(&slot).graph.num_inputs();
        if inputs.len() != num_inputs {
            return Err(Error::InputArity {
                expected: num_inputs,
                got: inputs.len(),
            }
            .bt());
        }

        // Any eviction has already been applied by the table's hook.
        let IdLookup { id, evicted } = self.table.lookup_inputs(inputs)?;
        if let Some(evicted) = evicted {
            debug!("{graph}: {id} replaced evicted {evicted}");
        }

        let descriptors: Vec<InputDescriptor> = inputs.iter().map(Describe::describe).collect();
        let counters = &self.registry.counters;
        let mut entry = lock(&slot);

        if let Some(runtime) = entry.shortcut.get(&id).cloned() {
            if !self.config.revalidate_shortcuts || runtime.accepts(&self.backend, &descriptors) {
                Counters::bump(&counters.shortcut_hits);
                entry.most_recent = Some(runtime.clone());
                return Ok((id, runtime));
            }
            debug!("{graph}: shortcut for {id} no longer validates");
            entry.shortcut.remove(&id);
        }

        let found = entry
            .runtimes
            .iter()
            .find(|runtime| runtime.matches(&self.backend, &descriptors))
            .cloned();
        if let Some(runtime) = found {
            debug!("{graph}: {id} matched an existing runtime");
            Counters::bump(&counters.hits);
            if self.table.is_live(id) {
                entry.shortcut.insert(id, runtime.clone());
            }
            entry.most_recent = Some(runtime.clone());
            return Ok((id, runtime));
        }

        Counters::bump(&counters.misses);
        debug!("{graph}: building runtime #{} for {id}", entry.runtimes.len());
        let runtime = Arc::new(KernelRuntime::build(
            &self.backend,
            graph,
            entry.graph.clone(),
            &descriptors,
        )?);
        runtime.profile(self.profiling.load(Ordering::Relaxed));
        Counters::bump(&counters.builds);
        entry.runtimes.push(runtime.clone());
        if self.table.is_live(id) {
            entry.shortcut.insert(id, runtime.clone());
        }
        entry.most_recent = Some(runtime.clone());
        Ok((id, runtime))
    }

    /// Turn profiling on or off for every existing and future runtime.
    pub fn profile(&self, to_profile: bool) {
        self.profiling.store(to_profile, Ordering::Relaxed);
        for slot in self.registry.slots() {
            for runtime in &lock(&slot).runtimes {
                runtime.profile(to_profile);
            }
        }
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Runtime returned by the latest resolution for `graph`.
    pub fn most_recent_runtime(&self, graph: GraphId) -> Result<Option<Arc<KernelRuntime<B>>>> {
        Ok(lock(&self.slot(graph)?).most_recent.clone())
    }

    /// Executor log of the most recent runtime for `graph`, when profiling.
    pub fn most_recent_executor_log(
        &self,
        graph: GraphId,
    ) -> Result<Option<ExecutorLog<B::Params>>> {
        Ok(self
            .most_recent_runtime(graph)?
            .and_then(|runtime| runtime.most_recent_log()))
    }

    /// Runtimes built so far for `graph`, in build order.
    pub fn runtimes(&self, graph: GraphId) -> Result<Vec<Arc<KernelRuntime<B>>>> {
        Ok(lock(&self.slot(graph)?).runtimes.clone())
    }

    pub fn runtime_count(&self, graph: GraphId) -> Result<usize> {
        Ok(lock(&self.slot(graph)?).runtimes.len())
    }

    /// Ids with a shortcut installed for `graph`, ascending.
    pub fn shortcuts(&self, graph: GraphId) -> Result<Vec<SignatureId>> {
        let mut ids: Vec<_> = lock(&self.slot(graph)?).shortcut.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Number of live signatures in the interning table.
    pub fn signature_count(&self) -> usize {
        self.table.size()
    }

    /// Ids currently interned, ascending.
    pub fn live_signatures(&self) -> Vec<SignatureId> {
        self.table.live_signatures()
    }

    pub fn stats(&self) -> CacheStats {
        self.registry.counters.snapshot()
    }
}
