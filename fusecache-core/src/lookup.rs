//! Interning of canonical keys into small integer signature ids.
//!
//! Every entry is attached to one concrete input shape/stride pattern, so the
//! table would grow without bound for workloads whose shapes never stabilize.
//! It is therefore an LRU with a fixed capacity. Ids are unique within one
//! table and never handed out twice.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::{self, Display},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError, RwLock, RwLockWriteGuard,
    },
};

use log::{debug, info};

use crate::{encoder, CanonicalKey, Describe, Result};

/// Default number of signatures kept alive by a table.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureId(u64);

impl SignatureId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SignatureId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig#{}", self.0)
    }
}

/// Result of [`SignatureTable::lookup_or_insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdLookup {
    pub id: SignatureId,
    /// Id dropped from the table to make room for `id`, if any.
    pub evicted: Option<SignatureId>,
}

/// What the table does with an id it evicts.
#[derive(Default)]
pub enum EvictionHook {
    #[default]
    Detached,
    Callback(Box<dyn Fn(SignatureId) + Send + Sync>),
}

impl EvictionHook {
    fn notify(&self, id: SignatureId) {
        match self {
            Self::Detached => {}
            Self::Callback(f) => f(id),
        }
    }
}

impl fmt::Debug for EvictionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => f.write_str("Detached"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

struct InternEntry {
    id: SignatureId,
    /// Position in the recency order; larger is more recent.
    stamp: u64,
}

struct TableState {
    entries: HashMap<CanonicalKey, InternEntry>,
    recency: BTreeMap<u64, CanonicalKey>,
    next_id: u64,
    next_stamp: u64,
    /// Encoding scratch buffer, only touched under the table lock.
    scratch: String,
    hook: EvictionHook,
}

impl TableState {
    fn touch(&mut self, key: &str) -> Option<SignatureId> {
        let stamp = self.next_stamp;
        let entry = self.entries.get_mut(key)?;
        let owned = self.recency.remove(&entry.stamp)?;
        entry.stamp = stamp;
        self.next_stamp += 1;
        self.recency.insert(stamp, owned);
        Some(entry.id)
    }

    fn evict_lru(&mut self) -> Option<SignatureId> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        info!("evicting {} for key {key}", entry.id);
        Some(entry.id)
    }

    fn insert(&mut self, key: CanonicalKey) -> SignatureId {
        let id = SignatureId(self.next_id);
        self.next_id += 1;
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.recency.insert(stamp, key.clone());
        self.entries.insert(key, InternEntry { id, stamp });
        id
    }
}

/// LRU table mapping canonical keys to signature ids.
pub struct SignatureTable {
    capacity: usize,
    state: Mutex<TableState>,
    len: AtomicUsize,
    /// Ids currently interned. Kept behind its own lock so holders of other
    /// locks can check liveness without waiting on the table.
    live: RwLock<HashSet<SignatureId>>,
}

impl SignatureTable {
    /// Create a table holding at most `capacity` keys (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_id: 1,
                next_stamp: 0,
                scratch: String::new(),
                hook: EvictionHook::Detached,
            }),
            len: AtomicUsize::new(0),
            live: RwLock::new(HashSet::new()),
        }
    }

    /// Register what happens to evicted ids. The hook runs under the table
    /// lock, after the id stopped being live and before the key that caused
    /// the eviction is inserted.
    pub fn on_evict(&self, hook: EvictionHook) {
        self.lock().hook = hook;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live keys. Read without the lock, so only eventually consistent.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether `id` is still interned. Never waits on the table lock, so it
    /// may be called while holding locks the eviction hook takes.
    pub fn is_live(&self, id: SignatureId) -> bool {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Interned ids, ascending.
    pub fn live_signatures(&self) -> Vec<SignatureId> {
        let mut ids: Vec<_> = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn lookup_or_insert(&self, key: CanonicalKey) -> IdLookup {
        let mut state = self.lock();
        self.lookup_locked(&mut state, key.as_str())
    }

    /// Encode `inputs` with the table's pooled buffer and look the key up.
    pub fn lookup_inputs<V: Describe>(&self, inputs: &[V]) -> Result<IdLookup> {
        let mut state = self.lock();
        let mut scratch = std::mem::take(&mut state.scratch);
        let res = encoder::encode_into(&mut scratch, inputs)
            .map(|()| self.lookup_locked(&mut state, &scratch));
        state.scratch = scratch;
        res
    }

    fn lookup_locked(&self, state: &mut TableState, key: &str) -> IdLookup {
        if let Some(id) = state.touch(key) {
            return IdLookup { id, evicted: None };
        }

        let evicted = if state.entries.len() >= self.capacity {
            state.evict_lru()
        } else {
            None
        };
        if let Some(dead) = evicted {
            self.live_mut().remove(&dead);
            state.hook.notify(dead);
        }
        let id = state.insert(CanonicalKey::from(key));
        self.live_mut().insert(id);
        debug!("interned new signature {id}");
        self.len.store(state.entries.len(), Ordering::Relaxed);
        IdLookup { id, evicted }
    }

    fn live_mut(&self) -> RwLockWriteGuard<'_, HashSet<SignatureId>> {
        self.live.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for SignatureTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureTable")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}
