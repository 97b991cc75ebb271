#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
};

use fusecache_core::{
    Backend, CompiledArtifact, Describe, Error, InputDescriptor, LaunchConfig, Result,
    SignatureId,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Compile {
        name: String,
        params: usize,
    },
    Launch {
        name: String,
        signature: SignatureId,
        inputs: Vec<InputDescriptor>,
    },
    Evict {
        name: String,
        signature: SignatureId,
    },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Launch state of every artifact, keyed by artifact serial.
pub type HeldState = Arc<Mutex<BTreeSet<(usize, SignatureId)>>>;

#[derive(Clone, Debug)]
pub struct StubProgram {
    pub name: String,
    pub num_outputs: usize,
    pub fail_compile: bool,
}

impl StubProgram {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            num_outputs: 1,
            fail_compile: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail_compile: true,
            ..Self::new(name)
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("stub compiler refused `{0}`")]
pub struct StubCompileError(pub String);

/// Heuristics: the rank of the first tensor input, schedulable up to
/// `max_rank`.
#[derive(Default)]
pub struct StubBackend {
    pub log: EventLog,
    pub max_rank: usize,
    pub reject_all: AtomicBool,
    pub heuristic_calls: AtomicUsize,
    pub held: HeldState,
    artifacts: AtomicUsize,
}

impl StubBackend {
    pub fn new(max_rank: usize) -> Self {
        Self {
            max_rank,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Launch { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn evictions(&self) -> Vec<(String, SignatureId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Evict { name, signature } => Some((name, signature)),
                _ => None,
            })
            .collect()
    }

    /// Signatures some artifact still keeps launch state for.
    pub fn held_signatures(&self) -> BTreeSet<SignatureId> {
        self.held.lock().unwrap().iter().map(|&(_, s)| s).collect()
    }

    pub fn compiles(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Compile { .. }))
            .count()
    }
}

impl Backend for StubBackend {
    type Program = StubProgram;
    type Params = usize;
    type Value = InputDescriptor;
    type Artifact = StubArtifact;

    fn compute_heuristics(
        &self,
        _program: &StubProgram,
        inputs: &[InputDescriptor],
    ) -> Option<usize> {
        self.heuristic_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst) {
            return None;
        }
        let rank = inputs.iter().find_map(|i| i.as_tensor())?.rank();
        (rank <= self.max_rank).then_some(rank)
    }

    fn compile(&self, program: &StubProgram, params: &usize) -> Result<StubArtifact> {
        if program.fail_compile {
            return Err(Error::compilation(StubCompileError(program.name.clone())));
        }
        self.log.lock().unwrap().push(Event::Compile {
            name: program.name.clone(),
            params: *params,
        });
        Ok(StubArtifact {
            serial: self.artifacts.fetch_add(1, Ordering::SeqCst),
            program: program.clone(),
            log: self.log.clone(),
            held: self.held.clone(),
        })
    }
}

pub struct StubArtifact {
    serial: usize,
    program: StubProgram,
    log: EventLog,
    held: HeldState,
}

impl CompiledArtifact for StubArtifact {
    type Value = InputDescriptor;

    fn launch(
        &mut self,
        inputs: &[InputDescriptor],
        signature: SignatureId,
    ) -> Result<Vec<InputDescriptor>> {
        self.log.lock().unwrap().push(Event::Launch {
            name: self.program.name.clone(),
            signature,
            inputs: inputs.to_vec(),
        });
        self.held.lock().unwrap().insert((self.serial, signature));
        Ok((0..self.program.num_outputs)
            .map(|k| InputDescriptor::Opaque {
                kind: format!("{}.out{k}", self.program.name),
            })
            .collect())
    }

    fn evict_cache(&mut self, signature: SignatureId) {
        self.held.lock().unwrap().remove(&(self.serial, signature));
        self.log.lock().unwrap().push(Event::Evict {
            name: self.program.name.clone(),
            signature,
        });
    }

    fn launch_config(&self, signature: SignatureId) -> Option<LaunchConfig> {
        self.held
            .lock()
            .unwrap()
            .contains(&(self.serial, signature))
            .then(|| LaunchConfig::for_num_elems(signature.get() as u32))
    }
}

/// Parks the thread that makes the `park_at`-th call to `checkpoint` until
/// the test releases it.
pub struct Gate {
    calls: AtomicUsize,
    park_at: usize,
    arrived: Barrier,
    release: Barrier,
}

impl Gate {
    pub fn new(park_at: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            park_at,
            arrived: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    fn checkpoint(&self) {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.park_at {
            self.arrived.wait();
            self.release.wait();
        }
    }

    /// Block until the gated thread is parked.
    pub fn wait_arrived(&self) {
        self.arrived.wait();
    }

    pub fn release(&self) {
        self.release.wait();
    }
}

/// A stub value whose `describe` calls can be held at a gate.
#[derive(Clone)]
pub struct GatedValue {
    pub desc: InputDescriptor,
    pub gate: Option<Arc<Gate>>,
}

impl GatedValue {
    pub fn open(desc: InputDescriptor) -> Self {
        Self { desc, gate: None }
    }

    pub fn gated(desc: InputDescriptor, gate: Arc<Gate>) -> Self {
        Self {
            desc,
            gate: Some(gate),
        }
    }
}

impl Describe for GatedValue {
    fn describe(&self) -> InputDescriptor {
        if let Some(gate) = &self.gate {
            gate.checkpoint();
        }
        self.desc.clone()
    }
}

/// [`StubBackend`] over [`GatedValue`]s.
#[derive(Default)]
pub struct GatedBackend {
    pub stub: StubBackend,
}

impl GatedBackend {
    pub fn new(max_rank: usize) -> Self {
        Self {
            stub: StubBackend::new(max_rank),
        }
    }
}

impl Backend for GatedBackend {
    type Program = StubProgram;
    type Params = usize;
    type Value = GatedValue;
    type Artifact = GatedArtifact;

    fn compute_heuristics(
        &self,
        program: &StubProgram,
        inputs: &[InputDescriptor],
    ) -> Option<usize> {
        self.stub.compute_heuristics(program, inputs)
    }

    fn compile(&self, program: &StubProgram, params: &usize) -> Result<GatedArtifact> {
        self.stub.compile(program, params).map(GatedArtifact)
    }
}

pub struct GatedArtifact(StubArtifact);

impl CompiledArtifact for GatedArtifact {
    type Value = GatedValue;

    fn launch(
        &mut self,
        inputs: &[GatedValue],
        signature: SignatureId,
    ) -> Result<Vec<GatedValue>> {
        let descs: Vec<InputDescriptor> = inputs.iter().map(|v| v.desc.clone()).collect();
        let outputs = self.0.launch(&descs, signature)?;
        Ok(outputs.into_iter().map(GatedValue::open).collect())
    }

    fn evict_cache(&mut self, signature: SignatureId) {
        self.0.evict_cache(signature)
    }

    fn launch_config(&self, signature: SignatureId) -> Option<LaunchConfig> {
        self.0.launch_config(signature)
    }
}

pub fn tensor(sizes: &[usize]) -> InputDescriptor {
    InputDescriptor::contiguous(sizes.to_vec(), fusecache_core::ScalarType::F32)
}
