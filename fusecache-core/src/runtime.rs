//! Compiled execution plans for one graph under one set of heuristics.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use log::{debug, trace};

use crate::{
    backend::{Backend, CompiledArtifact, LaunchConfig},
    graph::{GraphBody, ValueRef},
    Error, FusionGraph, GraphId, InputDescriptor, Result, SignatureId,
};

/// What ran in the most recent launch of a profiled runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutorLog<P> {
    /// Index of the compiled unit (0 for single-kernel runtimes, the segment
    /// index otherwise).
    pub unit: usize,
    pub params: P,
    pub launch: Option<LaunchConfig>,
}

struct Unit<B: Backend> {
    artifact: Mutex<B::Artifact>,
    params: B::Params,
}

impl<B: Backend> Unit<B> {
    fn artifact(&self) -> MutexGuard<'_, B::Artifact> {
        self.artifact.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum RuntimePlan<B: Backend> {
    Single(Unit<B>),
    /// One unit per segment, indexed like the graph's segments.
    Segmented(Vec<Unit<B>>),
}

/// Compiled artifacts for one graph, plus the heuristics they were built for.
pub struct KernelRuntime<B: Backend> {
    graph_id: GraphId,
    graph: Arc<FusionGraph<B::Program>>,
    plan: RuntimePlan<B>,
    profiling: AtomicBool,
    recent_log: Mutex<Option<ExecutorLog<B::Params>>>,
}

impl<B: Backend> KernelRuntime<B> {
    /// Compute heuristics for every unit of `graph` and compile them.
    ///
    /// Nothing is compiled unless every unit can be scheduled.
    pub fn build(
        backend: &B,
        graph_id: GraphId,
        graph: Arc<FusionGraph<B::Program>>,
        inputs: &[InputDescriptor],
    ) -> Result<Self> {
        let programs = graph.programs();
        let mut params = Vec::with_capacity(programs.len());
        for (unit, program) in programs.iter().enumerate() {
            match backend.compute_heuristics(program, inputs) {
                Some(p) => params.push(p),
                None => return Err(Error::NoApplicableSchedule { graph: graph_id, unit }.bt()),
            }
        }

        let mut units = Vec::with_capacity(programs.len());
        for (program, params) in programs.into_iter().zip(params) {
            let artifact = backend.compile(program, &params)?;
            units.push(Unit {
                artifact: Mutex::new(artifact),
                params,
            });
        }
        debug!(
            "compiled {} unit(s) for {graph_id} (`{}`)",
            units.len(),
            graph.name()
        );

        let plan = if graph.is_segmented() {
            RuntimePlan::Segmented(units)
        } else {
            match units.pop() {
                Some(unit) => RuntimePlan::Single(unit),
                None => return Err(Error::msg(format!("nothing to compile for {graph_id}"))),
            }
        };

        Ok(Self {
            graph_id,
            graph,
            plan,
            profiling: AtomicBool::new(false),
            recent_log: Mutex::new(None),
        })
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn graph(&self) -> &FusionGraph<B::Program> {
        &self.graph
    }

    pub fn is_segmented(&self) -> bool {
        matches!(self.plan, RuntimePlan::Segmented(_))
    }

    pub fn num_units(&self) -> usize {
        self.units().len()
    }

    /// Scheduling parameters of every unit.
    pub fn params(&self) -> Vec<B::Params> {
        self.units().iter().map(|u| u.params.clone()).collect()
    }

    fn units(&self) -> &[Unit<B>] {
        match &self.plan {
            RuntimePlan::Single(unit) => std::slice::from_ref(unit),
            RuntimePlan::Segmented(units) => units,
        }
    }

    /// Heuristics for `inputs`, `None` if any unit cannot be scheduled.
    pub fn heuristics_for(
        &self,
        backend: &B,
        inputs: &[InputDescriptor],
    ) -> Option<Vec<B::Params>> {
        self.graph
            .programs()
            .into_iter()
            .map(|program| backend.compute_heuristics(program, inputs))
            .collect()
    }

    /// True when freshly computed heuristics equal the ones this runtime was
    /// compiled with.
    pub fn matches(&self, backend: &B, inputs: &[InputDescriptor]) -> bool {
        self.heuristics_for(backend, inputs)
            .is_some_and(|params| params == self.params())
    }

    /// Ask the backend whether the cached parameters still hold for `inputs`.
    pub fn accepts(&self, backend: &B, inputs: &[InputDescriptor]) -> bool {
        self.graph
            .programs()
            .into_iter()
            .zip(self.units())
            .all(|(program, unit)| backend.accepts(program, &unit.params, inputs))
    }

    pub fn execute(&self, inputs: &[B::Value], signature: SignatureId) -> Result<Vec<B::Value>> {
        if inputs.len() != self.graph.num_inputs() {
            return Err(Error::InputArity {
                expected: self.graph.num_inputs(),
                got: inputs.len(),
            }
            .bt());
        }
        match &self.plan {
            RuntimePlan::Single(unit) => self.launch_unit(0, unit, inputs, signature),
            RuntimePlan::Segmented(units) => self.execute_segments(units, inputs, signature),
        }
    }

    fn execute_segments(
        &self,
        units: &[Unit<B>],
        inputs: &[B::Value],
        signature: SignatureId,
    ) -> Result<Vec<B::Value>> {
        let GraphBody::Segmented {
            segments,
            outputs,
            order,
        } = self.graph.body()
        else {
            return Err(Error::msg(format!(
                "{} has a segmented plan but a whole body",
                self.graph_id
            )));
        };

        let mut produced: Vec<Option<Vec<B::Value>>> = Vec::with_capacity(segments.len());
        produced.resize_with(segments.len(), || None);

        let resolve = |produced: &[Option<Vec<B::Value>>], r: &ValueRef| -> Result<B::Value> {
            match *r {
                ValueRef::Input(i) => Ok(inputs[i].clone()),
                ValueRef::Segment { segment, output } => produced[segment]
                    .as_ref()
                    .and_then(|outs| outs.get(output))
                    .cloned()
                    .ok_or_else(|| {
                        Error::msg(format!(
                            "output {output} of segment {segment} is not available"
                        ))
                    }),
            }
        };

        for &idx in order {
            let segment = &segments[idx];
            let seg_inputs = segment
                .inputs
                .iter()
                .map(|r| resolve(&produced, r))
                .collect::<Result<Vec<_>>>()?;
            trace!("{}: launching segment `{}`", self.graph_id, segment.name);
            let outs = self.launch_unit(idx, &units[idx], &seg_inputs, signature)?;
            if outs.len() != segment.num_outputs {
                return Err(Error::msg(format!(
                    "segment `{}` produced {} outputs, expected {}",
                    segment.name,
                    outs.len(),
                    segment.num_outputs
                )));
            }
            produced[idx] = Some(outs);
        }

        outputs.iter().map(|r| resolve(&produced, r)).collect()
    }

    fn launch_unit(
        &self,
        index: usize,
        unit: &Unit<B>,
        inputs: &[B::Value],
        signature: SignatureId,
    ) -> Result<Vec<B::Value>> {
        let mut artifact = unit.artifact();
        let outs = artifact.launch(inputs, signature)?;
        if self.is_profiling() {
            let log = ExecutorLog {
                unit: index,
                params: unit.params.clone(),
                launch: artifact.launch_config(signature),
            };
            *self.recent_log.lock().unwrap_or_else(PoisonError::into_inner) = Some(log);
        }
        Ok(outs)
    }

    /// Drop state held for `signature` by every compiled artifact.
    pub fn evict_cache(&self, signature: SignatureId) {
        debug!("{}: evicting {signature}", self.graph_id);
        for unit in self.units() {
            unit.artifact().evict_cache(signature);
        }
    }

    pub fn profile(&self, to_profile: bool) {
        self.profiling.store(to_profile, Ordering::Relaxed);
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Log of the most recent launch while profiling. Single slot, every
    /// launch overwrites it.
    pub fn most_recent_log(&self) -> Option<ExecutorLog<B::Params>> {
        self.recent_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
