use std::fmt::Debug;

use crate::{Describe, InputDescriptor, Result, SignatureId};

/// Compiler and heuristics collaborator of the cache.
///
/// The cache never looks inside a `Program`: it asks the backend for
/// scheduling parameters, hands them back to `compile`, and launches the
/// resulting artifact.
pub trait Backend: Send + Sync + 'static {
    /// A graph or segment definition.
    type Program: Send + Sync + 'static;
    /// Scheduling parameters chosen by the heuristics (tiling, vectorization, ...).
    type Params: Clone + PartialEq + Debug + Send + Sync + 'static;
    /// Runtime values flowing in and out of artifacts.
    type Value: Clone + Describe + Send + Sync + 'static;
    type Artifact: CompiledArtifact<Value = Self::Value> + 'static;

    /// Scheduling parameters for `program` under `inputs`, `None` when it cannot
    /// be scheduled.
    fn compute_heuristics(
        &self,
        program: &Self::Program,
        inputs: &[InputDescriptor],
    ) -> Option<Self::Params>;

    /// Whether parameters computed earlier are still valid for `inputs`.
    ///
    /// Backends with a cheaper check than a full heuristics run should
    /// override this.
    fn accepts(
        &self,
        program: &Self::Program,
        params: &Self::Params,
        inputs: &[InputDescriptor],
    ) -> bool {
        self.compute_heuristics(program, inputs).as_ref() == Some(params)
    }

    /// Build an executable artifact. Errors are reported as
    /// [`crate::Error::CompilationFailure`].
    fn compile(&self, program: &Self::Program, params: &Self::Params) -> Result<Self::Artifact>;
}

/// The executable result of compiling one program.
pub trait CompiledArtifact: Send {
    type Value;

    /// Run the artifact. `signature` lets the artifact reuse launch
    /// parameters it derived for the same input signature before.
    fn launch(
        &mut self,
        inputs: &[Self::Value],
        signature: SignatureId,
    ) -> Result<Vec<Self::Value>>;

    /// Drop any state kept for `signature`. A no-op for unknown ids.
    fn evict_cache(&mut self, signature: SignatureId);

    /// Launch configuration used for `signature`, if one was derived.
    fn launch_config(&self, _signature: SignatureId) -> Option<LaunchConfig> {
        None
    }
}

/// Grid/block geometry of a kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LaunchConfig {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    const MAX_THREADS_PER_BLOCK: u32 = 1024;

    /// One thread per element, full blocks.
    pub fn for_num_elems(n: u32) -> Self {
        let threads = Self::MAX_THREADS_PER_BLOCK;
        Self {
            grid_dim: (n.div_ceil(threads).max(1), 1, 1),
            block_dim: (threads, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    pub fn total_threads(&self) -> u64 {
        let (gx, gy, gz) = self.grid_dim;
        let (bx, by, bz) = self.block_dim;
        [gx, gy, gz, bx, by, bz].iter().map(|&d| d as u64).product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_config_covers_all_elements() {
        let cfg = LaunchConfig::for_num_elems(2049);
        assert_eq!(cfg.grid_dim, (3, 1, 1));
        assert_eq!(cfg.block_dim, (1024, 1, 1));
        assert!(cfg.total_threads() >= 2049);
        assert_eq!(LaunchConfig::for_num_elems(0).grid_dim, (1, 1, 1));
    }
}
