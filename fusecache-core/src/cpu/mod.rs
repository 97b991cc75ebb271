//! Reference backend: pointwise `f32` programs interpreted on the host.

use std::{collections::HashMap, sync::Arc};

use log::trace;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use crate::{
    backend::{Backend, CompiledArtifact, LaunchConfig},
    input::TensorDescriptor,
    DType, Describe, Error, InputDescriptor, Result, ScalarType, ScalarValue, SignatureId,
};

mod program;

pub use program::{BinaryOpType, CpuProgram, Expr, UnaryOpType};

/// Below this many elements kernels run on the calling thread.
const PARALLEL_THRESHOLD: usize = 1 << 14;
/// Smallest rayon task, in vector steps.
const MIN_ELEMS_PER_TASK: usize = 256;

/// Dense host tensor of `f32`.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuTensor {
    sizes: Vec<usize>,
    strides: Vec<usize>,
    pub(crate) data: Arc<Vec<f32>>,
}

impl CpuTensor {
    pub fn new(sizes: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        let sizes = sizes.into();
        let Some(numel) = sizes
            .iter()
            .try_fold(1usize, |acc, &size| acc.checked_mul(size))
        else {
            return Err(Error::msg(format!("shape {sizes:?} overflows usize")));
        };
        if numel != data.len() {
            return Err(Error::msg(format!(
                "shape {sizes:?} needs {numel} elements, got {}",
                data.len()
            )));
        }
        let strides = crate::input::contiguous_strides(&sizes);
        Ok(Self {
            sizes,
            strides,
            data: Arc::new(data),
        })
    }

    /// Same storage viewed with other strides. Kernels refuse such views
    /// unless they are dense.
    pub fn with_strides(mut self, strides: impl Into<Vec<usize>>) -> Self {
        self.strides = strides.into();
        self
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Checked against the shape on construction.
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CpuValue {
    Tensor(CpuTensor),
    Scalar(f64),
}

impl CpuValue {
    pub fn as_tensor(&self) -> Option<&CpuTensor> {
        match self {
            Self::Tensor(t) => Some(t),
            Self::Scalar(_) => None,
        }
    }
}

impl From<CpuTensor> for CpuValue {
    fn from(value: CpuTensor) -> Self {
        Self::Tensor(value)
    }
}

impl Describe for CpuValue {
    fn describe(&self) -> InputDescriptor {
        match self {
            Self::Tensor(t) => InputDescriptor::Tensor(TensorDescriptor::new(
                t.sizes.clone(),
                t.strides.clone(),
                f32::SCALAR_TYPE,
            )),
            Self::Scalar(v) => InputDescriptor::Scalar(ScalarValue::Float(*v)),
        }
    }
}

/// Scheduling parameters of a pointwise kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PointwiseParams {
    /// Elements processed per step, 4 when the element count allows it.
    pub vector_width: usize,
    /// Split the elements across the rayon pool.
    pub parallel: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("program reads input {index} but only has {arity}")]
    InputOutOfRange { index: usize, arity: usize },

    #[error("program has no outputs")]
    NoOutputs,
}

/// Host backend for [`CpuProgram`]s.
#[derive(Clone, Debug, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Program = CpuProgram;
    type Params = PointwiseParams;
    type Value = CpuValue;
    type Artifact = CpuKernel;

    /// Schedulable when every tensor input is dense and all tensors agree on
    /// the element count; scalar inputs must be floats.
    fn compute_heuristics(
        &self,
        _program: &CpuProgram,
        inputs: &[InputDescriptor],
    ) -> Option<PointwiseParams> {
        let mut numel = None;
        for input in inputs {
            match input {
                InputDescriptor::Tensor(t) => {
                    if t.dtype != ScalarType::F32 || !t.is_contiguous() {
                        return None;
                    }
                    let n = t.numel()?;
                    match numel {
                        None => numel = Some(n),
                        Some(m) if m != n => return None,
                        Some(_) => {}
                    }
                }
                InputDescriptor::Scalar(ScalarValue::Float(_)) => {}
                InputDescriptor::Scalar(_) | InputDescriptor::Opaque { .. } => return None,
            }
        }
        let numel = numel?;
        Some(PointwiseParams {
            vector_width: if numel % 4 == 0 { 4 } else { 1 },
            parallel: numel >= PARALLEL_THRESHOLD,
        })
    }

    fn compile(&self, program: &CpuProgram, params: &PointwiseParams) -> Result<CpuKernel> {
        if program.outputs.is_empty() {
            return Err(Error::compilation(CompileError::NoOutputs));
        }
        if let Some(index) = program.outputs.iter().filter_map(Expr::max_input).max() {
            if index >= program.arity {
                return Err(Error::compilation(CompileError::InputOutOfRange {
                    index,
                    arity: program.arity,
                }));
            }
        }
        trace!(
            "compiled pointwise kernel {:?}: {}",
            params,
            program
                .outputs
                .iter()
                .map(Expr::render)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(CpuKernel {
            program: program.clone(),
            params: *params,
            launch_cache: HashMap::new(),
            launches: 0,
        })
    }
}

/// Compiled pointwise kernel.
pub struct CpuKernel {
    program: CpuProgram,
    params: PointwiseParams,
    /// Launch geometry derived per signature.
    launch_cache: HashMap<SignatureId, LaunchConfig>,
    launches: usize,
}

impl CpuKernel {
    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn cached_signatures(&self) -> usize {
        self.launch_cache.len()
    }
}

impl CompiledArtifact for CpuKernel {
    type Value = CpuValue;

    fn launch(&mut self, inputs: &[CpuValue], signature: SignatureId) -> Result<Vec<CpuValue>> {
        if inputs.len() != self.program.arity {
            return Err(Error::InputArity {
                expected: self.program.arity,
                got: inputs.len(),
            }
            .bt());
        }
        let Some(first) = inputs.iter().find_map(CpuValue::as_tensor) else {
            return Err(Error::msg("pointwise kernel launched without a tensor input"));
        };
        let sizes = first.sizes.clone();
        let numel = first.numel();
        if let Some(bad) = inputs
            .iter()
            .filter_map(CpuValue::as_tensor)
            .find(|t| t.numel() != numel)
        {
            return Err(Error::msg(format!(
                "pointwise inputs disagree: {:?} vs {:?}",
                sizes, bad.sizes
            )));
        }

        let elems = u32::try_from(numel)
            .map_err(|_| Error::msg(format!("{numel} elements do not fit one launch grid")))?;
        self.launch_cache
            .entry(signature)
            .or_insert_with(|| LaunchConfig::for_num_elems(elems));
        self.launches += 1;

        let PointwiseParams {
            vector_width,
            parallel,
        } = self.params;
        self.program
            .outputs
            .iter()
            .map(|expr| {
                let data: Vec<f32> = if parallel {
                    (0..numel)
                        .into_par_iter()
                        .with_min_len(vector_width * MIN_ELEMS_PER_TASK)
                        .map(|i| expr.eval_at(i, inputs))
                        .collect()
                } else {
                    (0..numel).map(|i| expr.eval_at(i, inputs)).collect()
                };
                CpuTensor::new(sizes.clone(), data).map(CpuValue::Tensor)
            })
            .collect()
    }

    fn evict_cache(&mut self, signature: SignatureId) {
        self.launch_cache.remove(&signature);
    }

    fn launch_config(&self, signature: SignatureId) -> Option<LaunchConfig> {
        self.launch_cache.get(&signature).copied()
    }
}
