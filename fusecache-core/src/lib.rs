//! Fusecache is a two-level cache from fused computation graphs to compiled kernels.
//!
//! A fusion compiler does not want to regenerate code every time a graph runs. The
//! generated code only depends on a coarse signature of the inputs: sizes, stride classes,
//! broadcast pattern, rank, dtype, device and the value of scalar arguments. Fusecache
//! interns that signature into a small integer and uses it to find an already compiled
//! [`KernelRuntime`] for the graph, building one only when no existing runtime's heuristics
//! fit.
//!
//! The compiler itself is a collaborator: implement [`Backend`] (heuristics + compilation)
//! and [`CompiledArtifact`] (launch + per-signature eviction) for your code generator.
//! A small host interpreter, [`cpu::CpuBackend`], ships with the crate.
//!
//! ## A quick guide
//! - Create a [`FusionCache`] with a backend and a [`CacheConfig`].
//! - Register a [`FusionGraph`], either [`FusionGraph::whole`] or [`FusionGraph::segmented`].
//!   This returns a [`GraphId`].
//! - Call [`FusionCache::run`] with concrete inputs. The first call for a signature compiles,
//!   later calls reuse the runtime.
//!
//! ```
//! use fusecache_core::cpu::{CpuBackend, CpuProgram, CpuTensor, CpuValue, Expr};
//! use fusecache_core::{CacheConfig, FusionCache, FusionGraph};
//!
//! let cache = FusionCache::new(CpuBackend, CacheConfig::default()).unwrap();
//! // out = a * b + 1
//! let expr = Expr::input(0).mul(Expr::input(1)).add(Expr::Const(1.0));
//! let program = CpuProgram::new(2, vec![expr]);
//! let graph = cache.register_graph(FusionGraph::whole("fma", 2, program));
//!
//! let a: CpuValue = CpuTensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap().into();
//! let b = CpuValue::Scalar(2.0);
//!
//! let out = cache.run(graph, &[a.clone(), b.clone()]).unwrap();
//! assert_eq!(out[0].as_tensor().unwrap().data(), &[3.0, 5.0, 7.0, 9.0]);
//!
//! // Same signature: no new compilation.
//! cache.run(graph, &[a, b]).unwrap();
//! assert_eq!(cache.runtime_count(graph).unwrap(), 1);
//! assert_eq!(cache.stats().builds, 1);
//! ```

mod backend;
mod cache;
mod config;
pub mod cpu;
mod device;
mod dtype;
pub mod encoder;
mod error;
mod graph;
mod input;
mod lookup;
mod runtime;

pub use backend::{Backend, CompiledArtifact, LaunchConfig};
pub use cache::{CacheStats, FusionCache};
pub use config::CacheConfig;
pub use device::{BackendDevice, DeviceKind, DeviceType};
pub use dtype::{DType, ScalarType};
pub use encoder::{encode, CanonicalKey};
pub use error::{Error, Result};
pub use graph::{FusionGraph, GraphBody, GraphId, Segment, ValueRef};
pub use input::{Describe, DimLayout, InputDescriptor, ScalarValue, TensorDescriptor};
pub use lookup::{EvictionHook, IdLookup, SignatureId, SignatureTable, DEFAULT_CAPACITY};
pub use runtime::{ExecutorLog, KernelRuntime};
