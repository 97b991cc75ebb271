use std::fmt::{self, Display};

use petgraph::{
    algo::toposort,
    dot::{Config, Dot},
    graph::NodeIndex,
    prelude::DiGraphMap,
    Graph as PetGraph,
};

use crate::{Error, Result};

/// Handle of a graph registered with a [`crate::FusionCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for GraphId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// Where a segment reads one of its inputs from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// Graph input at this position.
    Input(usize),
    /// Output `output` of segment `segment`.
    Segment { segment: usize, output: usize },
}

/// Independently compiled sub-portion of a graph.
#[derive(Clone, Debug)]
pub struct Segment<P> {
    pub name: String,
    pub program: P,
    pub inputs: Vec<ValueRef>,
    pub num_outputs: usize,
}

impl<P> Segment<P> {
    pub fn new(
        name: impl Into<String>,
        program: P,
        inputs: Vec<ValueRef>,
        num_outputs: usize,
    ) -> Self {
        Self {
            name: name.into(),
            program,
            inputs,
            num_outputs,
        }
    }
}

#[derive(Clone, Debug)]
pub enum GraphBody<P> {
    /// One program for the whole graph.
    Whole(P),
    Segmented {
        segments: Vec<Segment<P>>,
        /// Graph outputs, in declared order.
        outputs: Vec<ValueRef>,
        /// Segment indices in dependency order.
        order: Vec<usize>,
    },
}

/// A computation to be compiled and executed by a backend.
///
/// `P` is the backend's program representation, opaque to the cache.
#[derive(Clone, Debug)]
pub struct FusionGraph<P> {
    name: String,
    num_inputs: usize,
    body: GraphBody<P>,
}

impl<P> FusionGraph<P> {
    /// A graph compiled as a single kernel.
    pub fn whole(name: impl Into<String>, num_inputs: usize, program: P) -> Self {
        Self {
            name: name.into(),
            num_inputs,
            body: GraphBody::Whole(program),
        }
    }

    /// A graph compiled as one kernel per segment.
    ///
    /// Every reference is checked and the segment execution order is fixed
    /// here.
    pub fn segmented(
        name: impl Into<String>,
        num_inputs: usize,
        segments: Vec<Segment<P>>,
        outputs: Vec<ValueRef>,
    ) -> Result<Self> {
        let name = name.into();
        if segments.is_empty() {
            return Err(Error::msg(format!("segmented graph `{name}` has no segments")));
        }
        let check = |r: &ValueRef, ctx: &str| -> Result<()> {
            match *r {
                ValueRef::Input(i) if i >= num_inputs => Err(Error::msg(format!(
                    "{ctx} of `{name}` reads input {i}, graph has {num_inputs}"
                ))),
                ValueRef::Segment { segment, output } => match segments.get(segment) {
                    Some(s) if output < s.num_outputs => Ok(()),
                    Some(s) => Err(Error::msg(format!(
                        "{ctx} of `{name}` reads output {output} of `{}` which has {}",
                        s.name, s.num_outputs
                    ))),
                    None => Err(Error::msg(format!(
                        "{ctx} of `{name}` reads unknown segment {segment}"
                    ))),
                },
                ValueRef::Input(_) => Ok(()),
            }
        };
        for seg in &segments {
            for r in &seg.inputs {
                check(r, &format!("segment `{}`", seg.name))?;
            }
        }
        for r in &outputs {
            check(r, "output")?;
        }

        // Build a dependency graph of segment indices
        let mut dep_graph = DiGraphMap::<usize, ()>::new();
        for idx in 0..segments.len() {
            dep_graph.add_node(idx);
        }
        for (idx, seg) in segments.iter().enumerate() {
            for r in &seg.inputs {
                if let ValueRef::Segment { segment, .. } = r {
                    dep_graph.add_edge(*segment, idx, ());
                }
            }
        }
        let order = toposort(&dep_graph, None)
            .map_err(|_| Error::CyclicSegments { graph: name.clone() }.bt())?;

        Ok(Self {
            name,
            num_inputs,
            body: GraphBody::Segmented {
                segments,
                outputs,
                order,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn body(&self) -> &GraphBody<P> {
        &self.body
    }

    pub fn is_segmented(&self) -> bool {
        matches!(self.body, GraphBody::Segmented { .. })
    }

    /// Programs to compile, one per unit, in segment index order.
    pub fn programs(&self) -> Vec<&P> {
        match &self.body {
            GraphBody::Whole(p) => vec![p],
            GraphBody::Segmented { segments, .. } => segments.iter().map(|s| &s.program).collect(),
        }
    }

    pub fn to_petgraph(&self) -> PetGraph<String, ()> {
        let mut g = PetGraph::<String, ()>::new();
        let inputs: Vec<NodeIndex> = (0..self.num_inputs)
            .map(|i| g.add_node(format!("Input({i})")))
            .collect();
        match &self.body {
            GraphBody::Whole(_) => {
                let node = g.add_node(self.name.clone());
                for &src in &inputs {
                    g.add_edge(src, node, ());
                }
            }
            GraphBody::Segmented {
                segments, outputs, ..
            } => {
                let nodes: Vec<NodeIndex> = segments
                    .iter()
                    .map(|s| g.add_node(s.name.clone()))
                    .collect();
                let source = |r: &ValueRef| match *r {
                    ValueRef::Input(i) => inputs[i],
                    ValueRef::Segment { segment, .. } => nodes[segment],
                };
                for (seg, &dst) in segments.iter().zip(&nodes) {
                    for r in &seg.inputs {
                        g.add_edge(source(r), dst, ());
                    }
                }
                for (i, r) in outputs.iter().enumerate() {
                    let out = g.add_node(format!("Output({i})"));
                    g.add_edge(source(r), out, ());
                }
            }
        }
        g
    }

    /// Produce a DOT format string of this graph.
    pub fn to_dot(&self) -> String {
        let g = self.to_petgraph();
        format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel]))
    }
}
