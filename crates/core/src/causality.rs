//! Minimum-delay analysis over the computation graph.
//!
//! [`CausalityAnalysis`] answers, for any port, the smallest model-time delay
//! between the nearest upstream source and that port. Each node's view of the
//! graph is a [`CausalityInterface`]; queries about a node's own inputs are
//! answered by its container, so delays cross composition boundaries
//! transparently. Results are memoized per interface until
//! [`CausalityAnalysis::invalidate`].
//!
//! A port revisited on the current recursion path contributes the `oplus`
//! identity. Delay along a cycle is therefore not accounted for; the result
//! only reflects the acyclic paths into the port.

use std::collections::HashMap;
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dependency::{Dependency, RealDependency};
use crate::error::ConfigurationError;
use crate::graph::{Graph, GraphDescription, NodeId, PortId, PortKind};
use crate::sync::{Arc, RwLock};
use crate::time::Time;
use crate::trace::{self, records, TraceHook};

/// Value used for a port nothing feeds.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Treat sources as dependent with zero delay.
    #[default]
    ZeroDelay,
    /// Treat sources as imposing no constraint at all.
    NoDependency,
}

impl Boundary {
    pub fn value<D: Dependency>(self) -> D {
        match self {
            Self::ZeroDelay => D::otimes_identity(),
            Self::NoDependency => D::oplus_identity(),
        }
    }
}

/// `None` stands for the implicit container of top-level nodes.
type Scope = Option<NodeId>;

/// Recursion state of one query: the open ports with their depth, and the
/// shallowest open port a cycle was cut at.
#[derive(Default)]
struct Walk {
    path: HashMap<(Scope, PortId), usize>,
    cut: Option<usize>,
}

pub struct CausalityAnalysis<D: Dependency = RealDependency> {
    graph: Arc<Graph>,
    boundary: Boundary,
    memo: RwLock<HashMap<Scope, HashMap<PortId, D>>>,
    trace: Option<TraceHook>,
    _algebra: PhantomData<D>,
}

impl<D: Dependency> CausalityAnalysis<D> {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self::with_boundary(graph, Boundary::default())
    }

    pub fn with_boundary(graph: Arc<Graph>, boundary: Boundary) -> Self {
        Self {
            graph,
            boundary,
            memo: RwLock::new(HashMap::new()),
            trace: None,
            _algebra: PhantomData,
        }
    }

    pub fn set_trace_hook(&mut self, trace: Option<TraceHook>) {
        self.trace = trace;
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Causality interface of `node`.
    pub fn interface(&self, node: NodeId) -> Result<CausalityInterface<'_, D>, ConfigurationError> {
        self.graph.node(node)?;
        Ok(CausalityInterface {
            analysis: self,
            node,
        })
    }

    /// Minimum delay into `port`, asked of the port's own node.
    pub fn minimum_delay(&self, port: PortId) -> Result<D, ConfigurationError> {
        let node = self.graph.owner(port)?;
        self.interface(node)?.minimum_delay(port)
    }

    /// Drops every memoized result.
    pub fn invalidate(&self) {
        let cleared: usize = {
            let mut memo = self.memo.write();
            let count = memo.values().map(HashMap::len).sum();
            memo.clear();
            count
        };
        log::debug!("causality memo invalidated ({cleared} entries)");
        trace::emit(
            &self.trace,
            records::causality::INVALIDATE,
            &trace::RecordBuilder::new().u32(cleared as u32).finish(),
            true,
        );
    }

    pub fn memoized(&self) -> usize {
        self.memo.read().values().map(HashMap::len).sum()
    }

    fn delay_in(&self, scope: Scope, port: PortId, walk: &mut Walk) -> Result<D, ConfigurationError> {
        if let Some(hit) = self
            .memo
            .read()
            .get(&scope)
            .and_then(|table| table.get(&port))
        {
            return Ok(hit.clone());
        }
        let depth = walk.path.len();
        if let Some(&open) = walk.path.get(&(scope, port)) {
            walk.cut = Some(walk.cut.map_or(open, |cut| cut.min(open)));
            return Ok(D::oplus_identity());
        }

        walk.path.insert((scope, port), depth);
        let outer_cut = walk.cut.take();
        let value = self.compute(scope, port, walk);
        walk.path.remove(&(scope, port));
        let inner_cut = walk.cut.take();
        // cuts closing above this port leave the value path-dependent
        let open_cut = inner_cut.filter(|&cut| cut < depth);
        walk.cut = match (outer_cut, open_cut) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let value = value?;
        if open_cut.is_none() {
            self.memo
                .write()
                .entry(scope)
                .or_default()
                .insert(port, value.clone());
        }
        Ok(value)
    }

    fn compute(&self, scope: Scope, port: PortId, walk: &mut Walk) -> Result<D, ConfigurationError> {
        let graph = &*self.graph;
        let data = graph.port(port)?;
        let owner = data.node;

        if scope == Some(owner) {
            return match data.kind {
                // own input: the container knows what feeds it
                PortKind::Input => self.delay_in(graph.parent(owner)?, port, walk),
                PortKind::Output if graph.is_composite(owner)? => {
                    self.combine_upstream(scope, &[port], walk)
                }
                PortKind::Output => self.leaf_output(owner, port, walk),
            };
        }

        match data.kind {
            PortKind::Input => {
                let group = graph.equivalent_inputs(port)?;
                self.combine_upstream(scope, &group, walk)
            }
            PortKind::Output => self.delay_in(Some(owner), port, walk),
        }
    }

    /// Combines over every producer feeding any port of `targets`.
    fn combine_upstream(
        &self,
        scope: Scope,
        targets: &[PortId],
        walk: &mut Walk,
    ) -> Result<D, ConfigurationError> {
        let mut result = D::oplus_identity();
        let mut fed = false;
        for &target in targets {
            for &source in self.graph.upstream(target)? {
                fed = true;
                let hop = self.delay_in(scope, source, walk)?;
                result = result.oplus(&hop);
            }
        }
        if fed {
            Ok(result)
        } else {
            Ok(self.source_value(targets))
        }
    }

    fn leaf_output(
        &self,
        node: NodeId,
        output: PortId,
        walk: &mut Walk,
    ) -> Result<D, ConfigurationError> {
        let inputs = self.graph.inputs(node)?;
        if inputs.is_empty() {
            return Ok(self.boundary.value());
        }
        let mut result = D::oplus_identity();
        for &input in inputs {
            let dependency = D::from_delay(self.graph.dependency(input, output)?);
            if !dependency.is_dependent() {
                continue;
            }
            let upstream = self.delay_in(Some(node), input, walk)?;
            result = result.oplus(&upstream.otimes(&dependency));
        }
        Ok(result)
    }

    /// Value of ports with no producer: a declared latency starts the path
    /// in the past, otherwise the boundary convention applies.
    fn source_value(&self, targets: &[PortId]) -> D {
        let latency = targets
            .iter()
            .filter_map(|&port| self.graph.port(port).ok()?.latency)
            .max();
        match latency {
            Some(latency) => D::from_delay(Time::ZERO - latency),
            None => self.boundary.value(),
        }
    }
}

/// One node's view of the causality analysis.
pub struct CausalityInterface<'a, D: Dependency = RealDependency> {
    analysis: &'a CausalityAnalysis<D>,
    node: NodeId,
}

impl<'a, D: Dependency> CausalityInterface<'a, D> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    fn check_owned(&self, port: PortId) -> Result<NodeId, ConfigurationError> {
        let graph = &self.analysis.graph;
        let owner = graph.owner(port)?;
        if owner == self.node || graph.parent(owner)? == Some(self.node) {
            Ok(owner)
        } else {
            Err(ConfigurationError::InvalidCausalityQuery {
                node: self.node,
                port,
            })
        }
    }

    /// Minimum delay from the nearest upstream source to `port`.
    ///
    /// `port` must belong to this node or to one of its direct children.
    pub fn minimum_delay(&self, port: PortId) -> Result<D, ConfigurationError> {
        self.check_owned(port)?;
        let mut walk = Walk::default();
        self.analysis.delay_in(Some(self.node), port, &mut walk)
    }

    /// Dependency of `output` on `input`, both ports of this node.
    pub fn dependency(&self, input: PortId, output: PortId) -> Result<D, ConfigurationError> {
        for port in [input, output] {
            if self.analysis.graph.owner(port)? != self.node {
                return Err(ConfigurationError::InvalidCausalityQuery {
                    node: self.node,
                    port,
                });
            }
        }
        Ok(D::from_delay(self.analysis.graph.dependency(input, output)?))
    }

    /// Ports of this node on the other side of a finite dependency.
    pub fn dependent_ports(&self, port: PortId) -> Result<Vec<PortId>, ConfigurationError> {
        let graph = &self.analysis.graph;
        if graph.owner(port)? != self.node {
            return Err(ConfigurationError::InvalidCausalityQuery {
                node: self.node,
                port,
            });
        }
        let mut result = Vec::new();
        if graph.is_input(port)? {
            for &output in graph.outputs(self.node)? {
                if self.dependency(port, output)?.is_dependent() {
                    result.push(output);
                }
            }
        } else {
            for &input in graph.inputs(self.node)? {
                if self.dependency(input, port)?.is_dependent() {
                    result.push(input);
                }
            }
        }
        Ok(result)
    }

    /// Inputs of this node presented together with `input`.
    pub fn equivalent_ports(&self, input: PortId) -> Result<Vec<PortId>, ConfigurationError> {
        if self.analysis.graph.owner(input)? != self.node {
            return Err(ConfigurationError::InvalidCausalityQuery {
                node: self.node,
                port: input,
            });
        }
        self.analysis.graph.equivalent_inputs(input)
    }

    /// Smallest finite input-to-output dependency of this node, if any.
    pub fn minimum_internal_delay(&self) -> Result<Option<Time>, ConfigurationError> {
        let graph = &self.analysis.graph;
        let mut best: Option<Time> = None;
        for &input in graph.inputs(self.node)? {
            for &output in graph.outputs(self.node)? {
                let delay = self.dependency(input, output)?.as_time();
                if delay.is_finite() {
                    best = Some(best.map_or(delay, |b| b.min(delay)));
                }
            }
        }
        Ok(best)
    }
}
