//! Read-only arena describing the computation graph.
//!
//! Nodes and ports live in flat vectors addressed by [`NodeId`] and
//! [`PortId`]. Nodes may nest: a node with children is a composite, one
//! without is a leaf. Nodes without a parent sit at the top level. The graph
//! is built once through [`GraphBuilder`], validated, and then shared
//! read-only (usually behind an `Arc`).
//!
//! Connections run from a producing port to a consuming port:
//! - output of a node to an input of a sibling,
//! - input of a composite to an input of one of its children,
//! - output of a child to an output of its composite,
//! - input of a composite straight to one of its own outputs.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::time::Time;

/// Handle to a node in a [`Graph`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Handle to a port in a [`Graph`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u32);

impl PortId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Input,
    Output,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    /// Completion budget used for absolute deadlines when a port declares none.
    pub relative_deadline: Option<Time>,
    /// Worst-case execution time of one firing.
    pub execution_time: Time,
}

#[derive(Debug, Clone)]
pub struct PortData {
    pub name: String,
    pub node: NodeId,
    pub kind: PortKind,
    pub relative_deadline: Option<Time>,
    /// Sensor latency or network delay bound of a port with no upstream producer.
    pub latency: Option<Time>,
    /// Port receives traffic from another platform.
    pub network: bool,
}

/// Provider of per-node dependency declarations.
pub trait GraphDescription {
    /// Delay from `input` to `output` of the same node.
    /// [`Time::POSITIVE_INFINITY`] means the output does not depend on the input.
    fn dependency(&self, input: PortId, output: PortId) -> Result<Time, ConfigurationError>;

    /// Inputs that must be presented together with `input` for one firing.
    fn equivalent_inputs(&self, input: PortId) -> Result<Vec<PortId>, ConfigurationError>;
}

/// Validated, read-only computation graph.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<NodeData>,
    ports: Vec<PortData>,
    upstream: Vec<Vec<PortId>>,
    downstream: Vec<Vec<PortId>>,
    /// Declared leaf dependencies; undeclared pairs default to zero delay.
    dependencies: BTreeMap<(PortId, PortId), Time>,
    groups: Vec<BTreeSet<PortId>>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeData, ConfigurationError> {
        self.nodes
            .get(id.index())
            .ok_or(ConfigurationError::UnknownNode(id))
    }

    pub fn port(&self, id: PortId) -> Result<&PortData, ConfigurationError> {
        self.ports
            .get(id.index())
            .ok_or(ConfigurationError::UnknownPort(id))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId::new(i as u32))
    }

    pub fn port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        (0..self.ports.len()).map(|i| PortId::new(i as u32))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId::new(i as u32))
    }

    pub fn owner(&self, port: PortId) -> Result<NodeId, ConfigurationError> {
        Ok(self.port(port)?.node)
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, ConfigurationError> {
        Ok(self.node(node)?.parent)
    }

    pub fn is_composite(&self, node: NodeId) -> Result<bool, ConfigurationError> {
        Ok(!self.node(node)?.children.is_empty())
    }

    pub fn is_input(&self, port: PortId) -> Result<bool, ConfigurationError> {
        Ok(self.port(port)?.kind == PortKind::Input)
    }

    pub fn inputs(&self, node: NodeId) -> Result<&[PortId], ConfigurationError> {
        Ok(&self.node(node)?.inputs)
    }

    pub fn outputs(&self, node: NodeId) -> Result<&[PortId], ConfigurationError> {
        Ok(&self.node(node)?.outputs)
    }

    /// Ports feeding `port` directly.
    pub fn upstream(&self, port: PortId) -> Result<&[PortId], ConfigurationError> {
        self.upstream
            .get(port.index())
            .map(Vec::as_slice)
            .ok_or(ConfigurationError::UnknownPort(port))
    }

    /// Ports fed by `port` directly.
    pub fn downstream(&self, port: PortId) -> Result<&[PortId], ConfigurationError> {
        self.downstream
            .get(port.index())
            .map(Vec::as_slice)
            .ok_or(ConfigurationError::UnknownPort(port))
    }

    /// Ports where a token written to `port` is finally queued.
    ///
    /// Composite boundary ports are transparent: the walk continues through
    /// them to the leaf inputs behind. Outputs with nothing downstream are
    /// actuators and receive the token themselves.
    pub fn destinations(&self, port: PortId) -> Result<Vec<PortId>, ConfigurationError> {
        let mut result = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut pending: VecDeque<PortId> = self.downstream(port)?.iter().copied().collect();
        while let Some(next) = pending.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let data = self.port(next)?;
            let onward = self.downstream(next)?;
            let transparent = match data.kind {
                PortKind::Input => self.is_composite(data.node)?,
                PortKind::Output => !onward.is_empty(),
            };
            if transparent {
                pending.extend(onward.iter().copied());
            } else {
                result.insert(next);
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Relative deadline of events delivered to `port`.
    ///
    /// The port attribute wins over the node budget; with neither the
    /// deadline coincides with the timestamp.
    pub fn relative_deadline(&self, port: PortId) -> Result<Time, ConfigurationError> {
        let data = self.port(port)?;
        if let Some(deadline) = data.relative_deadline {
            return Ok(deadline);
        }
        Ok(self.node(data.node)?.relative_deadline.unwrap_or(Time::ZERO))
    }

    pub fn node_deadline(&self, node: NodeId) -> Result<Time, ConfigurationError> {
        Ok(self.node(node)?.relative_deadline.unwrap_or(Time::ZERO))
    }

    pub fn execution_time(&self, node: NodeId) -> Result<Time, ConfigurationError> {
        Ok(self.node(node)?.execution_time)
    }

    fn check_pair(&self, input: PortId, output: PortId) -> Result<NodeId, ConfigurationError> {
        let inp = self.port(input)?;
        let out = self.port(output)?;
        if inp.kind != PortKind::Input {
            return Err(ConfigurationError::NotAnInput(input));
        }
        if out.kind != PortKind::Output {
            return Err(ConfigurationError::NotAnOutput(output));
        }
        if inp.node != out.node {
            return Err(ConfigurationError::DependencyAcrossNodes { input, output });
        }
        Ok(inp.node)
    }

    /// Smallest delay along any internal path from `from` to `to`.
    fn reach(&self, from: PortId, to: PortId, visiting: &mut HashSet<PortId>) -> Result<Time, ConfigurationError> {
        if from == to {
            return Ok(Time::ZERO);
        }
        if !visiting.insert(from) {
            return Ok(Time::POSITIVE_INFINITY);
        }
        let data = self.port(from)?;
        let mut best = Time::POSITIVE_INFINITY;
        if data.kind == PortKind::Input && !self.is_composite(data.node)? {
            for &output in &self.node(data.node)?.outputs {
                let hop = self.declared(from, output);
                if hop.is_infinite() {
                    continue;
                }
                best = best.min(hop + self.reach(output, to, visiting)?);
            }
        } else {
            for &next in self.downstream(from)? {
                best = best.min(self.reach(next, to, visiting)?);
            }
        }
        visiting.remove(&from);
        Ok(best)
    }

    fn declared(&self, input: PortId, output: PortId) -> Time {
        self.dependencies
            .get(&(input, output))
            .copied()
            .unwrap_or(Time::ZERO)
    }
}

impl GraphDescription for Graph {
    fn dependency(&self, input: PortId, output: PortId) -> Result<Time, ConfigurationError> {
        let node = self.check_pair(input, output)?;
        if self.is_composite(node)? {
            self.reach(input, output, &mut HashSet::new())
        } else {
            Ok(self.declared(input, output))
        }
    }

    fn equivalent_inputs(&self, input: PortId) -> Result<Vec<PortId>, ConfigurationError> {
        let data = self.port(input)?;
        if data.kind != PortKind::Input {
            return Err(ConfigurationError::NotAnInput(input));
        }
        let node = self.node(data.node)?;
        let mut group = BTreeSet::new();
        group.insert(input);

        for &output in &node.outputs {
            if self.dependency(input, output)?.is_infinite() {
                continue;
            }
            for &other in &node.inputs {
                if self.dependency(other, output)?.is_finite() {
                    group.insert(other);
                }
            }
        }
        for declared in &self.groups {
            if declared.contains(&input) {
                group.extend(declared.iter().copied());
            }
        }
        Ok(group.into_iter().collect())
    }
}

/// Incremental graph construction.
///
/// Node and port creation hand out handles immediately; everything is
/// checked in [`GraphBuilder::build`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeData>,
    ports: Vec<PortData>,
    connections: Vec<(PortId, PortId)>,
    dependencies: BTreeMap<(PortId, PortId), Time>,
    groups: Vec<BTreeSet<PortId>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level node.
    pub fn node(&mut self, name: impl Into<String>) -> NodeId {
        self.push_node(name.into(), None)
    }

    /// Adds a node nested inside `parent`.
    pub fn child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        self.push_node(name.into(), Some(parent))
    }

    fn push_node(&mut self, name: String, parent: Option<NodeId>) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            name,
            parent,
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            relative_deadline: None,
            execution_time: Time::ZERO,
        });
        id
    }

    pub fn input(&mut self, node: NodeId, name: impl Into<String>) -> PortId {
        self.push_port(node, name.into(), PortKind::Input)
    }

    pub fn output(&mut self, node: NodeId, name: impl Into<String>) -> PortId {
        self.push_port(node, name.into(), PortKind::Output)
    }

    fn push_port(&mut self, node: NodeId, name: String, kind: PortKind) -> PortId {
        let id = PortId::new(self.ports.len() as u32);
        self.ports.push(PortData {
            name,
            node,
            kind,
            relative_deadline: None,
            latency: None,
            network: false,
        });
        id
    }

    pub fn connect(&mut self, from: PortId, to: PortId) -> &mut Self {
        self.connections.push((from, to));
        self
    }

    /// Declares the model-time delay from `input` to `output` of a leaf.
    pub fn depends(&mut self, input: PortId, output: PortId, delay: Time) -> &mut Self {
        self.dependencies.insert((input, output), delay);
        self
    }

    /// Declares that `output` never depends on `input`.
    pub fn independent(&mut self, input: PortId, output: PortId) -> &mut Self {
        self.depends(input, output, Time::POSITIVE_INFINITY)
    }

    /// Declares inputs that must always be presented together.
    pub fn equivalent(&mut self, inputs: &[PortId]) -> &mut Self {
        self.groups.push(inputs.iter().copied().collect());
        self
    }

    pub fn port_deadline(&mut self, port: PortId, deadline: Time) -> &mut Self {
        if let Some(data) = self.ports.get_mut(port.index()) {
            data.relative_deadline = Some(deadline);
        }
        self
    }

    pub fn node_deadline(&mut self, node: NodeId, deadline: Time) -> &mut Self {
        if let Some(data) = self.nodes.get_mut(node.index()) {
            data.relative_deadline = Some(deadline);
        }
        self
    }

    pub fn execution_time(&mut self, node: NodeId, wcet: Time) -> &mut Self {
        if let Some(data) = self.nodes.get_mut(node.index()) {
            data.execution_time = wcet;
        }
        self
    }

    pub fn latency(&mut self, port: PortId, latency: Time) -> &mut Self {
        if let Some(data) = self.ports.get_mut(port.index()) {
            data.latency = Some(latency);
        }
        self
    }

    /// Marks `port` as receiving from another platform.
    pub fn network(&mut self, port: PortId) -> &mut Self {
        if let Some(data) = self.ports.get_mut(port.index()) {
            data.network = true;
        }
        self
    }

    pub fn build(self) -> Result<Graph, ConfigurationError> {
        let GraphBuilder {
            mut nodes,
            ports,
            connections,
            dependencies,
            groups,
        } = self;

        let node_count = nodes.len();
        let known_node = |id: NodeId| {
            if id.index() < node_count {
                Ok(id)
            } else {
                Err(ConfigurationError::UnknownNode(id))
            }
        };

        for index in 0..nodes.len() {
            let id = NodeId::new(index as u32);
            let mut cursor = nodes[index].parent;
            let mut depth = 0;
            while let Some(parent) = cursor {
                known_node(parent)?;
                if parent == id || depth > node_count {
                    return Err(ConfigurationError::ContainmentCycle(id));
                }
                cursor = nodes[parent.index()].parent;
                depth += 1;
            }
            if let Some(parent) = nodes[index].parent {
                nodes[parent.index()].children.push(id);
            }
        }

        for (index, port) in ports.iter().enumerate() {
            let node = known_node(port.node)?;
            let id = PortId::new(index as u32);
            if port.latency.is_some() && port.network {
                return Err(ConfigurationError::LatencyOnNetworkPort(id));
            }
            match port.kind {
                PortKind::Input => nodes[node.index()].inputs.push(id),
                PortKind::Output => nodes[node.index()].outputs.push(id),
            }
        }

        let mut graph = Graph {
            upstream: vec![Vec::new(); ports.len()],
            downstream: vec![Vec::new(); ports.len()],
            nodes,
            ports,
            dependencies: BTreeMap::new(),
            groups: Vec::new(),
        };

        for (from, to) in connections {
            graph.check_connection(from, to)?;
            graph.downstream[from.index()].push(to);
            graph.upstream[to.index()].push(from);
        }

        for ((input, output), delay) in dependencies {
            graph.check_pair(input, output)?;
            graph.dependencies.insert((input, output), delay);
        }

        for group in groups {
            let mut owner = None;
            for &port in &group {
                let data = graph.port(port)?;
                if data.kind != PortKind::Input {
                    return Err(ConfigurationError::NotAnInput(port));
                }
                if *owner.get_or_insert(data.node) != data.node {
                    return Err(ConfigurationError::MixedEquivalenceGroup);
                }
            }
            graph.groups.push(group);
        }

        log::debug!(
            "graph built: {} nodes, {} ports",
            graph.nodes.len(),
            graph.ports.len()
        );
        Ok(graph)
    }
}

impl Graph {
    fn check_connection(&self, from: PortId, to: PortId) -> Result<(), ConfigurationError> {
        let src = self.port(from)?;
        let dst = self.port(to)?;
        let src_parent = self.node(src.node)?.parent;
        let dst_parent = self.node(dst.node)?.parent;
        let valid = match (src.kind, dst.kind) {
            // sibling wiring
            (PortKind::Output, PortKind::Input) => src_parent == dst_parent,
            // into a composite
            (PortKind::Input, PortKind::Input) => dst_parent == Some(src.node),
            // out of a composite
            (PortKind::Output, PortKind::Output) => src_parent == Some(dst.node),
            // pass-through
            (PortKind::Input, PortKind::Output) => src.node == dst.node,
        };
        if valid {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidConnection { from, to })
        }
    }
}
