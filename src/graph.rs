//! Patch Graph
//!
//! This module provides the graph that evaluates the synth's node topology. It
//! handles execution ordering, signal propagation, parameter automation, and the
//! one kind of cycle the instrument needs: explicitly declared feedback edges,
//! which deliver the source's previous-sample output.

use crate::automation::{AudioParam, AutomationOp};
use crate::port::{GraphModule, ModuleSetting, ParamId, PortId, PortSpec, PortValues};
use serde::{Deserialize, Serialize};
use slotmap::{DefaultKey, SlotMap};
use std::collections::{HashMap, VecDeque};

/// Unique identifier for a node in the patch graph
pub type NodeId = DefaultKey;

/// Unique identifier for a cable connection
pub type CableId = usize;

/// Reference to a specific port on a specific node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: PortId,
}

/// A cable connecting two ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cable {
    pub from: PortRef,
    pub to: PortRef,
    /// Optional attenuation (0.0–1.0)
    pub attenuation: Option<f64>,
    /// Feedback cables are excluded from ordering and read the previous sample
    pub feedback: bool,
}

/// Internal node representation
struct Node {
    module: Box<dyn GraphModule>,
    name: String,
    params: Vec<AudioParam>,
    param_values: Vec<f64>,
    inputs: PortValues,
    outputs: PortValues,
}

/// Error types for patch operations
#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    InvalidNode,
    InvalidPort,
    InvalidParam,
    CycleDetected { nodes: Vec<NodeId> },
    NotCompiled,
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::InvalidNode => write!(f, "Invalid node"),
            PatchError::InvalidPort => write!(f, "Invalid port"),
            PatchError::InvalidParam => write!(f, "Invalid parameter"),
            PatchError::CycleDetected { nodes } => {
                write!(f, "Cycle detected involving {} nodes", nodes.len())
            }
            PatchError::NotCompiled => write!(f, "Patch has not been compiled"),
        }
    }
}

impl std::error::Error for PatchError {}

/// Handle to a node for ergonomic port references
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    spec: PortSpec,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Reference an output port by name
    pub fn out(&self, name: &str) -> PortRef {
        let port = self
            .spec
            .output_by_name(name)
            .unwrap_or_else(|| panic!("Unknown output port: {}", name));
        PortRef {
            node: self.id,
            port: port.id,
        }
    }

    /// Reference an input port by name
    pub fn in_(&self, name: &str) -> PortRef {
        let port = self
            .spec
            .input_by_name(name)
            .unwrap_or_else(|| panic!("Unknown input port: {}", name));
        PortRef {
            node: self.id,
            port: port.id,
        }
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }
}

/// Declared shape of a patch, by node name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
    pub feedback: bool,
}

impl Topology {
    pub fn kind_of(&self, name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.kind.as_str())
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }

    /// True if any cable runs from `from` to `to`
    pub fn connects(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn feedback_edges(&self) -> impl Iterator<Item = &TopologyEdge> {
        self.edges.iter().filter(|e| e.feedback)
    }

    /// Names of nodes fed directly by `from`, deduplicated, in declaration order
    pub fn successors(&self, from: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.from == from) {
            if !out.contains(&edge.to.as_str()) {
                out.push(edge.to.as_str());
            }
        }
        out
    }
}

struct InputPlan {
    port: PortId,
    default: f64,
    sources: Vec<(usize, f64)>,
}

struct StepPlan {
    node: NodeId,
    inputs: Vec<InputPlan>,
    outputs: Vec<(PortId, usize)>,
}

/// The patch graph containing modules and connections
pub struct Patch {
    nodes: SlotMap<NodeId, Node>,
    cables: Vec<Cable>,

    // Execution state
    execution_order: Vec<NodeId>,
    plan: Vec<StepPlan>,
    slots: HashMap<PortRef, usize>,
    buffers: Vec<f64>,

    sample_rate: f64,
    output_node: Option<NodeId>,
}

impl Patch {
    /// Create a new empty patch
    pub fn new(sample_rate: f64) -> Self {
        Self {
            nodes: SlotMap::new(),
            cables: Vec::new(),
            execution_order: Vec::new(),
            plan: Vec::new(),
            slots: HashMap::new(),
            buffers: Vec::new(),
            sample_rate,
            output_node: None,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Add a module to the patch
    pub fn add<M: GraphModule + 'static>(
        &mut self,
        name: impl Into<String>,
        mut module: M,
    ) -> NodeHandle {
        module.set_sample_rate(self.sample_rate);
        let spec = module.port_spec().clone();
        let params: Vec<AudioParam> = module
            .params()
            .iter()
            .map(|p| AudioParam::new(p.default, p.min, p.max))
            .collect();
        let param_values = params.iter().map(|p| p.value_at(0.0)).collect();
        let id = self.nodes.insert(Node {
            module: Box::new(module),
            name: name.into(),
            params,
            param_values,
            inputs: PortValues::new(),
            outputs: PortValues::new(),
        });
        self.invalidate();
        NodeHandle { id, spec }
    }

    /// Connect an output port to an input port
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<CableId, PatchError> {
        self.push_cable(from, to, None, false)
    }

    /// Connect with attenuation
    pub fn connect_attenuated(
        &mut self,
        from: PortRef,
        to: PortRef,
        attenuation: f64,
    ) -> Result<CableId, PatchError> {
        self.push_cable(from, to, Some(attenuation.clamp(0.0, 1.0)), false)
    }

    /// Declare a feedback connection. The destination reads the source's output
    /// from the previous sample, so the cable may close a loop.
    pub fn connect_feedback(&mut self, from: PortRef, to: PortRef) -> Result<CableId, PatchError> {
        self.push_cable(from, to, None, true)
    }

    /// Connect one output to multiple inputs (mult)
    pub fn mult(&mut self, from: PortRef, to: &[PortRef]) -> Result<Vec<CableId>, PatchError> {
        to.iter().map(|&dest| self.connect(from, dest)).collect()
    }

    fn push_cable(
        &mut self,
        from: PortRef,
        to: PortRef,
        attenuation: Option<f64>,
        feedback: bool,
    ) -> Result<CableId, PatchError> {
        self.validate_output_port(from)?;
        self.validate_input_port(to)?;

        self.cables.push(Cable {
            from,
            to,
            attenuation,
            feedback,
        });
        self.invalidate();
        Ok(self.cables.len() - 1)
    }

    /// Set the output node for the patch
    pub fn set_output(&mut self, node: NodeId) {
        self.output_node = Some(node);
    }

    /// Apply an automation operation to a node parameter
    pub fn automate(
        &mut self,
        node: NodeId,
        param: ParamId,
        op: AutomationOp,
    ) -> Result<(), PatchError> {
        let n = self.nodes.get_mut(node).ok_or(PatchError::InvalidNode)?;
        let p = n.params.get_mut(param).ok_or(PatchError::InvalidParam)?;
        p.apply(op);
        Ok(())
    }

    /// Evaluate a parameter's intrinsic value at graph time `t`
    pub fn param_value(&self, node: NodeId, param: ParamId, t: f64) -> Option<f64> {
        self.nodes
            .get(node)
            .and_then(|n| n.params.get(param))
            .map(|p| p.value_at(t))
    }

    /// A node parameter's full timeline
    pub fn param(&self, node: NodeId, param: ParamId) -> Option<&AudioParam> {
        self.nodes.get(node).and_then(|n| n.params.get(param))
    }

    pub fn apply_setting(&mut self, node: NodeId, setting: ModuleSetting) -> Result<(), PatchError> {
        let n = self.nodes.get_mut(node).ok_or(PatchError::InvalidNode)?;
        n.module.apply_setting(setting);
        Ok(())
    }

    pub fn get_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.name.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    /// Get execution order (after compile)
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    fn invalidate(&mut self) {
        self.execution_order.clear();
        self.plan.clear();
    }

    fn validate_output_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .outputs
            .iter()
            .find(|p| p.id == port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    fn validate_input_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .inputs
            .iter()
            .find(|p| p.id == port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    /// Compile the patch into an executable order
    pub fn compile(&mut self) -> Result<(), PatchError> {
        let order = self.topological_sort()?;

        // One buffer slot per output port
        self.slots.clear();
        for (id, node) in &self.nodes {
            for output in &node.module.port_spec().outputs {
                let slot = self.slots.len();
                self.slots.insert(
                    PortRef {
                        node: id,
                        port: output.id,
                    },
                    slot,
                );
            }
        }
        self.buffers = vec![0.0; self.slots.len()];

        let mut plan = Vec::with_capacity(order.len());
        for &node_id in &order {
            let spec = self.nodes[node_id].module.port_spec();
            let inputs = spec
                .inputs
                .iter()
                .map(|input| {
                    let to = PortRef {
                        node: node_id,
                        port: input.id,
                    };
                    let sources = self
                        .cables
                        .iter()
                        .filter(|c| c.to == to)
                        .map(|c| (self.slots[&c.from], c.attenuation.unwrap_or(1.0)))
                        .collect();
                    InputPlan {
                        port: input.id,
                        default: input.default,
                        sources,
                    }
                })
                .collect();
            let outputs = spec
                .outputs
                .iter()
                .map(|output| {
                    let slot = self.slots[&PortRef {
                        node: node_id,
                        port: output.id,
                    }];
                    (output.id, slot)
                })
                .collect();
            plan.push(StepPlan {
                node: node_id,
                inputs,
                outputs,
            });
        }

        self.plan = plan;
        self.execution_order = order;
        Ok(())
    }

    fn topological_sort(&self) -> Result<Vec<NodeId>, PatchError> {
        let mut in_degree: HashMap<NodeId, usize> = self.nodes.keys().map(|k| (k, 0)).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|k| (k, vec![])).collect();

        for cable in self.cables.iter().filter(|c| !c.feedback) {
            *in_degree.entry(cable.to.node).or_insert(0) += 1;
            successors
                .entry(cable.from.node)
                .or_default()
                .push(cable.to.node);
        }

        // Kahn's algorithm, seeded in insertion order so the result is stable
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .keys()
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for succ in successors.get(&node).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*succ);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let in_cycle: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id)
                .collect();
            return Err(PatchError::CycleDetected { nodes: in_cycle });
        }

        Ok(result)
    }

    /// Process a single sample at graph time `time`, returning stereo output
    pub fn tick(&mut self, time: f64) -> (f64, f64) {
        let Self {
            nodes,
            plan,
            buffers,
            ..
        } = self;

        for step in plan.iter() {
            let Some(node) = nodes.get_mut(step.node) else {
                continue;
            };

            node.inputs.clear();
            for input in &step.inputs {
                if input.sources.is_empty() {
                    node.inputs.set(input.port, input.default);
                } else {
                    // Hardware-style input mixing
                    let sum = input
                        .sources
                        .iter()
                        .map(|&(slot, gain)| buffers[slot] * gain)
                        .sum();
                    node.inputs.set(input.port, sum);
                }
            }

            for (param, value) in node.params.iter_mut().zip(node.param_values.iter_mut()) {
                param.advance(time);
                *value = param.value_at(time);
            }

            node.outputs.clear();
            node.module
                .tick(&node.param_values, &node.inputs, &mut node.outputs);

            for &(port, slot) in &step.outputs {
                buffers[slot] = node.outputs.get_or(port, 0.0);
            }
        }

        self.read_output()
    }

    fn read_output(&self) -> (f64, f64) {
        let Some(output_node) = self.output_node else {
            return (0.0, 0.0);
        };
        let read = |port: PortId| {
            self.slots
                .get(&PortRef {
                    node: output_node,
                    port,
                })
                .map(|&slot| self.buffers[slot])
        };
        let left = read(10).unwrap_or(0.0);
        // Mono fallback
        let right = read(11).unwrap_or(left);
        (left, right)
    }

    /// Reset all modules in the patch
    pub fn reset(&mut self) {
        for (_, node) in &mut self.nodes {
            node.module.reset();
        }
        self.buffers.fill(0.0);
    }

    /// Iterate over all nodes as (id, name, type id)
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &str, &'static str)> {
        self.nodes
            .iter()
            .map(|(id, node)| (id, node.name.as_str(), node.module.type_id()))
    }

    /// Describe the declared topology by node and port name
    pub fn topology(&self) -> Topology {
        let port_name = |r: &PortRef, output: bool| -> String {
            self.nodes
                .get(r.node)
                .and_then(|n| {
                    let spec = n.module.port_spec();
                    let ports = if output { &spec.outputs } else { &spec.inputs };
                    ports.iter().find(|p| p.id == r.port).map(|p| p.name.clone())
                })
                .unwrap_or_default()
        };
        let node_name = |id: NodeId| self.get_name(id).unwrap_or_default().to_string();

        Topology {
            nodes: self
                .nodes
                .values()
                .map(|n| TopologyNode {
                    name: n.name.clone(),
                    kind: n.module.type_id().to_string(),
                })
                .collect(),
            edges: self
                .cables
                .iter()
                .map(|c| TopologyEdge {
                    from: node_name(c.from.node),
                    from_port: port_name(&c.from, true),
                    to: node_name(c.to.node),
                    to_port: port_name(&c.to, false),
                    feedback: c.feedback,
                })
                .collect(),
        }
    }
}
