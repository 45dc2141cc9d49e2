use super::graph::DependencyGraph;
use crate::cl_util::DeviceContext;
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Window};
use crate::layers::{Activation, LayerSpec, MAX_LAYER_ELEMS};
use itertools::Itertools;
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Where a node reads one of its inputs from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputRef {
    /// The batch handed to the network
    Network,
    /// The output of the node with this declaration index
    Node(usize),
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputRef::Network => f.write_str("in"),
            InputRef::Node(i) => write!(f, "{}", i),
        }
    }
}

impl FromStr for InputRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<InputRef> {
        match s.trim() {
            "in" => Ok(InputRef::Network),
            idx => idx
                .parse()
                .map(InputRef::Node)
                .map_err(|_| Error::Format(format!("invalid input reference \"{}\"", s))),
        }
    }
}

/// One declared node: a layer and the inputs whose element-wise sum it consumes.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    pub layer: LayerSpec,
    pub inputs: Vec<InputRef>,
}

/// Declarative description of a network: the input geometry and an ordered list of nodes.
/// Declarations are not checked until `build`.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    input: ImageGeometry,
    nodes: Vec<NodeSpec>,
}

/// The result of validating a topology.
#[derive(Clone, Debug)]
pub(crate) struct Resolved {
    /// Node indices, parents before children, ties broken by declaration order
    pub order: Vec<usize>,
    pub children: Vec<Vec<usize>>,
    pub input_geometry: Vec<ImageGeometry>,
    pub output_geometry: Vec<ImageGeometry>,
    pub sink: usize,
}

impl Topology {
    pub fn new(input: ImageGeometry) -> Topology {
        Topology {
            input,
            nodes: Vec::new(),
        }
    }

    /// A stack of dense layers `sizes[0] -> sizes[1] -> ...` all using `activation`.
    pub fn mlp(sizes: &[usize], activation: Activation) -> Result<Topology> {
        let (&inputs, layers) = sizes
            .split_first()
            .ok_or_else(|| Error::Topology("an MLP needs at least one layer size".to_owned()))?;
        let mut topology = Topology::new(ImageGeometry::vector(inputs));
        for &outputs in layers {
            topology.push(LayerSpec::Dense {
                outputs,
                activation,
            });
        }
        Ok(topology)
    }

    pub fn input(&self) -> ImageGeometry {
        self.input
    }
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node reading the previously declared node, or the network input for the first
    /// node. Returns the index of the new node.
    pub fn push(&mut self, layer: LayerSpec) -> usize {
        let input = match self.nodes.len() {
            0 => InputRef::Network,
            n => InputRef::Node(n - 1),
        };
        self.push_with_inputs(layer, vec![input])
    }

    /// Appends a node reading the element-wise sum of `inputs`. Returns the index of the new node.
    pub fn push_with_inputs(&mut self, layer: LayerSpec, inputs: Vec<InputRef>) -> usize {
        self.nodes.push(NodeSpec { layer, inputs });
        self.nodes.len() - 1
    }

    /// Checks index bounds, acyclicity and layer geometries and sorts the nodes topologically.
    pub(crate) fn resolve(&self) -> Result<Resolved> {
        let len = self.nodes.len();
        if len == 0 {
            return Err(Error::Topology("topology declares no nodes".to_owned()));
        }
        if self.input.num_elems() > MAX_LAYER_ELEMS {
            return Err(Error::Topology(format!(
                "input {} exceeds {} elements",
                self.input, MAX_LAYER_ELEMS
            )));
        }
        let mut children = vec![Vec::new(); len];
        let mut pending = vec![0usize; len];
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.inputs.is_empty() {
                return Err(Error::Topology(format!("node {} has no inputs", idx)));
            }
            if node.inputs.iter().unique().count() != node.inputs.len() {
                return Err(Error::Topology(format!("node {} lists an input twice", idx)));
            }
            for input in &node.inputs {
                if let InputRef::Node(parent) = *input {
                    if parent >= len {
                        return Err(Error::IndexOutOfRange { index: parent, len });
                    }
                    if parent == idx {
                        return Err(Error::Topology(format!("node {} reads itself", idx)));
                    }
                    children[parent].push(idx);
                    pending[idx] += 1;
                }
            }
        }

        // Kahn's algorithm; the ready set is ordered so ties resolve by declaration index.
        let mut ready = (0..len).filter(|&i| pending[i] == 0).collect::<BTreeSet<_>>();
        let mut order = Vec::with_capacity(len);
        while let Some(&idx) = ready.iter().next() {
            ready.remove(&idx);
            order.push(idx);
            for &child in &children[idx] {
                pending[child] -= 1;
                if pending[child] == 0 {
                    ready.insert(child);
                }
            }
        }
        if order.len() != len {
            let cyclic = (0..len).filter(|&i| pending[i] > 0).join(", ");
            return Err(Error::Topology(format!(
                "cycle through node(s) {}",
                cyclic
            )));
        }

        let sinks = (0..len).filter(|&i| children[i].is_empty()).collect::<Vec<_>>();
        let sink = match sinks.as_slice() {
            [sink] => *sink,
            _ => {
                return Err(Error::Topology(format!(
                    "expected exactly one output node, found {}: [{}]",
                    sinks.len(),
                    sinks.iter().join(", ")
                )))
            }
        };

        let mut input_geometry = vec![self.input; len];
        let mut output_geometry = vec![self.input; len];
        for &idx in &order {
            let node = &self.nodes[idx];
            let geometry_of = |input: &InputRef| match *input {
                InputRef::Network => self.input,
                InputRef::Node(parent) => output_geometry[parent],
            };
            let merged = geometry_of(&node.inputs[0]);
            if let Some(other) = node.inputs.iter().map(geometry_of).find(|g| *g != merged) {
                return Err(Error::Topology(format!(
                    "node {} merges inputs of different shapes: {} and {}",
                    idx, merged, other
                )));
            }
            input_geometry[idx] = merged;
            output_geometry[idx] = node.layer.output_geometry(&merged).map_err(|e| match e {
                Error::Topology(msg) => Error::Topology(format!("node {}: {}", idx, msg)),
                e => e,
            })?;
        }

        debug!(
            "Resolved topology of {} node(s), order: [{}], output: {}.",
            len,
            order.iter().join(", "),
            output_geometry[sink]
        );
        Ok(Resolved {
            order,
            children,
            input_geometry,
            output_geometry,
            sink,
        })
    }

    /// Validates the topology and allocates a graph with freshly initialized parameters.
    pub fn build(&self, context: &DeviceContext) -> Result<DependencyGraph> {
        self.build_with_rng(context, &mut rand::thread_rng())
    }

    /// Like `build`, drawing initial parameters from `rng`.
    pub fn build_with_rng<R: Rng>(
        &self,
        context: &DeviceContext,
        rng: &mut R,
    ) -> Result<DependencyGraph> {
        let resolved = self.resolve()?;
        DependencyGraph::new(self.clone(), resolved, context, rng)
    }
}

fn parse_fields<T: FromStr>(line: usize, fields: &[&str]) -> Result<Vec<T>> {
    fields
        .iter()
        .map(|f| {
            f.parse::<T>().map_err(|_| {
                Error::Format(format!("line {}: invalid number \"{}\"", line, f))
            })
        })
        .collect()
}

fn parse_layer(line: usize, fields: &[&str]) -> Result<LayerSpec> {
    let arity = |n: usize| {
        if fields.len() == n {
            Ok(())
        } else {
            Err(Error::Format(format!(
                "line {}: \"{}\" takes {} argument(s)",
                line,
                fields[0],
                n - 1
            )))
        }
    };
    match fields[0] {
        "dense" => {
            arity(3)?;
            Ok(LayerSpec::Dense {
                outputs: parse_fields::<usize>(line, &fields[1..2])?[0],
                activation: fields[2].parse()?,
            })
        }
        "convolution" => {
            arity(7)?;
            let n = parse_fields::<usize>(line, &fields[1..6])?;
            Ok(LayerSpec::Convolution {
                features: n[0],
                window: Window::new(n[1], n[2], n[3], n[4]),
                activation: fields[6].parse()?,
            })
        }
        "pooling" => {
            arity(5)?;
            let n = parse_fields::<usize>(line, &fields[2..5])?;
            Ok(LayerSpec::Pooling {
                kind: fields[1].parse()?,
                window: Window::new(n[0], n[1], n[2], 0),
            })
        }
        other => Err(Error::Format(format!(
            "line {}: unknown layer kind \"{}\"",
            line, other
        ))),
    }
}

impl FromStr for Topology {
    type Err = Error;

    /// Parses one declaration per line: `input C H W` first, then `dense N ACT`,
    /// `convolution F KH KW STRIDE PAD ACT` or `pooling max|avg PH PW STRIDE`, each optionally
    /// followed by `<- i,j` naming its inputs (`in` is the network input). Blank lines and lines
    /// starting with `#` are skipped.
    fn from_str(s: &str) -> Result<Topology> {
        let mut lines = s
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (line, header) = lines
            .next()
            .ok_or_else(|| Error::Format("empty topology".to_owned()))?;
        let header = header.split_whitespace().collect::<Vec<_>>();
        if header.len() != 4 || header[0] != "input" {
            return Err(Error::Format(format!(
                "line {}: expected \"input C H W\"",
                line
            )));
        }
        let dims = parse_fields::<usize>(line, &header[1..])?;
        let mut topology = Topology::new(ImageGeometry::new(dims[1], dims[2], dims[0]));

        for (line, text) in lines {
            let (decl, inputs) = match text.find("<-") {
                Some(pos) => (&text[..pos], Some(&text[pos + 2..])),
                None => (text, None),
            };
            let fields = decl.split_whitespace().collect::<Vec<_>>();
            if fields.is_empty() {
                return Err(Error::Format(format!("line {}: missing layer", line)));
            }
            let layer = parse_layer(line, &fields)?;
            match inputs {
                Some(inputs) => {
                    let inputs = inputs
                        .split(',')
                        .map(str::parse)
                        .collect::<Result<Vec<InputRef>>>()?;
                    topology.push_with_inputs(layer, inputs);
                }
                None => {
                    topology.push(layer);
                }
            }
        }
        Ok(topology)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "input {} {} {}",
            self.input.channels(),
            self.input.rows(),
            self.input.cols()
        )?;
        for node in &self.nodes {
            match node.layer {
                LayerSpec::Dense {
                    outputs,
                    activation,
                } => write!(f, "dense {} {}", outputs, activation)?,
                LayerSpec::Convolution {
                    features,
                    window,
                    activation,
                } => write!(
                    f,
                    "convolution {} {} {} {} {} {}",
                    features,
                    window.rows(),
                    window.cols(),
                    window.stride(),
                    window.padding(),
                    activation
                )?,
                LayerSpec::Pooling { kind, window } => write!(
                    f,
                    "pooling {} {} {} {}",
                    kind,
                    window.rows(),
                    window.cols(),
                    window.stride()
                )?,
            }
            writeln!(f, " <- {}", node.inputs.iter().join(","))?;
        }
        Ok(())
    }
}
