//! Little-endian model file: header, topology, then every parameter in graph order.
//!
//! ```text
//! "RNNM" | version: u32 | channels, rows, cols: u32 | nodes: u32
//! per node: kind: u32 | hyper-parameters: u32... | inputs: u32 | input: u32...
//! params: u32 | per param: rows, cols, depth: u32 | data: f32...
//! ```
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Window};
use crate::layers::{Activation, LayerSpec, PoolingKind};
use crate::network::{InputRef, TensorShape, Topology};
use crate::util::{read_f32s, write_f32s};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const MAGIC: &[u8; 4] = b"RNNM";
pub const VERSION: u32 = 1;

const DENSE: u32 = 0;
const CONVOLUTION: u32 = 1;
const POOLING: u32 = 2;
/// Input index that stands for the network input
const NETWORK_INPUT: u32 = u32::max_value();

fn write_u32s<W: Write>(writer: &mut W, values: &[usize]) -> Result<()> {
    for &v in values {
        writer.write_u32::<LittleEndian>(v as u32)?;
    }
    Ok(())
}

fn read_usize<R: Read>(reader: &mut R) -> Result<usize> {
    Ok(reader.read_u32::<LittleEndian>()? as usize)
}

fn read_activation<R: Read>(reader: &mut R) -> Result<Activation> {
    let code = reader.read_u32::<LittleEndian>()?;
    Activation::from_code(code)
        .ok_or_else(|| Error::Format(format!("unknown activation code {}", code)))
}

pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    Ok(())
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Format(format!("not a model file (magic {:?})", magic)));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::Format(format!(
            "unsupported model file version {}",
            version
        )));
    }
    Ok(())
}

pub fn write_topology<W: Write>(writer: &mut W, topology: &Topology) -> Result<()> {
    let input = topology.input();
    write_u32s(
        writer,
        &[input.channels(), input.rows(), input.cols(), topology.len()],
    )?;
    for node in topology.nodes() {
        match node.layer {
            LayerSpec::Dense {
                outputs,
                activation,
            } => write_u32s(
                writer,
                &[DENSE as usize, outputs, activation.code() as usize],
            )?,
            LayerSpec::Convolution {
                features,
                window,
                activation,
            } => write_u32s(
                writer,
                &[
                    CONVOLUTION as usize,
                    features,
                    window.rows(),
                    window.cols(),
                    window.stride(),
                    window.padding(),
                    activation.code() as usize,
                ],
            )?,
            LayerSpec::Pooling { kind, window } => write_u32s(
                writer,
                &[
                    POOLING as usize,
                    kind.tag() as usize,
                    window.rows(),
                    window.cols(),
                    window.stride(),
                ],
            )?,
        }
        writer.write_u32::<LittleEndian>(node.inputs.len() as u32)?;
        for input in &node.inputs {
            writer.write_u32::<LittleEndian>(match *input {
                InputRef::Network => NETWORK_INPUT,
                InputRef::Node(i) => i as u32,
            })?;
        }
    }
    Ok(())
}

pub fn read_topology<R: Read>(reader: &mut R) -> Result<Topology> {
    let (channels, rows, cols) = (
        read_usize(reader)?,
        read_usize(reader)?,
        read_usize(reader)?,
    );
    let mut topology = Topology::new(ImageGeometry::new(rows, cols, channels));
    let count = read_usize(reader)?;
    for _ in 0..count {
        let layer = match reader.read_u32::<LittleEndian>()? {
            DENSE => LayerSpec::Dense {
                outputs: read_usize(reader)?,
                activation: read_activation(reader)?,
            },
            CONVOLUTION => {
                let features = read_usize(reader)?;
                let (k_h, k_w) = (read_usize(reader)?, read_usize(reader)?);
                let (stride, padding) = (read_usize(reader)?, read_usize(reader)?);
                LayerSpec::Convolution {
                    features,
                    window: Window::new(k_h, k_w, stride, padding),
                    activation: read_activation(reader)?,
                }
            }
            POOLING => {
                let tag = reader.read_u32::<LittleEndian>()?;
                let kind = PoolingKind::from_tag(tag)
                    .ok_or_else(|| Error::Format(format!("unknown pooling tag {}", tag)))?;
                let (p_h, p_w) = (read_usize(reader)?, read_usize(reader)?);
                LayerSpec::Pooling {
                    kind,
                    window: Window::new(p_h, p_w, read_usize(reader)?, 0),
                }
            }
            tag => return Err(Error::Format(format!("unknown layer tag {}", tag))),
        };
        let mut inputs = Vec::new();
        for _ in 0..read_usize(reader)? {
            inputs.push(match reader.read_u32::<LittleEndian>()? {
                NETWORK_INPUT => InputRef::Network,
                i => InputRef::Node(i as usize),
            });
        }
        topology.push_with_inputs(layer, inputs);
    }
    Ok(topology)
}

pub fn write_params<W: Write>(writer: &mut W, params: &[(TensorShape, Vec<f32>)]) -> Result<()> {
    writer.write_u32::<LittleEndian>(params.len() as u32)?;
    for ((rows, cols, depth), data) in params {
        write_u32s(writer, &[*rows, *cols, *depth])?;
        write_f32s(writer, data)?;
    }
    Ok(())
}

/// Number of elements of a parameter of `shape`; fails if the product does not fit a `usize`.
pub fn element_count(shape: TensorShape) -> Result<usize> {
    let (rows, cols, depth) = shape;
    rows.checked_mul(cols)
        .and_then(|n| n.checked_mul(depth))
        .ok_or_else(|| Error::Format(format!("parameter shape {:?} is too large", shape)))
}

/// Reads the parameter section for a graph whose parameters have the `expected` shapes. The count
/// and each shape must match `expected` before the data of that parameter is read.
pub fn read_params<R: Read>(reader: &mut R, expected: &[TensorShape]) -> Result<Vec<Vec<f32>>> {
    let count = read_usize(reader)?;
    if count != expected.len() {
        return Err(Error::TopologyMismatch(format!(
            "expected {} parameter(s), the file holds {}",
            expected.len(),
            count
        )));
    }
    let mut params = Vec::with_capacity(expected.len());
    for (idx, &shape) in expected.iter().enumerate() {
        let file_shape = (read_usize(reader)?, read_usize(reader)?, read_usize(reader)?);
        if file_shape != shape {
            return Err(Error::TopologyMismatch(format!(
                "parameter {} has shape {:?}, the file holds {:?}",
                idx, shape, file_shape
            )));
        }
        params.push(read_f32s(reader, element_count(file_shape)?)?);
    }
    Ok(params)
}
