use crate::math::AccelTensor;

/// Shape of a tensor as `(rows, cols, depth)`.
pub type TensorShape = (usize, usize, usize);

/// Values a node caches during a training forward pass for its backward pass. Lives for one
/// forward + backward cycle.
#[derive(Debug)]
pub enum BackpropStorage {
    Dense(DenseStorage),
    Convolution(ConvolutionStorage),
    Pooling(PoolingStorage),
}

#[derive(Debug)]
pub struct DenseStorage {
    /// Shape of the tensor the layer received
    pub input_shape: TensorShape,
    /// The input as a batch of column vectors
    pub input: AccelTensor,
    pub preactivation: AccelTensor,
}

#[derive(Debug)]
pub struct ConvolutionStorage {
    pub input_shape: TensorShape,
    pub input: AccelTensor,
    pub preactivation: AccelTensor,
}

#[derive(Debug)]
pub enum PoolingStorage {
    /// Flat in-plane index of the maximum of every window
    Max {
        input_shape: TensorShape,
        argmax: AccelTensor,
    },
    /// Average pooling needs nothing but the input shape.
    Avg { input_shape: TensorShape },
}

impl BackpropStorage {
    pub fn kind(&self) -> &'static str {
        match self {
            BackpropStorage::Dense(_) => "dense",
            BackpropStorage::Convolution(_) => "convolution",
            BackpropStorage::Pooling(PoolingStorage::Max { .. }) => "max pooling",
            BackpropStorage::Pooling(PoolingStorage::Avg { .. }) => "average pooling",
        }
    }
}
