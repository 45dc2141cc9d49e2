use std::fmt;

/// A descriptor for input and intermediary image geometry. Vectors are images with one channel
/// and one column.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageGeometry {
    rows: usize,
    cols: usize,
    channels: usize,
}

impl ImageGeometry {
    pub fn new(rows: usize, cols: usize, channels: usize) -> ImageGeometry {
        ImageGeometry {
            rows,
            cols,
            channels,
        }
    }
    pub fn vector(len: usize) -> ImageGeometry {
        ImageGeometry::new(len, 1, 1)
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    /// Elements in one channel plane. Saturates instead of overflowing.
    pub fn plane(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }
    pub fn num_elems(&self) -> usize {
        self.plane().saturating_mul(self.channels)
    }
}

impl fmt::Display for ImageGeometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.rows, self.cols)
    }
}

/// A descriptor for the geometry of a filter or a pooling window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    rows: usize,
    cols: usize,
    stride: usize,
    padding: usize,
}

impl Window {
    pub fn new(rows: usize, cols: usize, stride: usize, padding: usize) -> Window {
        Window {
            rows,
            cols,
            stride,
            padding,
        }
    }
    pub fn square(side: usize, stride: usize) -> Window {
        Window::new(side, side, stride, 0)
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn stride(&self) -> usize {
        self.stride
    }
    pub fn padding(&self) -> usize {
        self.padding
    }
    pub fn num_elems(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    fn extent(&self, input: usize, window: usize) -> Option<usize> {
        if self.stride == 0 || window == 0 {
            return None;
        }
        self.padding
            .checked_mul(2)
            .and_then(|padding| input.checked_add(padding))
            .and_then(|padded| padded.checked_sub(window))
            .map(|span| span / self.stride + 1)
    }

    /// Geometry of the output when the window slides over `input`, or `None` if the window does
    /// not fit.
    pub fn output_of(&self, input: &ImageGeometry, channels: usize) -> Option<ImageGeometry> {
        Some(ImageGeometry::new(
            self.extent(input.rows(), self.rows)?,
            self.extent(input.cols(), self.cols)?,
            channels,
        ))
    }
}
