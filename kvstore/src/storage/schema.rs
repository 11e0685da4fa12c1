use serde::{Deserialize, Serialize};

/// The element type of an entry's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    F32,
    F64,
}

impl Dtype {
    /// The size in bytes of a single element.
    pub fn size(self) -> usize {
        match self {
            Dtype::F32 => size_of::<f32>(),
            Dtype::F64 => size_of::<f64>(),
        }
    }
}

/// The shape and element type of an entry, fixed at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Row ids must be below this bound.
    pub rows: u64,
    /// The length of every row.
    pub cols: usize,
    pub dtype: Dtype,
}

impl Schema {
    pub fn new(rows: u64, cols: usize, dtype: Dtype) -> Self {
        Self { rows, cols, dtype }
    }
}

/// The values of a `Tensor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn dtype(&self) -> Dtype {
        match self {
            TensorData::F32(_) => Dtype::F32,
            TensorData::F64(_) => Dtype::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(data) => data.len(),
            TensorData::F64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw bytes of the values, in native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TensorData::F32(data) => bytemuck::cast_slice(data),
            TensorData::F64(data) => bytemuck::cast_slice(data),
        }
    }

    /// Reads `bytes` as values of `dtype`, the buffer needs no particular alignment.
    ///
    /// # Returns
    /// `None` if the length of `bytes` isn't a multiple of the element size.
    pub fn from_bytes(dtype: Dtype, bytes: &[u8]) -> Option<Self> {
        if bytes.len() % dtype.size() != 0 {
            return None;
        }

        let data = match dtype {
            Dtype::F32 => TensorData::F32(read_unaligned(bytes)),
            Dtype::F64 => TensorData::F64(read_unaligned(bytes)),
        };

        Some(data)
    }
}

/// Copies `bytes` into a vector of `T`, ignoring a trailing partial element.
pub(crate) fn read_unaligned<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// A dense row major matrix, the unit of data pulled from and pushed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: TensorData,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `rows` - The amount of rows.
    /// * `cols` - The length of every row.
    /// * `data` - The values in row major order.
    ///
    /// # Returns
    /// `None` if `data` doesn't hold exactly `rows * cols` values.
    pub fn new(rows: usize, cols: usize, data: TensorData) -> Option<Self> {
        (rows.checked_mul(cols)? == data.len()).then_some(Self { rows, cols, data })
    }

    /// Creates an `f32` tensor, panics if `data` isn't `rows * cols` long.
    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * cols, "tensor data doesn't match its shape");
        Self {
            rows,
            cols,
            data: TensorData::F32(data),
        }
    }

    /// Creates an `f64` tensor, panics if `data` isn't `rows * cols` long.
    pub fn from_f64(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "tensor data doesn't match its shape");
        Self {
            rows,
            cols,
            data: TensorData::F64(data),
        }
    }

    /// Casts row major `f64` values into a tensor of `dtype`.
    pub(crate) fn cast(rows: usize, cols: usize, dtype: Dtype, values: Vec<f64>) -> Self {
        let data = match dtype {
            Dtype::F32 => TensorData::F32(values.into_iter().map(|v| v as f32).collect()),
            Dtype::F64 => TensorData::F64(values),
        };

        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(data) => Some(data),
            TensorData::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::F64(data) => Some(data),
            TensorData::F32(_) => None,
        }
    }

    /// Returns the `i`th row widened to `f64`.
    pub fn row_f64(&self, i: usize) -> Vec<f64> {
        let range = i * self.cols..(i + 1) * self.cols;

        match &self.data {
            TensorData::F32(data) => data[range].iter().map(|&v| v as f64).collect(),
            TensorData::F64(data) => data[range].to_vec(),
        }
    }

    /// Returns every value widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match &self.data {
            TensorData::F32(data) => data.iter().map(|&v| v as f64).collect(),
            TensorData::F64(data) => data.clone(),
        }
    }

    /// The schema of an entry that holds exactly this tensor.
    pub fn schema(&self) -> Schema {
        Schema::new(self.rows as u64, self.cols, self.dtype())
    }
}
