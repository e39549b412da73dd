use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// N-dimensional tensor: activations, kernels and normalization statistics.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ONE)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    /// Create a scalar tensor (0-d).
    pub fn scalar(value: T) -> Self {
        Tensor {
            data: vec![value],
            shape: Shape::scalar(),
        }
    }

    /// Create a 1-D tensor from a slice.
    pub fn from_slice(data: &[T]) -> Self {
        Tensor {
            data: data.to_vec(),
            shape: Shape::new(vec![data.len()]),
        }
    }

    /// Uniform samples in `[low, high)` drawn from the caller's generator.
    pub fn random_uniform<R: Rng + ?Sized>(shape: Vec<usize>, low: f64, high: f64, rng: &mut R) -> Self {
        let s = Shape::new(shape);
        let data: Vec<T> = (0..s.numel())
            .map(|_| T::from_f64(low + (high - low) * rng.gen::<f64>()))
            .collect();
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Reshape the tensor (data remains the same, only shape changes).
    pub fn reshape(&self, new_shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        let ns = Shape::new(new_shape);
        if self.numel() != ns.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: ns.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: ns,
        })
    }

    /// Reorder axes, copying data into the new layout.
    ///
    /// Output axis `i` is input axis `perm[i]`; `[0, 3, 1, 2]` turns NHWC into NCHW.
    pub fn permute(&self, perm: &[usize]) -> TensorResult<Tensor<T>> {
        let out_shape = self.shape.permuted(perm)?;
        let in_strides = self.shape.strides();
        let out_dims = out_shape.dims();
        let ndim = out_dims.len();

        let mut data = Vec::with_capacity(self.numel());
        let mut index = vec![0usize; ndim];
        for _ in 0..self.numel() {
            let src: usize = index
                .iter()
                .zip(perm)
                .map(|(&i, &p)| i * in_strides[p])
                .sum();
            data.push(self.data[src]);

            // Advance the odometer over the output index.
            for d in (0..ndim).rev() {
                index[d] += 1;
                if index[d] < out_dims[d] {
                    break;
                }
                index[d] = 0;
            }
        }

        Ok(Tensor { data, shape: out_shape })
    }

    // ─── Activations ────────────────────────────────────────────────────────

    fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn tanh_elem(&self) -> Tensor<T> { self.apply(T::tanh) }

    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    pub fn sigmoid(&self) -> Tensor<T> {
        self.apply(|x| T::ONE / (T::ONE + (-x).exp()))
    }

    // ─── Broadcasting Addition ──────────────────────────────────────────────

    /// Element-wise sum; `other` broadcasts against `self` (bias rows onto activations).
    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if self.shape == other.shape {
            let data: Vec<T> = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| a + b)
                .collect();
            return Ok(Tensor {
                data,
                shape: self.shape.clone(),
            });
        }

        let out_shape = Shape::broadcast_shape(&self.shape, &other.shape)?;
        let out_strides = out_shape.strides();
        let a_strides = self.shape.strides();
        let b_strides = other.shape.strides();
        let a_dims = self.shape.dims();
        let b_dims = other.shape.dims();
        let ndim = out_shape.ndim();
        let a_lead = ndim - a_dims.len();
        let b_lead = ndim - b_dims.len();

        let mut data = Vec::with_capacity(out_shape.numel());
        for flat_idx in 0..out_shape.numel() {
            let mut remaining = flat_idx;
            let mut a_offset = 0usize;
            let mut b_offset = 0usize;

            for d in 0..ndim {
                let idx = remaining / out_strides[d];
                remaining %= out_strides[d];

                if d >= a_lead && a_dims[d - a_lead] > 1 {
                    a_offset += idx * a_strides[d - a_lead];
                }
                if d >= b_lead && b_dims[d - b_lead] > 1 {
                    b_offset += idx * b_strides[d - b_lead];
                }
            }

            data.push(self.data[a_offset] + other.data[b_offset]);
        }

        Ok(Tensor {
            data,
            shape: out_shape,
        })
    }

    // ─── Penalties ──────────────────────────────────────────────────────────

    /// Σx², the squared Frobenius norm.
    pub fn sum_squares(&self) -> T {
        self.data.iter().map(|&x| x * x).sum()
    }

    /// Σ|x|.
    pub fn sum_abs(&self) -> T {
        self.data.iter().map(|&x| x.abs()).sum()
    }

    // ─── Linear Algebra ─────────────────────────────────────────────────────

    /// 2-D matrix multiply.
    pub fn matmul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(TensorError::InvalidOperation(
                "matmul requires two 2-D tensors".to_string(),
            ));
        }

        let (m, k) = (self.shape.dims()[0], self.shape.dims()[1]);
        let (k2, n) = (other.shape.dims()[0], other.shape.dims()[1]);
        if k != k2 {
            return Err(TensorError::DimensionMismatch(format!(
                "matmul: inner dimensions must match, got {} and {}",
                k, k2
            )));
        }

        let mut data = vec![T::ZERO; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                let row = &other.data[p * n..(p + 1) * n];
                for (out, &b) in data[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *out += a * b;
                }
            }
        }
        Tensor::new(data, vec![m, n])
    }

    // ─── Softmax ────────────────────────────────────────────────────────────

    /// Softmax along the last axis.
    pub fn softmax(&self) -> TensorResult<Tensor<T>> {
        let axis_size = match self.shape.last() {
            Some(0) => return Err(TensorError::EmptyTensor),
            Some(n) => n,
            None => return Ok(Tensor::scalar(T::ONE)),
        };

        let mut data = self.data.clone();
        for row in data.chunks_mut(axis_size) {
            // Numerical stability: subtract max
            let max_val = row.iter().copied().reduce(T::max).unwrap_or(T::ZERO);
            let mut sum = T::ZERO;
            for v in row.iter_mut() {
                *v = (*v - max_val).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v = *v / sum;
            }
        }

        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}
