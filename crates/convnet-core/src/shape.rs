use crate::error::{TensorError, TensorResult};
use serde::{Deserialize, Serialize};

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    pub fn scalar() -> Self {
        Shape { dims: vec![] }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size of the innermost axis, if any.
    pub fn last(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        if self.dims.is_empty() {
            1 // scalar
        } else {
            self.dims.iter().product()
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Resolve a possibly negative axis (`-1` is the innermost) to an index.
    pub fn resolve_axis(&self, axis: isize) -> Option<usize> {
        let ndim = self.ndim() as isize;
        let resolved = if axis < 0 { ndim + axis } else { axis };
        if resolved < 0 || resolved >= ndim {
            None
        } else {
            Some(resolved as usize)
        }
    }

    /// A new shape with `batch` prepended as the outermost axis.
    pub fn with_batch(&self, batch: usize) -> Shape {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(batch);
        dims.extend_from_slice(&self.dims);
        Shape::new(dims)
    }

    /// The shape without its outermost axis.
    pub fn without_batch(&self) -> Shape {
        Shape::from_slice(self.dims.get(1..).unwrap_or(&[]))
    }

    /// Reorder axes: output axis `i` is input axis `perm[i]`.
    pub fn permuted(&self, perm: &[usize]) -> TensorResult<Shape> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if perm.len() != ndim {
            return Err(TensorError::InvalidPermutation { perm: perm.to_vec(), ndim });
        }
        for &p in perm {
            if p >= ndim || seen[p] {
                return Err(TensorError::InvalidPermutation { perm: perm.to_vec(), ndim });
            }
            seen[p] = true;
        }
        Ok(Shape::new(perm.iter().map(|&p| self.dims[p]).collect()))
    }

    /// Compute row-major (C-order) strides.
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![1usize; self.dims.len()];
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Result shape of broadcasting `a` against `b` (NumPy rules).
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> TensorResult<Shape> {
        let max_ndim = a.ndim().max(b.ndim());
        let mut result = vec![0usize; max_ndim];

        for i in 0..max_ndim {
            let da = if i < a.ndim() { a.dims[a.ndim() - 1 - i] } else { 1 };
            let db = if i < b.ndim() { b.dims[b.ndim() - 1 - i] } else { 1 };

            result[max_ndim - 1 - i] = match (da, db) {
                _ if da == db => da,
                (1, _) => db,
                (_, 1) => da,
                _ => {
                    return Err(TensorError::BroadcastError {
                        a: a.to_vec(),
                        b: b.to_vec(),
                    })
                }
            };
        }

        Ok(Shape::new(result))
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![57, 57, 96]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 57 * 57 * 96);
        assert_eq!(s.last(), Some(96));
        assert_eq!(Shape::scalar().last(), None);
    }

    #[test]
    fn test_resolve_axis() {
        let s = Shape::new(vec![8, 13, 13, 256]);
        assert_eq!(s.resolve_axis(-1), Some(3));
        assert_eq!(s.resolve_axis(1), Some(1));
        assert_eq!(s.resolve_axis(4), None);
        assert_eq!(s.resolve_axis(-5), None);
    }

    #[test]
    fn test_batch_axis() {
        let s = Shape::new(vec![227, 227, 3]);
        let b = s.with_batch(4);
        assert_eq!(b.dims(), &[4, 227, 227, 3]);
        assert_eq!(b.without_batch(), s);
    }

    #[test]
    fn test_permuted() {
        let s = Shape::new(vec![2, 5, 7, 3]);
        assert_eq!(s.permuted(&[0, 3, 1, 2]).unwrap().dims(), &[2, 3, 5, 7]);
        assert!(s.permuted(&[0, 1, 1, 2]).is_err());
        assert!(s.permuted(&[0, 1]).is_err());
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(vec![3, 4, 5]);
        assert_eq!(s.strides(), vec![20, 5, 1]);
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::new(vec![2, 3, 4, 4]);
        let b = Shape::new(vec![1, 3, 1, 1]);
        let c = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 3, 4, 4]);

        let a = Shape::new(vec![3, 4]);
        let b = Shape::new(vec![3, 5]);
        assert!(Shape::broadcast_shape(&a, &b).is_err());
    }

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
    }
}
