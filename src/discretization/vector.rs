//! Rank-owned blocks of distributed vectors.

use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::dispatch_error::DispatchError;

/// The rows `offset..offset + values.len()` of a global vector of length `dim_global`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalVector {
    offset: usize,
    dim_global: usize,
    values: Vec<f64>,
}

impl LocalVector {
    pub fn new(offset: usize, dim_global: usize, values: Vec<f64>) -> Result<Self, DispatchError> {
        if offset + values.len() > dim_global {
            return Err(DispatchError::InvalidArgument(format!(
                "block {offset}..{} exceeds global dimension {dim_global}",
                offset + values.len()
            )));
        }
        Ok(Self {
            offset,
            dim_global,
            values,
        })
    }

    pub fn zeros(offset: usize, len: usize, dim_global: usize) -> Self {
        Self {
            offset,
            dim_global,
            values: vec![0.0; len],
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dim_global(&self) -> usize {
        self.dim_global
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    fn check_layout(&self, other: &LocalVector) -> Result<(), DispatchError> {
        if self.offset != other.offset
            || self.values.len() != other.values.len()
            || self.dim_global != other.dim_global
        {
            return Err(DispatchError::InvalidArgument(format!(
                "vector layouts differ: {}+{}/{} vs {}+{}/{}",
                self.offset,
                self.len(),
                self.dim_global,
                other.offset,
                other.len(),
                other.dim_global
            )));
        }
        Ok(())
    }

    /// Sum over the owned rows; the rank-local part of a global dot product.
    ///
    /// Always sequential so that the result does not depend on thread scheduling.
    pub fn dot_local(&self, other: &LocalVector) -> Result<f64, DispatchError> {
        self.check_layout(other)?;
        Ok(self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum())
    }

    pub fn sup_local(&self) -> f64 {
        self.values.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &LocalVector) -> Result<(), DispatchError> {
        self.check_layout(x)?;
        #[cfg(feature = "rayon")]
        self.values
            .par_iter_mut()
            .zip(x.values.par_iter())
            .for_each(|(y, xi)| *y += alpha * xi);
        #[cfg(not(feature = "rayon"))]
        self.values
            .iter_mut()
            .zip(&x.values)
            .for_each(|(y, xi)| *y += alpha * xi);
        Ok(())
    }

    /// `self *= alpha`
    pub fn scal(&mut self, alpha: f64) {
        #[cfg(feature = "rayon")]
        self.values.par_iter_mut().for_each(|y| *y *= alpha);
        #[cfg(not(feature = "rayon"))]
        self.values.iter_mut().for_each(|y| *y *= alpha);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blocks_past_the_end() {
        assert!(LocalVector::new(3, 4, vec![1.0, 2.0]).is_err());
        assert!(LocalVector::new(2, 4, vec![1.0, 2.0]).is_ok());
    }

    #[test]
    fn elementwise_ops() {
        let mut y = LocalVector::new(1, 5, vec![1.0, 2.0, 3.0]).unwrap();
        let x = LocalVector::new(1, 5, vec![1.0, 1.0, 1.0]).unwrap();
        y.axpy(2.0, &x).unwrap();
        assert_eq!(y.values(), &[3.0, 4.0, 5.0]);
        y.scal(-1.0);
        assert_eq!(y.sup_local(), 5.0);
        assert_eq!(y.dot_local(&x).unwrap(), -12.0);
    }

    #[test]
    fn mismatched_layouts_are_rejected() {
        let a = LocalVector::zeros(0, 2, 4);
        let mut b = LocalVector::zeros(2, 2, 4);
        assert!(a.dot_local(&b).is_err());
        assert!(b.axpy(1.0, &a).is_err());
    }
}
