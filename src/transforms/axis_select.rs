use std::{collections::BTreeSet, sync::Arc};

use smallvec::ToSmallVec;

use crate::domain::{affine_codomain_hull, total_domain_flags};
use crate::{
    Direction, DomainFlags, InverseCache, MathTransform, Matrix, Result, ShortVec, TransformError,
};

/// Select (and reorder) axes of the input point.
///
/// For an input point `p` and axis vector `m`,
/// index `i` in the output point is given by `p[m[i]]`.
/// Dropping axes projects onto a lower-dimensional space, which is not invertible.
#[derive(Debug, Clone)]
pub struct AxisSelect {
    axes: ShortVec<usize>,
    source_ndim: usize,
    direction: Direction,
    inverse: InverseCache,
}

impl AxisSelect {
    pub fn try_new(axes: &[usize], source_ndim: usize) -> Result<Self> {
        let visited: BTreeSet<_> = axes.iter().collect();
        if visited.len() != axes.len() {
            return Err(TransformError::InvalidParameter(
                "AxisSelect: the same input axis is selected more than once".into(),
            ));
        }
        if let Some(mx) = visited.last() {
            if **mx >= source_ndim {
                return Err(TransformError::DimensionMismatch {
                    expected: source_ndim,
                    actual: **mx + 1,
                });
            }
        }
        Ok(Self {
            axes: axes.to_smallvec(),
            source_ndim,
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        })
    }

    /// Reorder all axes.
    pub fn permutation(axes: &[usize]) -> Result<Self> {
        Self::try_new(axes, axes.len())
    }

    pub fn is_permutation(&self) -> bool {
        self.axes.len() == self.source_ndim
    }

    fn inverse_axes(&self) -> Result<ShortVec<usize>> {
        if !self.is_permutation() {
            return Err(TransformError::NonInvertible(format!(
                "AxisSelect: {} of {} axes are dropped",
                self.source_ndim - self.axes.len(),
                self.source_ndim
            )));
        }
        let mut inv_axes = smallvec::smallvec![0; self.axes.len()];
        for (out_idx, in_idx) in self.axes.iter().enumerate() {
            inv_axes[*in_idx] = out_idx;
        }
        Ok(inv_axes)
    }
}

impl MathTransform for AxisSelect {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        for (o, m) in buf.iter_mut().zip(self.axes.iter()) {
            *o = pt[*m]
        }
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        for (idx, buf_col) in self.axes.iter().zip(bufs.iter_mut()) {
            buf_col.copy_from_slice(columns[*idx]);
        }
    }

    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            Ok(Arc::new(Self {
                axes: self.inverse_axes()?,
                source_ndim: self.source_ndim,
                direction: self.direction.flipped(),
                inverse: InverseCache::new(),
            }))
        })
    }

    fn invert(&mut self) -> Result<()> {
        self.axes = self.inverse_axes()?;
        self.direction = self.direction.flipped();
        Ok(())
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn source_ndim(&self) -> usize {
        self.source_ndim
    }

    fn target_ndim(&self) -> usize {
        self.axes.len()
    }

    fn is_identity(&self) -> bool {
        self.is_permutation() && self.axes.iter().enumerate().all(|(a, b)| a == *b)
    }

    fn derivative(&self, pt: &[f64]) -> Result<Matrix> {
        self.check_point(pt)?;
        let mut data = vec![0.0; self.axes.len() * self.source_ndim];
        for (row, col) in self.axes.iter().enumerate() {
            data[row * self.source_ndim + col] = 1.0;
        }
        Matrix::try_new(data, self.source_ndim)
    }

    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        total_domain_flags(self, ordinates)
    }

    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        affine_codomain_hull(self, ordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::AxisSelect;
    use crate::tests::{
        check_inverse_transform_bulk, check_inverse_transform_col, check_inverse_transform_coord,
        check_transform_bulk, check_transform_col,
    };
    use crate::{MathTransform, TransformError};

    fn make_transform() -> AxisSelect {
        AxisSelect::permutation(&[2, 0, 1]).unwrap()
    }

    #[test]
    fn test_bulk() {
        check_transform_bulk(make_transform());
    }

    #[test]
    fn test_columns() {
        check_transform_col(make_transform());
    }

    #[test]
    fn test_inverse() {
        check_inverse_transform_coord(make_transform());
    }

    #[test]
    fn test_inverse_bulk() {
        check_inverse_transform_bulk(make_transform());
    }

    #[test]
    fn test_inverse_columns() {
        check_inverse_transform_col(make_transform());
    }

    #[test]
    fn test_projection() {
        let mut t = AxisSelect::try_new(&[0, 1], 3).unwrap();
        assert_eq!(t.target_ndim(), 2);
        assert_eq!(t.transform(&[1.0, 2.0, 3.0]).unwrap().as_slice(), &[1.0, 2.0]);
        assert!(matches!(t.inverse(), Err(TransformError::NonInvertible(_))));
        assert!(t.invert().is_err());
        check_transform_col(t);
    }

    #[test]
    fn test_invalid_axes() {
        assert!(AxisSelect::try_new(&[0, 0], 3).is_err());
        assert!(AxisSelect::try_new(&[0, 3], 3).is_err());
    }

    #[test]
    fn test_derivative() {
        let t = AxisSelect::try_new(&[2, 0], 3).unwrap();
        let d = t.derivative(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(d[(0, 2)], 1.0);
        assert_eq!(d[(1, 0)], 1.0);
        assert_eq!(d[(0, 0)], 0.0);
    }
}
