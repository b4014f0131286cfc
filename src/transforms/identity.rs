use std::sync::Arc;

use crate::domain::{affine_codomain_hull, total_domain_flags};
use crate::{Direction, DomainFlags, InverseCache, MathTransform, Matrix, Result};

/// A no-op transform which returns the input point as the output point.
///
/// Defined for one dimensionality.
#[derive(Debug, Default, Clone)]
pub struct Identity {
    ndim: usize,
    direction: Direction,
    inverse: InverseCache,
}

impl Identity {
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        }
    }
}

impl MathTransform for Identity {
    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            Ok(Arc::new(Self {
                ndim: self.ndim,
                direction: self.direction.flipped(),
                inverse: InverseCache::new(),
            }))
        })
    }

    fn invert(&mut self) -> Result<()> {
        self.direction = self.direction.flipped();
        Ok(())
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn source_ndim(&self) -> usize {
        self.ndim
    }

    fn target_ndim(&self) -> usize {
        self.ndim
    }

    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        buf.copy_from_slice(pt);
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        for (c, b) in columns.iter().zip(bufs.iter_mut()) {
            b.copy_from_slice(c);
        }
    }

    fn is_identity(&self) -> bool {
        true
    }

    fn derivative(&self, pt: &[f64]) -> Result<Matrix> {
        self.check_point(pt)?;
        Ok(Matrix::identity(self.ndim))
    }

    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        total_domain_flags(self, ordinates)
    }

    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        affine_codomain_hull(self, ordinates)
    }
}
