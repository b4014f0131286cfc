use std::sync::Arc;

use smallvec::ToSmallVec;

use crate::domain::{affine_codomain_hull, total_domain_flags};
use crate::{
    Direction, DomainFlags, InverseCache, MathTransform, Matrix, Result, ShortVec, TransformError,
};

#[derive(Debug, Clone)]
struct AffineParts {
    /// For a transform from N to M dimensions,
    /// this has M rows and N columns
    unaugmented: Matrix,
    translation: ShortVec<f64>,
}

impl AffineParts {
    /// `x = A^-1 y - A^-1 b`
    fn try_inverse(&self) -> Result<Self> {
        let unaugmented = self.unaugmented.try_inverse()?;
        let translation = unaugmented
            .matmul(&self.translation)
            .iter()
            .map(|t| -t)
            .collect();
        Ok(Self {
            unaugmented,
            translation,
        })
    }
}

/// An affine transform `y = A x + b`.
///
/// The inverse is computed when the transform is built,
/// if the linear part is square and non-singular.
#[derive(Debug, Clone)]
pub struct Affine {
    /// Parts for the current direction.
    active: AffineParts,
    /// Parts for the opposite direction, if invertible.
    reverse: Option<AffineParts>,
    direction: Direction,
    inverse: InverseCache,
}

impl Affine {
    pub fn try_new(unaugmented: Matrix, translation: &[f64]) -> Result<Self> {
        if unaugmented.nrows() != translation.len() {
            return Err(TransformError::DimensionMismatch {
                expected: unaugmented.nrows(),
                actual: translation.len(),
            });
        }
        if translation.iter().any(|t| !t.is_finite()) {
            return Err(TransformError::InvalidParameter(
                "Affine: translation must be finite".into(),
            ));
        }
        let active = AffineParts {
            unaugmented,
            translation: translation.to_smallvec(),
        };
        let reverse = match active.try_inverse() {
            Ok(parts) => Some(parts),
            Err(e) => {
                log::debug!("Affine transform has no inverse: {e}");
                None
            }
        };
        Ok(Self {
            active,
            reverse,
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        })
    }

    /// Create an Affine transform from an augmented matrix,
    /// i.e. which includes the translation as the last column
    /// and a bottom row of [0, 0, ..., 1].
    pub fn try_from_augmented(augmented: &Matrix) -> Result<Self> {
        if augmented.nrows() < 2 || augmented.ncols() < 2 {
            return Err(TransformError::InvalidParameter(
                "Affine: augmented matrix must be at least 2x2".into(),
            ));
        }
        Self::split_translated(augmented, augmented.nrows() - 1)
    }

    /// Create an Affine transform from a matrix which includes the translation as the last column,
    /// but does not have the augmented matrix's bottom row of [0, 0, ..., 1].
    pub fn try_from_translated(augmented: &Matrix) -> Result<Self> {
        if augmented.ncols() < 2 {
            return Err(TransformError::InvalidParameter(
                "Affine: translated matrix must have at least 2 columns".into(),
            ));
        }
        Self::split_translated(augmented, augmented.nrows())
    }

    fn split_translated(augmented: &Matrix, nrows: usize) -> Result<Self> {
        let ncols = augmented.ncols() - 1;

        let mut unaugmented_data = Vec::with_capacity(nrows * ncols);
        let mut translation = ShortVec::with_capacity(nrows);

        for r in 0..nrows {
            for c in 0..ncols {
                unaugmented_data.push(augmented[(r, c)]);
            }
            translation.push(augmented[(r, ncols)]);
        }

        Self::try_new(Matrix::try_new(unaugmented_data, ncols)?, &translation)
    }

    pub fn is_invertible(&self) -> bool {
        self.reverse.is_some()
    }

    fn non_invertible() -> TransformError {
        TransformError::NonInvertible("Affine: linear part is not square and non-singular".into())
    }
}

impl MathTransform for Affine {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        self.active.unaugmented.matmul_into(pt, buf);
        for (o, t) in buf.iter_mut().zip(self.active.translation.iter()) {
            *o += t;
        }
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        self.active.unaugmented.matmul_transposed_into(columns, bufs);
        for (col, t) in bufs.iter_mut().zip(self.active.translation.iter()) {
            for c in col.iter_mut() {
                *c += t;
            }
        }
    }

    fn source_ndim(&self) -> usize {
        self.active.unaugmented.ncols()
    }

    fn target_ndim(&self) -> usize {
        self.active.unaugmented.nrows()
    }

    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            let reverse = self.reverse.clone().ok_or_else(Self::non_invertible)?;
            Ok(Arc::new(Self {
                active: reverse,
                reverse: Some(self.active.clone()),
                direction: self.direction.flipped(),
                inverse: InverseCache::new(),
            }))
        })
    }

    fn invert(&mut self) -> Result<()> {
        let Some(reverse) = self.reverse.as_mut() else {
            return Err(Self::non_invertible());
        };
        std::mem::swap(&mut self.active, reverse);
        self.direction = self.direction.flipped();
        Ok(())
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn is_identity(&self) -> bool {
        if self.active.translation.iter().any(|t| *t != 0.0) {
            return false;
        }
        self.active.unaugmented.is_identity()
    }

    fn derivative(&self, pt: &[f64]) -> Result<Matrix> {
        self.check_point(pt)?;
        Ok(self.active.unaugmented.clone())
    }

    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        total_domain_flags(self, ordinates)
    }

    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        affine_codomain_hull(self, ordinates)
    }
}
