use std::sync::Arc;

use crate::domain::{sampled_codomain_hull, sampled_domain_flags};
use crate::error::check_ndim;
use crate::{DomainFlags, Matrix, Result, ShortVec, TransformError, vec_of_vec};

/// Which way a transform currently maps points.
///
/// Flipped in place by [MathTransform::invert].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Forward,
    Inverse,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Inverse,
            Direction::Inverse => Direction::Forward,
        }
    }

    pub fn is_inverse(self) -> bool {
        self == Direction::Inverse
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Inverse => 1,
        }
    }
}

/// Core spatial transformation interface.
///
/// The `*_into` methods are the hot path: they do not perform any bounds checks on the input,
/// as these transformations generally happen in performance-critical loops,
/// and may panic if coordinates or output buffers of incorrect length are given.
/// The allocating methods ([MathTransform::transform], [MathTransform::transform_list],
/// [MathTransform::transform_columns]) validate their input first and never return partial results.
///
/// # Thread safety
///
/// Implementors are `Send + Sync` and all `&self` methods may be called concurrently.
/// [MathTransform::invert] takes `&mut self`, so a transform shared behind an [Arc]
/// cannot be flipped in place; callers needing the opposite direction on a shared
/// instance should use [MathTransform::inverse], which returns a separate, memoized object.
pub trait MathTransform: std::fmt::Debug + Send + Sync {
    /// Transform a single point from the source space to the target space.
    /// Writes to a pre-allocated output buffer.
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]);

    /// Transform multiple points from the source space into the target space.
    /// Writes to pre-allocated output buffers.
    ///
    /// The trait default implementation simply calls [MathTransform::transform_into] in turn;
    /// specific transforms may override it.
    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]]) {
        for (pt, buf) in pts.iter().zip(bufs.iter_mut()) {
            self.transform_into(pt, buf);
        }
    }

    /// Transform multiple points given in columnar format.
    /// Writes to pre-allocated output buffers.
    ///
    /// The trait implementation is inefficient,
    /// simply wrapping [MathTransform::transform_into],
    /// and should be overridden by implementors where optimisations are available.
    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        let Some(n_pts) = columns.first().map(|c| c.len()) else {
            return;
        };
        let mut in_pt = vec![f64::NAN; self.source_ndim()];
        let mut out_pt = vec![f64::NAN; self.target_ndim()];
        for pt_idx in 0..n_pts {
            for (idx, col) in columns.iter().enumerate() {
                in_pt[idx] = col[pt_idx];
            }
            self.transform_into(&in_pt, &mut out_pt);
            for (out_col, p) in bufs.iter_mut().zip(out_pt.iter()) {
                out_col[pt_idx] = *p;
            }
        }
    }

    fn source_ndim(&self) -> usize;

    fn target_ndim(&self) -> usize;

    /// Whether this transformation represents the identity,
    /// i.e. source and target are the same number of dimensions
    /// and the coordinate values are not changed.
    /// This allows some downstream optimisations.
    ///
    /// `true` means it definitely is an identity.
    /// For certain transformations, checking for identity may be very expensive;
    /// these should return `false` and users should be aware that a `false` value is not definitive.
    fn is_identity(&self) -> bool;

    /// The direction this instance currently maps in.
    fn direction(&self) -> Direction;

    /// Return a transform mapping in the opposite direction,
    /// sharing this transform's parameters.
    ///
    /// The inverse is built on first access and memoized;
    /// later calls (in the same direction) return the same [Arc].
    fn inverse(&self) -> Result<Arc<dyn MathTransform>>;

    /// Flip the direction of this instance in place.
    ///
    /// Unlike [MathTransform::inverse], this mutates `self`.
    /// On error, the transform is left unchanged.
    fn invert(&mut self) -> Result<()>;

    /// The Jacobian of the transform at the given point,
    /// with [MathTransform::target_ndim] rows and [MathTransform::source_ndim] columns.
    fn derivative(&self, pt: &[f64]) -> Result<Matrix>;

    /// Check that a point can be given to this transform.
    fn check_point(&self, pt: &[f64]) -> Result<()> {
        check_ndim(self.source_ndim(), pt.len())
    }

    /// Whether the point lies within the valid domain of the transform.
    fn contains(&self, pt: &[f64]) -> bool {
        pt.iter().all(|p| p.is_finite())
    }

    /// Transform a single point into a newly-allocated buffer.
    fn transform(&self, pt: &[f64]) -> Result<ShortVec<f64>> {
        self.check_point(pt)?;
        let mut out = smallvec::smallvec![f64::NAN; self.target_ndim()];
        self.transform_into(pt, &mut out);
        Ok(out)
    }

    /// Transform each point in order into newly-allocated buffers.
    ///
    /// Every point is validated before any is transformed,
    /// so the whole batch fails on the first invalid point.
    fn transform_list(&self, pts: &[&[f64]]) -> Result<Vec<ShortVec<f64>>> {
        for pt in pts.iter() {
            self.check_point(pt)?;
        }
        let mut out: Vec<ShortVec<f64>> =
            vec![smallvec::smallvec![f64::NAN; self.target_ndim()]; pts.len()];
        let mut out_refs: Vec<&mut [f64]> = out.iter_mut().map(|b| b.as_mut_slice()).collect();
        self.bulk_transform_into(pts, &mut out_refs);
        Ok(out)
    }

    /// Transform points given as one column per dimension into newly-allocated columns.
    fn transform_columns(&self, columns: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        check_ndim(self.source_ndim(), columns.len())?;
        let n_pts = columns.first().map(|c| c.len()).unwrap_or(0);
        for col in columns.iter() {
            if col.len() != n_pts {
                return Err(TransformError::InvalidParameter(format!(
                    "columns have inconsistent lengths {} and {}",
                    n_pts,
                    col.len()
                )));
            }
        }
        let mut out = vec_of_vec(self.target_ndim(), n_pts, f64::NAN);
        if n_pts > 0 {
            let mut out_refs: Vec<&mut [f64]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
            self.column_transform_into(columns, &mut out_refs);
        }
        Ok(out)
    }

    /// Classify how much of the convex hull described by `ordinates`
    /// (point-major, [MathTransform::source_ndim] values per point)
    /// lies within the valid domain of the transform.
    ///
    /// The default implementation tests a grid of points covering the hull;
    /// see [crate::HULL_EDGE_SAMPLES].
    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        sampled_domain_flags(self, ordinates)
    }

    /// Ordinates describing a convex hull in the target space which contains
    /// the image of the intersection of the source hull and the valid domain.
    ///
    /// The returned hull may have a different number of points to the input.
    /// The default implementation returns a box around the images of a grid covering the hull,
    /// widened by the curvature measured between grid points.
    /// Where the image is unbounded (e.g. towards a pole of a Mercator projection)
    /// the box extends to the images of points located just inside the domain boundary.
    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        sampled_codomain_hull(self, ordinates)
    }

    /// Well-known text representation; serialization is handled elsewhere.
    fn wkt(&self) -> Result<String> {
        Err(TransformError::NotSupported("WKT serialization"))
    }

    /// XML representation; serialization is handled elsewhere.
    fn xml(&self) -> Result<String> {
        Err(TransformError::NotSupported("XML serialization"))
    }
}
