//! Composable, invertible coordinate transformations between coordinate reference systems,
//! including 7-parameter (Bursa-Wolf) geodetic datum shifts.
use smallvec::SmallVec;

pub mod transforms;
pub use transforms::{
    AxisSelect, DatumTransform, Geocentric, Identity, Mercator, Sequence, SequenceBuilder,
    Wgs84ConversionInfo,
};

mod error;
pub use error::{Result, TransformError};

mod traits;
pub use traits::{Direction, MathTransform};

mod inverse;
pub use inverse::InverseCache;

mod domain;
pub use domain::{DomainFlags, HULL_EDGE_SAMPLES};

mod ellipsoid;
pub use ellipsoid::Ellipsoid;

mod graph;
pub use graph::{CrsGraph, Edge};

mod matrix;
pub use matrix::{Matrix, MatrixBuilder};

pub use transforms::Affine;

pub const COORD_SIZE: usize = 6;

/// A short vector type alias for convenience,
/// used for single points and other per-dimension values.
pub type ShortVec<T> = SmallVec<[T; COORD_SIZE]>;

/// Convenience function for turning a slice of sliceables into a vec of slices.
/// Allocates a new vec.
pub(crate) fn as_refs<T, Inner: AsRef<[T]>>(input: &[Inner]) -> Vec<&[T]> {
    input.iter().map(|v| v.as_ref()).collect()
}

/// Convenience function for turning a mut slice of sliceables into a vec of mut slices.
/// Allocates a new vec.
pub(crate) fn as_muts<T, Inner: AsMut<[T]>>(input: &mut [Inner]) -> Vec<&mut [T]> {
    input.iter_mut().map(|v| v.as_mut()).collect()
}

pub(crate) fn vec_of_vec<T: Copy>(outer_len: usize, inner_len: usize, val: T) -> Vec<Vec<T>> {
    vec![vec![val; inner_len]; outer_len]
}
