//! Concrete transformations.
mod affine;
pub use affine::Affine;
mod axis_select;
pub use axis_select::AxisSelect;
mod datum;
pub use datum::{DatumTransform, Wgs84ConversionInfo};
mod geocentric;
pub use geocentric::Geocentric;
mod identity;
pub use identity::Identity;
mod mercator;
pub use mercator::Mercator;
mod sequence;
pub use sequence::{Sequence, SequenceBuilder};
