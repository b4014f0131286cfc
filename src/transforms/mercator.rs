use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use crate::domain::{hull_vertices, total_domain_flags};
use crate::{
    Direction, DomainFlags, Ellipsoid, InverseCache, MathTransform, Matrix, Result,
    TransformError,
};

const LATITUDE_EPSILON: f64 = 1e-14;
const MAX_ITERATIONS: usize = 20;

/// Ellipsoidal Mercator projection (scale factor 1 on the equator),
/// from `(longitude, latitude)` in degrees to `(x, y)` in metres.
///
/// Defined for latitudes strictly between the poles.
/// Longitudes are wrapped into the half-open range of 180 degrees either side of the central meridian.
#[derive(Debug, Clone)]
pub struct Mercator {
    ellipsoid: Ellipsoid,
    central_meridian: f64,
    false_easting: f64,
    false_northing: f64,
    direction: Direction,
    inverse: InverseCache,
}

impl Mercator {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            central_meridian: 0.0,
            false_easting: 0.0,
            false_northing: 0.0,
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        }
    }

    pub fn with_central_meridian(mut self, degrees: f64) -> Result<Self> {
        if !degrees.is_finite() {
            return Err(TransformError::InvalidParameter(
                "Mercator: central meridian must be finite".into(),
            ));
        }
        self.central_meridian = degrees;
        Ok(self)
    }

    pub fn with_false_origin(mut self, easting: f64, northing: f64) -> Result<Self> {
        if !easting.is_finite() || !northing.is_finite() {
            return Err(TransformError::InvalidParameter(
                "Mercator: false origin must be finite".into(),
            ));
        }
        self.false_easting = easting;
        self.false_northing = northing;
        Ok(self)
    }

    /// `((1 - e sin(lat)) / (1 + e sin(lat)))^(e/2)`
    fn eccentricity_term(&self, lat: f64) -> f64 {
        let e = self.ellipsoid.eccentricity();
        let es = e * lat.sin();
        ((1.0 - es) / (1.0 + es)).powf(0.5 * e)
    }

    /// Longitude relative to the central meridian, in [-180, 180).
    fn relative_longitude(&self, lon: f64) -> f64 {
        (lon - self.central_meridian + 180.0).rem_euclid(360.0) - 180.0
    }

    fn project(&self, pt: &[f64], buf: &mut [f64]) {
        let a = self.ellipsoid.semi_major();
        let lat = pt[1].to_radians();
        let dlon = self.relative_longitude(pt[0]).to_radians();
        buf[0] = self.false_easting + a * dlon;
        buf[1] = self.false_northing
            + a * ((FRAC_PI_2 * 0.5 + lat * 0.5).tan() * self.eccentricity_term(lat)).ln();
    }

    fn unproject(&self, pt: &[f64], buf: &mut [f64]) {
        let a = self.ellipsoid.semi_major();
        let t = (-(pt[1] - self.false_northing) / a).exp();
        let mut lat = FRAC_PI_2 - 2.0 * t.atan();
        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let next = FRAC_PI_2 - 2.0 * (t * self.eccentricity_term(lat)).atan();
            let delta = (next - lat).abs();
            lat = next;
            if delta < LATITUDE_EPSILON {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!("Mercator: latitude did not converge for point {pt:?}");
        }
        buf[0] = ((pt[0] - self.false_easting) / a).to_degrees() + self.central_meridian;
        buf[1] = lat.to_degrees();
    }

    /// Diagonal of the forward Jacobian, in metres per degree.
    fn forward_scale(&self, lat_degrees: f64) -> (f64, f64) {
        let a = self.ellipsoid.semi_major();
        let e2 = self.ellipsoid.e2();
        let k = 1f64.to_radians();
        let lat = lat_degrees.to_radians();
        let s = lat.sin();
        (a * k, a * k * (1.0 - e2) / ((1.0 - e2 * s * s) * lat.cos()))
    }

    /// Whether the hull crosses the antimeridian of the central meridian,
    /// where projected longitudes jump.
    fn crosses_antimeridian(&self, vertices: &[&[f64]]) -> bool {
        let seam_index = |v: &&[f64]| ((v[0] - self.central_meridian + 180.0) / 360.0).floor();
        let mut indices = vertices.iter().map(seam_index);
        let Some(first) = indices.next() else {
            return false;
        };
        indices.any(|idx| idx != first)
    }
}

impl Default for Mercator {
    fn default() -> Self {
        Self::new(Ellipsoid::WGS84)
    }
}

impl MathTransform for Mercator {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        match self.direction {
            Direction::Forward => self.project(pt, buf),
            Direction::Inverse => self.unproject(pt, buf),
        }
    }

    fn source_ndim(&self) -> usize {
        2
    }

    fn target_ndim(&self) -> usize {
        2
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            Ok(Arc::new(Self {
                direction: self.direction.flipped(),
                inverse: InverseCache::new(),
                ..self.clone()
            }))
        })
    }

    fn invert(&mut self) -> Result<()> {
        self.direction = self.direction.flipped();
        Ok(())
    }

    fn derivative(&self, pt: &[f64]) -> Result<Matrix> {
        self.check_point(pt)?;
        if !self.contains(pt) {
            return Err(TransformError::PointOutsideDomain);
        }
        let (dx, dy) = match self.direction {
            Direction::Forward => self.forward_scale(pt[1]),
            Direction::Inverse => {
                let mut geographic = [f64::NAN; 2];
                self.unproject(pt, &mut geographic);
                let (dx, dy) = self.forward_scale(geographic[1]);
                (1.0 / dx, 1.0 / dy)
            }
        };
        Ok(Matrix::from_rows([[dx, 0.0], [0.0, dy]]))
    }

    fn contains(&self, pt: &[f64]) -> bool {
        if !pt.iter().all(|p| p.is_finite()) {
            return false;
        }
        match self.direction {
            Direction::Forward => pt[1].abs() < 90.0,
            Direction::Inverse => true,
        }
    }

    /// The valid domain is a band of latitude, which is convex,
    /// so vertices alone decide whether the hull is inside.
    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        if self.direction.is_inverse() {
            return total_domain_flags(self, ordinates);
        }
        let vertices = hull_vertices(ordinates, 2)?;
        if vertices.is_empty() {
            return Ok(DomainFlags::OUTSIDE);
        }
        let mut flags = if vertices.iter().all(|v| self.contains(v)) {
            DomainFlags::INSIDE
        } else if vertices.iter().all(|v| v[1] >= 90.0)
            || vertices.iter().all(|v| v[1] <= -90.0)
        {
            DomainFlags::OUTSIDE
        } else {
            DomainFlags::INSIDE | DomainFlags::OUTSIDE
        };
        if self.crosses_antimeridian(&vertices) {
            flags |= DomainFlags::DISCONTINUOUS;
        }
        Ok(flags)
    }
}
