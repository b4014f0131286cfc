use std::sync::Arc;

use crate::{
    Direction, Ellipsoid, InverseCache, MathTransform, Matrix, Result, TransformError,
};

/// Latitude convergence threshold for the inverse, in radians.
const LATITUDE_EPSILON: f64 = 1e-14;
const MAX_ITERATIONS: usize = 16;

/// Conversion between geographic coordinates `(longitude, latitude, height)`
/// (degrees, degrees, metres) and geocentric cartesian coordinates `(X, Y, Z)` in metres.
///
/// The forward direction is geographic to geocentric.
#[derive(Debug, Clone)]
pub struct Geocentric {
    ellipsoid: Ellipsoid,
    direction: Direction,
    inverse: InverseCache,
}

impl Geocentric {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        }
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    fn geographic_to_geocentric(&self, pt: &[f64], buf: &mut [f64]) {
        let lon = pt[0].to_radians();
        let lat = pt[1].to_radians();
        let h = pt[2];
        let n = self.ellipsoid.prime_vertical_radius(lat);
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        buf[0] = (n + h) * cos_lat * cos_lon;
        buf[1] = (n + h) * cos_lat * sin_lon;
        buf[2] = (n * (1.0 - self.ellipsoid.e2()) + h) * sin_lat;
    }

    /// Bowring's estimate of the latitude, refined by fixed-point iteration.
    fn geocentric_to_geographic(&self, pt: &[f64], buf: &mut [f64]) {
        let (x, y, z) = (pt[0], pt[1], pt[2]);
        let a = self.ellipsoid.semi_major();
        let b = self.ellipsoid.semi_minor();
        let e2 = self.ellipsoid.e2();
        let ep2 = self.ellipsoid.ep2();

        let p = x.hypot(y);
        let theta = (z * a).atan2(p * b);
        let (sin_t, cos_t) = theta.sin_cos();
        let mut lat = (z + ep2 * b * sin_t.powi(3)).atan2(p - e2 * a * cos_t.powi(3));

        let height = |lat: f64| {
            let (s, c) = lat.sin_cos();
            p * c + z * s - a * (1.0 - e2 * s * s).sqrt()
        };

        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let n = self.ellipsoid.prime_vertical_radius(lat);
            let h = height(lat);
            let next = z.atan2(p * (1.0 - e2 * n / (n + h)));
            let delta = (next - lat).abs();
            lat = next;
            if delta < LATITUDE_EPSILON {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!("Geocentric: latitude did not converge for point {pt:?}");
        }

        buf[0] = y.atan2(x).to_degrees();
        buf[1] = lat.to_degrees();
        buf[2] = height(lat);
    }

    /// Jacobian of the geographic to geocentric conversion, per degree of longitude and latitude.
    fn forward_jacobian(&self, geographic: &[f64]) -> Matrix {
        let k = 1f64.to_radians();
        let lon = geographic[0].to_radians();
        let lat = geographic[1].to_radians();
        let h = geographic[2];
        let e2 = self.ellipsoid.e2();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let w2 = 1.0 - e2 * sin_lat * sin_lat;
        let n = self.ellipsoid.semi_major() / w2.sqrt();
        // meridional radius of curvature
        let m = self.ellipsoid.semi_major() * (1.0 - e2) / (w2 * w2.sqrt());
        Matrix::from_rows([
            [
                -(n + h) * cos_lat * sin_lon * k,
                -(m + h) * sin_lat * cos_lon * k,
                cos_lat * cos_lon,
            ],
            [
                (n + h) * cos_lat * cos_lon * k,
                -(m + h) * sin_lat * sin_lon * k,
                cos_lat * sin_lon,
            ],
            [0.0, (m + h) * cos_lat * k, sin_lat],
        ])
    }
}

impl Default for Geocentric {
    fn default() -> Self {
        Self::new(Ellipsoid::WGS84)
    }
}

impl MathTransform for Geocentric {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        match self.direction {
            Direction::Forward => self.geographic_to_geocentric(pt, buf),
            Direction::Inverse => self.geocentric_to_geographic(pt, buf),
        }
    }

    fn source_ndim(&self) -> usize {
        3
    }

    fn target_ndim(&self) -> usize {
        3
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
                ellipsoid: self.ellipsoid,
                direction: self.direction.flipped(),
                inverse: InverseCache::new(),
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
        match self.direction {
            Direction::Forward => Ok(self.forward_jacobian(pt)),
            Direction::Inverse => {
                let mut geographic = [f64::NAN; 3];
                self.geocentric_to_geographic(pt, &mut geographic);
                self.forward_jacobian(&geographic)
                    .try_inverse()
                    .map_err(|_| TransformError::PointOutsideDomain)
            }
        }
    }

    fn check_point(&self, pt: &[f64]) -> Result<()> {
        if pt.len() != 3 {
            return Err(TransformError::UnsupportedPointType {
                expected: 3,
                actual: pt.len(),
            });
        }
        Ok(())
    }

    fn contains(&self, pt: &[f64]) -> bool {
        if !pt.iter().all(|p| p.is_finite()) {
            return false;
        }
        match self.direction {
            Direction::Forward => pt[1].abs() <= 90.0,
            Direction::Inverse => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::Geocentric;
    use crate::tests::{
        check_hull_contains, check_transform_bulk, check_transform_col, coords, init_logger,
    };
    use crate::{MathTransform, Matrix, TransformError};

    fn make_transform() -> Geocentric {
        Geocentric::default()
    }

    fn assert_geographic_eq(a: &[f64], b: &[f64]) {
        assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-9);
        assert_abs_diff_eq!(a[1], b[1], epsilon = 1e-9);
        assert_abs_diff_eq!(a[2], b[2], epsilon = 1e-6);
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
    fn test_round_trip() {
        init_logger();
        let t = make_transform();
        let inv = t.inverse().unwrap();
        for pt in coords(3).iter() {
            let xyz = t.transform(pt).unwrap();
            let back = inv.transform(&xyz).unwrap();
            assert_geographic_eq(pt, &back);
        }
    }

    #[test]
    fn test_known_points() {
        let t = make_transform();
        let equator = t.transform(&[0.0, 0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(equator.as_slice(), [6_378_137.0, 0.0, 0.0].as_slice(), epsilon = 1e-6);

        let pole = t.transform(&[0.0, 90.0, 0.0]).unwrap();
        assert_abs_diff_eq!(pole[2], 6_356_752.314_245, epsilon = 1e-5);

        let mut inv = make_transform();
        inv.invert().unwrap();
        let back = inv.transform(&pole).unwrap();
        assert_abs_diff_eq!(back[1], 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_2d() {
        assert!(matches!(
            make_transform().transform(&[1.0, 2.0]),
            Err(TransformError::UnsupportedPointType { .. })
        ));
    }

    #[test]
    fn test_derivative_round_trip() {
        let t = make_transform();
        let pt = [13.4, 52.5, 34.0];
        let fwd = t.derivative(&pt).unwrap();
        let xyz = t.transform(&pt).unwrap();
        let inv = t.inverse().unwrap().derivative(&xyz).unwrap();
        let product = inv.dot(&fwd).unwrap();
        let eye = Matrix::identity(3);
        for r in 0..3 {
            for c in 0..3 {
                assert_abs_diff_eq!(product[(r, c)], eye[(r, c)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_derivative_outside_domain() {
        let t = make_transform();
        assert_eq!(
            t.derivative(&[0.0, 95.0, 0.0]),
            Err(TransformError::PointOutsideDomain)
        );
        assert!(!t.contains(&[0.0, -90.5, 0.0]));
    }

    #[test]
    fn test_domain_flags() {
        let t = make_transform();
        let inside = [0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 10.0, 10.0, 0.0];
        assert!(t.domain_flags(&inside).unwrap().is_inside());
        let partial = [0.0, 80.0, 0.0, 10.0, 80.0, 0.0, 5.0, 100.0, 0.0];
        assert!(t.domain_flags(&partial).unwrap().is_partial());
    }

    #[test]
    fn test_codomain_hull_contains_bulge() {
        let t = make_transform();
        // the centre of the patch lies further out than any of its edges
        let square = [
            -10.0, -10.0, 0.0, 10.0, -10.0, 0.0, 10.0, 10.0, 0.0, -10.0, 10.0, 0.0,
        ];
        let hull = t.codomain_convex_hull(&square).unwrap();
        let max_x = hull
            .chunks_exact(3)
            .map(|p| p[0])
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(max_x >= 6_378_137.0);
        check_hull_contains(&t, &square);
    }

    #[test]
    fn test_codomain_hull_contains_volume() {
        let slab = [
            5.0, 40.0, 0.0, 25.0, 40.0, 0.0, 25.0, 60.0, 0.0, 5.0, 45.0, 5000.0,
        ];
        check_hull_contains(&make_transform(), &slab);

        let mut inv = make_transform();
        inv.invert().unwrap();
        let xyz = [
            3.5e6, 0.5e6, 4.8e6, 4.0e6, 0.5e6, 4.8e6, 3.5e6, 1.0e6, 4.8e6, 3.5e6, 0.5e6, 5.2e6,
        ];
        check_hull_contains(&inv, &xyz);
    }
}
