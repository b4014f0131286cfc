use std::sync::Arc;

use crate::domain::{affine_codomain_hull, total_domain_flags};
use crate::{
    Direction, DomainFlags, InverseCache, MathTransform, Matrix, Result, TransformError,
};

/// Radians per arc-second.
pub const ARC_SECONDS_TO_RADIANS: f64 = 4.848_136_811_095_359_935_899_141e-6;

/// Scale factor per part-per-million.
const PPM: f64 = 1e-6;

/// Bursa-Wolf parameters for shifting a geocentric datum onto WGS84.
///
/// Translations are in metres, rotations in arc-seconds and the scale correction in parts per million.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wgs84ConversionInfo {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub ex: f64,
    pub ey: f64,
    pub ez: f64,
    pub ppm: f64,
    /// Free-text description of where these parameters are valid.
    pub area_of_use: Option<String>,
}

impl Wgs84ConversionInfo {
    pub fn new(dx: f64, dy: f64, dz: f64, ex: f64, ey: f64, ez: f64, ppm: f64) -> Self {
        Self {
            dx,
            dy,
            dz,
            ex,
            ey,
            ez,
            ppm,
            area_of_use: None,
        }
    }

    /// A 3-parameter (translation only) shift.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(dx, dy, dz, 0.0, 0.0, 0.0, 0.0)
    }

    pub fn with_area_of_use(mut self, area: impl Into<String>) -> Self {
        self.area_of_use = Some(area.into());
        self
    }

    /// Whether these parameters describe no shift at all.
    pub fn has_zero_values_only(&self) -> bool {
        [self.dx, self.dy, self.dz, self.ex, self.ey, self.ez, self.ppm]
            .iter()
            .all(|p| *p == 0.0)
    }

    /// Coefficients `[scale, rx, ry, rz, tx, ty, tz]` (rotations in radians)
    /// as used by [DatumTransform].
    pub fn affine_coefficients(&self) -> [f64; 7] {
        [
            1.0 + self.ppm * PPM,
            self.ex * ARC_SECONDS_TO_RADIANS,
            self.ey * ARC_SECONDS_TO_RADIANS,
            self.ez * ARC_SECONDS_TO_RADIANS,
            self.dx,
            self.dy,
            self.dz,
        ]
    }
}

/// A 7-parameter (Bursa-Wolf) datum shift between geocentric coordinate systems.
///
/// Uses the small-angle linearisation of the rotation:
///
/// ```text
/// x' =  v0*x - v3*y + v2*z + v4
/// y' =  v3*x + v0*y - v1*z + v5
/// z' = -v2*x + v1*y + v0*z + v6
/// ```
///
/// The linear part is a scale plus a skew-symmetric matrix,
/// whose inverse is known in closed form;
/// both directions are evaluated from the same seven coefficients.
#[derive(Debug, Clone)]
pub struct DatumTransform {
    info: Option<Wgs84ConversionInfo>,
    v: [f64; 7],
    /// `1 / (s * (s^2 + |w|^2))`, the normalisation of the closed-form inverse.
    inv_norm: f64,
    direction: Direction,
    inverse: InverseCache,
}

impl DatumTransform {
    pub fn try_new(info: Wgs84ConversionInfo) -> Result<Self> {
        let v = info.affine_coefficients();
        Self::try_new_inner(Some(info), v)
    }

    /// Build directly from `[scale, rx, ry, rz, tx, ty, tz]`, with rotations in radians.
    pub fn from_coefficients(v: [f64; 7]) -> Result<Self> {
        Self::try_new_inner(None, v)
    }

    fn try_new_inner(info: Option<Wgs84ConversionInfo>, v: [f64; 7]) -> Result<Self> {
        if v.iter().any(|c| !c.is_finite()) {
            return Err(TransformError::InvalidParameter(
                "DatumTransform: coefficients must be finite".into(),
            ));
        }
        if v[0] <= 0.0 {
            return Err(TransformError::InvalidParameter(
                "DatumTransform: scale must be positive".into(),
            ));
        }
        let s = v[0];
        let w2 = v[1] * v[1] + v[2] * v[2] + v[3] * v[3];
        Ok(Self {
            info,
            v,
            inv_norm: 1.0 / (s * (s * s + w2)),
            direction: Direction::Forward,
            inverse: InverseCache::new(),
        })
    }

    /// The parameters this transform was built from, if any.
    pub fn conversion_info(&self) -> Option<&Wgs84ConversionInfo> {
        self.info.as_ref()
    }

    pub fn coefficients(&self) -> &[f64; 7] {
        &self.v
    }

    #[inline]
    fn apply_forward(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        let v = &self.v;
        [
            v[0] * x - v[3] * y + v[2] * z + v[4],
            v[3] * x + v[0] * y - v[1] * z + v[5],
            -v[2] * x + v[1] * y + v[0] * z + v[6],
        ]
    }

    /// `p = (s^2 q - s (w x q) + w (w . q)) / (s (s^2 + |w|^2))` where `q = p' - t`.
    #[inline]
    fn apply_inverse(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        let v = &self.v;
        let s = v[0];
        let (w0, w1, w2) = (v[1], v[2], v[3]);
        let (q0, q1, q2) = (x - v[4], y - v[5], z - v[6]);
        let dot = w0 * q0 + w1 * q1 + w2 * q2;
        let s2 = s * s;
        [
            (s2 * q0 - s * (w1 * q2 - w2 * q1) + w0 * dot) * self.inv_norm,
            (s2 * q1 - s * (w2 * q0 - w0 * q2) + w1 * dot) * self.inv_norm,
            (s2 * q2 - s * (w0 * q1 - w1 * q0) + w2 * dot) * self.inv_norm,
        ]
    }

    #[inline]
    fn apply(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        match self.direction {
            Direction::Forward => self.apply_forward(x, y, z),
            Direction::Inverse => self.apply_inverse(x, y, z),
        }
    }
}

impl MathTransform for DatumTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        buf.copy_from_slice(&self.apply(pt[0], pt[1], pt[2]));
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        let [xs, ys, zs] = columns else {
            panic!("DatumTransform: expected 3 columns, got {}", columns.len());
        };
        let [out_x, out_y, out_z] = bufs else {
            panic!("DatumTransform: expected 3 output columns, got {}", bufs.len());
        };
        for idx in 0..xs.len() {
            let [x, y, z] = self.apply(xs[idx], ys[idx], zs[idx]);
            out_x[idx] = x;
            out_y[idx] = y;
            out_z[idx] = z;
        }
    }

    fn source_ndim(&self) -> usize {
        3
    }

    fn target_ndim(&self) -> usize {
        3
    }

    fn is_identity(&self) -> bool {
        self.v == [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            Ok(Arc::new(Self {
                info: self.info.clone(),
                v: self.v,
                inv_norm: self.inv_norm,
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
        let [s, w0, w1, w2, ..] = self.v;
        let m = match self.direction {
            Direction::Forward => Matrix::from_rows([
                [s, -w2, w1],
                [w2, s, -w0],
                [-w1, w0, s],
            ]),
            Direction::Inverse => {
                let n = self.inv_norm;
                let s2 = s * s;
                Matrix::from_rows([
                    [(s2 + w0 * w0) * n, (s * w2 + w0 * w1) * n, (-s * w1 + w0 * w2) * n],
                    [(-s * w2 + w1 * w0) * n, (s2 + w1 * w1) * n, (s * w0 + w1 * w2) * n],
                    [(s * w1 + w2 * w0) * n, (-s * w0 + w2 * w1) * n, (s2 + w2 * w2) * n],
                ])
            }
        };
        Ok(m)
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

    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        total_domain_flags(self, ordinates)
    }

    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        affine_codomain_hull(self, ordinates)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::{assert_abs_diff_eq, assert_relative_eq, assert_ulps_eq};
    use faer::rand::Rng;

    use super::{DatumTransform, Wgs84ConversionInfo};
    use crate::tests::{
        check_inverse_transform_bulk, check_inverse_transform_col, check_inverse_transform_coord,
        check_transform_bulk, check_transform_col, coords, init_logger, new_rng,
    };
    use crate::{Direction, MathTransform, Matrix, TransformError};

    /// DHDN (Potsdam) to WGS84.
    fn dhdn_info() -> Wgs84ConversionInfo {
        Wgs84ConversionInfo::new(598.1, 73.7, 418.2, 0.202, 0.045, -2.455, 6.7)
            .with_area_of_use("Germany")
    }

    fn make_transform() -> DatumTransform {
        DatumTransform::try_new(dhdn_info()).unwrap()
    }

    /// Roughly Berlin, in geocentric metres.
    const BERLIN: [f64; 3] = [3_783_079.0, 899_157.0, 5_038_012.0];

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
    fn test_inverted_columns() {
        let mut t = make_transform();
        t.invert().unwrap();
        check_transform_col(t);
    }

    #[test]
    fn test_round_trip_geocentric() {
        init_logger();
        let t = make_transform();
        let inv = t.inverse().unwrap();
        let shifted = t.transform(&BERLIN).unwrap();
        let back = inv.transform(&shifted).unwrap();
        for (orig, b) in BERLIN.iter().zip(back.iter()) {
            assert_relative_eq!(orig, b, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_round_trip_random_parameters() {
        init_logger();
        let mut rng = new_rng();
        let mut uniform = |range: f64| (rng.random::<f64>() * 2.0 - 1.0) * range;
        for _ in 0..200 {
            // up to ~0.5 rad of rotation and 0.1% of scale
            let info = Wgs84ConversionInfo::new(
                uniform(1000.0),
                uniform(1000.0),
                uniform(1000.0),
                uniform(100_000.0),
                uniform(100_000.0),
                uniform(100_000.0),
                uniform(1000.0),
            );
            let t = DatumTransform::try_new(info).unwrap();
            let inv = t.inverse().unwrap();
            // scale the unit test coordinates up to geocentric magnitudes
            for pt in coords(3).iter().take(50) {
                let p: Vec<f64> = pt.iter().map(|v| v * 80_000.0).collect();
                let back = inv.transform(&t.transform(&p).unwrap()).unwrap();
                for (orig, b) in p.iter().zip(back.iter()) {
                    assert_abs_diff_eq!(orig, b, epsilon = 1e-9 * 6.4e6);
                }
            }
        }
    }

    #[test]
    fn test_identity_parameters() {
        let t = DatumTransform::try_new(Wgs84ConversionInfo::default()).unwrap();
        assert!(t.is_identity());
        let out = t.transform(&[1.5, -2.0, 1e6]).unwrap();
        assert_eq!(out.as_slice(), &[1.5, -2.0, 1e6]);
    }

    #[test]
    fn test_pure_translation() {
        let t = DatumTransform::from_coefficients([1.0, 0.0, 0.0, 0.0, 100.0, -50.0, 20.0])
            .unwrap();
        assert!(!t.is_identity());
        let out = t.transform(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(out.as_slice(), &[100.0, -50.0, 20.0]);
        let back = t.inverse().unwrap().transform(&[100.0, -50.0, 20.0]).unwrap();
        assert_eq!(back.as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_2d() {
        let t = make_transform();
        assert_eq!(
            t.transform(&[1.0, 2.0]),
            Err(TransformError::UnsupportedPointType {
                expected: 3,
                actual: 2
            })
        );
        let good: &[f64] = &[1.0, 2.0, 3.0];
        let bad: &[f64] = &[1.0, 2.0];
        assert!(matches!(
            t.transform_list(&[good, bad]),
            Err(TransformError::UnsupportedPointType { .. })
        ));
    }

    #[test]
    fn test_invert_involution() {
        let mut t = make_transform();
        let expected = t.transform(&BERLIN).unwrap();
        t.invert().unwrap();
        assert_eq!(t.direction(), Direction::Inverse);
        let inverted = t.transform(&expected).unwrap();
        for (orig, b) in BERLIN.iter().zip(inverted.iter()) {
            assert_relative_eq!(orig, b, max_relative = 1e-12);
        }
        t.invert().unwrap();
        assert_eq!(t.transform(&BERLIN).unwrap(), expected);
    }

    #[test]
    fn test_invert_matches_inverse() {
        let t = make_transform();
        let inv = t.inverse().unwrap();
        let mut flipped = make_transform();
        flipped.invert().unwrap();
        assert_eq!(
            inv.transform(&BERLIN).unwrap(),
            flipped.transform(&BERLIN).unwrap()
        );
        assert_eq!(inv.direction(), Direction::Inverse);
        assert_eq!(t.direction(), Direction::Forward);
    }

    #[test]
    fn test_inverse_memoized() {
        let mut t = make_transform();
        let a = t.inverse().unwrap();
        let b = t.inverse().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        t.invert().unwrap();
        let c = t.inverse().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.direction(), Direction::Forward);

        t.invert().unwrap();
        assert!(Arc::ptr_eq(&a, &t.inverse().unwrap()));
    }

    #[test]
    fn test_double_inverse_is_forward() {
        let t = make_transform();
        let inv_inv = t.inverse().unwrap().inverse().unwrap();
        assert_eq!(inv_inv.direction(), Direction::Forward);
        assert_eq!(
            inv_inv.transform(&BERLIN).unwrap(),
            t.transform(&BERLIN).unwrap()
        );

        let mut flipped = make_transform();
        flipped.invert().unwrap();
        let flipped_inv_inv = flipped.inverse().unwrap().inverse().unwrap();
        assert_eq!(
            flipped_inv_inv.transform(&BERLIN).unwrap(),
            flipped.transform(&BERLIN).unwrap()
        );
    }

    #[test]
    fn test_derivatives_are_inverse() {
        let t = make_transform();
        let fwd = t.derivative(&BERLIN).unwrap();
        let out = t.transform(&BERLIN).unwrap();
        let inv = t.inverse().unwrap().derivative(&out).unwrap();
        let product = fwd.dot(&inv).unwrap();
        let eye = Matrix::identity(3);
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(product[(r, c)], eye[(r, c)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_codomain_hull_is_vertex_image() {
        let t = make_transform();
        let hull = [0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 10.0];
        let image = t.codomain_convex_hull(&hull).unwrap();
        assert_eq!(image.len(), hull.len());
        let first = t.transform(&hull[..3]).unwrap();
        assert_ulps_eq!(&image[..3], first.as_slice());
        assert!(t.domain_flags(&hull).unwrap().is_inside());
    }

    #[test]
    fn test_conversion_info() {
        let info = dhdn_info();
        assert!(!info.has_zero_values_only());
        assert!(Wgs84ConversionInfo::translation(0.0, 0.0, 0.0).has_zero_values_only());
        let t = make_transform();
        assert_eq!(t.conversion_info().unwrap().area_of_use.as_deref(), Some("Germany"));
        assert_relative_eq!(t.coefficients()[0], 1.0000067, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_coefficients() {
        assert!(DatumTransform::from_coefficients([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(DatumTransform::from_coefficients([0.0; 7]).is_err());
    }

    #[test]
    fn test_serialization_not_supported() {
        let t = make_transform();
        assert!(matches!(t.wkt(), Err(TransformError::NotSupported(_))));
        assert!(matches!(t.xml(), Err(TransformError::NotSupported(_))));
    }
}
