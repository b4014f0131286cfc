use crate::{Result, TransformError};

/// A reference ellipsoid of revolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    semi_major: f64,
    inverse_flattening: f64,
}

impl Ellipsoid {
    pub const WGS84: Self = Self {
        semi_major: 6_378_137.0,
        inverse_flattening: 298.257_223_563,
    };
    pub const GRS80: Self = Self {
        semi_major: 6_378_137.0,
        inverse_flattening: 298.257_222_101,
    };
    pub const INTERNATIONAL_1924: Self = Self {
        semi_major: 6_378_388.0,
        inverse_flattening: 297.0,
    };
    pub const BESSEL_1841: Self = Self {
        semi_major: 6_377_397.155,
        inverse_flattening: 299.152_812_8,
    };
    pub const CLARKE_1866: Self = Self {
        semi_major: 6_378_206.4,
        inverse_flattening: 294.978_698_2,
    };

    /// An inverse flattening of infinity describes a sphere.
    pub fn try_new(semi_major: f64, inverse_flattening: f64) -> Result<Self> {
        if !semi_major.is_finite() || semi_major <= 0.0 {
            return Err(TransformError::InvalidParameter(
                "Ellipsoid: semi-major axis must be finite and positive".into(),
            ));
        }
        if inverse_flattening.is_nan() || inverse_flattening <= 1.0 {
            return Err(TransformError::InvalidParameter(
                "Ellipsoid: inverse flattening must be > 1".into(),
            ));
        }
        Ok(Self {
            semi_major,
            inverse_flattening,
        })
    }

    pub fn sphere(radius: f64) -> Result<Self> {
        Self::try_new(radius, f64::INFINITY)
    }

    pub fn semi_major(&self) -> f64 {
        self.semi_major
    }

    pub fn flattening(&self) -> f64 {
        1.0 / self.inverse_flattening
    }

    pub fn semi_minor(&self) -> f64 {
        self.semi_major * (1.0 - self.flattening())
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = self.flattening();
        f * (2.0 - f)
    }

    pub fn eccentricity(&self) -> f64 {
        self.e2().sqrt()
    }

    /// Second eccentricity squared.
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }

    /// Radius of curvature in the prime vertical at the given latitude (radians).
    pub fn prime_vertical_radius(&self, lat: f64) -> f64 {
        let s = lat.sin();
        self.semi_major / (1.0 - self.e2() * s * s).sqrt()
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::WGS84
    }
}
