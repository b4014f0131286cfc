use std::sync::Arc;

use crate::{
    Direction, DomainFlags, InverseCache, MathTransform, Matrix, Result, ShortVec,
    TransformError, as_muts, as_refs, vec_of_vec,
};
use smallvec::smallvec;

/// Apply a sequence of transforms in order.
#[derive(Debug)]
pub struct Sequence {
    transforms: Vec<Arc<dyn MathTransform>>,
    max_inner_ndim: usize,
    direction: Direction,
    inverse: InverseCache,
}

impl Sequence {
    fn try_new(transforms: Vec<Arc<dyn MathTransform>>, direction: Direction) -> Result<Self> {
        if transforms.len() < 2 {
            return Err(TransformError::InvalidParameter(
                "Sequence must have >= 2 transformations".into(),
            ));
        }
        for pair in transforms.windows(2) {
            if pair[0].target_ndim() != pair[1].source_ndim() {
                return Err(TransformError::DimensionMismatch {
                    expected: pair[0].target_ndim(),
                    actual: pair[1].source_ndim(),
                });
            }
        }
        Ok(Self {
            max_inner_ndim: Self::max_inner_ndim(&transforms),
            transforms,
            direction,
            inverse: InverseCache::new(),
        })
    }

    fn max_inner_ndim(transforms: &[Arc<dyn MathTransform>]) -> usize {
        transforms
            .iter()
            .skip(1)
            .map(|t| t.source_ndim())
            .max()
            .unwrap_or(0)
    }

    pub fn builder() -> SequenceBuilder {
        SequenceBuilder(vec![])
    }

    /// The stages of this sequence, in the order they are applied.
    pub fn transforms(&self) -> &[Arc<dyn MathTransform>] {
        &self.transforms
    }

    /// Inverses of every stage, in reverse order.
    fn inverse_transforms(&self) -> Result<Vec<Arc<dyn MathTransform>>> {
        self.transforms.iter().rev().map(|t| t.inverse()).collect()
    }

    fn transform_into_inner(
        &self,
        pt: &[f64],
        out_buf: &mut [f64],
        mut buf0: ShortVec<f64>,
        mut buf1: ShortVec<f64>,
    ) -> (ShortVec<f64>, ShortVec<f64>) {
        for (idx, t) in self.transforms.iter().enumerate() {
            let source_ndim = t.source_ndim();
            let target_ndim = t.target_ndim();

            if idx == 0 {
                t.transform_into(pt, &mut buf1[..target_ndim]);
            } else if idx == self.transforms.len() - 1 {
                t.transform_into(&buf0[..source_ndim], out_buf);
            } else {
                t.transform_into(&buf0[..source_ndim], &mut buf1[..target_ndim]);
            }
            (buf0, buf1) = (buf1, buf0);
        }
        (buf0, buf1)
    }
}

impl MathTransform for Sequence {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) {
        self.transform_into_inner(
            pt,
            buf,
            smallvec![f64::NAN; self.max_inner_ndim],
            smallvec![f64::NAN; self.max_inner_ndim],
        );
    }

    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]]) {
        let mut buf0: ShortVec<f64> = smallvec![f64::NAN; self.max_inner_ndim];
        let mut buf1: ShortVec<f64> = smallvec![f64::NAN; self.max_inner_ndim];

        for (pt, buf) in pts.iter().zip(bufs.iter_mut()) {
            (buf0, buf1) = self.transform_into_inner(pt, buf, buf0, buf1);
        }
    }

    fn column_transform_into(&self, columns: &[&[f64]], bufs: &mut [&mut [f64]]) {
        let n_pts = columns[0].len();
        let mut buf0_vec = vec_of_vec(self.max_inner_ndim, n_pts, f64::NAN);
        let mut buf1_vec = vec_of_vec(self.max_inner_ndim, n_pts, f64::NAN);

        let mut buf0_input = true;
        let last_idx = self.transforms.len() - 1;

        for (idx, t) in self.transforms.iter().enumerate() {
            let in_ndim = t.source_ndim();
            let out_ndim = t.target_ndim();

            // guaranteed to have length >= 2
            if idx == 0 {
                t.column_transform_into(columns, &mut as_muts(&mut buf1_vec[..out_ndim]));
            } else if idx == last_idx {
                if buf0_input {
                    t.column_transform_into(&as_refs(&buf0_vec[..in_ndim]), bufs);
                } else {
                    t.column_transform_into(&as_refs(&buf1_vec[..in_ndim]), bufs);
                }
            } else if buf0_input {
                t.column_transform_into(
                    &as_refs(&buf0_vec[..in_ndim]),
                    &mut as_muts(&mut buf1_vec[..out_ndim]),
                );
            } else {
                t.column_transform_into(
                    &as_refs(&buf1_vec[..in_ndim]),
                    &mut as_muts(&mut buf0_vec[..out_ndim]),
                );
            }
            buf0_input = !buf0_input;
        }
    }

    fn inverse(&self) -> Result<Arc<dyn MathTransform>> {
        self.inverse.get_or_try_init(self.direction, || {
            Ok(Arc::new(Sequence::try_new(
                self.inverse_transforms()?,
                self.direction.flipped(),
            )?))
        })
    }

    /// Replaces the stages with their inverses, in reverse order.
    fn invert(&mut self) -> Result<()> {
        self.transforms = self.inverse_transforms()?;
        self.max_inner_ndim = Self::max_inner_ndim(&self.transforms);
        self.direction = self.direction.flipped();
        Ok(())
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn source_ndim(&self) -> usize {
        self.transforms[0].source_ndim()
    }

    fn target_ndim(&self) -> usize {
        self.transforms[self.transforms.len() - 1].target_ndim()
    }

    fn is_identity(&self) -> bool {
        self.transforms.iter().all(|t| t.is_identity())
    }

    /// Chain rule: the product of each stage's derivative at its own input.
    fn derivative(&self, pt: &[f64]) -> Result<Matrix> {
        self.check_point(pt)?;
        let mut current: ShortVec<f64> = pt.into();
        let mut total = Matrix::identity(pt.len());
        for t in self.transforms.iter() {
            total = t.derivative(&current)?.dot(&total)?;
            current = t.transform(&current)?;
        }
        Ok(total)
    }

    /// Points are checked against the first stage,
    /// which may require a particular point representation.
    fn check_point(&self, pt: &[f64]) -> Result<()> {
        self.transforms[0].check_point(pt)
    }

    fn contains(&self, pt: &[f64]) -> bool {
        let mut current: ShortVec<f64> = pt.into();
        for t in self.transforms.iter() {
            if !t.contains(&current) {
                return false;
            }
            let mut next = smallvec![f64::NAN; t.target_ndim()];
            t.transform_into(&current, &mut next);
            current = next;
        }
        true
    }

    /// Propagates the hull through each stage, clipping it to each stage's domain.
    fn domain_flags(&self, ordinates: &[f64]) -> Result<DomainFlags> {
        let mut hull = ordinates.to_vec();
        let mut flags = DomainFlags::empty();
        let last_idx = self.transforms.len() - 1;
        for (idx, t) in self.transforms.iter().enumerate() {
            let stage_flags = t.domain_flags(&hull)?;
            if stage_flags.is_outside() {
                return Ok(DomainFlags::OUTSIDE);
            }
            flags |= stage_flags;
            if idx < last_idx {
                hull = t.codomain_convex_hull(&hull)?;
            }
        }
        Ok(flags)
    }

    fn codomain_convex_hull(&self, ordinates: &[f64]) -> Result<Vec<f64>> {
        let mut hull = ordinates.to_vec();
        for t in self.transforms.iter() {
            hull = t.codomain_convex_hull(&hull)?;
        }
        Ok(hull)
    }
}

#[derive(Debug, Default)]
pub struct SequenceBuilder(Vec<Arc<dyn MathTransform>>);

impl SequenceBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Fails if the new transformation's source dimensionality
    /// does not match the previous transformation's target dimensionality.
    pub fn add_arced(&mut self, t: Arc<dyn MathTransform>) -> Result<&mut Self> {
        if let Some(last_ndim) = self.0.last().map(|prev| prev.target_ndim()) {
            if t.source_ndim() != last_ndim {
                return Err(TransformError::DimensionMismatch {
                    expected: last_ndim,
                    actual: t.source_ndim(),
                });
            }
        }
        self.0.push(t);
        Ok(self)
    }

    pub fn add_transform<T: MathTransform + 'static>(&mut self, t: T) -> Result<&mut Self> {
        self.add_arced(Arc::new(t))
    }

    pub fn build(self) -> Result<Sequence> {
        Sequence::try_new(self.0, Direction::Forward)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::Sequence;
    use crate::tests::{
        check_hull_contains, check_inverse_transform_bulk, check_inverse_transform_col,
        check_inverse_transform_coord, check_transform_bulk, check_transform_col, coords,
    };
    use crate::{
        Affine, AxisSelect, DatumTransform, Direction, Geocentric, Identity, MathTransform, Matrix,
        Mercator, TransformError, Wgs84ConversionInfo,
    };

    fn datum() -> DatumTransform {
        DatumTransform::try_new(Wgs84ConversionInfo::new(
            -87.0, -98.0, -121.0, 0.1, -0.2, 0.3, 1.5,
        ))
        .unwrap()
    }

    fn make_transform() -> Sequence {
        let mut builder = Sequence::builder();
        builder.add_transform(datum()).unwrap();
        builder
            .add_transform(Affine::try_new(Matrix::identity(3), &[10.0, -6.0, 0.5]).unwrap())
            .unwrap();
        builder.build().unwrap()
    }

    /// Geographic WGS84-ish to geographic, via a geocentric datum shift.
    fn make_pipeline() -> Sequence {
        let mut to_geographic = Geocentric::default();
        to_geographic.invert().unwrap();
        let mut builder = Sequence::builder();
        builder
            .add_transform(Geocentric::default())
            .unwrap()
            .add_transform(datum())
            .unwrap()
            .add_transform(to_geographic)
            .unwrap();
        builder.build().unwrap()
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
    fn test_too_short() {
        let mut builder = Sequence::builder();
        builder.add_transform(Identity::new(3)).unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_composite_projection() {
        let a = datum();
        let b = AxisSelect::try_new(&[0, 1], 3).unwrap();

        let mut builder = Sequence::builder();
        builder.add_transform(a.clone()).unwrap();
        builder.add_transform(b.clone()).unwrap();
        let seq = builder.build().unwrap();
        assert_eq!(seq.source_ndim(), 3);
        assert_eq!(seq.target_ndim(), 2);

        for pt in coords(3).iter() {
            let expected = b.transform(&a.transform(pt).unwrap()).unwrap();
            assert_eq!(seq.transform(pt).unwrap(), expected);
        }
        assert!(matches!(
            seq.inverse(),
            Err(TransformError::NonInvertible(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut builder = Sequence::builder();
        builder.add_transform(datum()).unwrap();
        assert_eq!(
            builder.add_transform(Mercator::default()).err(),
            Some(TransformError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_first_stage_point_type() {
        let seq = make_transform();
        assert!(matches!(
            seq.transform(&[1.0, 2.0]),
            Err(TransformError::UnsupportedPointType { .. })
        ));
    }

    #[test]
    fn test_inverse_reverses_stages() {
        let seq = make_transform();
        let inv = seq.inverse().unwrap();
        assert_eq!(inv.direction(), Direction::Inverse);
        assert!(Arc::ptr_eq(&inv, &seq.inverse().unwrap()));

        let pt = [1.0, 2.0, 3.0];
        let expected = seq.transforms()[0]
            .inverse()
            .unwrap()
            .transform(
                &seq.transforms()[1]
                    .inverse()
                    .unwrap()
                    .transform(&pt)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(inv.transform(&pt).unwrap(), expected);
    }

    #[test]
    fn test_invert_in_place() {
        let mut seq = make_transform();
        let pt = [30.0, -20.0, 10.0];
        let out = seq.transform(&pt).unwrap();
        seq.invert().unwrap();
        let back = seq.transform(&out).unwrap();
        assert_abs_diff_eq!(back.as_slice(), pt.as_slice(), epsilon = 1e-10);
        seq.invert().unwrap();
        assert_abs_diff_eq!(
            seq.transform(&pt).unwrap().as_slice(),
            out.as_slice(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_pipeline_round_trip() {
        let pipeline = make_pipeline();
        let inv = pipeline.inverse().unwrap();
        let berlin = [13.4, 52.5, 34.0];
        let shifted = pipeline.transform(&berlin).unwrap();
        // a datum shift moves points by on the order of a hundred metres
        assert!((shifted[0] - berlin[0]).abs() > 1e-4);
        let back = inv.transform(&shifted).unwrap();
        assert_abs_diff_eq!(back[0], berlin[0], epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], berlin[1], epsilon = 1e-9);
        assert_abs_diff_eq!(back[2], berlin[2], epsilon = 1e-6);
    }

    #[test]
    fn test_pipeline_hull_contains_image() {
        let pipeline = make_pipeline();
        let patch = [
            5.0, 45.0, 0.0, 15.0, 45.0, 0.0, 5.0, 55.0, 0.0, 5.0, 45.0, 1000.0,
        ];
        assert!(pipeline.domain_flags(&patch).unwrap().is_inside());
        check_hull_contains(&pipeline, &patch);
        check_hull_contains(pipeline.inverse().unwrap().as_ref(), &patch);
    }

    #[test]
    fn test_derivative_chain_rule() {
        let a = Affine::try_new(
            Matrix::try_new(vec![2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0], 3).unwrap(),
            &[0.0; 3],
        )
        .unwrap();
        let d = datum();
        let pt = [1.0, 2.0, 3.0];
        let expected = d
            .derivative(&a.transform(&pt).unwrap())
            .unwrap()
            .dot(&a.derivative(&pt).unwrap())
            .unwrap();

        let mut builder = Sequence::builder();
        builder.add_transform(a).unwrap().add_transform(d).unwrap();
        let got = builder.build().unwrap().derivative(&pt).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(got[(r, c)], expected[(r, c)]);
            }
        }
    }

    #[test]
    fn test_domain_flags_through_stages() {
        let mut builder = Sequence::builder();
        builder
            .add_transform(Affine::try_new(Matrix::identity(2), &[0.0, 50.0]).unwrap())
            .unwrap()
            .add_transform(Mercator::default())
            .unwrap();
        let seq = builder.build().unwrap();

        let inside = [0.0, 0.0, 10.0, 0.0, 10.0, 20.0];
        assert!(seq.domain_flags(&inside).unwrap().is_inside());

        // shifted north by 50 degrees, this crosses the pole
        let partial = [0.0, 0.0, 10.0, 0.0, 10.0, 60.0];
        assert!(seq.domain_flags(&partial).unwrap().is_partial());

        let outside = [0.0, 45.0, 10.0, 45.0, 10.0, 60.0];
        assert!(seq.domain_flags(&outside).unwrap().is_outside());

        let hull = seq.codomain_convex_hull(&partial).unwrap();
        assert!(hull.iter().all(|v| v.is_finite()));
        check_hull_contains(&seq, &partial);
        check_hull_contains(&seq, &inside);
        assert!(!seq.contains(&[0.0, 45.0]));
        assert!(seq.contains(&[0.0, 0.0]));
    }

    #[test]
    fn test_identity() {
        let mut builder = Sequence::builder();
        builder
            .add_transform(Identity::new(3))
            .unwrap()
            .add_transform(Identity::new(3))
            .unwrap();
        assert!(builder.build().unwrap().is_identity());
        assert!(!make_transform().is_identity());
    }
}
