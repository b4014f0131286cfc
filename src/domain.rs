//! Domain classification and convex hull propagation.
//!
//! A hull is given as point-major ordinates and interpreted as a closed ring of vertices.
use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};

use smallvec::{ToSmallVec, smallvec};

use crate::{MathTransform, Result, ShortVec, TransformError};

/// Number of grid divisions along each edge of a triangle sampled from a 2D hull.
/// Higher-dimensional hulls use proportionally fewer divisions per edge.
pub const HULL_EDGE_SAMPLES: usize = 16;

/// Bisection steps used to locate the domain boundary between grid points.
const BOUNDARY_BISECTIONS: usize = 40;

/// Bound on the interpolation error of a quadratic map over a simplex,
/// as a multiple of the largest deviation of an edge midpoint from its chord.
const CURVATURE_MARGIN: f64 = 2.0;

/// Bitset classifying a region against the valid domain of a transform.
///
/// A region which is partially inside has both [DomainFlags::INSIDE] and [DomainFlags::OUTSIDE] set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainFlags(u8);

impl DomainFlags {
    /// Some of the region is inside the domain.
    pub const INSIDE: Self = Self(1);
    /// Some of the region is outside the domain.
    pub const OUTSIDE: Self = Self(2);
    /// The image of the region is not continuous.
    pub const DISCONTINUOUS: Self = Self(4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Entirely inside the domain.
    pub const fn is_inside(self) -> bool {
        self.contains(Self::INSIDE) && !self.contains(Self::OUTSIDE)
    }

    /// Entirely outside the domain.
    pub const fn is_outside(self) -> bool {
        self.contains(Self::OUTSIDE) && !self.contains(Self::INSIDE)
    }

    /// Partially inside the domain.
    pub const fn is_partial(self) -> bool {
        self.contains(Self::INSIDE) && self.contains(Self::OUTSIDE)
    }

    /// Flags for a region in which `n_inside` of `n_total` samples were inside the domain.
    pub(crate) fn from_counts(n_inside: usize, n_total: usize) -> Self {
        if n_inside == 0 {
            Self::OUTSIDE
        } else if n_inside == n_total {
            Self::INSIDE
        } else {
            Self::INSIDE | Self::OUTSIDE
        }
    }
}

impl BitOr for DomainFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DomainFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Split flat ordinates into points of `ndim` values.
pub(crate) fn hull_vertices(ordinates: &[f64], ndim: usize) -> Result<Vec<&[f64]>> {
    if ndim == 0 {
        return Err(TransformError::DimensionMismatch {
            expected: 1,
            actual: 0,
        });
    }
    if !ordinates.len().is_multiple_of(ndim) {
        return Err(TransformError::DimensionMismatch {
            expected: ndim,
            actual: ordinates.len() % ndim,
        });
    }
    Ok(ordinates.chunks_exact(ndim).collect())
}

fn lerp(a: &[f64], b: &[f64], frac: f64) -> ShortVec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x + (y - x) * frac).collect()
}

/// Edges of the closed ring through `vertices`.
/// A two-vertex hull is a single segment; a single vertex has no edges.
fn ring_edges<'a>(vertices: &[&'a [f64]]) -> Vec<(&'a [f64], &'a [f64])> {
    match vertices.len() {
        0 | 1 => vec![],
        2 => vec![(vertices[0], vertices[1])],
        n => (0..n).map(|idx| (vertices[idx], vertices[(idx + 1) % n])).collect(),
    }
}

/// Points covering a hull on a regular grid,
/// with the pairs of neighbouring points joined by a grid edge.
#[derive(Debug, Default)]
pub(crate) struct HullGrid {
    pub points: Vec<ShortVec<f64>>,
    pub neighbours: Vec<(usize, usize)>,
}

impl HullGrid {
    fn single(point: &[f64]) -> Self {
        Self {
            points: vec![point.to_smallvec()],
            neighbours: vec![],
        }
    }

    /// Add the barycentric grid with `divisions` steps per edge of the simplex with the given corners.
    fn add_simplex(&mut self, corners: &[ShortVec<f64>], divisions: usize) {
        let mut index: HashMap<ShortVec<usize>, usize> = HashMap::new();
        let mut weights: ShortVec<usize> = smallvec![0; corners.len()];
        compositions(divisions, 0, &mut weights, &mut |w| {
            let mut pt: ShortVec<f64> = smallvec![0.0; corners[0].len()];
            for (corner, &n) in corners.iter().zip(w.iter()) {
                let frac = n as f64 / divisions as f64;
                for (p, c) in pt.iter_mut().zip(corner.iter()) {
                    *p += c * frac;
                }
            }
            index.insert(w.clone(), self.points.len());
            self.points.push(pt);
        });

        for (w, &from) in index.iter() {
            for j in 0..w.len() {
                if w[j] == 0 {
                    continue;
                }
                for i in 0..j {
                    let mut other = w.clone();
                    other[i] += 1;
                    other[j] -= 1;
                    if let Some(&to) = index.get(&other) {
                        self.neighbours.push((from, to));
                    }
                }
            }
        }
    }
}

/// Call `f` with every way of splitting `total` between the remaining entries of `weights`.
fn compositions(
    total: usize,
    idx: usize,
    weights: &mut ShortVec<usize>,
    f: &mut impl FnMut(&ShortVec<usize>),
) {
    if idx + 1 == weights.len() {
        weights[idx] = total;
        f(weights);
        return;
    }
    for n in 0..=total {
        weights[idx] = n;
        compositions(total - n, idx + 1, weights, f);
    }
}

fn permutations(items: &[usize]) -> Vec<ShortVec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_smallvec()];
    }
    let mut out = vec![];
    for (idx, first) in items.iter().enumerate() {
        let mut rest: ShortVec<usize> = items.to_smallvec();
        rest.remove(idx);
        for mut perm in permutations(&rest) {
            perm.insert(0, *first);
            out.push(perm);
        }
    }
    out
}

/// Grid covering the polygon bounded by a 2D ring,
/// as a fan of triangles from the centroid of its vertices.
fn ring_grid(vertices: &[&[f64]]) -> HullGrid {
    let n = vertices.len() as f64;
    let mut centroid: ShortVec<f64> = smallvec![0.0; vertices[0].len()];
    for v in vertices.iter() {
        for (c, x) in centroid.iter_mut().zip(v.iter()) {
            *c += x / n;
        }
    }
    let mut grid = HullGrid::default();
    for (a, b) in ring_edges(vertices) {
        grid.add_simplex(
            &[centroid.clone(), a.to_smallvec(), b.to_smallvec()],
            HULL_EDGE_SAMPLES,
        );
    }
    grid
}

/// Grid covering the axis-aligned bounding box of `vertices`,
/// split into simplices along every ordering of its non-degenerate axes.
fn box_grid(vertices: &[&[f64]]) -> HullGrid {
    let ndim = vertices[0].len();
    let mut lo: ShortVec<f64> = vertices[0].to_smallvec();
    let mut hi = lo.clone();
    for v in vertices.iter() {
        for d in 0..ndim {
            lo[d] = lo[d].min(v[d]);
            hi[d] = hi[d].max(v[d]);
        }
    }
    let free: Vec<usize> = (0..ndim).filter(|&d| hi[d] > lo[d]).collect();
    if free.is_empty() {
        return HullGrid::single(&lo);
    }
    let divisions = (HULL_EDGE_SAMPLES / free.len()).max(2);
    let mut grid = HullGrid::default();
    for order in permutations(&free) {
        let mut corner = lo.clone();
        let mut corners = vec![corner.clone()];
        for &d in order.iter() {
            corner[d] = hi[d];
            corners.push(corner.clone());
        }
        grid.add_simplex(&corners, divisions);
    }
    grid
}

/// Sample points covering the region a hull describes.
///
/// A 2D hull is the polygon bounded by its ring of vertices.
/// Hulls in other dimensionalities are widened to their bounding box,
/// as their vertices need not lie in a plane.
pub(crate) fn hull_grid(vertices: &[&[f64]]) -> HullGrid {
    match vertices.len() {
        0 => HullGrid::default(),
        1 => HullGrid::single(vertices[0]),
        _ if vertices[0].len() == 2 => ring_grid(vertices),
        _ => box_grid(vertices),
    }
}

/// Vertices of the box between `lo` and `hi`, in Gray code order,
/// so that a 2D box is a ring.
fn box_corners(lo: &[f64], hi: &[f64]) -> Vec<f64> {
    let ndim = lo.len();
    let mut out = Vec::with_capacity(ndim << ndim);
    for idx in 0..(1usize << ndim) {
        let gray = idx ^ (idx >> 1);
        for d in 0..ndim {
            out.push(if gray & (1 << d) == 0 { lo[d] } else { hi[d] });
        }
    }
    out
}

/// Find the point closest to `outside` along the segment from `inside` which is still in the domain.
fn boundary_point<T: MathTransform + ?Sized>(
    t: &T,
    inside: &[f64],
    outside: &[f64],
) -> ShortVec<f64> {
    let mut lo = 0.0;
    let mut hi = 1.0;
    for _ in 0..BOUNDARY_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if t.contains(&lerp(inside, outside, mid)) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lerp(inside, outside, lo)
}

/// Classify a hull by testing a grid of points covering it against [MathTransform::contains].
///
/// An approximation at the grid density; see [hull_grid] for the region sampled.
pub(crate) fn sampled_domain_flags<T: MathTransform + ?Sized>(
    t: &T,
    ordinates: &[f64],
) -> Result<DomainFlags> {
    let vertices = hull_vertices(ordinates, t.source_ndim())?;
    let grid = hull_grid(&vertices);
    let n_inside = grid.points.iter().filter(|s| t.contains(s)).count();
    log::trace!("{n_inside} of {} hull samples inside domain", grid.points.len());
    Ok(DomainFlags::from_counts(n_inside, grid.points.len()))
}

/// A box containing the images of a grid covering the hull, clipped to the domain.
///
/// Points where grid edges leave the domain are located by bisection.
/// The box is widened on each axis by the deviation of grid edge midpoints from their chords,
/// which bounds the image between grid points for maps which are close to quadratic over a grid cell.
pub(crate) fn sampled_codomain_hull<T: MathTransform + ?Sized>(
    t: &T,
    ordinates: &[f64],
) -> Result<Vec<f64>> {
    let vertices = hull_vertices(ordinates, t.source_ndim())?;
    let grid = hull_grid(&vertices);
    let target_ndim = t.target_ndim();

    let image_of = |pt: &[f64]| {
        let mut buf: ShortVec<f64> = smallvec![f64::NAN; target_ndim];
        t.transform_into(pt, &mut buf);
        buf
    };

    let inside: Vec<bool> = grid.points.iter().map(|p| t.contains(p)).collect();
    let images: Vec<Option<ShortVec<f64>>> = grid
        .points
        .iter()
        .zip(inside.iter())
        .map(|(p, &ok)| ok.then(|| image_of(p)))
        .collect();

    let mut extra = vec![];
    let mut deviation: ShortVec<f64> = smallvec![0.0; target_ndim];
    for &(a, b) in grid.neighbours.iter() {
        let (pa, pb) = (&grid.points[a], &grid.points[b]);
        match (&images[a], &images[b]) {
            (Some(ia), Some(ib)) => {
                let mid = lerp(pa, pb, 0.5);
                if !t.contains(&mid) {
                    continue;
                }
                let im = image_of(&mid);
                for d in 0..target_ndim {
                    let dev = (im[d] - 0.5 * (ia[d] + ib[d])).abs();
                    if dev.is_finite() {
                        deviation[d] = deviation[d].max(dev);
                    }
                }
                extra.push(im);
            }
            (Some(_), None) => extra.push(image_of(&boundary_point(t, pa, pb))),
            (None, Some(_)) => extra.push(image_of(&boundary_point(t, pb, pa))),
            (None, None) => {}
        }
    }

    let mut lo: ShortVec<f64> = smallvec![f64::INFINITY; target_ndim];
    let mut hi: ShortVec<f64> = smallvec![f64::NEG_INFINITY; target_ndim];
    let mut n_kept = 0;
    for im in images.iter().flatten().chain(extra.iter()) {
        n_kept += 1;
        for d in 0..target_ndim {
            lo[d] = lo[d].min(im[d]);
            hi[d] = hi[d].max(im[d]);
        }
    }
    log::trace!(
        "{n_kept} images from {} hull samples, margin {deviation:?}",
        grid.points.len()
    );
    if n_kept == 0 {
        return Ok(vec![]);
    }

    for d in 0..target_ndim {
        lo[d] -= CURVATURE_MARGIN * deviation[d];
        hi[d] += CURVATURE_MARGIN * deviation[d];
    }
    Ok(box_corners(&lo, &hi))
}

/// The image of a convex hull under an affine map is the convex hull of the images of its vertices.
pub(crate) fn affine_codomain_hull<T: MathTransform + ?Sized>(
    t: &T,
    ordinates: &[f64],
) -> Result<Vec<f64>> {
    let source_ndim = t.source_ndim();
    let target_ndim = t.target_ndim();
    let vertices = hull_vertices(ordinates, source_ndim)?;
    let mut out = vec![f64::NAN; vertices.len() * target_ndim];
    for (v, buf) in vertices.iter().zip(out.chunks_exact_mut(target_ndim)) {
        t.transform_into(v, buf);
    }
    Ok(out)
}

/// Domain flags for a transform defined on all finite points.
pub(crate) fn total_domain_flags<T: MathTransform + ?Sized>(
    t: &T,
    ordinates: &[f64],
) -> Result<DomainFlags> {
    let vertices = hull_vertices(ordinates, t.source_ndim())?;
    let n_inside = vertices.iter().filter(|v| t.contains(v)).count();
    Ok(DomainFlags::from_counts(n_inside, vertices.len()))
}
