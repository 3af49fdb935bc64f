use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::correspondence::Correspondence;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest accepted magnitude of the homogeneous divisor in [`Homography::try_apply`].
pub const PROJECTION_EPS: f64 = 1e-12;

// Twice the triangle area, measured on Hartley-normalised points (mean distance sqrt(2)).
const COLLINEAR_EPS: f64 = 1e-9;
// Relative singular value / determinant floor on normalised systems.
const RANK_EPS: f64 = 1e-9;

/// Transform estimation and point transfer errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("source and destination lists differ in length ({src} != {dst})")]
    MismatchedLengths { src: usize, dst: usize },
    #[error("need at least {required} correspondences, got {actual}")]
    InsufficientCorrespondence { required: usize, actual: usize },
    #[error("degenerate point configuration (collinear or duplicate points)")]
    DegenerateConfiguration,
    #[error("homogeneous divisor {w:e} is too close to zero")]
    DegenerateProjection { w: f64 },
}

/// 3x3 homogeneous transform `dst ~ H * src`.
///
/// Affine transforms are the special case with bottom row `[0, 0, 1]`; they
/// go through the same perspective-correct [`Homography::try_apply`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Transfer a point: lift to `(x, y, 1)`, multiply, divide by `w'`.
    #[inline]
    pub fn try_apply(&self, p: Point2<f64>) -> Result<Point2<f64>, HomographyError> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        if !w.is_finite() || w.abs() < PROJECTION_EPS {
            return Err(HomographyError::DegenerateProjection { w });
        }
        Ok(Point2::new(v[0] / w, v[1] / w))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h
            .try_inverse()
            .map(|h| Self::new(normalize_homography(h)))
    }

    /// True when the bottom row is `[0, 0, 1]` (up to scale).
    pub fn is_affine(&self) -> bool {
        let s = self.h[(2, 2)];
        s.abs() > PROJECTION_EPS
            && (self.h[(2, 0)] / s).abs() < 1e-12
            && (self.h[(2, 1)] / s).abs() < 1e-12
    }

    /// Per-pair distance between `H * src[i]` and `dst[i]`.
    pub fn reprojection_errors(
        &self,
        pairs: &Correspondence,
    ) -> Result<Vec<f64>, HomographyError> {
        pairs
            .pairs()
            .map(|(s, d)| self.try_apply(s).map(|p| (p - d).norm()))
            .collect()
    }
}

/// Estimate the transform for a correspondence of any supported size.
///
/// - 3 pairs: exact affine solution,
/// - 4 pairs: exact projective solution,
/// - more: least-squares projective fit (normalised DLT).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(pairs = pairs.len()))
)]
pub fn estimate_transform(pairs: &Correspondence) -> Result<Homography, HomographyError> {
    match pairs.len() {
        n if n < 3 => Err(HomographyError::InsufficientCorrespondence {
            required: 3,
            actual: n,
        }),
        3 => affine_from_3pt(pairs.src(), pairs.dst()),
        _ => estimate_homography(pairs.src(), pairs.dst()),
    }
}

/// Estimate a projective H such that `dst ~ H * src`. Requires at least 4 pairs.
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::MismatchedLengths {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(HomographyError::InsufficientCorrespondence {
            required: 4,
            actual: src.len(),
        });
    }
    if src.len() == 4 {
        return homography_from_4pt(src, dst);
    }
    homography_dlt(src, dst)
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    // Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn normalize_homography(h: Matrix3<f64>) -> Matrix3<f64> {
    let s = h[(2, 2)];
    if s.abs() > 1e-12 {
        h / s
    } else {
        h / h.norm()
    }
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Result<Homography, HomographyError> {
    let norm = hn.norm();
    if !norm.is_finite() || norm < 1e-12 || (hn / norm).determinant().abs() < RANK_EPS {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or(HomographyError::DegenerateConfiguration)?;
    Ok(Homography::new(normalize_homography(t_dst_inv * hn * t_src)))
}

fn any_collinear_triple(pts: &[Point2<f64>]) -> bool {
    let n = pts.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let ab = pts[j] - pts[i];
                let ac = pts[k] - pts[i];
                if (ab.x * ac.y - ab.y * ac.x).abs() < COLLINEAR_EPS {
                    return true;
                }
            }
        }
    }
    false
}

/// Exact affine map from 3 non-collinear pairs.
fn affine_from_3pt(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);
    if any_collinear_triple(&src_n) || any_collinear_triple(&dst_n) {
        return Err(HomographyError::DegenerateConfiguration);
    }

    // Rows [x y 1]; solve once for the u column and once for the v column.
    let mut m = Matrix3::<f64>::zeros();
    let mut u = Vector3::<f64>::zeros();
    let mut v = Vector3::<f64>::zeros();
    for k in 0..3 {
        m[(k, 0)] = src_n[k].x;
        m[(k, 1)] = src_n[k].y;
        m[(k, 2)] = 1.0;
        u[k] = dst_n[k].x;
        v[k] = dst_n[k].y;
    }

    let lu = m.lu();
    let a = lu.solve(&u).ok_or(HomographyError::DegenerateConfiguration)?;
    let b = lu.solve(&v).ok_or(HomographyError::DegenerateConfiguration)?;

    let hn = Matrix3::<f64>::new(
        a[0], a[1], a[2], //
        b[0], b[1], b[2], //
        0.0, 0.0, 1.0,
    );
    denormalize_homography(hn, t_src, t_dst)
}

/// Compute H such that: dst ~ H * src (projective), using 4 point correspondences.
///
/// Corner order must be consistent between `src` and `dst`.
fn homography_from_4pt(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    // For each correspondence (x,y)->(u,v):
    // h11 x + h12 y + h13 - u h31 x - u h32 y = u
    // h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);
    if any_collinear_triple(&src_n) || any_collinear_triple(&dst_n) {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let x = src_n[k].x;
        let y = src_n[k].y;
        let u = dst_n[k].x;
        let v = dst_n[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a
        .lu()
        .solve(&b)
        .ok_or(HomographyError::DegenerateConfiguration)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    denormalize_homography(hn, t_src, t_dst)
}

/// Least-squares projective fit over N > 4 pairs (normalised DLT).
fn homography_dlt(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    let (r, tr) = normalize_points(src);
    let (i, ti) = normalize_points(dst);

    // Build A (2N x 9)
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);

    for k in 0..n {
        let x = r[k].x;
        let y = r[k].y;
        let u = i[k].x;
        let v = i[k].y;

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Solve Ah = 0: h is the right singular vector of the smallest singular value.
    let svd = a.svd(false, true);
    let vt = svd.v_t.ok_or(HomographyError::DegenerateConfiguration)?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&p, &q| svd.singular_values[p].total_cmp(&svd.singular_values[q]));
    let smallest = order[0];
    let second = svd.singular_values[order[1]];
    let largest = svd.singular_values[order[order.len() - 1]];
    // A one-dimensional null space is required for a unique solution.
    if largest <= 0.0 || second <= RANK_EPS * largest {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let h = vt.row(smallest);
    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    // Denormalize: H = Ti^{-1} * Hn * Tr
    denormalize_homography(hn, tr, ti)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn perspective() -> Homography {
        Homography::new(Matrix3::new(
            0.8, 0.05, 120.0, //
            -0.02, 1.1, 80.0, //
            0.0009, -0.0004, 1.0,
        ))
    }

    fn correspondence(gt: &Homography, src: &[Point2<f64>]) -> Correspondence {
        let dst = src.iter().map(|&p| gt.try_apply(p).expect("finite")).collect();
        Correspondence::new(src.to_vec(), dst).expect("aligned")
    }

    #[test]
    fn identity_leaves_points_unchanged() {
        let h = Homography::identity();
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(-12.5, 3.25),
            Point2::new(640.0, 480.0),
        ] {
            assert_close(h.try_apply(p).expect("apply"), p, 1e-12);
        }
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.2, 0.1, 5.0, //
            -0.05, 0.9, 3.0, //
            0.001, 0.0005, 1.0,
        ));
        let inv = h.inverse().expect("invertible");

        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(50.0, -20.0),
            Point2::new(320.0, 200.0),
        ] {
            let q = h.try_apply(p).expect("forward");
            let back = inv.try_apply(q).expect("backward");
            assert_close(back, p, 1e-9);
        }
    }

    #[test]
    fn four_point_specialization_recovers_h() {
        let ground_truth = perspective();
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(180.0, 0.0),
            Point2::new(180.0, 130.0),
            Point2::new(0.0, 130.0),
        ];
        let pairs = correspondence(&ground_truth, &rect);

        let recovered = estimate_transform(&pairs).expect("recoverable");
        assert!(!recovered.is_affine());

        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(150.0, 120.0),
        ] {
            assert_close(
                recovered.try_apply(p).expect("apply"),
                ground_truth.try_apply(p).expect("apply"),
                1e-6,
            );
        }
    }

    #[test]
    fn dlt_handles_overdetermined_case() {
        let ground_truth = Homography::new(Matrix3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ));

        let rect: Vec<Point2<f64>> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point2::new(x as f64 * 40.0, y as f64 * 50.0)))
            .collect();
        let pairs = correspondence(&ground_truth, &rect);

        let estimated = estimate_transform(&pairs).expect("estimate");
        for e in estimated.reprojection_errors(&pairs).expect("errors") {
            assert!(e < 1e-6, "reprojection error {e}");
        }
        for p in [Point2::new(60.0, 40.0), Point2::new(80.0, 100.0)] {
            assert_close(
                estimated.try_apply(p).expect("apply"),
                ground_truth.try_apply(p).expect("apply"),
                1e-6,
            );
        }
    }

    #[test]
    fn three_pairs_give_exact_affine() {
        let ground_truth = Homography::new(Matrix3::new(
            0.9, -0.2, 40.0, //
            0.15, 1.05, -12.0, //
            0.0, 0.0, 1.0,
        ));
        let src = [
            Point2::new(10.0, 10.0),
            Point2::new(300.0, 20.0),
            Point2::new(40.0, 220.0),
        ];
        let pairs = correspondence(&ground_truth, &src);

        let affine = estimate_transform(&pairs).expect("affine");
        assert!(affine.is_affine());
        assert_close(
            affine.try_apply(Point2::new(123.0, 77.0)).expect("apply"),
            ground_truth.try_apply(Point2::new(123.0, 77.0)).expect("apply"),
            1e-9,
        );
    }

    #[test]
    fn projective_entry_point_rejects_three_pairs() {
        let src = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        assert_eq!(
            estimate_homography(&src, &src).unwrap_err(),
            HomographyError::InsufficientCorrespondence {
                required: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn too_few_pairs_are_rejected() {
        let pairs = Correspondence::new(vec![Point2::origin(); 2], vec![Point2::origin(); 2])
            .expect("aligned");
        assert_eq!(
            estimate_transform(&pairs).unwrap_err(),
            HomographyError::InsufficientCorrespondence {
                required: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn collinear_sources_are_degenerate() {
        let affine_src = [Point2::new(0.0, 0.0), Point2::new(5.0, 5.0), Point2::new(9.0, 9.0)];
        let dst = [Point2::new(1.0, 0.0), Point2::new(4.0, 2.0), Point2::new(0.0, 7.0)];
        let pairs = Correspondence::new(affine_src.to_vec(), dst.to_vec()).expect("aligned");
        assert_eq!(
            estimate_transform(&pairs).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );

        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(20.0, 0.0),
            Point2::new(0.0, 10.0),
        ];
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(12.0, 1.0),
            Point2::new(19.0, 3.0),
            Point2::new(1.0, 11.0),
        ];
        assert_eq!(
            estimate_homography(&src, &dst).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );
    }

    #[test]
    fn all_collinear_overdetermined_is_degenerate() {
        let src: Vec<Point2<f64>> = (0..6).map(|k| Point2::new(k as f64, 2.0 * k as f64)).collect();
        let dst: Vec<Point2<f64>> = (0..6).map(|k| Point2::new(3.0 * k as f64, 1.0)).collect();
        assert_eq!(
            estimate_homography(&src, &dst).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );
    }

    #[test]
    fn duplicate_points_are_degenerate() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 10.0),
        ];
        assert_eq!(
            estimate_homography(&src, &src).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );
    }

    #[test]
    fn near_zero_divisor_is_reported() {
        // w' = x, so any point on the line x = 0 maps to infinity.
        let h = Homography::from_array([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        let err = h.try_apply(Point2::new(0.0, 5.0)).unwrap_err();
        assert!(matches!(err, HomographyError::DegenerateProjection { .. }));
        assert!(h.try_apply(Point2::new(2.0, 5.0)).is_ok());
    }

    #[test]
    fn mismatched_input_lengths_fail() {
        let rect = [Point2::new(0.0, 0.0); 4];
        let img = [Point2::new(1.0, 1.0); 3];
        assert_eq!(
            estimate_homography(&rect, &img).unwrap_err(),
            HomographyError::MismatchedLengths { src: 4, dst: 3 }
        );
    }

    #[test]
    fn array_round_trip_preserves_layout() {
        let h = perspective();
        assert_eq!(Homography::from_array(h.to_array()), h);
    }
}
