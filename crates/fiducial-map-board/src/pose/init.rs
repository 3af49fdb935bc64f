//! Closed-form pose initialisation on undistorted, normalized observations.

use fiducial_map_core::estimate_homography;
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Rotation3, Vector3};

use super::error::PoseError;

const DEGENERATE_EPS: f64 = 1e-12;
const RANK_EPS: f64 = 1e-10;

/// Least-squares plane through a point cloud.
///
/// `basis` is a right-handed orthonormal frame; its third column is the
/// plane normal. `flatness` is the smallest covariance eigenvalue relative to
/// the largest (0 for exactly coplanar input).
#[derive(Clone, Debug)]
pub(crate) struct PlaneFrame {
    pub centroid: Point3<f64>,
    pub basis: Matrix3<f64>,
    pub flatness: f64,
}

pub(crate) fn fit_plane(points: &[Point3<f64>]) -> Option<PlaneFrame> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = Point3::from(
        points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords)
            / n,
    );
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - centroid;
        cov += d * d.transpose();
    }

    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let largest = eig.eigenvalues[order[0]];
    if !(largest > DEGENERATE_EPS) {
        return None;
    }

    let e1 = eig.eigenvectors.column(order[0]).into_owned();
    let e2 = eig.eigenvectors.column(order[1]).into_owned();
    let e3 = e1.cross(&e2);
    Some(PlaneFrame {
        centroid,
        basis: Matrix3::from_columns(&[e1, e2, e3]),
        flatness: eig.eigenvalues[order[2]].max(0.0) / largest,
    })
}

/// Pose of coplanar object points from the plane-to-image homography.
pub(crate) fn planar_init(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
    plane: &PlaneFrame,
) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let bt = plane.basis.transpose();
    let plane_pts: Vec<Point2<f64>> = object
        .iter()
        .map(|p| {
            let q = bt * (p - plane.centroid);
            Point2::new(q.x, q.y)
        })
        .collect();

    let h = estimate_homography(&plane_pts, normalized)?.h;
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 < DEGENERATE_EPS || n2 < DEGENERATE_EPS {
        return Err(PoseError::DegenerateConfiguration);
    }
    let lambda = 2.0 / (n1 + n2);
    let (mut r1, mut r2, mut t) = (h1 * lambda, h2 * lambda, h3 * lambda);
    // The plane centroid must be in front of the camera.
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() < DEGENERATE_EPS {
        return Err(PoseError::DegenerateConfiguration);
    }

    let r_plane = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    let r = r_plane * bt;
    let t = t - r * plane.centroid.coords;
    Ok((Rotation3::from_matrix_unchecked(r), t))
}

/// Pose of general (non-coplanar) object points via a normalised 3x4 DLT.
pub(crate) fn dlt_init(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let n = object.len();
    if n < 6 {
        return Err(PoseError::InsufficientCorrespondence {
            required: 6,
            actual: n,
        });
    }

    let (t3, obj) = normalize_3d(object).ok_or(PoseError::DegenerateConfiguration)?;
    let (t2, img) = normalize_2d(normalized).ok_or(PoseError::DegenerateConfiguration)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (p, q)) in obj.iter().zip(&img).enumerate() {
        let xh = [p.x, p.y, p.z, 1.0];
        for (k, &v) in xh.iter().enumerate() {
            a[(2 * i, k)] = v;
            a[(2 * i, 8 + k)] = -q.x * v;
            a[(2 * i + 1, 4 + k)] = v;
            a[(2 * i + 1, 8 + k)] = -q.y * v;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(PoseError::DegenerateConfiguration)?;
    let sv = &svd.singular_values;
    let mut idx: Vec<usize> = (0..sv.len()).collect();
    idx.sort_by(|&p, &q| sv[p].total_cmp(&sv[q]));
    let (smallest, second, largest) = (idx[0], idx[1], idx[idx.len() - 1]);
    if !(sv[largest] > 0.0) || sv[second] / sv[largest] < RANK_EPS {
        return Err(PoseError::DegenerateConfiguration);
    }

    let row = v_t.row(smallest);
    let p_norm = Matrix3x4::from_fn(|r, c| row[4 * r + c]);
    let t2_inv = t2.try_inverse().ok_or(PoseError::DegenerateConfiguration)?;
    let p = t2_inv * p_norm * t3;

    let mut m = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut last = p.column(3).into_owned();
    if m.determinant() < 0.0 {
        m = -m;
        last = -last;
    }
    let scale = m.svd(false, false).singular_values.mean();
    if !(scale > DEGENERATE_EPS) {
        return Err(PoseError::DegenerateConfiguration);
    }

    let r = nearest_rotation(&m)?;
    let t = last / scale;
    if object.iter().any(|p| (r * p.coords + t).z <= 0.0) {
        return Err(PoseError::DegenerateConfiguration);
    }
    Ok((Rotation3::from_matrix_unchecked(r), t))
}

/// Project onto SO(3) via SVD, keeping `det = +1`.
fn nearest_rotation(m: &Matrix3<f64>) -> Result<Matrix3<f64>, PoseError> {
    let svd = m.svd(true, true);
    let mut u = svd.u.ok_or(PoseError::DegenerateConfiguration)?;
    let v_t = svd.v_t.ok_or(PoseError::DegenerateConfiguration)?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    Ok(u * v_t)
}

fn normalize_3d(points: &[Point3<f64>]) -> Option<(Matrix4<f64>, Vec<Point3<f64>>)> {
    let n = points.len() as f64;
    let c = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<f64>() / n;
    if !(mean_dist > DEGENERATE_EPS) {
        return None;
    }
    let s = 3f64.sqrt() / mean_dist;
    let t = Matrix4::new(
        s, 0.0, 0.0, -s * c.x, //
        0.0, s, 0.0, -s * c.y, //
        0.0, 0.0, s, -s * c.z, //
        0.0, 0.0, 0.0, 1.0,
    );
    let out = points.iter().map(|p| Point3::from((p.coords - c) * s)).collect();
    Some((t, out))
}

fn normalize_2d(points: &[Point2<f64>]) -> Option<(Matrix3<f64>, Vec<Point2<f64>>)> {
    let n = points.len() as f64;
    let c = points
        .iter()
        .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords)
        / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<f64>() / n;
    if !(mean_dist > DEGENERATE_EPS) {
        return None;
    }
    let s = 2f64.sqrt() / mean_dist;
    let t = Matrix3::new(
        s, 0.0, -s * c.x, //
        0.0, s, -s * c.y, //
        0.0, 0.0, 1.0,
    );
    let out = points.iter().map(|p| Point2::from((p.coords - c) * s)).collect();
    Some((t, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(r: &Rotation3<f64>, t: &Vector3<f64>, p: &Point3<f64>) -> Point2<f64> {
        let pc = r * p.coords + t;
        Point2::new(pc.x / pc.z, pc.y / pc.z)
    }

    fn ground_truth() -> (Rotation3<f64>, Vector3<f64>) {
        (
            Rotation3::new(Vector3::new(0.15, -0.25, 0.1)),
            Vector3::new(-0.1, 0.05, 1.2),
        )
    }

    #[test]
    fn plane_fit_reports_flatness() {
        let flat = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let plane = fit_plane(&flat).expect("plane");
        assert!(plane.flatness < 1e-12);
        assert_relative_eq!(plane.basis.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(plane.basis.column(2).z.abs(), 1.0, epsilon = 1e-9);

        let mut bumpy = flat.to_vec();
        bumpy.push(Point3::new(0.5, 0.5, 0.8));
        assert!(fit_plane(&bumpy).expect("plane").flatness > 1e-3);
    }

    #[test]
    fn planar_init_recovers_pose() {
        let (r, t) = ground_truth();
        let object: Vec<Point3<f64>> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point3::new(x as f64 * 0.1, y as f64 * 0.08, 0.0)))
            .collect();
        let image: Vec<Point2<f64>> = object.iter().map(|p| project(&r, &t, p)).collect();

        let plane = fit_plane(&object).expect("plane");
        let (r_est, t_est) = planar_init(&object, &image, &plane).expect("pose");
        assert_relative_eq!(r_est.matrix(), r.matrix(), epsilon = 1e-9);
        assert_relative_eq!(t_est, t, epsilon = 1e-9);
    }

    #[test]
    fn dlt_init_recovers_pose_for_general_points() {
        let (r, t) = ground_truth();
        let object = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.2, 0.0, 0.05),
            Point3::new(0.2, 0.15, -0.04),
            Point3::new(0.0, 0.15, 0.1),
            Point3::new(0.1, 0.07, 0.2),
            Point3::new(-0.08, 0.1, -0.1),
            Point3::new(0.05, -0.1, 0.03),
        ];
        let image: Vec<Point2<f64>> = object.iter().map(|p| project(&r, &t, p)).collect();

        let (r_est, t_est) = dlt_init(&object, &image).expect("pose");
        assert_relative_eq!(r_est.matrix(), r.matrix(), epsilon = 1e-7);
        assert_relative_eq!(t_est, t, epsilon = 1e-7);
    }

    #[test]
    fn dlt_init_needs_six_points() {
        let object = vec![Point3::new(0.0, 0.0, 1.0); 5];
        let image = vec![Point2::new(0.0, 0.0); 5];
        assert_eq!(
            dlt_init(&object, &image).unwrap_err(),
            PoseError::InsufficientCorrespondence {
                required: 6,
                actual: 5
            }
        );
    }
}
