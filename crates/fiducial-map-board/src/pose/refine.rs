//! Levenberg-Marquardt refinement of `(rvec, tvec)` on pixel reprojection error.

use nalgebra::{Matrix6, Point2, Point3, Rotation3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::camera::CameraModel;

/// Parameters of the LM refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmParams {
    pub max_iters: usize,
    /// Stop once an accepted step lowers the squared error by less than
    /// this fraction.
    pub rel_tol: f64,
    pub lambda_init: f64,
    pub lambda_mul: f64,
}

impl Default for LmParams {
    fn default() -> Self {
        Self {
            max_iters: 50,
            rel_tol: 1e-12,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Refined {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    pub rmse: f64,
    pub iterations: usize,
    pub converged: bool,
}

// Mean squared pixel error below which the fit is considered exact.
const EXACT_MSE: f64 = 1e-24;
const LAMBDA_MAX: f64 = 1e16;

struct Problem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    camera: &'a CameraModel,
}

impl Problem<'_> {
    /// Fill `out` with `[du0, dv0, du1, dv1, ..]`; returns the squared error,
    /// or infinity when a point falls behind the camera.
    fn residuals(&self, x: &Vector6<f64>, out: &mut [f64]) -> f64 {
        let r = Rotation3::new(Vector3::new(x[0], x[1], x[2]));
        let t = Vector3::new(x[3], x[4], x[5]);
        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in self.object.iter().zip(self.image).enumerate() {
            let pc = Point3::from(r * pw.coords + t);
            match self.camera.project(&pc) {
                Ok(p) => {
                    let (du, dv) = (p.x - uv.x, p.y - uv.y);
                    out[2 * i] = du;
                    out[2 * i + 1] = dv;
                    sum_sq += du * du + dv * dv;
                }
                Err(_) => {
                    out[2 * i] = 0.0;
                    out[2 * i + 1] = 0.0;
                    sum_sq = f64::INFINITY;
                }
            }
        }
        sum_sq
    }
}

pub(crate) fn refine_pose(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &CameraModel,
    rvec: Vector3<f64>,
    tvec: Vector3<f64>,
    params: &LmParams,
) -> Refined {
    let problem = Problem {
        object,
        image,
        camera,
    };
    let n = object.len();
    let m = 2 * n;

    let mut x = Vector6::new(rvec.x, rvec.y, rvec.z, tvec.x, tvec.y, tvec.z);
    let mut residuals = vec![0.0; m];
    let mut trial = vec![0.0; m];
    let mut plus = vec![0.0; m];
    let mut minus = vec![0.0; m];
    let mut jac = vec![[0.0f64; 6]; m];

    let mut err = problem.residuals(&x, &mut residuals);
    let mut lambda = params.lambda_init;
    let mut iterations = 0;
    let mut converged = err / m.max(1) as f64 <= EXACT_MSE;

    while !converged && iterations < params.max_iters {
        iterations += 1;

        const H_ROT: f64 = 1e-7;
        let h_trans = 1e-7 * x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        for k in 0..6 {
            let h = if k < 3 { H_ROT } else { h_trans };
            let mut xp = x;
            let mut xm = x;
            xp[k] += h;
            xm[k] -= h;
            problem.residuals(&xp, &mut plus);
            problem.residuals(&xm, &mut minus);
            for i in 0..m {
                jac[i][k] = (plus[i] - minus[i]) / (2.0 * h);
            }
        }

        let mut a = Matrix6::<f64>::zeros();
        let mut g = Vector6::<f64>::zeros();
        for (row, &r) in jac.iter().zip(&residuals) {
            let j = Vector6::from_row_slice(row);
            a += j * j.transpose();
            g += j * r;
        }

        loop {
            let damped = a + Matrix6::identity() * lambda;
            let step = damped.lu().solve(&(-g));
            let Some(delta) = step else {
                lambda *= params.lambda_mul;
                if lambda > LAMBDA_MAX {
                    break;
                }
                continue;
            };

            let x_new = x + delta;
            let err_new = problem.residuals(&x_new, &mut trial);
            if err_new < err {
                let decrease = err - err_new;
                x = x_new;
                std::mem::swap(&mut residuals, &mut trial);
                err = err_new;
                lambda = (lambda / params.lambda_mul).max(1e-12);
                if decrease <= params.rel_tol * (err + decrease)
                    || err / m as f64 <= EXACT_MSE
                {
                    converged = true;
                }
                break;
            }

            lambda *= params.lambda_mul;
            if lambda > LAMBDA_MAX {
                break;
            }
        }

        if lambda > LAMBDA_MAX {
            // No descent direction left: the current estimate is a minimum.
            converged = true;
        }
    }

    let rmse = if m == 0 { 0.0 } else { (err / m as f64).sqrt() };
    Refined {
        rvec: Vector3::new(x[0], x[1], x[2]),
        tvec: Vector3::new(x[3], x[4], x[5]),
        rmse,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraIntrinsics, Distortion};
    use approx::assert_relative_eq;

    #[test]
    fn refine_pulls_perturbed_pose_back() {
        let camera = CameraModel::with_distortion(
            CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0),
            Distortion::from_coefficients(&[-0.08, 0.01, 0.0, 0.0]).expect("coeffs"),
        );
        let rvec = Vector3::new(0.05, 0.2, -0.1);
        let tvec = Vector3::new(0.02, -0.03, 0.9);
        let r = Rotation3::new(rvec);

        let object: Vec<Point3<f64>> = (0..4)
            .flat_map(|y| (0..4).map(move |x| Point3::new(x as f64 * 0.05, y as f64 * 0.05, 0.0)))
            .collect();
        let image: Vec<Point2<f64>> = object
            .iter()
            .map(|p| {
                camera
                    .project(&Point3::from(r * p.coords + tvec))
                    .expect("visible")
            })
            .collect();

        let refined = refine_pose(
            &object,
            &image,
            &camera,
            rvec + Vector3::new(0.02, -0.01, 0.015),
            tvec + Vector3::new(0.01, 0.005, -0.03),
            &LmParams::default(),
        );
        assert!(refined.converged);
        assert!(refined.rmse < 1e-6, "rmse {}", refined.rmse);
        assert_relative_eq!(refined.rvec, rvec, epsilon = 1e-6);
        assert_relative_eq!(refined.tvec, tvec, epsilon = 1e-6);
    }
}
