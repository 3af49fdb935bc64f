//! Pinhole camera with OpenCV-order polynomial distortion.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

const UNDISTORT_MAX_ITERS: usize = 20;
const UNDISTORT_TOL: f64 = 1e-14;
const MIN_DEPTH: f64 = 1e-12;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("invalid intrinsics matrix: {0}")]
    InvalidIntrinsics(&'static str),
    #[error("expected 0, 4, 5 or 8 distortion coefficients, got {0}")]
    InvalidDistortionLength(usize),
    #[error("distortion coefficients must be finite")]
    NonFiniteDistortion,
    #[error("failed to undistort pixel ({x}, {y})")]
    UndistortFailed { x: f64, y: f64 },
    #[error("point at depth {z:e} is not in front of the camera")]
    BehindCamera { z: f64 },
}

/// Pinhole intrinsics `K = [[fx, skew, cx], [0, fy, cy], [0, 0, 1]]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    /// Build from a 3x3 camera matrix, validating its upper-triangular form.
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, CameraError> {
        if k.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics("entries must be finite"));
        }
        if k[(1, 0)] != 0.0 || k[(2, 0)] != 0.0 || k[(2, 1)] != 0.0 || k[(2, 2)] != 1.0 {
            return Err(CameraError::InvalidIntrinsics(
                "expected [[fx, s, cx], [0, fy, cy], [0, 0, 1]]",
            ));
        }
        if k[(0, 0)] <= 0.0 || k[(1, 1)] <= 0.0 {
            return Err(CameraError::InvalidIntrinsics("focal lengths must be > 0"));
        }
        Ok(Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        })
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    #[inline]
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * p.x + self.skew * p.y + self.cx,
            self.fy * p.y + self.cy,
        )
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Point2::new(x, y)
    }
}

/// Radial + tangential distortion, coefficients in OpenCV order
/// `k1, k2, p1, p2, k3, k4, k5, k6`. Missing trailing terms are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    /// Accepts 0, 4, 5 or 8 coefficients.
    pub fn from_coefficients(c: &[f64]) -> Result<Self, CameraError> {
        if !matches!(c.len(), 0 | 4 | 5 | 8) {
            return Err(CameraError::InvalidDistortionLength(c.len()));
        }
        if c.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::NonFiniteDistortion);
        }
        let at = |i: usize| c.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
            k4: at(5),
            k5: at(6),
            k6: at(7),
        })
    }

    pub fn coefficients(&self) -> [f64; 8] {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
    }

    pub fn is_identity(&self) -> bool {
        self.coefficients().iter().all(|&v| v == 0.0)
    }

    /// Rational radial factor numerator / denominator at squared radius `r2`.
    #[inline]
    fn radial_terms(&self, r2: f64) -> (f64, f64) {
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        (
            1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6,
            1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6,
        )
    }

    /// Distort a normalized (ideal) image point.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let (num, den) = self.radial_terms(r2);
        let radial = num / den;
        Point2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, d: Point2<f64>) -> Option<Point2<f64>> {
        if self.is_identity() {
            return Some(d);
        }
        let (mut x, mut y) = (d.x, d.y);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let (num, den) = self.radial_terms(r2);
            let icdist = den / num;
            if !icdist.is_finite() || icdist <= 0.0 {
                return None;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (d.x - dx) * icdist;
            let ny = (d.y - dy) * icdist;
            let step = (nx - x).abs().max((ny - y).abs());
            x = nx;
            y = ny;
            if step < UNDISTORT_TOL {
                break;
            }
        }
        (x.is_finite() && y.is_finite()).then(|| Point2::new(x, y))
    }
}

/// Intrinsics plus distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: Distortion::none(),
        }
    }

    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a point given in camera coordinates to pixels.
    pub fn project(&self, pc: &Point3<f64>) -> Result<Point2<f64>, CameraError> {
        if !(pc.z > MIN_DEPTH) {
            return Err(CameraError::BehindCamera { z: pc.z });
        }
        let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
        Ok(self.intrinsics.normalized_to_pixel(self.distortion.distort(n)))
    }

    /// Map an observed pixel to an ideal normalized image point.
    pub fn undistort_to_normalized(&self, pixel: Point2<f64>) -> Result<Point2<f64>, CameraError> {
        let d = self.intrinsics.pixel_to_normalized(pixel);
        self.distortion
            .undistort(d)
            .ok_or(CameraError::UndistortFailed {
                x: pixel.x,
                y: pixel.y,
            })
    }
}
