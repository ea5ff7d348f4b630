use crate::{DerivativeLevel, FrameId, FrameQuaternion, FrameVector, EPS};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3×3 tensor built out of three row vectors, each carrying its own frame
/// tag. Used for inertia (and inverse-inertia) tensors, whose rows are
/// stored as vector variables on a body.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub rows: [FrameVector; 3],
}

impl Tensor {
    pub fn from_rows(x: FrameVector, y: FrameVector, z: FrameVector) -> Self {
        Self { rows: [x, y, z] }
    }

    /// Zero tensor with position-level rows in the given frame.
    pub fn zero(frame: FrameId) -> Self {
        let row = FrameVector::zero(DerivativeLevel::Position, frame);
        Self {
            rows: [row, row, row],
        }
    }

    pub fn from_matrix(frame: FrameId, m: &Matrix3<f64>) -> Self {
        let row = |i: usize| {
            FrameVector::from_raw(
                DerivativeLevel::Position,
                frame,
                Vector3::new(m[(i, 0)], m[(i, 1)], m[(i, 2)]),
            )
        };
        Self {
            rows: [row(0), row(1), row(2)],
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_rows(&[
            self.rows[0].raw.transpose(),
            self.rows[1].raw.transpose(),
            self.rows[2].raw.transpose(),
        ])
    }

    fn with_matrix(&self, m: Matrix3<f64>) -> Tensor {
        let mut out = *self;
        for i in 0..3 {
            out.rows[i].raw = Vector3::new(m[(i, 0)], m[(i, 1)], m[(i, 2)]);
        }
        out
    }

    /// `M · v`; the result inherits the frame and level of `v`.
    pub fn multiply_vector(&self, v: &FrameVector) -> FrameVector {
        FrameVector {
            raw: self.matrix() * v.raw,
            level: v.level,
            frame: v.frame,
            position_in: None,
            velocity_in: None,
        }
    }

    /// Rotates the tensor into the frame of `q`: `R M Rᵀ`, with `R` the
    /// active rotation matrix of the quaternion.
    pub fn rotate(&self, q: &FrameQuaternion) -> Tensor {
        let r = q.rotation_matrix();
        let mut out = self.with_matrix(r * self.matrix() * r.transpose());
        for row in &mut out.rows {
            row.frame = q.frame;
        }
        out
    }

    /// General 3×3 inverse via the adjugate.
    pub fn invert(&self) -> Tensor {
        let m = self.matrix();
        let det = m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
            + m[(0, 1)] * (m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)])
            + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)]);
        let d1 = 1.0 / det;

        let inv = Matrix3::new(
            (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)]) * d1,
            (m[(0, 2)] * m[(2, 1)] - m[(0, 1)] * m[(2, 2)]) * d1,
            (m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)]) * d1,
            (m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)]) * d1,
            (m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)]) * d1,
            (m[(0, 2)] * m[(1, 0)] - m[(0, 0)] * m[(1, 2)]) * d1,
            (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)]) * d1,
            (m[(0, 1)] * m[(2, 0)] - m[(0, 0)] * m[(2, 1)]) * d1,
            (m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]) * d1,
        );
        self.with_matrix(inv)
    }

    /// Closed-form inverse for a symmetric tensor (inertia tensor form).
    ///
    /// The tensor is symmetrized as `½(M + Mᵀ)` first: accumulation over
    /// many child bodies leaves the off-diagonal pairs unequal by more
    /// than machine epsilon.
    pub fn invert_symmetric(&self) -> Tensor {
        let m0 = self.matrix();
        let m = (m0 + m0.transpose()) * 0.5;
        let (a, b, c) = (m[(0, 0)], m[(1, 1)], m[(2, 2)]);
        let (d, e, f) = (m[(0, 1)], m[(0, 2)], m[(1, 2)]);

        let det = a * b * c + 2.0 * d * e * f - a * f * f - b * e * e - c * d * d;
        let d1 = 1.0 / det;

        let k1 = (b * c - f * f) * d1;
        let k2 = (e * f - d * c) * d1;
        let k3 = (d * f - e * b) * d1;
        let k4 = (a * c - e * e) * d1;
        let k5 = (d * e - a * f) * d1;
        let k6 = (a * b - d * d) * d1;

        self.with_matrix(Matrix3::new(k1, k2, k3, k2, k4, k5, k3, k5, k6))
    }

    /// Whether the off-diagonal pairs match within `EPS`.
    pub fn is_symmetric(&self) -> bool {
        let m = self.matrix();
        (m[(1, 0)] - m[(0, 1)]).abs() < EPS
            && (m[(2, 0)] - m[(0, 2)]).abs() < EPS
            && (m[(2, 1)] - m[(1, 2)]).abs() < EPS
    }
}
