// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Math utilities

use nalgebra::{Matrix4, Point2, Point3, Rotation3, Vector3};

/// Unit normal of a triangle, or zero for a degenerate triangle
pub fn triangle_normal(p0: &Point3<f64>, p1: &Point3<f64>, p2: &Point3<f64>) -> Vector3<f64> {
    let cross = (p1 - p0).cross(&(p2 - p0));
    let len = cross.norm();
    if len > 0.0 && len.is_finite() {
        cross / len
    } else {
        Vector3::zeros()
    }
}

/// Rotation about the origin in the XY plane
pub fn rotate_2d(point: &Point2<f64>, angle: f64) -> Point2<f64> {
    let (sin, cos) = angle.sin_cos();
    Point2::new(cos * point.x - sin * point.y, sin * point.x + cos * point.y)
}

/// Translation-after-rotation matrix. Euler angles in radians, applied X then
/// Y then Z about the local axes (`R = Rx * Ry * Rz`).
pub fn local_matrix(position: &[f64; 3], rotation: &[f64; 3]) -> Matrix4<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), rotation[0]);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), rotation[1]);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), rotation[2]);
    let translation = Matrix4::new_translation(&Vector3::new(position[0], position[1], position[2]));
    translation * (rx * ry * rz).to_homogeneous()
}

/// Convert degrees to radians
pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}
