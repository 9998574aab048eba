// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Involute gear profiles
//!
//! A tooth flank is the involute of the base circle, sampled until it leaves
//! the addendum circle. The opposite flank is its mirror image about the
//! tooth's centre ray, and the closed one-tooth shape is replicated around the
//! gear centre.

use crate::error::{Error, Result};
use crate::utils::math::{deg_to_rad, rotate_2d};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Default angular step when sampling the involute, in radians
pub const DEFAULT_INVOLUTE_STEP: f64 = 0.05;

/// Derived gear dimensions. Recomputed wholesale from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GearSpec {
    pub teeth: u32,
    pub module: f64,
    pub pitch_angle: f64,
    pub pitch_radius: f64,
    pub base_radius: f64,
    pub addendum: f64,
    pub dedendum: f64,
    pub max_radius: f64,
    pub min_radius: f64,
    /// Pressure angle in radians
    pub pressure_angle: f64,
    pub alpha: f64,
}

impl GearSpec {
    pub fn new(teeth: u32, module: f64, pressure_angle_deg: f64) -> Result<Self> {
        if teeth < 3 {
            return Err(Error::invalid("Gear", "teeth", format!("need at least 3 teeth, got {teeth}")));
        }
        if !module.is_finite() || module <= 0.0 {
            return Err(Error::invalid("Gear", "module", format!("must be positive, got {module}")));
        }
        if !pressure_angle_deg.is_finite() || pressure_angle_deg <= 0.0 || pressure_angle_deg >= 90.0 {
            return Err(Error::invalid(
                "Gear",
                "pressureAngle",
                format!("must lie in (0, 90) degrees, got {pressure_angle_deg}"),
            ));
        }

        let pressure_angle = deg_to_rad(pressure_angle_deg);
        let pitch_angle = TAU / teeth as f64;
        let pitch_radius = module * teeth as f64 / 2.0;
        let base_radius = pitch_radius * pressure_angle.cos();
        let addendum = module;
        let dedendum = 1.2 * module;
        let max_radius = pitch_radius + addendum;
        let min_radius = pitch_radius - dedendum;
        let alpha = ((pitch_radius / base_radius).powi(2) - 1.0).sqrt() - pressure_angle;

        if min_radius <= 0.0 {
            return Err(Error::invalid(
                "Gear",
                "teeth",
                format!("root radius {min_radius} is not positive"),
            ));
        }

        Ok(Self {
            teeth,
            module,
            pitch_angle,
            pitch_radius,
            base_radius,
            addendum,
            dedendum,
            max_radius,
            min_radius,
            pressure_angle,
            alpha,
        })
    }

    /// Pressure angle in degrees
    pub fn pressure_angle_deg(&self) -> f64 {
        self.pressure_angle.to_degrees()
    }

    /// Involute point at roll angle `t`
    pub fn involute_point(&self, t: f64) -> Point2<f64> {
        let (sin, cos) = t.sin_cos();
        Point2::new(
            self.base_radius * (cos + t * sin),
            self.base_radius * (sin - t * cos),
        )
    }

    /// Roll angle at which the involute reaches the addendum circle
    pub fn involute_end(&self) -> f64 {
        ((self.max_radius / self.base_radius).powi(2) - 1.0).sqrt()
    }

    /// First flank: samples every `step` radians, ending exactly on the
    /// addendum circle
    pub fn involute_flank(&self, step: f64) -> Vec<Point2<f64>> {
        let step = if step.is_finite() && step > 0.0 { step } else { DEFAULT_INVOLUTE_STEP };
        let mut points = Vec::new();
        let mut t = 0.0;
        loop {
            let point = self.involute_point(t);
            if point.coords.norm() >= self.max_radius {
                break;
            }
            points.push(point);
            t += step;
        }
        points.push(self.involute_point(self.involute_end()));
        points
    }

    /// Closed one-tooth profile: flank, mirrored flank, root, origin
    pub fn tooth_profile(&self, step: f64) -> Vec<Point2<f64>> {
        let mut profile = self.tooth_outline(step);
        profile.push(Point2::origin());
        profile
    }

    /// Full gear outline, counter-clockwise, without the centre point.
    /// Star-shaped about the origin.
    pub fn outline(&self, step: f64) -> Vec<Point2<f64>> {
        let tooth = self.tooth_outline(step);
        let mut outline = Vec::with_capacity(tooth.len().checked_mul(self.teeth as usize).unwrap_or(0));
        for k in 0..self.teeth {
            let angle = k as f64 * self.pitch_angle;
            outline.extend(tooth.iter().map(|p| rotate_2d(p, angle)));
        }
        outline
    }

    /// Number of points [`GearSpec::outline`] yields, or `None` on overflow
    pub fn outline_len(&self, step: f64) -> Option<usize> {
        self.tooth_outline(step).len().checked_mul(self.teeth as usize)
    }

    fn tooth_outline(&self, step: f64) -> Vec<Point2<f64>> {
        let flank = self.involute_flank(step);
        let theta = self.pitch_angle / 4.0 + self.alpha;
        let (sin2, cos2) = (2.0 * theta).sin_cos();
        let mirrored = flank
            .iter()
            .rev()
            .map(|p| Point2::new(cos2 * p.x + sin2 * p.y, sin2 * p.x - cos2 * p.y));

        let mut points: Vec<Point2<f64>> = flank.clone();
        points.extend(mirrored);

        let root_angle = self.pitch_angle * 0.5 + 2.0 * self.alpha;
        points.push(polar(self.min_radius, root_angle));
        points.push(polar(self.min_radius, self.pitch_angle));
        points
    }
}

fn polar(radius: f64, angle: f64) -> Point2<f64> {
    let (sin, cos) = angle.sin_cos();
    Point2::new(radius * cos, radius * sin)
}
