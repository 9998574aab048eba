// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Meshing gear trains
//!
//! Gears live in an arena and refer to their pinion by [`GearId`]. Centre,
//! speed and orientation of a driven gear are always derived from the
//! pinion's current state; only root gears store a position and rotation.

use super::primitives::extrude_star_outline;
use super::{GearSpec, Mesh, DEFAULT_INVOLUTE_STEP};
use crate::error::{Error, Result};
use crate::utils::math::rotate_2d;
use nalgebra::{Point2, Vector2};
use std::f64::consts::PI;

/// Handle into a [`GearTrain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GearId(usize);

impl GearId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Mounting {
    Root {
        center: Point2<f64>,
        rotation: f64,
        speed: f64,
    },
    Driven {
        pinion: GearId,
        angle: f64,
    },
}

#[derive(Debug, Clone)]
struct Gear {
    spec: GearSpec,
    mounting: Mounting,
}

/// Arena of meshing gears
#[derive(Debug, Clone, Default)]
pub struct GearTrain {
    gears: Vec<Gear>,
    involute_step: f64,
}

impl GearTrain {
    pub fn new() -> Self {
        Self::with_involute_step(DEFAULT_INVOLUTE_STEP)
    }

    pub fn with_involute_step(step: f64) -> Self {
        Self {
            gears: Vec::new(),
            involute_step: step,
        }
    }

    pub fn len(&self) -> usize {
        self.gears.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gears.is_empty()
    }

    /// Add a free-standing driver gear at the origin, turning at unit speed
    pub fn add_root(&mut self, teeth: u32, module: f64, pressure_angle_deg: f64) -> Result<GearId> {
        let spec = GearSpec::new(teeth, module, pressure_angle_deg)?;
        Ok(self.push(Gear {
            spec,
            mounting: Mounting::Root {
                center: Point2::origin(),
                rotation: 0.0,
                speed: 1.0,
            },
        }))
    }

    /// Add a gear meshing with `pinion`, placed at `angle` radians around it.
    /// Module and pressure angle are inherited from the pinion.
    pub fn add_gear(&mut self, pinion: GearId, teeth: u32, angle: f64) -> Result<GearId> {
        let pinion_spec = self.gear(pinion)?.spec;
        let spec = GearSpec::new(teeth, pinion_spec.module, pinion_spec.pressure_angle_deg())?;
        Ok(self.push(Gear {
            spec,
            mounting: Mounting::Driven { pinion, angle },
        }))
    }

    pub fn spec(&self, id: GearId) -> Result<&GearSpec> {
        Ok(&self.gear(id)?.spec)
    }

    pub fn pinion(&self, id: GearId) -> Result<Option<GearId>> {
        Ok(match self.gear(id)?.mounting {
            Mounting::Root { .. } => None,
            Mounting::Driven { pinion, .. } => Some(pinion),
        })
    }

    /// Move a root gear; driven gears follow
    pub fn set_center(&mut self, id: GearId, center: Point2<f64>) -> Result<()> {
        match &mut self.gear_mut(id)?.mounting {
            Mounting::Root { center: c, .. } => {
                *c = center;
                Ok(())
            }
            Mounting::Driven { .. } => Err(Error::invalid(
                "Gear",
                "center",
                "a driven gear is positioned by its pinion",
            )),
        }
    }

    /// Set the speed of a root gear
    pub fn set_speed(&mut self, id: GearId, speed: f64) -> Result<()> {
        match &mut self.gear_mut(id)?.mounting {
            Mounting::Root { speed: s, .. } => {
                *s = speed;
                Ok(())
            }
            Mounting::Driven { .. } => Err(Error::invalid(
                "Gear",
                "rotationSpeed",
                "a driven gear's speed follows its pinion",
            )),
        }
    }

    /// Distance between the centres of a gear and its pinion
    pub fn center_distance(&self, id: GearId) -> Result<f64> {
        let gear = self.gear(id)?;
        match gear.mounting {
            Mounting::Root { .. } => Ok(0.0),
            Mounting::Driven { pinion, .. } => {
                let pinion_teeth = self.gear(pinion)?.spec.teeth;
                Ok(gear.spec.module * (gear.spec.teeth + pinion_teeth) as f64 / 2.0)
            }
        }
    }

    pub fn center(&self, id: GearId) -> Result<Point2<f64>> {
        match self.gear(id)?.mounting {
            Mounting::Root { center, .. } => Ok(center),
            Mounting::Driven { pinion, angle } => {
                let (sin, cos) = angle.sin_cos();
                Ok(self.center(pinion)? + Vector2::new(cos, sin) * self.center_distance(id)?)
            }
        }
    }

    /// Pinion teeth over own teeth; 1 for a root gear
    pub fn ratio(&self, id: GearId) -> Result<f64> {
        let gear = self.gear(id)?;
        match gear.mounting {
            Mounting::Root { .. } => Ok(1.0),
            Mounting::Driven { pinion, .. } => {
                Ok(self.gear(pinion)?.spec.teeth as f64 / gear.spec.teeth as f64)
            }
        }
    }

    pub fn rotation_speed(&self, id: GearId) -> Result<f64> {
        match self.gear(id)?.mounting {
            Mounting::Root { speed, .. } => Ok(speed),
            Mounting::Driven { pinion, .. } => Ok(-self.rotation_speed(pinion)? * self.ratio(id)?),
        }
    }

    /// Absolute orientation in radians
    pub fn rotation(&self, id: GearId) -> Result<f64> {
        match self.gear(id)?.mounting {
            Mounting::Root { rotation, .. } => Ok(rotation),
            Mounting::Driven { pinion, angle } => {
                let pinion_rotation = self.rotation(pinion)?;
                Ok(PI + angle + (angle - pinion_rotation) * self.ratio(id)?)
            }
        }
    }

    /// Advance the whole train by `delta` driver radians. Every gear turns
    /// by `delta * rotation_speed`.
    pub fn drive_by(&mut self, delta: f64) {
        for gear in &mut self.gears {
            if let Mounting::Root { rotation, speed, .. } = &mut gear.mounting {
                *rotation += delta * *speed;
            }
        }
    }

    /// Gear outline rotated and translated into its current place
    pub fn outline(&self, id: GearId) -> Result<Vec<Point2<f64>>> {
        let spec = self.spec(id)?;
        let rotation = self.rotation(id)?;
        let center = self.center(id)?;
        Ok(spec
            .outline(self.involute_step)
            .iter()
            .map(|p| rotate_2d(p, rotation) + center.coords)
            .collect())
    }

    /// Extruded gear in its current pose, `thickness` along +z
    pub fn gear_mesh(&self, id: GearId, thickness: f64) -> Result<Mesh> {
        if !thickness.is_finite() || thickness <= 0.0 {
            return Err(Error::invalid("Gear", "thickness", format!("must be positive, got {thickness}")));
        }
        let spec = self.spec(id)?;
        let rotation = self.rotation(id)?;
        let center = self.center(id)?;
        let mut mesh = extrude_star_outline(&spec.outline(self.involute_step), thickness);
        let placement = nalgebra::Isometry3::new(
            nalgebra::Vector3::new(center.x, center.y, 0.0),
            nalgebra::Vector3::z() * rotation,
        );
        mesh.transform(&placement.to_homogeneous());
        Ok(mesh)
    }

    fn push(&mut self, gear: Gear) -> GearId {
        self.gears.push(gear);
        GearId(self.gears.len() - 1)
    }

    fn gear(&self, id: GearId) -> Result<&Gear> {
        self.gears
            .get(id.0)
            .ok_or_else(|| Error::invalid("Gear", "pinion", format!("unknown gear {}", id.0)))
    }

    fn gear_mut(&mut self, id: GearId) -> Result<&mut Gear> {
        self.gears
            .get_mut(id.0)
            .ok_or_else(|| Error::invalid("Gear", "pinion", format!("unknown gear {}", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_center_distance_and_placement() {
        let mut train = GearTrain::new();
        let driver = train.add_root(10, 2.0, 20.0).unwrap();
        let driven = train.add_gear(driver, 20, FRAC_PI_2).unwrap();

        assert_relative_eq!(train.center_distance(driven).unwrap(), 30.0);
        let center = train.center(driven).unwrap();
        assert_relative_eq!(center.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(center.y, 30.0, epsilon = 1e-12);
    }

    #[test]
    fn test_centers_follow_moved_root() {
        let mut train = GearTrain::new();
        let driver = train.add_root(12, 1.0, 20.0).unwrap();
        let driven = train.add_gear(driver, 12, 0.0).unwrap();
        train.set_center(driver, Point2::new(5.0, 5.0)).unwrap();
        assert_relative_eq!(train.center(driven).unwrap().x, 17.0, epsilon = 1e-12);
        assert!(train.set_center(driven, Point2::origin()).is_err());
    }

    #[test]
    fn test_speed_alternates_sign() {
        let mut train = GearTrain::new();
        let a = train.add_root(10, 1.0, 20.0).unwrap();
        let b = train.add_gear(a, 20, 0.0).unwrap();
        let c = train.add_gear(b, 40, 0.0).unwrap();

        assert_eq!(train.rotation_speed(b).unwrap(), -0.5);
        assert_eq!(train.rotation_speed(c).unwrap(), 0.25);
    }

    #[test]
    fn test_drive_by_turns_children_by_their_speed() {
        let mut train = GearTrain::new();
        let a = train.add_root(10, 1.0, 20.0).unwrap();
        let b = train.add_gear(a, 25, 0.3).unwrap();
        let c = train.add_gear(b, 15, 1.1).unwrap();

        let before = [train.rotation(a).unwrap(), train.rotation(b).unwrap(), train.rotation(c).unwrap()];
        train.drive_by(0.2);
        let after = [train.rotation(a).unwrap(), train.rotation(b).unwrap(), train.rotation(c).unwrap()];

        for (i, id) in [a, b, c].into_iter().enumerate() {
            assert_relative_eq!(
                after[i] - before[i],
                0.2 * train.rotation_speed(id).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_gear_mesh_is_placed() {
        let mut train = GearTrain::new();
        let a = train.add_root(10, 1.0, 20.0).unwrap();
        let b = train.add_gear(a, 10, 0.0).unwrap();
        let mesh = train.gear_mesh(b, 2.0).unwrap();
        let bbox = mesh.bounding_box();
        assert_relative_eq!(bbox.center().y, 0.0, epsilon = 0.5);
        assert!(bbox.center().x > 8.0);
        assert_relative_eq!(bbox.max.z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_pinion() {
        let mut train = GearTrain::new();
        let other = {
            let mut t = GearTrain::new();
            t.add_root(10, 1.0, 20.0).unwrap();
            t.add_root(10, 1.0, 20.0).unwrap()
        };
        assert!(train.add_gear(other, 10, 0.0).is_err());
    }
}
