// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry invariants: primitive counts, gears and booleans

use anyhow::Result;
use approx::assert_relative_eq;
use polyforge::geometry::mesh_utils::{is_closed, signed_volume};
use polyforge::geometry::{combine, GearId};
use polyforge::{CsgOp, GearTrain, Mesh, PrimitiveDescriptor, ShapeParams, Synthesizer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_descriptor(rng: &mut StdRng) -> (PrimitiveDescriptor, usize) {
    match rng.gen_range(0..3) {
        0 => (
            PrimitiveDescriptor::cube(rng.gen_range(0.1..10.0), rng.gen_range(0.1..10.0), rng.gen_range(0.1..10.0)),
            12,
        ),
        1 => {
            let w = rng.gen_range(3..24u32);
            let h = rng.gen_range(3..24u32);
            let descriptor = PrimitiveDescriptor::new(ShapeParams::Sphere {
                radius: Some(rng.gen_range(0.1..5.0)),
                width_segments: Some(w),
                height_segments: Some(h),
            });
            (descriptor, 2 * (w as usize) * (h as usize - 1))
        }
        _ => {
            let n = rng.gen_range(3..48u32);
            let descriptor = PrimitiveDescriptor::new(ShapeParams::Cylinder {
                radius: Some(rng.gen_range(0.1..5.0)),
                height: Some(rng.gen_range(0.1..5.0)),
                radial_segments: Some(n),
            });
            (descriptor, 4 * n as usize)
        }
    }
}

#[test]
fn test_random_descriptors_have_valid_indices() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let synthesizer = Synthesizer::default();

    for _ in 0..64 {
        let (descriptor, expected_triangles) = random_descriptor(&mut rng);
        let mesh = synthesizer.synthesize(&descriptor)?;
        mesh.validate_indices()?;
        assert_eq!(mesh.triangle_count(), expected_triangles, "{descriptor:?}");
        assert!(is_closed(&mesh), "{descriptor:?}");
    }
    Ok(())
}

#[test]
fn test_parallel_synthesis_isolates_failures() {
    let descriptors = vec![
        PrimitiveDescriptor::cube(1.0, 1.0, 1.0),
        PrimitiveDescriptor::sphere(-1.0),
        PrimitiveDescriptor::cylinder(1.0, 2.0),
    ];
    let results = Synthesizer::default().synthesize_all(&descriptors);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
}

#[test]
fn test_meshing_gear_speed_ratio() -> Result<()> {
    let mut train = GearTrain::new();
    let driver = train.add_root(12, 1.5, 20.0)?;
    let driven = train.add_gear(driver, 30, 0.7)?;

    let ratio = train.rotation_speed(driver)?.abs() / train.rotation_speed(driven)?.abs();
    assert_eq!(ratio, 30.0 / 12.0);
    assert!(train.rotation_speed(driven)? < 0.0);
    Ok(())
}

#[test]
fn test_gear_train_follows_driver() -> Result<()> {
    let mut train = GearTrain::new();
    let ids: Vec<GearId> = {
        let a = train.add_root(10, 2.0, 20.0)?;
        let b = train.add_gear(a, 15, 0.0)?;
        let c = train.add_gear(b, 40, 2.0)?;
        vec![a, b, c]
    };

    let before: Vec<f64> = ids.iter().map(|&id| train.rotation(id)).collect::<Result<_, _>>()?;
    train.drive_by(0.125);
    for (&id, old) in ids.iter().zip(before) {
        assert_relative_eq!(
            train.rotation(id)? - old,
            0.125 * train.rotation_speed(id)?,
            epsilon = 1e-12
        );
    }
    Ok(())
}

#[test]
fn test_gear_primitive_is_closed() -> Result<()> {
    let mesh = Synthesizer::default().synthesize(&PrimitiveDescriptor::gear(17, 2.0))?;
    mesh.validate_indices()?;
    assert!(is_closed(&mesh));
    assert!(signed_volume(&mesh) > 0.0);
    Ok(())
}

#[test]
fn test_union_with_empty_is_identity() -> Result<()> {
    let a = Synthesizer::default().synthesize(&PrimitiveDescriptor::sphere(2.0))?;
    let result = combine(CsgOp::Union, a.clone(), Mesh::empty());
    assert_eq!(result, a);
    Ok(())
}

#[test]
fn test_subtract_keeps_operand_order() -> Result<()> {
    let synthesizer = Synthesizer::default();
    let big = synthesizer.synthesize(&PrimitiveDescriptor::cube(4.0, 4.0, 4.0))?;
    let small = synthesizer.synthesize(&PrimitiveDescriptor::cube(1.0, 1.0, 1.0))?;

    let carved = combine(CsgOp::Subtract, big.clone(), small.clone());
    assert_relative_eq!(signed_volume(&carved), 63.0, epsilon = 1e-9);

    let nothing = combine(CsgOp::Subtract, small, big);
    assert_relative_eq!(signed_volume(&nothing), 0.0, epsilon = 1e-9);
    Ok(())
}
