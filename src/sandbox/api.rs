// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Rhai API exposed to untrusted scene code
//!
//! Only the functions registered here are reachable from a script: shape
//! constructors, transforms, booleans, a scene handle, `export_stl` and the
//! console. `eval` is disabled and modules resolve only from the request's
//! own code units.

use super::protocol::HostMessage;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::geometry::{CsgOp, PrimitiveDescriptor, ShapeParams, Synthesizer};
use crate::scene::{CsgTree, SceneNode};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, ParseError, Position, INT};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type ScriptResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Where `export_stl` leaves the exported scene
pub(crate) type ExportSlot = Rc<RefCell<Option<Vec<SceneNode>>>>;

#[derive(Debug, Clone)]
enum ShapeBody {
    Primitive(PrimitiveDescriptor),
    Boolean {
        op: CsgOp,
        left: Box<ScriptShape>,
        right: Box<ScriptShape>,
    },
}

/// A shape value inside a script. Geometry is synthesized on export.
#[derive(Debug, Clone)]
pub struct ScriptShape {
    body: ShapeBody,
    position: [f64; 3],
    rotation: [f64; 3],
    color: Option<String>,
    /// Boolean nesting below this shape; 0 for a primitive
    depth: usize,
    /// Primitives in this shape
    primitives: usize,
}

impl ScriptShape {
    fn primitive(shape: ShapeParams) -> Self {
        Self {
            body: ShapeBody::Primitive(PrimitiveDescriptor::new(shape)),
            position: [0.0; 3],
            rotation: [0.0; 3],
            color: None,
            depth: 0,
            primitives: 1,
        }
    }

    fn boolean(
        op: CsgOp,
        left: ScriptShape,
        right: ScriptShape,
        limits: &ShapeLimits,
    ) -> ScriptResult<Self> {
        let depth = left.depth.max(right.depth) + 1;
        if depth > limits.max_csg_depth {
            let message = format!("boolean nesting is limited to {} levels", limits.max_csg_depth);
            return Err(message.into());
        }
        let primitives = limits.check_primitives(left.primitives + right.primitives)?;
        Ok(Self {
            body: ShapeBody::Boolean {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            position: [0.0; 3],
            rotation: [0.0; 3],
            color: None,
            depth,
            primitives,
        })
    }

    fn kind_name(&self) -> &'static str {
        match &self.body {
            ShapeBody::Primitive(descriptor) => descriptor.kind_name(),
            ShapeBody::Boolean { op: CsgOp::Union, .. } => "Union",
            ShapeBody::Boolean { op: CsgOp::Subtract, .. } => "Subtract",
            ShapeBody::Boolean { op: CsgOp::Intersect, .. } => "Intersect",
        }
    }

    /// Synthesize into a scene node carrying this shape's pose
    pub fn into_node(self, synthesizer: &Synthesizer) -> Result<SceneNode> {
        let node = match self.body {
            ShapeBody::Primitive(descriptor) => SceneNode::from_descriptor(synthesizer, &descriptor)?,
            ShapeBody::Boolean { op, left, right } => SceneNode::csg(CsgTree::combine(
                op,
                CsgTree::leaf(left.into_node(synthesizer)?),
                CsgTree::leaf(right.into_node(synthesizer)?),
            )),
        };
        Ok(SceneNode {
            position: self.position,
            rotation: self.rotation,
            color: self.color,
            ..node
        })
    }
}

/// The `scene()` handle
#[derive(Debug, Clone, Default)]
pub struct ScriptScene {
    shapes: Vec<ScriptShape>,
    primitives: usize,
}

impl ScriptScene {
    pub fn into_nodes(self, synthesizer: &Synthesizer) -> Result<Vec<SceneNode>> {
        self.shapes
            .into_iter()
            .map(|shape| shape.into_node(synthesizer))
            .collect()
    }
}

/// Value a script produced as its result
pub(crate) fn exported_value(value: Dynamic, synthesizer: &Synthesizer) -> Option<Result<Vec<SceneNode>>> {
    if value.is::<ScriptScene>() {
        value.try_cast::<ScriptScene>().map(|scene| scene.into_nodes(synthesizer))
    } else if value.is::<ScriptShape>() {
        value
            .try_cast::<ScriptShape>()
            .map(|shape| shape.into_node(synthesizer).map(|node| vec![node]))
    } else {
        None
    }
}

/// Caps on what one script may ask the synthesizer to build
#[derive(Debug, Clone, Copy)]
struct ShapeLimits {
    max_segments: u32,
    max_teeth: u32,
    max_csg_depth: usize,
    max_shapes: usize,
}

impl ShapeLimits {
    fn new(config: &SandboxConfig) -> Self {
        Self {
            max_segments: config.max_segments,
            max_teeth: config.max_teeth,
            max_csg_depth: config.max_csg_depth,
            max_shapes: config.max_shapes,
        }
    }

    fn check_primitives(&self, primitives: usize) -> ScriptResult<usize> {
        if primitives > self.max_shapes {
            return Err(format!("a shape or scene may hold at most {} primitives", self.max_shapes).into());
        }
        Ok(primitives)
    }
}

fn number(value: &Dynamic, field: &str) -> ScriptResult<f64> {
    if let Ok(float) = value.as_float() {
        return Ok(float);
    }
    if let Ok(int) = value.as_int() {
        return Ok(int as f64);
    }
    Err(format!("`{field}` must be a number, got {}", value.type_name()).into())
}

fn count(value: &Dynamic, field: &str, max: u32) -> ScriptResult<u32> {
    let raw = number(value, field)?;
    if raw.fract() != 0.0 || raw < 0.0 {
        return Err(format!("`{field}` must be a whole number, got {raw}").into());
    }
    if raw > max as f64 {
        return Err(format!("`{field}` is limited to {max}, got {raw}").into());
    }
    Ok(raw as u32)
}

fn vector(x: &Dynamic, y: &Dynamic, z: &Dynamic) -> ScriptResult<[f64; 3]> {
    Ok([number(x, "x")?, number(y, "y")?, number(z, "z")?])
}

fn cube(width: Dynamic, height: Dynamic, depth: Dynamic) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Cube {
        width: Some(number(&width, "width")?),
        height: Some(number(&height, "height")?),
        depth: Some(number(&depth, "depth")?),
    }))
}

fn sphere(radius: Dynamic) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Sphere {
        radius: Some(number(&radius, "radius")?),
        width_segments: None,
        height_segments: None,
    }))
}

fn sphere_segments(
    radius: Dynamic,
    width: Dynamic,
    height: Dynamic,
    limits: &ShapeLimits,
) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Sphere {
        radius: Some(number(&radius, "radius")?),
        width_segments: Some(count(&width, "widthSegments", limits.max_segments)?),
        height_segments: Some(count(&height, "heightSegments", limits.max_segments)?),
    }))
}

fn cylinder(radius: Dynamic, height: Dynamic) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Cylinder {
        radius: Some(number(&radius, "radius")?),
        height: Some(number(&height, "height")?),
        radial_segments: None,
    }))
}

fn cylinder_segments(
    radius: Dynamic,
    height: Dynamic,
    segments: Dynamic,
    limits: &ShapeLimits,
) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Cylinder {
        radius: Some(number(&radius, "radius")?),
        height: Some(number(&height, "height")?),
        radial_segments: Some(count(&segments, "radialSegments", limits.max_segments)?),
    }))
}

fn polyhedron(points: Array, faces: Array) -> ScriptResult<ScriptShape> {
    let vertices = points
        .into_iter()
        .map(|point| match point.try_cast::<Array>() {
            Some(coords) if coords.len() == 3 => vector(&coords[0], &coords[1], &coords[2]),
            _ => Err("polyhedron points must be [x, y, z] arrays".into()),
        })
        .collect::<ScriptResult<Vec<_>>>()?;

    let faces = faces
        .into_iter()
        .map(|face| match face.try_cast::<Array>() {
            Some(indices) => indices
                .iter()
                .map(|index| count(index, "faces", u32::MAX).map(|i| i as usize))
                .collect::<ScriptResult<Vec<_>>>(),
            None => Err("polyhedron faces must be index arrays".into()),
        })
        .collect::<ScriptResult<Vec<_>>>()?;

    Ok(ScriptShape::primitive(ShapeParams::Polyhedron { vertices, faces }))
}

fn gear(teeth: Dynamic, module: Dynamic, limits: &ShapeLimits) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Gear {
        teeth: Some(count(&teeth, "teeth", limits.max_teeth)?),
        module: Some(number(&module, "module")?),
        pressure_angle: None,
        thickness: None,
    }))
}

fn gear_full(
    teeth: Dynamic,
    module: Dynamic,
    pressure_angle: Dynamic,
    thickness: Dynamic,
    limits: &ShapeLimits,
) -> ScriptResult<ScriptShape> {
    Ok(ScriptShape::primitive(ShapeParams::Gear {
        teeth: Some(count(&teeth, "teeth", limits.max_teeth)?),
        module: Some(number(&module, "module")?),
        pressure_angle: Some(number(&pressure_angle, "pressureAngle")?),
        thickness: Some(number(&thickness, "thickness")?),
    }))
}

/// Offsets are cumulative
fn translate(shape: &mut ScriptShape, x: Dynamic, y: Dynamic, z: Dynamic) -> ScriptResult<ScriptShape> {
    let offset = vector(&x, &y, &z)?;
    for (axis, delta) in shape.position.iter_mut().zip(offset) {
        *axis += delta;
    }
    Ok(shape.clone())
}

/// Sets the orientation (Euler XYZ, radians)
fn rotate(shape: &mut ScriptShape, x: Dynamic, y: Dynamic, z: Dynamic) -> ScriptResult<ScriptShape> {
    shape.rotation = vector(&x, &y, &z)?;
    Ok(shape.clone())
}

fn color(shape: &mut ScriptShape, color: ImmutableString) -> ScriptShape {
    shape.color = Some(color.to_string());
    shape.clone()
}

fn hollow_with(shape: &mut ScriptShape, wall: Option<f64>) -> ScriptResult<ScriptShape> {
    match &mut shape.body {
        ShapeBody::Primitive(descriptor) => {
            descriptor.is_hollow = true;
            descriptor.wall_thickness = wall;
            Ok(shape.clone())
        }
        ShapeBody::Boolean { .. } => Err("hollow() applies to primitive shapes only".into()),
    }
}

fn hollow(shape: &mut ScriptShape) -> ScriptResult<ScriptShape> {
    hollow_with(shape, None)
}

fn hollow_wall(shape: &mut ScriptShape, wall: Dynamic) -> ScriptResult<ScriptShape> {
    let wall = number(&wall, "wallThickness")?;
    hollow_with(shape, Some(wall))
}

fn add(scene: &mut ScriptScene, shape: ScriptShape, limits: &ShapeLimits) -> ScriptResult<()> {
    scene.primitives = limits.check_primitives(scene.primitives + shape.primitives)?;
    scene.shapes.push(shape);
    Ok(())
}

fn scene_len(scene: &mut ScriptScene) -> INT {
    scene.shapes.len() as INT
}

fn shape_to_string(shape: &mut ScriptShape) -> String {
    format!("Shape({})", shape.kind_name())
}

fn scene_to_string(scene: &mut ScriptScene) -> String {
    format!("Scene({} shapes)", scene.shapes.len())
}

/// Channels and limits one engine is wired to
pub(crate) struct EngineWiring {
    pub config: SandboxConfig,
    pub synthesizer: Synthesizer,
    pub cancel: Arc<AtomicBool>,
    pub console: mpsc::Sender<HostMessage>,
    pub export: ExportSlot,
}

/// Build a locked-down engine with the geometry API registered
pub(crate) fn build_engine(wiring: EngineWiring) -> Engine {
    let EngineWiring {
        config,
        synthesizer,
        cancel,
        console,
        export,
    } = wiring;

    let limits = ShapeLimits::new(&config);
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    if let Some(max) = config.max_operations {
        engine.set_max_operations(max);
    }

    engine.on_progress(move |_| {
        cancel
            .load(Ordering::Relaxed)
            .then(|| "execution cancelled".into())
    });

    let out = console.clone();
    engine.on_print(move |text| send_console(&out, text, false));
    let out = console.clone();
    engine.on_debug(move |text, _, _| send_console(&out, text, false));
    engine.register_fn("eprint", move |value: Dynamic| send_console(&console, &value.to_string(), true));

    engine
        .register_type_with_name::<ScriptShape>("Shape")
        .register_fn("to_string", shape_to_string)
        .register_type_with_name::<ScriptScene>("Scene")
        .register_fn("to_string", scene_to_string);

    // Constructors
    engine.register_fn("cube", cube);
    engine.register_fn("sphere", sphere);
    engine.register_fn("sphere", move |r: Dynamic, w: Dynamic, h: Dynamic| sphere_segments(r, w, h, &limits));
    engine.register_fn("cylinder", cylinder);
    engine.register_fn("cylinder", move |r: Dynamic, h: Dynamic, n: Dynamic| {
        cylinder_segments(r, h, n, &limits)
    });
    engine.register_fn("polyhedron", polyhedron);
    engine.register_fn("gear", move |teeth: Dynamic, module: Dynamic| gear(teeth, module, &limits));
    engine.register_fn("gear", move |teeth: Dynamic, module: Dynamic, angle: Dynamic, thickness: Dynamic| {
        gear_full(teeth, module, angle, thickness, &limits)
    });

    // Shape methods
    engine.register_fn("translate", translate);
    engine.register_fn("rotate", rotate);
    engine.register_fn("color", color);
    engine.register_fn("hollow", hollow);
    engine.register_fn("hollow", hollow_wall);

    // Booleans
    engine.register_fn("union", move |a: ScriptShape, b: ScriptShape| {
        ScriptShape::boolean(CsgOp::Union, a, b, &limits)
    });
    engine.register_fn("subtract", move |a: ScriptShape, b: ScriptShape| {
        ScriptShape::boolean(CsgOp::Subtract, a, b, &limits)
    });
    engine.register_fn("intersect", move |a: ScriptShape, b: ScriptShape| {
        ScriptShape::boolean(CsgOp::Intersect, a, b, &limits)
    });

    // Scene handle
    engine.register_fn("scene", ScriptScene::default);
    engine.register_fn("add", move |scene: &mut ScriptScene, shape: ScriptShape| add(scene, shape, &limits));
    engine.register_fn("len", scene_len);

    let slot = export.clone();
    let synth = synthesizer.clone();
    engine.register_fn("export_stl", move |scene: ScriptScene| {
        store_export(&slot, scene.into_nodes(&synth))
    });
    engine.register_fn("export_stl", move |shape: ScriptShape| {
        store_export(&export, shape.into_node(&synthesizer).map(|node| vec![node]))
    });

    engine
}

fn store_export(slot: &ExportSlot, nodes: Result<Vec<SceneNode>>) -> ScriptResult<()> {
    if slot.borrow().is_some() {
        return Err("export_stl may only be called once".into());
    }
    let nodes = nodes.map_err(|err| -> Box<EvalAltResult> { err.to_string().into() })?;
    *slot.borrow_mut() = Some(nodes);
    Ok(())
}

fn send_console(console: &mpsc::Sender<HostMessage>, text: &str, is_error: bool) {
    if console.try_send(HostMessage::console(text, is_error)).is_err() {
        tracing::debug!("console channel full or closed, dropping message");
    }
}

/// Map a script failure to an execution error. The thrown value becomes the
/// message; call frames and the throw site become the stack.
pub(crate) fn eval_error(err: Box<EvalAltResult>) -> Error {
    let mut frames = Vec::new();
    let mut current = *err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                let source = if source.is_empty() { String::new() } else { format!(" in {source}") };
                frames.push(format!("at {name}(){source} ({})", describe(pos)));
                current = *inner;
            }
            EvalAltResult::ErrorInModule(path, inner, pos) => {
                frames.push(format!("in module {path} ({})", describe(pos)));
                current = *inner;
            }
            EvalAltResult::ErrorRuntime(value, pos) => {
                if !pos.is_none() {
                    frames.insert(0, format!("at {}", describe(pos)));
                }
                return execution_error(value.to_string(), frames);
            }
            EvalAltResult::ErrorTerminated(value, _) => {
                return execution_error(value.to_string(), frames);
            }
            other => {
                let pos = other.position();
                if !pos.is_none() {
                    frames.insert(0, format!("at {}", describe(pos)));
                }
                let mut message = other.to_string();
                // Drop the position suffix already present in the stack
                if let Some(stripped) = message.strip_suffix(&format!(" ({pos})")) {
                    message = stripped.to_string();
                }
                return execution_error(message, frames);
            }
        }
    }
}

pub(crate) fn parse_error(err: ParseError, unit: &str) -> Error {
    Error::SandboxExecution {
        message: err.err_type().to_string(),
        stack: Some(format!("at {unit} ({})", describe(err.position()))),
    }
}

fn execution_error(message: String, frames: Vec<String>) -> Error {
    Error::SandboxExecution {
        message,
        stack: (!frames.is_empty()).then(|| frames.join("\n")),
    }
}

fn describe(pos: Position) -> String {
    if pos.is_none() {
        "unknown position".to_string()
    } else {
        pos.to_string()
    }
}
