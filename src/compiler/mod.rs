//! Drawing-state compiler: one pass over the AST, producing RVMC.
//!
//! Output goes into command buffers. The main buffer becomes the `%main%`
//! layer; block apertures, apertures with clear parts and transformed block
//! copies become layers of their own that the main layer pastes. Buffers
//! that nothing reaches from `%main%` are never emitted.

mod aperture;
mod arc;
mod state;

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::ast::{ApertureTemplate, Command, Coordinates, InterpolationMode, Notation, Program, QuadrantMode, Span, Spanned};
use crate::format::{AxisFormat, FormatEngine, FormatError};
use crate::geometry::{BoundingBox, Point, Transform};
use crate::macros::{self, MacroEvaluationError};
use crate::rvmc::{LayerId, Rvmc, RvmcBuilder, RvmcError, Segment, Shape};

use aperture::{
    Aperture, ApertureKind, ArcPath, BlockAperture, CircleAperture, FlashImage, MacroAperture, ObroundAperture,
    PolygonAperture, RectangleAperture,
};
use state::DrawingState;

pub use state::Attributes;

/// Slack added around the fixed box of aperture layers.
const LAYER_MARGIN: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompilerOptions {
    /// Keep going past `M00`/`M01`. `M02` always ends the program.
    pub ignore_program_stop: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("{source}")]
    Format { source: FormatError, span: Span },
    #[error("incremental coordinates are not supported")]
    IncrementalCoordinatesNotSupported { span: Span },
    #[error("aperture macro evaluation failed: {source}")]
    MacroEvaluation { source: MacroEvaluationError, span: Span },
    #[error("aperture macro `{name}` is not defined")]
    NoCorrespondingApertureClass { name: String, span: Span },
    #[error("aperture D{id} is not defined")]
    ApertureNotDefined { id: u32, span: Span },
    #[error("no aperture is selected")]
    NoApertureSelected { span: Span },
    #[error("aperture D{id} is already defined")]
    ApertureRedefined { id: u32, span: Span },
    #[error("D{id} is a {kind} aperture and cannot be used for strokes")]
    StrokeAperture { id: u32, kind: &'static str, span: Span },
    #[error("D03 is not allowed inside a region")]
    FlashInRegion { span: Span },
    #[error("region started inside another region")]
    NestedRegion { span: Span },
    #[error("region is never closed")]
    RegionNotClosed { span: Span },
    #[error("block aperture closed without being opened")]
    UnnamedBlockAperture { span: Span },
    #[error("block aperture D{id} is never closed")]
    UnclosedBlockAperture { id: u32, span: Span },
    #[error("step and repeat closed without being opened")]
    StepAndRepeatNotInitialized { span: Span },
    #[error("{closing} reached while the innermost open {open} is still unclosed")]
    MismatchedClose { closing: &'static str, open: &'static str, span: Span },
    #[error("no arc center fits offset {offset:?} for an arc from {start:?} to {end:?}")]
    NoValidArcCenter { start: Point, end: Point, offset: Point, span: Span },
    #[error("layer `{0}` depends on itself")]
    CyclicLayerDependency(LayerId),
    #[error(transparent)]
    Rvmc(#[from] RvmcError),
}

impl CompileError {
    /// Source location of the offending statement, when there is one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Format { span, .. }
            | CompileError::IncrementalCoordinatesNotSupported { span }
            | CompileError::MacroEvaluation { span, .. }
            | CompileError::NoCorrespondingApertureClass { span, .. }
            | CompileError::ApertureNotDefined { span, .. }
            | CompileError::NoApertureSelected { span }
            | CompileError::ApertureRedefined { span, .. }
            | CompileError::StrokeAperture { span, .. }
            | CompileError::FlashInRegion { span }
            | CompileError::NestedRegion { span }
            | CompileError::RegionNotClosed { span }
            | CompileError::UnnamedBlockAperture { span }
            | CompileError::UnclosedBlockAperture { span, .. }
            | CompileError::StepAndRepeatNotInitialized { span }
            | CompileError::MismatchedClose { span, .. }
            | CompileError::NoValidArcCenter { span, .. } => Some(*span),
            CompileError::CyclicLayerDependency(_) | CompileError::Rvmc(_) => None,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub rvmc: Rvmc,
    pub attributes: Attributes,
}

enum Step {
    Continue,
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
enum Emitted {
    Shape(Shape),
    Paste { id: LayerId, location: Point, negative: bool },
}

impl Emitted {
    fn translated(&self, by: Point) -> Emitted {
        match self {
            Emitted::Shape(shape) => Emitted::Shape(shape.translated(by)),
            Emitted::Paste { id, location, negative } => {
                Emitted::Paste { id: id.clone(), location: *location + by, negative: *negative }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CommandBuffer {
    commands: Vec<Emitted>,
    /// Fixed clip box; `None` lets the VM compute the bounds.
    bbox: Option<BoundingBox>,
    depends_on: Vec<LayerId>,
}

impl CommandBuffer {
    fn push(&mut self, command: Emitted) {
        if let Emitted::Paste { id, .. } = &command
            && !self.depends_on.contains(id)
        {
            self.depends_on.push(id.clone());
        }
        self.commands.push(command);
    }
}

#[derive(Debug, Clone, Copy)]
struct Grid {
    x_repeat: u32,
    y_repeat: u32,
    step: Point,
}

#[derive(Debug)]
enum BufferKind {
    Block(u32),
    StepRepeat { grid: Grid, saved: Box<DrawingState> },
}

#[derive(Debug)]
struct OpenBuffer {
    kind: BufferKind,
    buffer: CommandBuffer,
    span: Span,
}

#[derive(Debug)]
struct OpenRegion {
    segments: Vec<Segment>,
    span: Span,
}

/// Single-use compiler. Create one per document.
#[derive(Debug)]
pub struct Compiler {
    options: CompilerOptions,
    format: FormatEngine,
    state: DrawingState,
    attributes: Attributes,
    apertures: HashMap<u32, ApertureKind>,
    macros: HashMap<String, Vec<crate::ast::MacroStatement>>,
    /// Completed non-main layers.
    layers: HashMap<LayerId, CommandBuffer>,
    main: CommandBuffer,
    /// Blocks and step-and-repeat captures, innermost last.
    open: Vec<OpenBuffer>,
    region: Option<OpenRegion>,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Compiler {
            options,
            format: FormatEngine::new(),
            state: DrawingState::default(),
            attributes: Attributes::default(),
            apertures: HashMap::new(),
            macros: HashMap::new(),
            layers: HashMap::new(),
            main: CommandBuffer::default(),
            open: Vec::new(),
            region: None,
        }
    }

    pub fn compile(mut self, program: &Program) -> Result<Compilation> {
        for command in program.iter() {
            trace!(command = ?command.node, "compile");
            if let Step::Halt = self.step(command)? {
                break;
            }
        }
        self.finish()
    }

    fn step(&mut self, command: &Spanned<Command>) -> Result<Step> {
        let span = command.span;
        match &command.node {
            Command::Comment(_) => {}
            Command::FormatSpec { zeros, notation, x_integer, x_decimal, y_integer, y_decimal } => {
                if *notation == Notation::Incremental {
                    return Err(CompileError::IncrementalCoordinatesNotSupported { span });
                }
                self.format
                    .configure(*zeros, AxisFormat::new(*x_integer, *x_decimal), AxisFormat::new(*y_integer, *y_decimal))
                    .map_err(|source| CompileError::Format { source, span })?;
            }
            Command::UnitMode(unit) => self.format.set_unit(*unit),
            Command::LegacyUnit(unit) => {
                warn!(?unit, "deprecated G70/G71 unit selection");
                self.format.set_unit(*unit);
            }
            Command::LegacyNotation(Notation::Absolute) => debug!("G90 absolute notation"),
            Command::LegacyNotation(Notation::Incremental) => {
                return Err(CompileError::IncrementalCoordinatesNotSupported { span });
            }
            Command::ApertureDefine { id, template } => self.define_aperture(*id, template, span)?,
            Command::MacroDefine { name, body } => {
                if self.macros.insert(name.clone(), body.clone()).is_some() {
                    warn!(%name, "aperture macro redefined");
                }
            }
            Command::SelectAperture(id) => {
                if !self.apertures.contains_key(id) {
                    return Err(CompileError::ApertureNotDefined { id: *id, span });
                }
                self.state.aperture = Some(*id);
            }
            Command::Draw(coordinates) => self.draw(coordinates, span)?,
            Command::Move(coordinates) => self.move_to(coordinates, span)?,
            Command::Flash(coordinates) => self.flash(coordinates, span)?,
            Command::Interpolation(mode) => self.state.interpolation = *mode,
            Command::Quadrant(mode) => self.state.quadrant = *mode,
            Command::RegionStart => {
                if self.region.is_some() {
                    return Err(CompileError::NestedRegion { span });
                }
                self.region = Some(OpenRegion { segments: Vec::new(), span });
            }
            Command::RegionEnd => {
                if self.region.is_none() {
                    warn!("G37 without a matching G36");
                }
                self.flush_contour();
                self.region = None;
            }
            Command::LoadPolarity(polarity) => self.state.polarity = *polarity,
            Command::LoadMirroring(mirroring) => self.state.mirroring = *mirroring,
            Command::LoadRotation(degrees) => self.state.rotation = *degrees,
            Command::LoadScaling(factor) => self.state.scaling = *factor,
            Command::BlockOpen(id) => self.open_block(*id, span)?,
            Command::BlockClose => self.close_block(span)?,
            Command::StepRepeatOpen { x_repeat, y_repeat, x_step, y_step } => {
                let step = Point::new(self.format.to_mm(*x_step), self.format.to_mm(*y_step));
                self.open_step_repeat(Grid { x_repeat: *x_repeat, y_repeat: *y_repeat, step }, span)?;
            }
            Command::StepRepeatClose => self.close_step_repeat(span)?,
            Command::Attribute(attribute) => self.attributes.apply(attribute),
            Command::ImageParameter(parameter) => {
                warn!(code = %parameter.code, value = %parameter.value, "deprecated image parameter ignored");
            }
            Command::ProgramStop | Command::OptionalStop => {
                if !self.options.ignore_program_stop {
                    return Ok(Step::Halt);
                }
                debug!("program stop ignored");
            }
            Command::EndOfFile => return Ok(Step::Halt),
            Command::Invalid { text } => warn!(%text, "skipping invalid statement"),
        }
        Ok(Step::Continue)
    }

    // ---- Apertures ----

    fn define_aperture(&mut self, id: u32, template: &ApertureTemplate, span: Span) -> Result<()> {
        let open_block = self.open.iter().any(|o| matches!(o.kind, BufferKind::Block(b) if b == id));
        if self.apertures.contains_key(&id) || open_block {
            return Err(CompileError::ApertureRedefined { id, span });
        }
        let mm = |v: f64| self.format.to_mm(v);
        let aperture = match template {
            ApertureTemplate::Circle { diameter, hole } => {
                ApertureKind::Circle(CircleAperture { diameter: mm(*diameter), hole: hole.map(mm) })
            }
            ApertureTemplate::Rectangle { width, height, hole } => {
                ApertureKind::Rectangle(RectangleAperture { width: mm(*width), height: mm(*height), hole: hole.map(mm) })
            }
            ApertureTemplate::Obround { width, height, hole } => {
                ApertureKind::Obround(ObroundAperture { width: mm(*width), height: mm(*height), hole: hole.map(mm) })
            }
            ApertureTemplate::Polygon { outer_diameter, vertices, rotation, hole } => ApertureKind::Polygon(PolygonAperture {
                outer_diameter: mm(*outer_diameter),
                vertices: *vertices,
                rotation: rotation.unwrap_or(0.0),
                hole: hole.map(mm),
            }),
            ApertureTemplate::Macro { name, params } => {
                let body = self
                    .macros
                    .get(name)
                    .ok_or_else(|| CompileError::NoCorrespondingApertureClass { name: name.clone(), span })?;
                let to_mm = Transform::scale(self.format.unit().factor());
                let shapes = macros::instantiate(body, params)
                    .map_err(|source| CompileError::MacroEvaluation { source, span })?
                    .iter()
                    .map(|shape| shape.transformed(&to_mm))
                    .collect();
                ApertureKind::Macro(MacroAperture { shapes })
            }
        };
        debug!(id, kind = aperture.kind(), "aperture defined");
        self.apertures.insert(id, aperture);
        Ok(())
    }

    fn selected_aperture(&self, span: Span) -> Result<(u32, &ApertureKind)> {
        let id = self.state.aperture.ok_or(CompileError::NoApertureSelected { span })?;
        let aperture = self.apertures.get(&id).ok_or(CompileError::ApertureNotDefined { id, span })?;
        Ok((id, aperture))
    }

    // ---- Operations ----

    fn target_point(&self, coordinates: &Coordinates, span: Span) -> Result<Point> {
        let current = self.state.current_point;
        let x = match &coordinates.x {
            Some(raw) => self.format.decode_x(raw).map_err(|source| CompileError::Format { source, span })?,
            None => current.x,
        };
        let y = match &coordinates.y {
            Some(raw) => self.format.decode_y(raw).map_err(|source| CompileError::Format { source, span })?,
            None => current.y,
        };
        Ok(Point::new(x, y))
    }

    fn arc_offset(&self, coordinates: &Coordinates, span: Span) -> Result<Point> {
        let i = match &coordinates.i {
            Some(raw) => self.format.decode_x(raw).map_err(|source| CompileError::Format { source, span })?,
            None => 0.0,
        };
        let j = match &coordinates.j {
            Some(raw) => self.format.decode_y(raw).map_err(|source| CompileError::Format { source, span })?,
            None => 0.0,
        };
        Ok(Point::new(i, j))
    }

    fn draw(&mut self, coordinates: &Coordinates, span: Span) -> Result<()> {
        let start = self.state.current_point;
        let end = self.target_point(coordinates, span)?;
        let clockwise = match self.state.interpolation {
            InterpolationMode::Linear => None,
            InterpolationMode::Clockwise => Some(true),
            InterpolationMode::CounterClockwise => Some(false),
        };
        let arc = match clockwise {
            // A single-quadrant arc cannot close on itself; it is a zero-length draw.
            Some(_) if self.state.quadrant == QuadrantMode::Single && start == end => None,
            Some(clockwise) => {
                let offset = self.arc_offset(coordinates, span)?;
                let center = arc::resolve_center(start, end, offset, clockwise, self.state.quadrant)
                    .ok_or(CompileError::NoValidArcCenter { start, end, offset, span })?;
                Some(ArcPath { start, end, center, clockwise })
            }
            None => None,
        };
        self.state.current_point = end;

        if let Some(region) = self.region.as_mut() {
            match arc {
                Some(ArcPath { start, end, center, clockwise }) => {
                    region.segments.push(Segment::Arc { start, end, center, clockwise });
                }
                None if start != end => region.segments.push(Segment::Line { start, end }),
                None => {}
            }
            return Ok(());
        }

        let (id, aperture) = self.selected_aperture(span)?;
        let transform = self.state.aperture_transform();
        let negative = self.state.is_clear();
        let stroke = match &arc {
            Some(path) => aperture.arc(&transform, path, negative),
            None => aperture.line(&transform, start, end, negative),
        };
        let shapes = stroke.map_err(|e| CompileError::StrokeAperture { id, kind: e.kind, span })?;
        for shape in shapes {
            self.emit(Emitted::Shape(shape));
        }
        Ok(())
    }

    fn move_to(&mut self, coordinates: &Coordinates, span: Span) -> Result<()> {
        let target = self.target_point(coordinates, span)?;
        self.flush_contour();
        self.state.current_point = target;
        Ok(())
    }

    fn flash(&mut self, coordinates: &Coordinates, span: Span) -> Result<()> {
        if self.region.is_some() {
            return Err(CompileError::FlashInRegion { span });
        }
        let at = self.target_point(coordinates, span)?;
        self.state.current_point = at;

        let (id, aperture) = self.selected_aperture(span)?;
        let image = aperture.flash();
        let bounds = aperture.bbox();
        let transform = self.state.aperture_transform();
        let negative = self.state.is_clear();
        match image {
            FlashImage::Direct(shapes) => {
                let placement = transform.then(Transform::translate(at));
                for shape in shapes {
                    self.emit(Emitted::Shape(shape.transformed(&placement).with_polarity(negative)));
                }
            }
            FlashImage::Layered(shapes) => {
                let layer = self.aperture_layer(id, &transform, &shapes, bounds);
                self.emit(Emitted::Paste { id: layer, location: at, negative });
            }
            FlashImage::Block(source) => {
                let layer = self.transformed_layer(&source, &transform)?;
                self.emit(Emitted::Paste { id: layer, location: at, negative });
            }
        }
        Ok(())
    }

    /// Layer holding an aperture's image under `transform`, created on first use.
    fn aperture_layer(&mut self, id: u32, transform: &Transform, shapes: &[Shape], bounds: BoundingBox) -> LayerId {
        let layer = LayerId::new(format!("D{id}%{}", transform.tag()));
        if !self.layers.contains_key(&layer) {
            let bbox = BoundingBox::from_points(bounds.corners().map(|c| transform.apply(c))).map(|b| b.expand(LAYER_MARGIN));
            let mut buffer = CommandBuffer { bbox, ..Default::default() };
            for shape in shapes {
                buffer.push(Emitted::Shape(shape.transformed(transform)));
            }
            debug!(%layer, shapes = shapes.len(), "aperture layer");
            self.layers.insert(layer.clone(), buffer);
        }
        layer
    }

    /// Copy of `source` with `transform` applied to its contents and, recursively,
    /// to every layer it pastes. Identical transforms share one copy.
    fn transformed_layer(&mut self, source: &LayerId, transform: &Transform) -> Result<LayerId> {
        if transform.is_identity() {
            return Ok(source.clone());
        }
        let layer = LayerId::new(format!("{source}%{}", transform.tag()));
        if self.layers.contains_key(&layer) {
            return Ok(layer);
        }
        let original = self.layer_buffer(source)?.clone();
        let mut buffer = CommandBuffer {
            bbox: original.bbox.and_then(|b| BoundingBox::from_points(b.corners().map(|c| transform.apply(c)))),
            ..Default::default()
        };
        for command in original.commands {
            match command {
                Emitted::Shape(shape) => buffer.push(Emitted::Shape(shape.transformed(transform))),
                Emitted::Paste { id, location, negative } => {
                    let child = self.transformed_layer(&id, transform)?;
                    buffer.push(Emitted::Paste { id: child, location: transform.apply(location), negative });
                }
            }
        }
        debug!(%layer, "transformed layer copy");
        self.layers.insert(layer.clone(), buffer);
        Ok(layer)
    }

    fn layer_buffer(&self, id: &LayerId) -> Result<&CommandBuffer> {
        self.layers.get(id).ok_or_else(|| CompileError::Rvmc(RvmcError::LayerNotCompleted(id.clone())))
    }

    fn emit(&mut self, command: Emitted) {
        match self.open.last_mut() {
            Some(open) => open.buffer.push(command),
            None => self.main.push(command),
        }
    }

    // ---- Regions ----

    /// Emit the region's pending contour, if any, with the current polarity.
    fn flush_contour(&mut self) {
        let segments = match self.region.as_mut() {
            Some(region) => std::mem::take(&mut region.segments),
            None => return,
        };
        if segments.is_empty() {
            return;
        }
        let negative = self.state.is_clear();
        self.emit(Emitted::Shape(Shape::contour(segments, negative)));
    }

    fn ensure_no_region(&self) -> Result<()> {
        match &self.region {
            Some(region) => Err(CompileError::RegionNotClosed { span: region.span }),
            None => Ok(()),
        }
    }

    // ---- Blocks and step & repeat ----

    fn open_block(&mut self, id: u32, span: Span) -> Result<()> {
        self.ensure_no_region()?;
        let nested = self.open.iter().any(|o| matches!(o.kind, BufferKind::Block(b) if b == id));
        if self.apertures.contains_key(&id) || nested {
            return Err(CompileError::ApertureRedefined { id, span });
        }
        self.open.push(OpenBuffer { kind: BufferKind::Block(id), buffer: CommandBuffer::default(), span });
        Ok(())
    }

    fn close_block(&mut self, span: Span) -> Result<()> {
        self.ensure_no_region()?;
        let id = match self.open.last() {
            Some(OpenBuffer { kind: BufferKind::Block(id), .. }) => *id,
            Some(OpenBuffer { kind: BufferKind::StepRepeat { .. }, .. }) => {
                return Err(CompileError::MismatchedClose { closing: "%AB*%", open: "step and repeat", span });
            }
            None => return Err(CompileError::UnnamedBlockAperture { span }),
        };
        let Some(open) = self.open.pop() else {
            return Err(CompileError::UnnamedBlockAperture { span });
        };
        let layer = LayerId::new(format!("D{id}"));
        let bounds = self.buffer_bounds(&open.buffer);
        debug!(%layer, commands = open.buffer.commands.len(), "block aperture closed");
        self.layers.insert(layer.clone(), open.buffer);
        self.apertures.insert(id, ApertureKind::Block(BlockAperture { layer, bounds }));
        Ok(())
    }

    /// Bounds of everything a buffer draws, where they are known up front.
    fn buffer_bounds(&self, buffer: &CommandBuffer) -> Option<BoundingBox> {
        buffer
            .commands
            .iter()
            .filter_map(|command| match command {
                Emitted::Shape(shape) => shape.bbox(),
                Emitted::Paste { id, location, .. } => {
                    let pasted = self.layers.get(id)?;
                    self.buffer_bounds(pasted).map(|b| b.translate(*location))
                }
            })
            .reduce(BoundingBox::union)
    }

    fn open_step_repeat(&mut self, grid: Grid, span: Span) -> Result<()> {
        self.ensure_no_region()?;
        if matches!(self.open.last(), Some(OpenBuffer { kind: BufferKind::StepRepeat { .. }, .. })) {
            self.close_step_repeat(span)?;
        }
        if grid.x_repeat == 1 && grid.y_repeat == 1 {
            return Ok(());
        }
        let saved = Box::new(self.state.clone());
        self.open.push(OpenBuffer { kind: BufferKind::StepRepeat { grid, saved }, buffer: CommandBuffer::default(), span });
        Ok(())
    }

    fn step_repeat_open(&self) -> bool {
        self.open.iter().any(|o| matches!(o.kind, BufferKind::StepRepeat { .. }))
    }

    fn close_step_repeat(&mut self, span: Span) -> Result<()> {
        self.ensure_no_region()?;
        match self.open.last() {
            Some(OpenBuffer { kind: BufferKind::StepRepeat { .. }, .. }) => {}
            Some(OpenBuffer { kind: BufferKind::Block(_), .. }) if self.step_repeat_open() => {
                return Err(CompileError::MismatchedClose { closing: "%SR*%", open: "block aperture", span });
            }
            _ => return Err(CompileError::StepAndRepeatNotInitialized { span }),
        }
        let Some(OpenBuffer { kind: BufferKind::StepRepeat { grid, saved }, buffer, .. }) = self.open.pop() else {
            return Err(CompileError::StepAndRepeatNotInitialized { span });
        };
        for j in 0..grid.y_repeat {
            for i in 0..grid.x_repeat {
                let offset = Point::new(grid.step.x * i as f64, grid.step.y * j as f64);
                for command in &buffer.commands {
                    self.emit(command.translated(offset));
                }
            }
        }
        debug!(x = grid.x_repeat, y = grid.y_repeat, commands = buffer.commands.len(), "step and repeat replayed");
        self.state = *saved;
        Ok(())
    }

    // ---- Output ----

    fn finish(mut self) -> Result<Compilation> {
        self.ensure_no_region()?;
        while let Some(open) = self.open.last() {
            let span = open.span;
            if let BufferKind::Block(id) = open.kind {
                return Err(CompileError::UnclosedBlockAperture { id, span });
            }
            warn!("step and repeat still open at end of file; closing it");
            self.close_step_repeat(span)?;
        }
        let rvmc = self.emit_rvmc()?;
        debug!(commands = rvmc.len(), layers = rvmc.layers().count(), "compiled");
        Ok(Compilation { rvmc, attributes: self.attributes })
    }

    /// Every layer reachable from the main buffer, dependencies first, then `%main%`.
    fn emit_rvmc(&self) -> Result<Rvmc> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = HashSet::new();
        for dependency in &self.main.depends_on {
            self.resolve(dependency, &mut order, &mut done, &mut visiting)?;
        }

        let mut builder = RvmcBuilder::new();
        for id in order {
            let buffer = self.layer_buffer(&id)?;
            write_layer(&mut builder, id, buffer)?;
        }
        write_layer(&mut builder, LayerId::main(), &self.main)?;
        Ok(builder.finish()?)
    }

    fn resolve(
        &self,
        id: &LayerId,
        order: &mut Vec<LayerId>,
        done: &mut HashSet<LayerId>,
        visiting: &mut HashSet<LayerId>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id.clone()) {
            return Err(CompileError::CyclicLayerDependency(id.clone()));
        }
        for dependency in &self.layer_buffer(id)?.depends_on {
            self.resolve(dependency, order, done, visiting)?;
        }
        visiting.remove(id);
        done.insert(id.clone());
        order.push(id.clone());
        Ok(())
    }
}

fn write_layer(builder: &mut RvmcBuilder, id: LayerId, buffer: &CommandBuffer) -> Result<()> {
    builder.start_layer(id, buffer.bbox, Point::ORIGIN)?;
    for command in &buffer.commands {
        match command {
            Emitted::Shape(shape) => builder.shape(shape.clone())?,
            Emitted::Paste { id, location, negative } => builder.paste(id.clone(), *location, *negative)?,
        };
    }
    builder.end_layer()?;
    Ok(())
}

/// Compile with default options.
pub fn compile(program: &Program) -> Result<Rvmc> {
    Ok(Compiler::new(CompilerOptions::default()).compile(program)?.rvmc)
}
