//! Render VM: executes an RVMC stream on a stack of layers and composes
//! polarity with polygon boolean operations.

use std::collections::{HashMap, HashSet};

use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use tracing::{debug, trace};

use crate::geometry::{BoundingBox, Point};
use crate::rvmc::{Command, LayerId, Rvmc, Shape};

pub(crate) mod flatten;

/// Closed polyline, implicitly closed.
pub type Contour = Vec<[f64; 2]>;
/// Outer contour followed by its holes.
pub type Polygon = Vec<Contour>;
/// Set of disjoint polygons.
pub type Region = Vec<Polygon>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("layer `{0}` already exists")]
    LayerAlreadyExists(LayerId),
    #[error("layer `{0}` not found")]
    LayerNotFound(LayerId),
    #[error("layer `{0}` is pasted before it was completed")]
    LayerNotCompleted(LayerId),
    #[error("no layer is open")]
    NoLayerOpen,
    #[error("layer `{0}` was never closed")]
    UnclosedLayer(LayerId),
    #[error("program produced no `{}` layer", LayerId::MAIN)]
    NoMainLayer,
}

type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmOptions {
    /// Maximum distance between a true arc and its flattened chords, in mm.
    pub arc_tolerance: f64,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { arc_tolerance: 0.001 }
    }
}

/// A completed layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLayer {
    pub id: LayerId,
    pub origin: Point,
    pub bbox: Option<BoundingBox>,
    pub region: Region,
}

/// Final geometry of the main layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub layer: LayerId,
    pub bbox: Option<BoundingBox>,
    pub polygons: Region,
}

impl RenderResult {
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Covered area in mm².
    pub fn area(&self) -> f64 {
        self.polygons
            .iter()
            .map(|polygon| {
                let mut contours = polygon.iter().map(|c| signed_area(c).abs());
                let outer = contours.next().unwrap_or(0.0);
                outer - contours.sum::<f64>()
            })
            .sum()
    }

    /// True when `p` lies in the covered region.
    pub fn contains(&self, p: Point) -> bool {
        self.polygons.iter().any(|polygon| {
            let mut contours = polygon.iter();
            contours.next().is_some_and(|outer| inside(outer, p)) && !contours.any(|hole| inside(hole, p))
        })
    }
}

fn signed_area(c: &Contour) -> f64 {
    let n = c.len();
    (0..n)
        .map(|i| {
            let (a, b) = (c[i], c[(i + 1) % n]);
            a[0] * b[1] - b[0] * a[1]
        })
        .sum::<f64>()
        / 2.0
}

/// Even-odd ray cast.
fn inside(c: &Contour, p: Point) -> bool {
    let n = c.len();
    let mut result = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (c[i], c[j]);
        if (a[1] > p.y) != (b[1] > p.y) && p.x < (b[0] - a[0]) * (p.y - a[1]) / (b[1] - a[1]) + a[0] {
            result = !result;
        }
        j = i;
    }
    result
}

fn region_bbox(region: &Region) -> Option<BoundingBox> {
    BoundingBox::from_points(region.iter().flatten().flatten().map(|p| Point::new(p[0], p[1])))
}

fn translate(region: &Region, by: Point) -> Region {
    region
        .iter()
        .map(|polygon| {
            polygon
                .iter()
                .map(|contour| contour.iter().map(|p| [p[0] + by.x, p[1] + by.y]).collect())
                .collect()
        })
        .collect()
}

/// Union (`negative == false`) or subtract `other` into `region`.
fn compose(region: Region, other: &Region, negative: bool) -> Region {
    if other.is_empty() || (negative && region.is_empty()) {
        return region;
    }
    let rule = if negative { OverlayRule::Difference } else { OverlayRule::Union };
    region.overlay(other, rule, FillRule::NonZero)
}

#[derive(Debug)]
struct OpenLayer {
    id: LayerId,
    origin: Point,
    fixed_bbox: Option<BoundingBox>,
    region: Region,
}

/// Layer-stack machine. Layers are looked up by id but composed strictly in
/// command order.
#[derive(Debug, Default)]
pub struct VirtualMachine {
    options: VmOptions,
    completed: HashMap<LayerId, RenderedLayer>,
    open_ids: HashSet<LayerId>,
    stack: Vec<OpenLayer>,
}

impl VirtualMachine {
    pub fn new(options: VmOptions) -> Self {
        VirtualMachine { options, ..Default::default() }
    }

    /// Execute a whole program and return the main layer.
    pub fn run(&mut self, rvmc: &Rvmc) -> VmResult<RenderResult> {
        self.completed.clear();
        self.open_ids.clear();
        self.stack.clear();
        for command in rvmc.iter() {
            self.execute(command)?;
        }
        self.finish()
    }

    pub fn execute(&mut self, command: &Command) -> VmResult<()> {
        match command {
            Command::StartLayer { id, bbox, origin } => {
                if self.completed.contains_key(id) || !self.open_ids.insert(id.clone()) {
                    return Err(VmError::LayerAlreadyExists(id.clone()));
                }
                trace!(layer = %id, "start layer");
                self.stack.push(OpenLayer { id: id.clone(), origin: *origin, fixed_bbox: *bbox, region: Vec::new() });
            }
            Command::Shape(shape) => self.draw(shape)?,
            Command::PasteLayer { id, location, negative } => {
                let source = match self.completed.get(id) {
                    Some(layer) => layer,
                    None if self.open_ids.contains(id) => return Err(VmError::LayerNotCompleted(id.clone())),
                    None => return Err(VmError::LayerNotFound(id.clone())),
                };
                let placed = translate(&source.region, *location - source.origin);
                let target = self.stack.last_mut().ok_or(VmError::NoLayerOpen)?;
                target.region = compose(std::mem::take(&mut target.region), &placed, *negative);
            }
            Command::EndLayer => {
                let layer = self.stack.pop().ok_or(VmError::NoLayerOpen)?;
                self.open_ids.remove(&layer.id);
                let (region, bbox) = match layer.fixed_bbox {
                    Some(bbox) => {
                        let clip: Region = vec![vec![bbox.corners().iter().map(|p| [p.x, p.y]).collect()]];
                        let region =
                            if layer.region.is_empty() { layer.region } else { layer.region.overlay(&clip, OverlayRule::Intersect, FillRule::NonZero) };
                        (region, Some(bbox))
                    }
                    None => {
                        let bbox = region_bbox(&layer.region);
                        (layer.region, bbox)
                    }
                };
                trace!(layer = %layer.id, polygons = region.len(), "end layer");
                self.completed.insert(
                    layer.id.clone(),
                    RenderedLayer { id: layer.id, origin: layer.origin, bbox, region },
                );
            }
        }
        Ok(())
    }

    fn draw(&mut self, shape: &Shape) -> VmResult<()> {
        let contours = flatten::flatten(&shape.kind, self.options.arc_tolerance);
        let target = self.stack.last_mut().ok_or(VmError::NoLayerOpen)?;
        if contours.is_empty() {
            return Ok(());
        }
        target.region = compose(std::mem::take(&mut target.region), &vec![contours], shape.negative);
        Ok(())
    }

    /// Completed layer by id.
    pub fn layer(&self, id: &LayerId) -> Option<&RenderedLayer> {
        self.completed.get(id)
    }

    fn finish(&mut self) -> VmResult<RenderResult> {
        if let Some(open) = self.stack.last() {
            return Err(VmError::UnclosedLayer(open.id.clone()));
        }
        let main = self.completed.get(&LayerId::main()).ok_or(VmError::NoMainLayer)?;
        debug!(polygons = main.region.len(), layers = self.completed.len(), "render finished");
        Ok(RenderResult { layer: main.id.clone(), bbox: main.bbox, polygons: main.region.clone() })
    }
}

/// Run `rvmc` with default options.
pub fn run(rvmc: &Rvmc) -> VmResult<RenderResult> {
    VirtualMachine::new(VmOptions::default()).run(rvmc)
}
