use std::collections::BTreeMap;

use crate::ast::{Attribute, InterpolationMode, Polarity, QuadrantMode};
use crate::geometry::{Mirroring, Point, Transform};

/// Attribute dictionaries. They never influence geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub file: BTreeMap<String, Vec<String>>,
    pub aperture: BTreeMap<String, Vec<String>>,
    pub object: BTreeMap<String, Vec<String>>,
}

impl Attributes {
    pub(crate) fn apply(&mut self, attribute: &Attribute) {
        match attribute {
            Attribute::File { name, values } => {
                self.file.insert(name.clone(), values.clone());
            }
            Attribute::Aperture { name, values } => {
                self.aperture.insert(name.clone(), values.clone());
            }
            Attribute::Object { name, values } => {
                self.object.insert(name.clone(), values.clone());
            }
            Attribute::Delete { name: None } => {
                self.aperture.clear();
                self.object.clear();
            }
            Attribute::Delete { name: Some(name) } => {
                self.aperture.remove(name);
                self.object.remove(name);
            }
        }
    }
}

/// Graphics state: everything a D01/D02/D03 depends on besides the aperture table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DrawingState {
    pub interpolation: InterpolationMode,
    pub quadrant: QuadrantMode,
    pub current_point: Point,
    pub aperture: Option<u32>,
    pub polarity: Polarity,
    pub mirroring: Mirroring,
    pub rotation: f64,
    pub scaling: f64,
}

impl Default for DrawingState {
    fn default() -> Self {
        DrawingState {
            interpolation: InterpolationMode::Linear,
            quadrant: QuadrantMode::Single,
            current_point: Point::ORIGIN,
            aperture: None,
            polarity: Polarity::Dark,
            mirroring: Mirroring::None,
            rotation: 0.0,
            scaling: 1.0,
        }
    }
}

impl DrawingState {
    /// Aperture transformation: mirror, then rotate, then scale.
    pub fn aperture_transform(&self) -> Transform {
        Transform::mirror(self.mirroring)
            .then(Transform::rotate(self.rotation))
            .then(Transform::scale(self.scaling))
    }

    pub fn is_clear(&self) -> bool {
        self.polarity == Polarity::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_order_mirror_rotate_scale() {
        let state = DrawingState { mirroring: Mirroring::X, rotation: 90.0, scaling: 2.0, ..Default::default() };
        // (1, 0) -> mirror (-1, 0) -> rotate (0, -1) -> scale (0, -2)
        let p = state.aperture_transform().apply(Point::new(1.0, 0.0));
        assert!(p.approx_eq(Point::new(0.0, -2.0), 1e-9));
    }

    #[test]
    fn delete_attributes() {
        let mut attrs = Attributes::default();
        attrs.apply(&Attribute::File { name: ".Part".into(), values: vec!["Single".into()] });
        attrs.apply(&Attribute::Aperture { name: ".AperFunction".into(), values: vec!["ViaPad".into()] });
        attrs.apply(&Attribute::Object { name: ".N".into(), values: vec!["GND".into()] });
        attrs.apply(&Attribute::Delete { name: Some(".N".into()) });
        assert!(attrs.object.is_empty());
        assert_eq!(attrs.aperture.len(), 1);
        attrs.apply(&Attribute::Delete { name: None });
        assert!(attrs.aperture.is_empty());
        assert_eq!(attrs.file.len(), 1);
    }
}
