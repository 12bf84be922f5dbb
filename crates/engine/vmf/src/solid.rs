//! Brushes and their faces

use crate::error::{Error, Result};
use crate::keyvalues::Keyvalue;
use crate::map::IdAllocator;
use crate::math::{format_num, format_vec, parse_vec, Orientation};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Texture axis: `[x y z offset] scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvAxis {
    pub axis: DVec3,
    pub offset: f64,
    pub scale: f64,
}

impl UvAxis {
    pub fn new(axis: DVec3) -> Self {
        UvAxis {
            axis,
            offset: 0.0,
            scale: 0.25,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            kind: "texture axis",
            value: text.to_string(),
        };
        let (bracket, scale) = text.trim().rsplit_once(']').ok_or_else(invalid)?;
        let nums: Vec<f64> = bracket
            .trim_start_matches('[')
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| invalid())?;
        if nums.len() != 4 {
            return Err(invalid());
        }
        Ok(UvAxis {
            axis: DVec3::new(nums[0], nums[1], nums[2]),
            offset: nums[3],
            scale: scale.trim().parse().map_err(|_| invalid())?,
        })
    }

    pub fn format(&self) -> String {
        format!(
            "[{} {}] {}",
            format_vec(self.axis),
            format_num(self.offset),
            format_num(self.scale)
        )
    }
}

/// One face of a brush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Side {
    pub id: u32,
    pub plane: [DVec3; 3],
    pub material: String,
    pub uaxis: UvAxis,
    pub vaxis: UvAxis,
    /// Remaining keys (`rotation`, `lightmapscale`, `smoothing_groups`...)
    keys: Vec<(String, String)>,
    /// Child blocks such as `dispinfo`
    extra: Vec<Keyvalue>,
}

fn parse_plane(text: &str) -> Result<[DVec3; 3]> {
    let invalid = || Error::InvalidValue {
        kind: "plane",
        value: text.to_string(),
    };
    let mut points = text
        .split(')')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_vec);
    match (points.next(), points.next(), points.next(), points.next()) {
        (Some(a), Some(b), Some(c), None) => Ok([a?, b?, c?]),
        _ => Err(invalid()),
    }
}

/// Texture axes used for a face pointing along `normal`
pub fn default_uv_axes(normal: DVec3) -> (UvAxis, UvAxis) {
    if normal.z.abs() > 0.5 {
        (UvAxis::new(DVec3::X), UvAxis::new(DVec3::NEG_Y))
    } else if normal.x.abs() > 0.5 {
        (UvAxis::new(DVec3::Y), UvAxis::new(DVec3::NEG_Z))
    } else {
        (UvAxis::new(DVec3::X), UvAxis::new(DVec3::NEG_Z))
    }
}

// Edge directions (u, v) for an axis-aligned face, with u x v == normal
fn face_edges(normal: DVec3) -> (DVec3, DVec3) {
    match (normal.x.round() as i32, normal.y.round() as i32, normal.z.round() as i32) {
        (1, 0, 0) => (DVec3::Y, DVec3::Z),
        (-1, 0, 0) => (DVec3::Z, DVec3::Y),
        (0, 1, 0) => (DVec3::Z, DVec3::X),
        (0, -1, 0) => (DVec3::X, DVec3::Z),
        (0, 0, -1) => (DVec3::Y, DVec3::X),
        _ => (DVec3::X, DVec3::Y),
    }
}

/// The six axis-aligned unit normals in a fixed order
pub const AXIS_NORMALS: [DVec3; 6] = [
    DVec3::X,
    DVec3::NEG_X,
    DVec3::Y,
    DVec3::NEG_Y,
    DVec3::Z,
    DVec3::NEG_Z,
];

impl Side {
    pub fn new(id: u32, plane: [DVec3; 3], material: impl Into<String>) -> Self {
        let mut side = Side {
            id,
            plane,
            material: material.into(),
            uaxis: UvAxis::new(DVec3::X),
            vaxis: UvAxis::new(DVec3::NEG_Y),
            keys: vec![
                ("rotation".to_string(), "0".to_string()),
                ("lightmapscale".to_string(), "16".to_string()),
                ("smoothing_groups".to_string(), "0".to_string()),
            ],
            extra: Vec::new(),
        };
        let (u, v) = default_uv_axes(side.normal());
        side.uaxis = u;
        side.vaxis = v;
        side
    }

    /// Axis-aligned rectangle with outward `normal`, covering `min..max` on the face plane
    pub fn axis_aligned(id: u32, min: DVec3, max: DVec3, normal: DVec3, material: &str) -> Self {
        let (u, v) = face_edges(normal);
        let size = max - min;
        let mut corner = min;
        // Faces pointing along a positive axis sit on the max side
        if normal.max_element() > 0.5 {
            corner += normal * size;
        }
        let p1 = corner;
        let p0 = p1 + u * size;
        let p2 = p1 + v * size;
        Side::new(id, [p0, p1, p2], material)
    }

    pub fn from_keyvalue(kv: &Keyvalue) -> Result<Self> {
        let mut side = Side {
            id: 0,
            plane: [DVec3::ZERO; 3],
            material: String::new(),
            uaxis: UvAxis::new(DVec3::X),
            vaxis: UvAxis::new(DVec3::NEG_Y),
            keys: Vec::new(),
            extra: Vec::new(),
        };
        for child in kv.children() {
            if child.has_children() {
                side.extra.push(child.clone());
                continue;
            }
            let value = child.value();
            match child.name().to_ascii_lowercase().as_str() {
                "id" => {
                    side.id = value.trim().parse().map_err(|_| Error::InvalidValue {
                        kind: "id",
                        value: value.to_string(),
                    })?
                }
                "plane" => side.plane = parse_plane(value)?,
                "material" => side.material = value.to_string(),
                "uaxis" => side.uaxis = UvAxis::parse(value)?,
                "vaxis" => side.vaxis = UvAxis::parse(value)?,
                _ => side.keys.push((child.name().to_string(), value.to_string())),
            }
        }
        Ok(side)
    }

    pub fn to_keyvalue(&self) -> Keyvalue {
        let plane = self
            .plane
            .iter()
            .map(|p| format!("({})", format_vec(*p)))
            .collect::<Vec<_>>()
            .join(" ");
        let mut children = vec![
            Keyvalue::leaf("id", self.id.to_string()),
            Keyvalue::leaf("plane", plane),
            Keyvalue::leaf("material", self.material.as_str()),
            Keyvalue::leaf("uaxis", self.uaxis.format()),
            Keyvalue::leaf("vaxis", self.vaxis.format()),
        ];
        children.extend(self.keys.iter().map(|(k, v)| Keyvalue::leaf(k.as_str(), v.as_str())));
        children.extend(self.extra.iter().cloned());
        Keyvalue::block("side", children)
    }

    /// Outward unit normal of the face plane
    pub fn normal(&self) -> DVec3 {
        let [p0, p1, p2] = self.plane;
        (p0 - p1).cross(p2 - p1).normalize_or_zero()
    }

    /// Average of the plane points
    pub fn center(&self) -> DVec3 {
        (self.plane[0] + self.plane[1] + self.plane[2]) / 3.0
    }

    pub fn is_displacement(&self) -> bool {
        self.extra.iter().any(|kv| kv.is("dispinfo"))
    }

    /// Move the face from local space into the frame `origin` + `orient`
    pub fn localise(&mut self, origin: DVec3, orient: &Orientation) {
        for point in &mut self.plane {
            *point = orient.rotate(*point) + origin;
        }
        self.uaxis.axis = orient.rotate(self.uaxis.axis);
        self.vaxis.axis = orient.rotate(self.vaxis.axis);
    }

    pub fn translate(&mut self, offset: DVec3) {
        for point in &mut self.plane {
            *point += offset;
        }
    }
}

/// A brush: convex set of sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    pub id: u32,
    pub sides: Vec<Side>,
    /// `editor` and other preserved blocks
    extra: Vec<Keyvalue>,
}

impl Solid {
    pub fn new(id: u32, sides: Vec<Side>) -> Self {
        Solid {
            id,
            sides,
            extra: Vec::new(),
        }
    }

    /// Axis-aligned box with a material chosen per face normal
    pub fn cuboid_with(
        ids: &mut IdAllocator,
        min: DVec3,
        max: DVec3,
        mut material: impl FnMut(DVec3) -> String,
    ) -> Self {
        let id = ids.solid();
        let sides = AXIS_NORMALS
            .iter()
            .map(|&n| Side::axis_aligned(ids.side(), min, max, n, &material(n)))
            .collect();
        Solid::new(id, sides)
    }

    /// Axis-aligned box with one material on every face
    pub fn cuboid(ids: &mut IdAllocator, min: DVec3, max: DVec3, material: &str) -> Self {
        Self::cuboid_with(ids, min, max, |_| material.to_string())
    }

    pub fn from_keyvalue(kv: &Keyvalue) -> Result<Self> {
        let mut solid = Solid::new(0, Vec::new());
        for child in kv.children() {
            if child.is("side") && child.has_children() {
                solid.sides.push(Side::from_keyvalue(child)?);
            } else if child.is("id") {
                solid.id = child.value().trim().parse().map_err(|_| Error::InvalidValue {
                    kind: "id",
                    value: child.value().to_string(),
                })?;
            } else {
                solid.extra.push(child.clone());
            }
        }
        Ok(solid)
    }

    pub fn to_keyvalue(&self) -> Keyvalue {
        let mut children = vec![Keyvalue::leaf("id", self.id.to_string())];
        children.extend(self.sides.iter().map(Side::to_keyvalue));
        children.extend(self.extra.iter().cloned());
        Keyvalue::block("solid", children)
    }

    /// Bounding box of every plane point
    pub fn bbox(&self) -> (DVec3, DVec3) {
        let mut points = self.sides.iter().flat_map(|s| s.plane.iter().copied());
        let Some(first) = points.next() else {
            return (DVec3::ZERO, DVec3::ZERO);
        };
        points.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)))
    }

    pub fn localise(&mut self, origin: DVec3, orient: &Orientation) {
        for side in &mut self.sides {
            side.localise(origin, orient);
        }
    }

    pub fn translate(&mut self, offset: DVec3) {
        for side in &mut self.sides {
            side.translate(offset);
        }
    }

    /// Give the brush and its faces fresh ids
    pub fn renumber(&mut self, ids: &mut IdAllocator) {
        self.id = ids.solid();
        for side in &mut self.sides {
            side.id = ids.side();
        }
    }
}
