//! Collision volumes recorded per item
//!
//! Items register the space they occupy as boxes tagged with what kind of
//! obstruction they are. Later rules query a region to find which items
//! overlap it. Only items whose rules add volumes are known here, so a
//! query can miss items that never registered any.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use vmf::Orientation;

/// Kinds of obstruction, combinable as a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CollideType(u32);

impl CollideType {
    pub const NOTHING: CollideType = CollideType(0);
    /// Walls, props and other ordinary solids
    pub const SOLID: CollideType = CollideType(1);
    /// Decoration may not be placed here
    pub const DECORATION: CollideType = CollideType(1 << 1);
    /// Blocks movement but not energy beams
    pub const GRATING: CollideType = CollideType(1 << 2);
    /// Only lasers pass through
    pub const GLASS: CollideType = CollideType(1 << 3);
    pub const BRIDGE: CollideType = CollideType(1 << 4);
    pub const FIZZLER: CollideType = CollideType(1 << 5);
    /// Only sometimes present
    pub const TEMPORARY: CollideType = CollideType(1 << 6);
    pub const ANTLINES: CollideType = CollideType(1 << 7);
    pub const PHYSICS: CollideType = CollideType(1 | 1 << 6);
    pub const EVERYTHING: CollideType = CollideType((1 << 8) - 1);

    const NAMES: &'static [(&'static str, CollideType)] = &[
        ("nothing", Self::NOTHING),
        ("solid", Self::SOLID),
        ("decoration", Self::DECORATION),
        ("deco", Self::DECORATION),
        ("grating", Self::GRATING),
        ("grate", Self::GRATING),
        ("glass", Self::GLASS),
        ("bridge", Self::BRIDGE),
        ("fizzler", Self::FIZZLER),
        ("temporary", Self::TEMPORARY),
        ("antlines", Self::ANTLINES),
        ("antline", Self::ANTLINES),
        ("physics", Self::PHYSICS),
        ("everything", Self::EVERYTHING),
    ];

    /// Parse a space-separated list of names
    pub fn parse(text: &str) -> Result<CollideType, String> {
        text.split_whitespace().try_fold(Self::NOTHING, |acc, word| {
            Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(word))
                .map(|(_, ty)| acc | *ty)
                .ok_or_else(|| format!("Unknown collide type \"{word}\"!"))
        })
    }

    pub fn intersects(self, other: CollideType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CollideType {
    type Output = CollideType;

    fn bitor(self, rhs: CollideType) -> CollideType {
        CollideType(self.0 | rhs.0)
    }
}

impl BitAnd for CollideType {
    type Output = CollideType;

    fn bitand(self, rhs: CollideType) -> CollideType {
        CollideType(self.0 & rhs.0)
    }
}

impl fmt::Display for CollideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(name, ty)| {
                ty.0.count_ones() == 1 && self.intersects(*ty) && !matches!(*name, "deco" | "grate" | "antline")
            })
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "nothing")
        } else {
            write!(f, "{}", names.join(" "))
        }
    }
}

/// Axis-aligned box in world space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: DVec3,
    pub max: DVec3,
    pub contents: CollideType,
    pub tags: Vec<String>,
}

impl BBox {
    /// Box spanning two corners, in any order
    pub fn new(a: DVec3, b: DVec3, contents: CollideType) -> Self {
        BBox {
            min: a.min(b),
            max: a.max(b),
            contents,
            tags: Vec::new(),
        }
    }

    /// World-space bounds of a local box placed at `origin` with `orient`
    pub fn oriented(
        local_min: DVec3,
        local_max: DVec3,
        origin: DVec3,
        orient: &Orientation,
        contents: CollideType,
    ) -> Self {
        let a = orient.rotate(local_min) + origin;
        let b = orient.rotate(local_max) + origin;
        BBox::new(a, b, contents)
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// True if the interiors overlap; touching faces do not count
    pub fn overlaps(&self, min: DVec3, max: DVec3) -> bool {
        self.min.cmplt(max).all() && min.cmplt(self.max).all()
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }
}

/// All registered collision volumes
#[derive(Debug, Default)]
pub struct Collisions {
    owners: Vec<String>,
    by_name: HashMap<String, usize>,
    boxes: Vec<(usize, BBox)>,
}

impl Collisions {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_index(&mut self, owner: &str) -> usize {
        let folded = owner.to_ascii_lowercase();
        if let Some(&idx) = self.by_name.get(&folded) {
            return idx;
        }
        self.owners.push(owner.to_string());
        self.by_name.insert(folded, self.owners.len() - 1);
        self.owners.len() - 1
    }

    /// Register boxes occupied by `owner`
    pub fn add(&mut self, owner: &str, boxes: impl IntoIterator<Item = BBox>) {
        let idx = self.owner_index(owner);
        for bbox in boxes {
            if !self.boxes.iter().any(|(o, b)| *o == idx && *b == bbox) {
                self.boxes.push((idx, bbox));
            }
        }
    }

    /// Owners with a box of a matching kind overlapping the region
    ///
    /// Each owner is listed once, in the order it first registered.
    pub fn query(&self, min: DVec3, max: DVec3, mask: CollideType) -> Vec<&str> {
        let (lo, hi) = (min.min(max), min.max(max));
        let mut hit = vec![false; self.owners.len()];
        for (owner, bbox) in &self.boxes {
            if bbox.contents.intersects(mask) && bbox.overlaps(lo, hi) {
                hit[*owner] = true;
            }
        }
        self.owners
            .iter()
            .zip(hit)
            .filter(|(_, h)| *h)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Boxes of a matching kind overlapping the region
    pub fn iter_inside(
        &self,
        min: DVec3,
        max: DVec3,
        mask: CollideType,
    ) -> impl Iterator<Item = (&str, &BBox)> {
        let (lo, hi) = (min.min(max), min.max(max));
        self.boxes
            .iter()
            .filter(move |(_, b)| b.contents.intersects(mask) && b.overlaps(lo, hi))
            .map(|(o, b)| (self.owners[*o].as_str(), b))
    }

    /// Every box registered for an item
    pub fn boxes_for(&self, owner: &str) -> Vec<&BBox> {
        match self.by_name.get(&owner.to_ascii_lowercase()) {
            Some(&idx) => self
                .boxes
                .iter()
                .filter(|(o, _)| *o == idx)
                .map(|(_, b)| b)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collide_type() {
        let ty = CollideType::parse("solid GLASS").unwrap();
        assert!(ty.intersects(CollideType::SOLID));
        assert!(ty.intersects(CollideType::GLASS));
        assert!(!ty.intersects(CollideType::GRATING));
        assert_eq!(ty.to_string(), "solid glass");
        assert!(CollideType::parse("wood").is_err());
    }

    #[test]
    fn test_oriented_box() {
        let bbox = BBox::oriented(
            DVec3::new(0.0, -16.0, 0.0),
            DVec3::new(64.0, 16.0, 32.0),
            DVec3::new(128.0, 0.0, 0.0),
            &Orientation::from_angles(0.0, 90.0, 0.0),
            CollideType::SOLID,
        );
        assert_eq!(bbox.min, DVec3::new(112.0, 0.0, 0.0));
        assert_eq!(bbox.max, DVec3::new(144.0, 64.0, 32.0));
    }

    #[test]
    fn test_query_dedups_owners_in_order() {
        let mut coll = Collisions::new();
        coll.add(
            "cube_dropper",
            [
                BBox::new(DVec3::ZERO, DVec3::splat(64.0), CollideType::SOLID),
                BBox::new(DVec3::splat(32.0), DVec3::splat(96.0), CollideType::SOLID),
            ],
        );
        coll.add(
            "glass_1",
            [BBox::new(DVec3::new(0.0, 0.0, 0.0), DVec3::new(8.0, 128.0, 128.0), CollideType::GLASS)],
        );

        let hits = coll.query(DVec3::splat(40.0), DVec3::splat(50.0), CollideType::EVERYTHING);
        assert_eq!(hits, vec!["cube_dropper"]);

        let hits = coll.query(DVec3::ZERO, DVec3::splat(16.0), CollideType::EVERYTHING);
        assert_eq!(hits, vec!["cube_dropper", "glass_1"]);

        let hits = coll.query(DVec3::ZERO, DVec3::splat(16.0), CollideType::GLASS);
        assert_eq!(hits, vec!["glass_1"]);

        // Touching is not overlapping
        assert!(coll
            .query(DVec3::new(96.0, 0.0, 0.0), DVec3::splat(200.0), CollideType::SOLID)
            .is_empty());
        assert_eq!(coll.boxes_for("CUBE_DROPPER").len(), 2);
    }
}
