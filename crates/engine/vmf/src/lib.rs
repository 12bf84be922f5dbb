//! Hammer map files
//!
//! This crate provides:
//! - A parser and serializer for the block-structured key-value grammar
//! - The scene graph built on top of it: entities, brushes, outputs and
//!   instance fixups
//! - Geometry helpers for Source-style angles and axis-aligned brushes

pub mod entity;
pub mod error;
pub mod fixup;
pub mod keyvalues;
pub mod map;
pub mod math;
pub mod output;
pub mod solid;

pub use entity::Entity;
pub use error::{Error, Result};
pub use fixup::Fixups;
pub use keyvalues::{conv_bool, parse_keyvalues, serialize_keyvalues, Keyvalue, Value};
pub use map::{EntityId, IdAllocator, Vmf};
pub use math::{format_num, format_vec, parse_vec, parse_vec_or_zero, round_grid, Orientation};
pub use output::{Output, Separator};
pub use solid::{Side, Solid, UvAxis, AXIS_NORMALS};

// Re-export glam so downstream crates agree on the vector types
pub use glam;
