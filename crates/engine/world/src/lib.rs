//! World crate - Map-wide state shared by every rule during a compile
//!
//! Everything here is built once from the parsed map and configuration,
//! mutated while conditions run, then turned back into map content.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Read-only lookups                      │
//! ├─────────────────────────────────────────────────────────┤
//! │  InstanceLocs  - item ids and selectors to files        │
//! │  RandStreams   - seeded generators keyed by map data    │
//! ├─────────────────────────────────────────────────────────┤
//! │                   Mutable state                          │
//! ├─────────────────────────────────────────────────────────┤
//! │  TileGrid      - 4x4 sub-tiles per voxel face           │
//! │  Connections   - item I/O graph                         │
//! │  Collisions    - volumes registered by items            │
//! │  TemplateLibrary - named brush/entity groups            │
//! ├─────────────────────────────────────────────────────────┤
//! │                   Emission                               │
//! ├─────────────────────────────────────────────────────────┤
//! │  TileGrid::generate_brushes  - merged tile brushes      │
//! │  Connections::compact        - outputs within limits    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Problems the mapper has to fix are reported as [`UserError`], which
//! carries enough geometry for an external viewer to point at them.

mod collisions;
mod connections;
mod error;
mod instance_locs;
mod random;
mod template;
mod tiling;

pub use collisions::{BBox, CollideType, Collisions};
pub use connections::{
    Connection, Connections, ConnectionsConfig, Item, ItemId, ItemKind, LinkId,
};
pub use error::{to_viewer_space, Error, Result, SimpleTile, UserError, ViewerPos};
pub use instance_locs::{fold_path, InstanceLocs, Variant};
pub use random::{choose, parse_weights, RandStreams, SeedKey};
pub use template::{Placed, Template, TemplateLibrary, TemplateMode};
pub use tiling::{
    cell_center, merge_rects, world_to_cell, Orient, Rect, TileAddr, TileDef, TileGrid,
    TileState, TileType, TilingConfig, NODRAW, SUBTILE, VOXEL,
};
