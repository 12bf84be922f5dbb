//! Error types for the world crate

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for world operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or editing map-wide state
#[derive(Debug, Error)]
pub enum Error {
    /// A mapper-facing problem with the map itself
    #[error(transparent)]
    User(#[from] Box<UserError>),

    /// Template name not present in any loaded library
    #[error("Unknown template \"{0}\"")]
    UnknownTemplate(String),

    /// Two templates share an id
    #[error("Duplicate template \"{0}\"")]
    DuplicateTemplate(String),

    /// Malformed map text or values
    #[error("Map error: {0}")]
    Map(#[from] vmf::Error),
}

impl From<UserError> for Error {
    fn from(err: UserError) -> Self {
        Error::User(Box::new(err))
    }
}

/// Position converted to the diagnostic viewer's axes, in 128-unit voxels
pub type ViewerPos = [f64; 3];

/// Convert a map position to viewer space (y up, voxel units)
pub fn to_viewer_space(pos: DVec3) -> ViewerPos {
    [pos.x / 128.0, pos.z / 128.0, pos.y / -128.0]
}

/// Simplified tile for the diagnostic viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleTile {
    pub position: ViewerPos,
    /// One of `n s e w u d`
    pub orient: char,
}

/// Fatal error describing a problem the mapper has to fix
///
/// Carries everything the external viewer needs to highlight the offending
/// part of the map. Serialized to JSON when the compile aborts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserError {
    pub message: String,
    /// Where in the compile the error was raised
    pub context: String,
    pub docs_url: Option<String>,
    /// Extra bulleted lines shown below the message
    pub text_list: Vec<String>,
    /// Small markers
    pub points: Vec<ViewerPos>,
    /// Highlighted 128-unit voxels
    pub voxels: Vec<ViewerPos>,
    pub lines: Vec<(ViewerPos, ViewerPos)>,
    /// Snapshot of tile faces by kind (`white`, `black`...)
    pub faces: BTreeMap<String, Vec<SimpleTile>>,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        UserError {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_points(mut self, points: impl IntoIterator<Item = DVec3>) -> Self {
        self.points.extend(points.into_iter().map(to_viewer_space));
        self
    }

    pub fn with_text_list(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.text_list.extend(lines);
        self
    }

    /// Attach a snapshot of the map's tiles
    pub fn with_faces(mut self, faces: BTreeMap<String, Vec<SimpleTile>>) -> Self {
        self.faces = faces;
        self
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error message: {}", self.message)?;
        for line in &self.text_list {
            write!(f, "\n - {line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UserError {}
