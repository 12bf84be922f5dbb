//! Deterministic random streams
//!
//! Every random choice in a compile is drawn from a generator seeded by a
//! SHA-256 digest of stable map data: the layout hash below plus a key built
//! from the name of the feature and the positions or names it applies to.
//! Iteration order and memory layout never feed into a seed, so rebuilding
//! an unchanged map repeats every choice.
//!
//! Generators are ChaCha-based `StdRng`s, which produce the same sequence on
//! every platform for a given `rand` release.

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};
use vmf::{parse_vec_or_zero, Entity};

/// Grid the layout positions are rounded to before hashing
const LAYOUT_GRID: f64 = 64.0;

/// Hash of the map layout that every stream starts from
#[derive(Clone, Default)]
pub struct RandStreams {
    map_hash: Sha256,
}

impl fmt::Debug for RandStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandStreams").finish_non_exhaustive()
    }
}

impl RandStreams {
    /// Streams with an empty layout hash
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the layout hash from item positions
    ///
    /// Positions are rounded to a 64-unit grid and sorted, so entity order in
    /// the file and small nudges leave the hash unchanged.
    pub fn from_positions(positions: impl IntoIterator<Item = DVec3>) -> Self {
        let mut packed: Vec<[u8; 12]> = positions
            .into_iter()
            .map(|pos| {
                let grid = (pos / LAYOUT_GRID).round();
                let mut bytes = [0u8; 12];
                bytes[0..4].copy_from_slice(&(grid.x as i32).to_le_bytes());
                bytes[4..8].copy_from_slice(&(grid.y as i32).to_le_bytes());
                bytes[8..12].copy_from_slice(&(grid.z as i32).to_le_bytes());
                bytes
            })
            .collect();
        packed.sort_unstable();

        if packed.is_empty() {
            warn!("No layout positions to seed from, random choices will not vary between maps");
        }
        let mut map_hash = Sha256::new();
        for bytes in &packed {
            map_hash.update(bytes);
        }
        debug!(positions = packed.len(), "Seeded map hash");
        RandStreams { map_hash }
    }

    /// Start a seed key for a named feature
    pub fn seed(&self, name: &[u8]) -> SeedKey {
        let mut hasher = self.map_hash.clone();
        hasher.update(name);
        SeedKey { hasher }
    }

    /// Generator for a raw key
    pub fn stream_for(&self, key: &[u8]) -> StdRng {
        self.seed(key).rng()
    }
}

/// Builder hashing the values a random choice depends on
#[derive(Clone)]
pub struct SeedKey {
    hasher: Sha256,
}

fn round6(value: f64) -> f32 {
    ((value * 1e6).round() / 1e6) as f32
}

impl SeedKey {
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update(bytes);
        self
    }

    pub fn str(self, text: &str) -> Self {
        self.bytes(text.as_bytes())
    }

    pub fn int(self, value: i64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    /// Hash a vector as three little-endian `f32`s rounded to 6 places
    pub fn vec(mut self, v: DVec3) -> Self {
        for c in [v.x, v.y, v.z] {
            self.hasher.update(round6(c).to_le_bytes());
        }
        self
    }

    /// Hash an entity's identity: targetname, origin and angles
    pub fn entity(self, ent: &Entity) -> Self {
        self.str(ent.targetname())
            .vec(ent.origin())
            .vec(parse_vec_or_zero(ent.get_or("angles", "")))
    }

    /// Finish the key and build the generator
    pub fn rng(self) -> StdRng {
        let digest = self.hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        StdRng::from_seed(seed)
    }
}

/// Expand comma-separated weights into an index table for uniform picking
///
/// `parse_weights(3, "2,1,1")` gives `[0, 0, 1, 2]`. An empty string means
/// equal weights; malformed or mismatched weights fall back to equal
/// weights with a warning.
pub fn parse_weights(count: usize, weights: &str) -> Vec<usize> {
    let equal = || (0..count).collect::<Vec<_>>();
    if weights.trim().is_empty() {
        return equal();
    }
    if !weights.contains(',') {
        warn!("Invalid weight! ({weights})");
        return equal();
    }
    let vals: Vec<&str> = weights.split(',').collect();
    let mut table = Vec::new();
    if vals.len() == count {
        for (i, val) in vals.iter().enumerate() {
            match val.trim().parse::<usize>() {
                Ok(n) => table.extend(std::iter::repeat(i).take(n)),
                Err(_) => break,
            }
        }
    }
    if table.is_empty() {
        warn!("Failed parsing weight! ({weights})");
        return equal();
    }
    table
}

/// Pick an element uniformly
pub fn choose<'a, T>(rng: &mut StdRng, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.random_range(0..items.len())])
    }
}
