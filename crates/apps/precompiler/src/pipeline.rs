//! The compile pipeline, from parsed map to styled map
//!
//! 1. Build the instance lookup and seed the random streams from the layout.
//! 2. Read tiles out of the world brushes.
//! 3. Load templates and parse the item graph.
//! 4. Run the conditions.
//! 5. Emit tile brushes and compact the item graph into outputs.

use anyhow::Context;
use logic::{MapContext, RuleEngine};
use std::path::Path;
use tracing::{info, warn};
use vmf::{parse_keyvalues, Keyvalue, Vmf};
use world::{Connections, RandStreams, TemplateLibrary, TileGrid};

use crate::config::CompileConfig;

/// A parsed rules file
#[derive(Debug, Clone)]
pub struct RuleFile {
    /// Label used in log context
    pub source: String,
    pub blocks: Vec<Keyvalue>,
}

impl RuleFile {
    pub fn parse(source: impl Into<String>, text: &str) -> vmf::Result<Self> {
        Ok(RuleFile {
            source: source.into(),
            blocks: parse_keyvalues(text)?,
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules {}", path.display()))?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        RuleFile::parse(source, &text).with_context(|| format!("Invalid rules {}", path.display()))
    }
}

/// Everything read from disk for one compile
#[derive(Debug, Default)]
pub struct Inputs {
    pub map: Vmf,
    pub rules: Vec<RuleFile>,
    pub templates: Option<Vmf>,
}

impl Inputs {
    pub fn new(map: Vmf) -> Self {
        Inputs {
            map,
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: RuleFile) -> Self {
        self.rules.push(rules);
        self
    }

    pub fn with_templates(mut self, templates: Vmf) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn load(map: &Path, rules: &[impl AsRef<Path>], templates: Option<&Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(map)
            .with_context(|| format!("Failed to read map {}", map.display()))?;
        let mut inputs = Inputs::new(
            Vmf::parse(&text).with_context(|| format!("Invalid map {}", map.display()))?,
        );
        for path in rules {
            inputs.rules.push(RuleFile::load(path.as_ref())?);
        }
        if let Some(path) = templates {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read templates {}", path.display()))?;
            let parsed =
                Vmf::parse(&text).with_context(|| format!("Invalid templates {}", path.display()))?;
            inputs.templates = Some(parsed);
        }
        Ok(inputs)
    }
}

/// Result of a successful compile
#[derive(Debug)]
pub struct Compiled {
    pub vmf: Vmf,
    /// Number of results that ran
    pub results: usize,
    /// Relay entities added to keep outputs within limits
    pub relays: usize,
}

/// Run the whole pipeline over a map
///
/// Errors keep the mapper-facing [`world::UserError`] reachable through
/// [`logic::Error::user_error`].
pub fn compile(inputs: Inputs, cfg: &CompileConfig) -> logic::Result<Compiled> {
    let Inputs {
        mut map,
        rules,
        templates,
    } = inputs;

    let locs = cfg.instance_locs();
    let seed_positions: Vec<_> = map
        .by_class("func_instance")
        .filter(|(_, ent)| cfg.seed.items.is_empty() || locs.matches(&cfg.seed.items, ent.file()))
        .map(|(_, ent)| ent.origin())
        .collect();
    let rand = RandStreams::from_positions(seed_positions);

    let tiles = TileGrid::analyse(&mut map, &cfg.tiling);

    let mut library = TemplateLibrary::new();
    if let Some(templates) = &templates {
        library.load(templates)?;
    }

    let connections = Connections::parse(&map, &cfg.connections, &locs);

    let registry = cfg.registry()?;
    let mut engine = RuleEngine::new();
    for file in &rules {
        engine.load(&registry, &file.blocks, &file.source)?;
    }
    if engine.is_empty() {
        warn!("No conditions loaded, the map only gets tiles and outputs rebuilt");
    }

    let mut ctx = MapContext::new(map)
        .with_settings(cfg.settings.clone())
        .with_locs(locs)
        .with_rand(rand)
        .with_tiles(tiles)
        .with_templates(library)
        .with_connections(connections);
    let tx = engine
        .run(&mut ctx)
        .map_err(|err| with_tile_snapshot(err, &ctx.tiles))?;

    let brushes = ctx.tiles.generate_brushes(&mut ctx.vmf.ids, &cfg.tiling);
    let tile_brushes = brushes.len();
    for brush in brushes {
        ctx.vmf.add_brush(brush);
    }
    let relays = ctx
        .connections
        .compact(&mut ctx.vmf, &cfg.connections)
        .map_err(|err| with_tile_snapshot(err.into(), &ctx.tiles))?;

    info!(
        results = tx.changes().len(),
        tile_brushes,
        relays = relays.len(),
        "Compile finished"
    );
    Ok(Compiled {
        vmf: ctx.vmf,
        results: tx.changes().len(),
        relays: relays.len(),
    })
}

/// Give a mapper-facing error the tile layout, for the viewer to draw
fn with_tile_snapshot(err: logic::Error, tiles: &TileGrid) -> logic::Error {
    match err.user_error() {
        Some(user) => {
            let user = user.clone().with_faces(tiles.snapshot());
            logic::Error::User(Box::new(user))
        }
        None => err,
    }
}
