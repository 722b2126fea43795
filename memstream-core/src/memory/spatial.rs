//! Spatial memory: the places an agent knows about.
//!
//! A nested `world → sector → arena → [game objects]` tree, grown from the
//! tile addresses the agent perceives. Used to ground plans in the map.
//! Every level lists its entries in the order they were discovered.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

type Arenas = IndexMap<String, Vec<String>>;
type Sectors = IndexMap<String, Arenas>;

/// A perceived tile address. Empty segments mean "not part of that level".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileAddress {
    /// World name.
    pub world: String,
    /// Sector inside the world.
    pub sector: String,
    /// Arena inside the sector.
    pub arena: String,
    /// Game object inside the arena.
    pub game_object: String,
}

impl TileAddress {
    /// `world:sector:arena` path of this tile.
    #[must_use]
    pub fn arena_path(&self) -> String {
        format!("{}:{}:{}", self.world, self.sector, self.arena)
    }
}

/// The agent's known map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryTree {
    tree: IndexMap<String, Sectors>,
}

impl MemoryTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid tree.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let tree: Self = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), worlds = tree.tree.len(), "Loaded spatial memory");
        Ok(tree)
    }

    /// Write to a JSON file, replacing it.
    ///
    /// # Errors
    ///
    /// Fails on serialization or I/O errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Add whatever levels of `tile` are not yet known.
    ///
    /// A level is only descended into when every level above it is set.
    pub fn learn(&mut self, tile: &TileAddress) {
        if tile.world.is_empty() {
            return;
        }
        let sectors = self.tree.entry(tile.world.clone()).or_default();
        if tile.sector.is_empty() {
            return;
        }
        let arenas = sectors.entry(tile.sector.clone()).or_default();
        if tile.arena.is_empty() {
            return;
        }
        let objects = arenas.entry(tile.arena.clone()).or_default();
        if !tile.game_object.is_empty() && !objects.contains(&tile.game_object) {
            objects.push(tile.game_object.clone());
        }
    }

    /// Sectors of `world`, comma-joined. Empty if unknown.
    #[must_use]
    pub fn accessible_sectors(&self, world: &str) -> String {
        self.tree
            .get(world)
            .map(|s| join(s.keys()))
            .unwrap_or_default()
    }

    /// Arenas of a `world:sector` path, comma-joined.
    #[must_use]
    pub fn accessible_arenas(&self, sector_path: &str) -> String {
        let mut parts = sector_path.splitn(2, ':');
        let (Some(world), Some(sector)) = (parts.next(), parts.next()) else {
            return String::new();
        };
        if sector.is_empty() {
            return String::new();
        }
        self.tree
            .get(world)
            .and_then(|s| s.get(sector))
            .map(|a| join(a.keys()))
            .unwrap_or_default()
    }

    /// Game objects of a `world:sector:arena` path, comma-joined.
    ///
    /// Falls back to the lower-cased arena name when the exact one is not
    /// known.
    #[must_use]
    pub fn accessible_objects(&self, arena_path: &str) -> String {
        let mut parts = arena_path.splitn(3, ':');
        let (Some(world), Some(sector), Some(arena)) = (parts.next(), parts.next(), parts.next())
        else {
            return String::new();
        };
        if arena.is_empty() {
            return String::new();
        }
        let Some(arenas) = self.tree.get(world).and_then(|s| s.get(sector)) else {
            return String::new();
        };
        arenas
            .get(arena)
            .or_else(|| arenas.get(&arena.to_lowercase()))
            .map(|objects| objects.join(", "))
            .unwrap_or_default()
    }

    /// `true` if nothing is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

fn join<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}
