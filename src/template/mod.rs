//! Immutable map data supplied by the template provider.
//!
//! A `TemplateCatalog` is loaded once at startup from YAML and handed to
//! `Field::new`. Nothing in here is mutated after loading; fields hold
//! `Arc`s into the catalog.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A point in field coordinates. `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Bounding rectangle of a field. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.top && p.y < self.bottom
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FootholdTemplate {
    pub id: i16,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl FootholdTemplate {
    /// Vertical segments (walls) have no horizontal span to stand on.
    pub fn is_wall(&self) -> bool {
        self.x1 >= self.x2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalType {
    StartPoint,
    Ordinary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalTemplate {
    pub id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PortalType,
    pub position: Point,
    #[serde(default)]
    pub target_field: Option<u32>,
    #[serde(default)]
    pub target_portal: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeKind {
    Npc,
    Mob,
    /// Anything the map data names that this server does not host.
    #[serde(other)]
    Unknown,
}

/// One designed life placement (an NPC stand point or a mob spawn point).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeSpawn {
    #[serde(rename = "type")]
    pub kind: LifeKind,
    pub template_id: u32,
    pub position: Point,
    #[serde(default)]
    pub foothold: i16,
    #[serde(default)]
    pub rx0: i32,
    #[serde(default)]
    pub rx1: i32,
    #[serde(default)]
    pub facing_left: bool,
    /// Respawn delay in seconds after the spawned mob leaves the field.
    #[serde(default)]
    pub mob_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorSpawn {
    pub template_id: u32,
    pub position: Point,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub facing_left: bool,
    /// Respawn delay in seconds after the reactor leaves the field.
    #[serde(default)]
    pub reactor_time: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub id: u32,
    pub bounds: Rect,
    #[serde(default)]
    pub footholds: Vec<FootholdTemplate>,
    #[serde(default)]
    pub portals: Vec<PortalTemplate>,
    #[serde(default)]
    pub life: Vec<LifeSpawn>,
    #[serde(default)]
    pub reactors: Vec<ReactorSpawn>,
    #[serde(default)]
    pub mob_capacity_min: Option<i32>,
    #[serde(default)]
    pub mob_capacity_max: Option<i32>,
}

impl FieldTemplate {
    pub fn portal(&self, id: u8) -> Option<&PortalTemplate> {
        self.portals.iter().find(|p| p.id == id)
    }

    pub fn portal_by_name(&self, name: &str) -> Option<&PortalTemplate> {
        self.portals.iter().find(|p| p.name == name)
    }

    /// First start point in portal id order.
    pub fn start_point(&self) -> Option<&PortalTemplate> {
        self.portals
            .iter()
            .filter(|p| p.kind == PortalType::StartPoint)
            .min_by_key(|p| p.id)
    }

    /// Mob capacity bounds `(min, max)`. Missing values default to the
    /// number of designed mob spawn points and twice that.
    pub fn mob_capacity(&self) -> (i32, i32) {
        let spawns = self.life.iter().filter(|l| l.kind == LifeKind::Mob).count() as i32;
        let min = self.mob_capacity_min.unwrap_or(spawns);
        let max = self.mob_capacity_max.unwrap_or(min * 2);
        (min, max)
    }

    /// The foothold an entity standing at `p` lands on: the nearest
    /// non-wall foothold whose span contains `p.x` and whose endpoints are
    /// both at or above `p.y`. Ties on distance go to the lower id.
    pub fn foothold_below(&self, p: Point) -> Option<i16> {
        self.footholds
            .iter()
            .filter(|fh| fh.x1 <= p.x && fh.x2 >= p.x)
            .filter(|fh| fh.y1 <= p.y && fh.y2 <= p.y)
            .filter(|fh| !fh.is_wall())
            .min_by_key(|fh| (p.y - fh.y1, fh.id))
            .map(|fh| fh.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobTemplate {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub level: u8,
    #[serde(default = "default_max_hp")]
    pub max_hp: u32,
}

fn default_max_hp() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTemplate {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorTemplate {
    pub id: u32,
    #[serde(default)]
    pub name: String,
}

/// On-disk layout of the catalog file.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    fields: Vec<FieldTemplate>,
    #[serde(default)]
    mobs: Vec<MobTemplate>,
    #[serde(default)]
    npcs: Vec<NpcTemplate>,
    #[serde(default)]
    reactors: Vec<ReactorTemplate>,
}

/// Every template a field host needs, indexed by id.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    fields: HashMap<u32, Arc<FieldTemplate>>,
    mobs: HashMap<u32, Arc<MobTemplate>>,
    npcs: HashMap<u32, Arc<NpcTemplate>>,
    reactors: HashMap<u32, Arc<ReactorTemplate>>,
}

impl TemplateCatalog {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template catalog: {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("Failed to load template catalog {}", path.display()))
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        let mut catalog = Self::default();
        for field in file.fields {
            catalog.add_field(field)?;
        }
        for mob in file.mobs {
            anyhow::ensure!(!catalog.mobs.contains_key(&mob.id), "duplicate mob template {}", mob.id);
            catalog.mobs.insert(mob.id, Arc::new(mob));
        }
        for npc in file.npcs {
            anyhow::ensure!(!catalog.npcs.contains_key(&npc.id), "duplicate npc template {}", npc.id);
            catalog.npcs.insert(npc.id, Arc::new(npc));
        }
        for reactor in file.reactors {
            anyhow::ensure!(
                !catalog.reactors.contains_key(&reactor.id),
                "duplicate reactor template {}",
                reactor.id
            );
            catalog.reactors.insert(reactor.id, Arc::new(reactor));
        }
        Ok(catalog)
    }

    pub fn add_field(&mut self, field: FieldTemplate) -> Result<()> {
        anyhow::ensure!(!self.fields.contains_key(&field.id), "duplicate field template {}", field.id);
        anyhow::ensure!(
            field.bounds.width() > 0 && field.bounds.height() > 0,
            "field {} has empty bounds",
            field.id
        );
        let mut ids = BTreeMap::new();
        for portal in &field.portals {
            anyhow::ensure!(
                ids.insert(portal.id, ()).is_none(),
                "field {} has duplicate portal id {}",
                field.id,
                portal.id
            );
        }
        self.fields.insert(field.id, Arc::new(field));
        Ok(())
    }

    pub fn add_mob(&mut self, mob: MobTemplate) {
        self.mobs.insert(mob.id, Arc::new(mob));
    }

    pub fn add_npc(&mut self, npc: NpcTemplate) {
        self.npcs.insert(npc.id, Arc::new(npc));
    }

    pub fn add_reactor(&mut self, reactor: ReactorTemplate) {
        self.reactors.insert(reactor.id, Arc::new(reactor));
    }

    pub fn field(&self, id: u32) -> Option<Arc<FieldTemplate>> {
        self.fields.get(&id).cloned()
    }

    pub fn mob(&self, id: u32) -> Option<Arc<MobTemplate>> {
        self.mobs.get(&id).cloned()
    }

    pub fn npc(&self, id: u32) -> Option<Arc<NpcTemplate>> {
        self.npcs.get(&id).cloned()
    }

    pub fn reactor(&self, id: u32) -> Option<Arc<ReactorTemplate>> {
        self.reactors.get(&id).cloned()
    }

    pub fn field_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.fields.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
