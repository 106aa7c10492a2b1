//! Region-of-interest configuration.
//!
//! Every event type owns one JSON document under the configuration directory,
//! named after the event (`EventStat.json`, `AlertStranger.json`,
//! `MonitorVehicle.json`). A document maps the five fixed slot names to an
//! ordered list of integer `[x, y]` vertices:
//!
//! ```json
//! {"ROI 1": [[0,0],[100,0],[100,100],[0,100]], "ROI 2": [], "ROI 3": [], "ROI 4": [], "ROI 5": []}
//! ```
//!
//! An empty vertex list marks the slot inactive. The producer only reads these
//! documents; the control surface writes them while the operator edits regions.

pub mod geometry;

use anyhow::{Context, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::EventType;

pub use geometry::Vertex;

/// Alert fill/text color.
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Region outline color.
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
/// Centroid index label color.
pub const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

// ----------------------------------------------------------------------------
// Slots
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoiSlot {
    #[serde(rename = "ROI 1")]
    Roi1,
    #[serde(rename = "ROI 2")]
    Roi2,
    #[serde(rename = "ROI 3")]
    Roi3,
    #[serde(rename = "ROI 4")]
    Roi4,
    #[serde(rename = "ROI 5")]
    Roi5,
}

impl RoiSlot {
    pub const ALL: [RoiSlot; 5] = [
        RoiSlot::Roi1,
        RoiSlot::Roi2,
        RoiSlot::Roi3,
        RoiSlot::Roi4,
        RoiSlot::Roi5,
    ];

    /// 1-based slot number, as drawn at the region centroid.
    pub fn number(self) -> usize {
        match self {
            RoiSlot::Roi1 => 1,
            RoiSlot::Roi2 => 2,
            RoiSlot::Roi3 => 3,
            RoiSlot::Roi4 => 4,
            RoiSlot::Roi5 => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RoiSlot::Roi1 => "ROI 1",
            RoiSlot::Roi2 => "ROI 2",
            RoiSlot::Roi3 => "ROI 3",
            RoiSlot::Roi4 => "ROI 4",
            RoiSlot::Roi5 => "ROI 5",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.name() == name)
    }

    pub fn from_number(number: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.number() == number)
    }

    /// Fixed display color (RGB).
    pub fn color(self) -> Rgb<u8> {
        match self {
            RoiSlot::Roi1 => Rgb([0, 255, 0]),
            RoiSlot::Roi2 => Rgb([255, 0, 255]),
            RoiSlot::Roi3 => Rgb([0, 255, 255]),
            RoiSlot::Roi4 => Rgb([0, 0, 255]),
            RoiSlot::Roi5 => Rgb([70, 30, 50]),
        }
    }
}

impl std::fmt::Display for RoiSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Regions and per-event configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoiRegion {
    pub slot: RoiSlot,
    pub vertices: Vec<Vertex>,
}

impl RoiRegion {
    pub fn inactive(slot: RoiSlot) -> Self {
        Self {
            slot,
            vertices: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.vertices.is_empty()
    }

    pub fn color(&self) -> Rgb<u8> {
        self.slot.color()
    }
}

/// The complete region set for one event type. Always holds all five slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventConfig {
    event_type: EventType,
    regions: Vec<RoiRegion>,
}

impl EventConfig {
    /// All five slots inactive.
    pub fn empty(event_type: EventType) -> Self {
        Self {
            event_type,
            regions: RoiSlot::ALL.into_iter().map(RoiRegion::inactive).collect(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Regions in slot order, active or not.
    pub fn regions(&self) -> &[RoiRegion] {
        &self.regions
    }

    pub fn active_regions(&self) -> impl Iterator<Item = &RoiRegion> {
        self.regions.iter().filter(|region| region.is_active())
    }

    pub fn region(&self, slot: RoiSlot) -> &RoiRegion {
        &self.regions[slot.number() - 1]
    }

    pub fn set_vertices(&mut self, slot: RoiSlot, vertices: Vec<Vertex>) {
        self.regions[slot.number() - 1].vertices = vertices;
    }

    /// Append a vertex. Returns false when the point is already in the region.
    pub fn add_point(&mut self, slot: RoiSlot, x: i32, y: i32) -> bool {
        let vertices = &mut self.regions[slot.number() - 1].vertices;
        if vertices.contains(&[x, y]) {
            return false;
        }
        vertices.push([x, y]);
        true
    }

    pub fn remove_last_point(&mut self, slot: RoiSlot) -> Option<Vertex> {
        self.regions[slot.number() - 1].vertices.pop()
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        for region in &mut self.regions {
            region.vertices.clear();
        }
    }

    fn from_document(event_type: EventType, path: &Path, raw: &str) -> Result<Self> {
        let document: BTreeMap<String, Vec<Vertex>> =
            serde_json::from_str(raw).map_err(|e| PipelineError::InvalidRoiConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut config = Self::empty(event_type);
        for (name, vertices) in document {
            let slot = RoiSlot::from_name(&name).ok_or_else(|| PipelineError::InvalidRoiConfig {
                path: path.to_path_buf(),
                reason: format!("unknown region slot '{}'", name),
            })?;
            config.set_vertices(slot, vertices);
        }
        Ok(config)
    }

    fn to_document(&self) -> BTreeMap<&'static str, &[Vertex]> {
        self.regions
            .iter()
            .map(|region| (region.slot.name(), region.vertices.as_slice()))
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------------

/// Reads and writes per-event ROI documents in one directory.
///
/// No caching: every `load` reads the file, so the producer always sees the
/// control surface's latest save. Callers decide when to reload.
#[derive(Clone, Debug)]
pub struct RoiConfigStore {
    dir: PathBuf,
}

impl RoiConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, event_type: EventType) -> PathBuf {
        self.dir.join(format!("{}.json", event_type.name()))
    }

    /// Load the region set for an event type.
    ///
    /// A missing document is `PipelineError::ConfigMissing`; no empty
    /// configuration is substituted.
    pub fn load(&self, event_type: EventType) -> Result<EventConfig> {
        let path = self.path_for(event_type);
        if !path.exists() {
            return Err(PipelineError::ConfigMissing {
                event: event_type.name(),
                path,
            }
            .into());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read ROI config {}", path.display()))?;
        EventConfig::from_document(event_type, &path, &raw)
    }

    /// Write the region set, replacing the whole document.
    pub fn save(&self, config: &EventConfig) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create config dir {}", self.dir.display()))?;
        let path = self.path_for(config.event_type());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(&config.to_document())?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write ROI config {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace ROI config {}", path.display()))?;
        Ok(())
    }

    /// Load the document, creating an all-inactive one first if absent.
    pub fn init(&self, event_type: EventType) -> Result<EventConfig> {
        if !self.path_for(event_type).exists() {
            let empty = EventConfig::empty(event_type);
            self.save(&empty)?;
            log::info!(
                "created empty ROI config for {} at {}",
                event_type,
                self.path_for(event_type).display()
            );
            return Ok(empty);
        }
        self.load(event_type)
    }

    pub fn event_name(&self, event_type: EventType) -> &'static str {
        event_type.name()
    }

    /// Name for a raw control-plane code. Unknown codes are an error, never a default.
    pub fn event_name_for_code(&self, code: i64) -> Result<&'static str, PipelineError> {
        EventType::from_code(code).map(EventType::name)
    }
}
