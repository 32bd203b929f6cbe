//! Rezoning proposals and their natural-language description.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::Location;

/// Zone kinds listed individually in a description before the rest are elided.
const MAX_LISTED_ZONE_KINDS: usize = 3;
const DEFAULT_CELL_SIZE_M: f64 = 100.0;

/// A lat/lng bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Default for GeoBounds {
    /// San Francisco.
    fn default() -> Self {
        Self {
            north: 37.8120,
            south: 37.7080,
            east: -122.3549,
            west: -122.5157,
        }
    }
}

impl GeoBounds {
    pub fn center(&self) -> Location {
        Location {
            lat: (self.north + self.south) / 2.0,
            lng: (self.east + self.west) / 2.0,
        }
    }

    pub fn contains(&self, location: Location) -> bool {
        location.lat >= self.south
            && location.lat <= self.north
            && location.lng >= self.west
            && location.lng <= self.east
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default, alias = "cellSize", skip_serializing_if = "Option::is_none")]
    pub cell_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<GeoBounds>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeightLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<f64>,
}

/// One rezoned grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoningCell {
    #[serde(alias = "heightLimit", default, skip_serializing_if = "Option::is_none")]
    pub height_limit: Option<f64>,
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<GeoBounds>,
    #[serde(alias = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<serde_json::Value>,
}

fn unknown_category() -> String {
    "unknown".to_string()
}

/// A policy proposal. Either free text (`title`/`description`) or a grid of
/// rezoned cells, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "gridConfig", default, skip_serializing_if = "Option::is_none")]
    pub grid_config: Option<GridConfig>,
    #[serde(alias = "heightLimits", default, skip_serializing_if = "Option::is_none")]
    pub height_limits: Option<HeightLimits>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cells: BTreeMap<String, ZoningCell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Proposal {
    pub fn from_text(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Render the proposal as the text agents are asked to react to.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match (&self.title, &self.description) {
            (Some(title), Some(description)) => parts.push(format!("{title}: {description}")),
            (Some(text), None) | (None, Some(text)) => parts.push(text.clone()),
            (None, None) => {}
        }
        if !self.cells.is_empty() {
            parts.push(self.describe_cells());
        }
        if parts.is_empty() {
            return "An unspecified rezoning proposal.".to_string();
        }
        parts.join("\n\n")
    }

    fn describe_cells(&self) -> String {
        let cell_size = self
            .grid_config
            .as_ref()
            .and_then(|g| g.cell_size)
            .unwrap_or(DEFAULT_CELL_SIZE_M);
        let default_height = self.height_limits.as_ref().and_then(|h| h.default);
        let default_label = default_height.map_or_else(|| "varies".to_string(), |h| format!("{h}"));

        let mut zone_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
        for cell in self.cells.values() {
            let height = cell
                .height_limit
                .or(default_height)
                .map_or_else(|| "varies".to_string(), |h| format!("{h}"));
            *zone_counts.entry((cell.category.clone(), height)).or_default() += 1;
        }
        let mut zones: Vec<_> = zone_counts.into_iter().collect();
        zones.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut desc = format!(
            "Rezoning proposal with {cell_size}m cells and {} modified zones. \
             Default height limit: {default_label} feet.",
            self.cells.len()
        );
        let listed: Vec<String> = zones
            .iter()
            .take(MAX_LISTED_ZONE_KINDS)
            .map(|((category, height), count)| format!("{count} {category} zones (height: {height}ft)"))
            .collect();
        desc.push_str(" Zones include: ");
        desc.push_str(&listed.join(", "));
        if zones.len() > MAX_LISTED_ZONE_KINDS {
            desc.push_str(&format!(
                ", and {} more zone types",
                zones.len() - MAX_LISTED_ZONE_KINDS
            ));
        }
        desc.push('.');
        desc
    }

    /// Area agents are placed in.
    pub fn bounds(&self) -> GeoBounds {
        self.grid_config
            .as_ref()
            .and_then(|g| g.bounds)
            .unwrap_or_default()
    }

    /// The cell whose bounding-box centre is closest to `location`.
    /// Cells without a bounding box are never chosen.
    pub fn nearest_cell(&self, location: Location) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for (id, cell) in &self.cells {
            let Some(bbox) = cell.bbox else { continue };
            let center = bbox.center();
            let distance = (center.lat - location.lat).powi(2) + (center.lng - location.lng).powi(2);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((id.as_str(), distance));
            }
        }
        best.map(|(id, _)| id)
    }

    pub fn has_spatial_cells(&self) -> bool {
        self.cells.values().any(|c| c.bbox.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_proposal() -> Proposal {
        serde_json::from_value(serde_json::json!({
            "gridConfig": {"cellSize": 100},
            "heightLimits": {"default": 40, "options": [40, 65, 80]},
            "cells": {
                "10_15": {
                    "heightLimit": 65,
                    "category": "residential",
                    "bbox": {"north": 37.79, "south": 37.78, "east": -122.41, "west": -122.42}
                },
                "20_5": {
                    "heightLimit": 80,
                    "category": "mixed",
                    "bbox": {"north": 37.75, "south": 37.74, "east": -122.45, "west": -122.46}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn camel_case_fields_are_accepted() {
        let proposal = grid_proposal();
        assert_eq!(proposal.grid_config.unwrap().cell_size, Some(100.0));
        assert_eq!(proposal.cells["10_15"].height_limit, Some(65.0));
    }

    #[test]
    fn describes_grid_cells() {
        let desc = grid_proposal().describe();
        assert!(desc.contains("100m cells and 2 modified zones"));
        assert!(desc.contains("Default height limit: 40 feet"));
        assert!(desc.contains("1 residential zones (height: 65ft)"));
    }

    #[test]
    fn describes_free_text() {
        let proposal = Proposal::from_text("Upzone transit corridors", "Allow six stories near BART.");
        assert_eq!(
            proposal.describe(),
            "Upzone transit corridors: Allow six stories near BART."
        );
    }

    #[test]
    fn nearest_cell_uses_bbox_centre() {
        let proposal = grid_proposal();
        let near_first = Location {
            lat: 37.785,
            lng: -122.415,
        };
        assert_eq!(proposal.nearest_cell(near_first), Some("10_15"));
        let near_second = Location {
            lat: 37.73,
            lng: -122.47,
        };
        assert_eq!(proposal.nearest_cell(near_second), Some("20_5"));
    }

    #[test]
    fn default_bounds_are_san_francisco() {
        let bounds = Proposal::default().bounds();
        assert!(bounds.contains(bounds.center()));
        assert_eq!(bounds.north, 37.8120);
    }
}
