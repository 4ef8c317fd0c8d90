//! Display descriptors and output display selection
//!
//! The embedding application enumerates physical displays; this module names them
//! and decides which one shows the output surface.

use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// Display rectangle in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A display as reported by the windowing system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDisplay {
    pub id: String,
    pub bounds: DisplayBounds,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub internal: bool,
}

/// A display as presented to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub id: String,
    pub name: String,
    pub bounds: DisplayBounds,
    pub is_primary: bool,
    pub is_internal: bool,
}

impl DisplayInfo {
    /// External and not primary: most likely a projector
    pub fn is_projector(&self) -> bool {
        !self.is_primary && !self.is_internal
    }
}

/// Name raw displays, e.g. "Built-in Display (2560x1600)" or "External Display 2 (1920x1080)"
pub fn describe_displays(displays: &[RawDisplay]) -> Vec<DisplayInfo> {
    displays
        .iter()
        .enumerate()
        .map(|(index, d)| {
            let base = match (d.primary, d.internal) {
                (true, true) => "Built-in Display".to_string(),
                (false, true) => format!("Internal Display {}", index + 1),
                (true, false) => "Primary External Display".to_string(),
                (false, false) => format!("External Display {}", index + 1),
            };
            DisplayInfo {
                id: d.id.clone(),
                name: format!("{} ({}x{})", base, d.bounds.width, d.bounds.height),
                bounds: d.bounds,
                is_primary: d.primary,
                is_internal: d.internal,
            }
        })
        .collect()
}

pub fn find_display<'a>(displays: &'a [DisplayInfo], id: &str) -> Result<&'a DisplayInfo> {
    displays
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| ProjectionError::not_found("display", id))
}

/// Choose the output display: the preferred one if still connected, otherwise the
/// first projector, otherwise any non-primary display. Without a usable preference
/// the primary display is never chosen.
pub fn pick_output_display<'a>(
    displays: &'a [DisplayInfo],
    preferred: Option<&str>,
) -> Option<&'a DisplayInfo> {
    if let Some(id) = preferred {
        match find_display(displays, id) {
            Ok(display) => return Some(display),
            Err(_) => log::warn!("Preferred output display {} is not connected", id),
        }
    }
    displays
        .iter()
        .find(|d| d.is_projector())
        .or_else(|| displays.iter().find(|d| !d.is_primary))
}
