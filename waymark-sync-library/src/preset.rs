//! Waymark preset payload and its content-derived identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};

/// A single placed field marker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Waymark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(rename = "ID")]
    pub id: i32,
    pub active: bool,
}

/// One waymark preset as exchanged by preset repositories.
///
/// The JSON field names follow the format the game plugin exports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WaymarkPreset {
    pub name: String,
    #[serde(rename = "MapID")]
    pub map_id: u16,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub a: Waymark,
    pub b: Waymark,
    pub c: Waymark,
    pub d: Waymark,
    pub one: Waymark,
    pub two: Waymark,
    pub three: Waymark,
    pub four: Waymark,
}

/// Placement key of one waymark: `None` when inactive, otherwise its
/// coordinates quantized to millimetres.
type MarkKey = Option<(i64, i64, i64)>;

/// Content-derived key used to match an incoming preset against the library.
///
/// Two presets are the same entry when they target the same map and place
/// every waymark identically, regardless of their names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresetIdentity {
    map_id: u16,
    marks: [MarkKey; 8],
}

impl WaymarkPreset {
    /// Decode a preset from its JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(LibraryError::Decode)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(LibraryError::Decode)
    }

    /// Waymarks in display order (A, B, C, D, 1, 2, 3, 4).
    pub fn waymarks(&self) -> [&Waymark; 8] {
        [
            &self.a, &self.b, &self.c, &self.d, &self.one, &self.two, &self.three, &self.four,
        ]
    }

    pub fn identity(&self) -> PresetIdentity {
        let marks = self.waymarks().map(|mark| {
            mark.active
                .then(|| (quantize(mark.x), quantize(mark.y), quantize(mark.z)))
        });
        PresetIdentity {
            map_id: self.map_id,
            marks,
        }
    }

    /// Whether no waymark is placed at all.
    pub fn is_empty(&self) -> bool {
        self.waymarks().iter().all(|mark| !mark.active)
    }
}

fn quantize(v: f32) -> i64 {
    (f64::from(v) * 1000.0).round() as i64
}
