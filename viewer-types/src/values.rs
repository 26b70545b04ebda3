//! Typed values read out of viewer payloads.
//!
//! Each value is built once from a raw payload snapshot using only the total
//! converters in [`crate::convert`], so construction cannot fail: garbage in a
//! field yields that field's default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::convert::{
    field, list_field, number_at, to_enum, to_list, to_map, to_null_number, to_null_timestamp,
    to_number, to_text, RawLabel, RawMap, RawValue,
};

// ============================================================================
// View State
// ============================================================================

/// Viewing direction of a panorama viewer, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub h_fov: Option<f64>,
}

impl Orientation {
    pub fn new(yaw: Option<f64>, pitch: Option<f64>, h_fov: Option<f64>) -> Self {
        Self { yaw, pitch, h_fov }
    }

    pub fn from_raw(raw: &RawValue) -> Self {
        Self {
            yaw: to_null_number(field(raw, "yaw")),
            pitch: to_null_number(field(raw, "pitch")),
            h_fov: to_null_number(field(raw, "hFov")),
        }
    }
}

/// ARGB color with 0-255 channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub alpha: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

fn channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

impl Color {
    pub fn from_argb(alpha: u8, red: u8, green: u8, blue: u8) -> Self {
        Self {
            alpha,
            red,
            green,
            blue,
        }
    }

    /// Read a `[red, green, blue, alpha]` list where alpha is a 0-1 fraction.
    pub fn from_raw(raw: &RawValue) -> Self {
        let rgba = to_list(raw);
        Self {
            alpha: channel(number_at(rgba, 3) * 255.0),
            red: channel(number_at(rgba, 0)),
            green: channel(number_at(rgba, 1)),
            blue: channel(number_at(rgba, 2)),
        }
    }
}

/// World position; components the sandbox did not report stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Position {
    pub fn from_xyz(xyz: &[RawValue]) -> Self {
        let at = |index: usize| xyz.get(index).and_then(to_null_number);
        Self {
            x: at(0),
            y: at(1),
            z: at(2),
        }
    }
}

/// Point handed to the viewer, e.g. for `lookAtCoordinate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

// ============================================================================
// Recordings
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Recording {
    pub fn from_raw(raw: &RawValue) -> Self {
        Self {
            id: to_text(field(raw, "id")),
            recorded_at: to_null_timestamp(field(raw, "recordedAt"))
                .ok()
                .flatten(),
        }
    }
}

/// Payload of a click on a recording marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingClickInfo {
    pub recording: Recording,
    pub event_data: RawMap,
}

impl RecordingClickInfo {
    pub fn from_raw(detail: &RawValue) -> Self {
        Self {
            recording: Recording::from_raw(field(detail, "recording")),
            event_data: to_map(field(detail, "eventData")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTravelInfo {
    pub date: Option<DateTime<Utc>>,
}

impl TimeTravelInfo {
    pub fn from_raw(detail: &RawValue) -> Self {
        Self {
            date: to_null_timestamp(field(detail, "date")).ok().flatten(),
        }
    }
}

// ============================================================================
// Elevation and Depth
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeightUnit {
    Meters,
    Feet,
    UsFeet,
    Degrees,
    #[default]
    Unknown,
}

impl RawLabel for HeightUnit {
    const KIND: &'static str = "height unit";

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "m" | "Meters" => Some(HeightUnit::Meters),
            "ft" | "Feet" => Some(HeightUnit::Feet),
            "us-ft" | "UsFeet" => Some(HeightUnit::UsFeet),
            "degrees" | "Degrees" => Some(HeightUnit::Degrees),
            "?" | "Unknown" => Some(HeightUnit::Unknown),
            _ => None,
        }
    }

    fn fallback() -> Option<Self> {
        Some(HeightUnit::Unknown)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElevationInfo {
    pub level: f64,
    pub ground_level: f64,
    pub height_unit: HeightUnit,
}

impl ElevationInfo {
    pub fn from_raw(detail: &RawValue) -> Self {
        Self {
            level: to_number(field(detail, "level")),
            ground_level: to_number(field(detail, "groundLevel")),
            height_unit: to_enum(field(detail, "heightUnits")).unwrap_or_default(),
        }
    }
}

/// Surface cursor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthInfo {
    pub depth: f64,
    pub depth_in_meters: f64,
    pub position: Position,
}

impl DepthInfo {
    pub fn from_raw(detail: &RawValue) -> Self {
        Self {
            depth: to_number(field(detail, "depth")),
            depth_in_meters: to_number(field(detail, "depthInMeters")),
            position: Position::from_xyz(list_field(detail, "xyz")),
        }
    }
}
