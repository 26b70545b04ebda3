//! Shared types for the panorama viewer bridge
//!
//! These types are used by:
//! - the bridge, to turn callback payloads into typed results
//! - hosts, to receive typed viewer events
//!
//! Serializable with serde so hosts can forward them over their own channels.

pub mod convert;
pub mod values;

pub use convert::{ConversionError, RawLabel, RawMap, RawValue};
pub use values::{
    Color, Coordinate, DepthInfo, ElevationInfo, HeightUnit, Orientation, Position, Recording,
    RecordingClickInfo, TimeTravelInfo,
};
