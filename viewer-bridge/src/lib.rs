//! Viewer Bridge - call correlation and event dispatch for an embedded viewer
//!
//! The host drives a panorama viewer living inside a script sandbox it cannot
//! call into directly: scripts are submitted fire-and-forget and anything the
//! sandbox wants to say comes back later through a single inbound callback.
//! This crate turns that into typed async calls and typed events.

pub mod bridge;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod script;
pub mod viewer;

pub use bridge::ViewerBridge;
pub use config::BridgeConfig;
pub use correlator::{CallCorrelator, CallKey, CallOutcome, Resolution};
pub use error::BridgeError;
pub use events::{EventBinding, EventHandler, EventSubscriptionSet};
pub use executor::{ChannelExecutor, ExecutorError, ScriptExecutor};
pub use protocol::InboundMessage;
pub use registry::{Routed, TargetRegistry};
pub use viewer::{
    panorama_event_set, PanoramaEvent, PanoramaEventKind, PanoramaViewer, PanoramaViewerButton,
    ViewerEvent,
};
