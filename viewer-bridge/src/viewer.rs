//! Panorama viewer facade.
//!
//! A `PanoramaViewer` is a cheap handle onto a registered target. Getters are
//! correlated calls whose raw result is converted into a domain value;
//! commands are submitted without waiting for anything. Events are delivered
//! on a broadcast channel as typed [`PanoramaEvent`]s.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use viewer_types::convert::{field, map_field, to_bool, to_text};
use viewer_types::{
    Color, Coordinate, DepthInfo, ElevationInfo, Orientation, RawMap, RawValue, Recording,
    RecordingClickInfo, TimeTravelInfo,
};

use crate::config::BridgeConfig;
use crate::correlator::{CallCorrelator, CallOutcome};
use crate::error::BridgeError;
use crate::events::{EventBinding, EventHandler, EventSubscriptionSet};
use crate::executor::ScriptExecutor;
use crate::script;

// ============================================================================
// Buttons
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanoramaViewerButton {
    Overlays,
    Elevation,
    ReportBlurring,
    OpenOblique,
    Measure,
    SaveImage,
    ImageInformation,
    ZoomIn,
    ZoomOut,
}

impl PanoramaViewerButton {
    pub fn id(&self) -> &'static str {
        match self {
            PanoramaViewerButton::Overlays => "OVERLAYS",
            PanoramaViewerButton::Elevation => "ELEVATION",
            PanoramaViewerButton::ReportBlurring => "REPORT_BLURRING",
            PanoramaViewerButton::OpenOblique => "OPEN_OBLIQUE",
            PanoramaViewerButton::Measure => "MEASURE",
            PanoramaViewerButton::SaveImage => "SAVE_IMAGE",
            PanoramaViewerButton::ImageInformation => "IMAGE_INFORMATION",
            PanoramaViewerButton::ZoomIn => "ZOOM_IN",
            PanoramaViewerButton::ZoomOut => "ZOOM_OUT",
        }
    }

    fn expression(&self, config: &BridgeConfig) -> String {
        format!("{}.PanoramaViewerUi.buttons.{}", config.api_object, self.id())
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanoramaEventKind {
    RecordingClick,
    ElevationChange,
    ImageChange,
    SurfaceCursorChange,
    ViewChange,
    ViewLoadStart,
    ViewLoadEnd,
    TileLoadError,
    TimeTravelChange,
}

impl PanoramaEventKind {
    pub const ALL: [PanoramaEventKind; 9] = [
        PanoramaEventKind::RecordingClick,
        PanoramaEventKind::ElevationChange,
        PanoramaEventKind::ImageChange,
        PanoramaEventKind::SurfaceCursorChange,
        PanoramaEventKind::ViewChange,
        PanoramaEventKind::ViewLoadStart,
        PanoramaEventKind::ViewLoadEnd,
        PanoramaEventKind::TileLoadError,
        PanoramaEventKind::TimeTravelChange,
    ];

    /// Event name as the sandbox API spells it.
    pub fn name(&self) -> &'static str {
        match self {
            PanoramaEventKind::RecordingClick => "RECORDING_CLICK",
            PanoramaEventKind::ElevationChange => "ELEVATION_CHANGE",
            PanoramaEventKind::ImageChange => "IMAGE_CHANGE",
            PanoramaEventKind::SurfaceCursorChange => "SURFACE_CURSOR_CHANGE",
            PanoramaEventKind::ViewChange => "VIEW_CHANGE",
            PanoramaEventKind::ViewLoadStart => "VIEW_LOAD_START",
            PanoramaEventKind::ViewLoadEnd => "VIEW_LOAD_END",
            PanoramaEventKind::TileLoadError => "TILE_LOAD_ERROR",
            PanoramaEventKind::TimeTravelChange => "TIME_TRAVEL_CHANGE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PanoramaEvent {
    RecordingClick(RecordingClickInfo),
    ElevationChange(ElevationInfo),
    ImageChange,
    SurfaceCursorChange(DepthInfo),
    ViewChange(Orientation),
    ViewLoadStart,
    ViewLoadEnd,
    /// The failed tile request as reported by the sandbox.
    TileLoadError(RawMap),
    TimeTravelChange(TimeTravelInfo),
}

impl PanoramaEvent {
    /// Build the typed event from a `{detail: ...}` payload.
    pub fn from_payload(kind: PanoramaEventKind, payload: &RawValue) -> Self {
        let detail = field(payload, "detail");
        match kind {
            PanoramaEventKind::RecordingClick => {
                PanoramaEvent::RecordingClick(RecordingClickInfo::from_raw(detail))
            }
            PanoramaEventKind::ElevationChange => {
                PanoramaEvent::ElevationChange(ElevationInfo::from_raw(detail))
            }
            PanoramaEventKind::ImageChange => PanoramaEvent::ImageChange,
            PanoramaEventKind::SurfaceCursorChange => {
                PanoramaEvent::SurfaceCursorChange(DepthInfo::from_raw(detail))
            }
            PanoramaEventKind::ViewChange => PanoramaEvent::ViewChange(Orientation::from_raw(detail)),
            PanoramaEventKind::ViewLoadStart => PanoramaEvent::ViewLoadStart,
            PanoramaEventKind::ViewLoadEnd => PanoramaEvent::ViewLoadEnd,
            PanoramaEventKind::TileLoadError => {
                PanoramaEvent::TileLoadError(map_field(detail, "request"))
            }
            PanoramaEventKind::TimeTravelChange => {
                PanoramaEvent::TimeTravelChange(TimeTravelInfo::from_raw(detail))
            }
        }
    }

    pub fn kind(&self) -> PanoramaEventKind {
        match self {
            PanoramaEvent::RecordingClick(_) => PanoramaEventKind::RecordingClick,
            PanoramaEvent::ElevationChange(_) => PanoramaEventKind::ElevationChange,
            PanoramaEvent::ImageChange => PanoramaEventKind::ImageChange,
            PanoramaEvent::SurfaceCursorChange(_) => PanoramaEventKind::SurfaceCursorChange,
            PanoramaEvent::ViewChange(_) => PanoramaEventKind::ViewChange,
            PanoramaEvent::ViewLoadStart => PanoramaEventKind::ViewLoadStart,
            PanoramaEvent::ViewLoadEnd => PanoramaEventKind::ViewLoadEnd,
            PanoramaEvent::TileLoadError(_) => PanoramaEventKind::TileLoadError,
            PanoramaEvent::TimeTravelChange(_) => PanoramaEventKind::TimeTravelChange,
        }
    }
}

/// A typed event together with the viewer it fired on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerEvent {
    pub viewer: String,
    pub event: PanoramaEvent,
}

/// Bindings for every panorama event on `viewer`, each publishing to `sender`.
pub fn panorama_event_set(
    config: &BridgeConfig,
    viewer: &str,
    sender: broadcast::Sender<ViewerEvent>,
) -> EventSubscriptionSet {
    PanoramaEventKind::ALL
        .into_iter()
        .fold(EventSubscriptionSet::new(viewer), |set, kind| {
            let sender = sender.clone();
            let handler: Arc<dyn EventHandler> =
                Arc::new(move |target: &str, _event: &str, payload: &RawValue| {
                    let event = ViewerEvent {
                        viewer: target.to_string(),
                        event: PanoramaEvent::from_payload(kind, payload),
                    };
                    if sender.send(event).is_err() {
                        tracing::debug!(viewer = %target, event = kind.name(), "No subscribers for viewer event");
                    }
                });
            set.bind(EventBinding::listener(config, viewer, kind.name()), handler)
        })
}

// ============================================================================
// Viewer
// ============================================================================

#[derive(Clone)]
pub struct PanoramaViewer {
    name: String,
    correlator: Arc<CallCorrelator>,
    executor: Arc<dyn ScriptExecutor>,
    config: Arc<BridgeConfig>,
    events: broadcast::Sender<ViewerEvent>,
}

impl std::fmt::Debug for PanoramaViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanoramaViewer")
            .field("name", &self.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl PanoramaViewer {
    pub(crate) fn new(
        correlator: Arc<CallCorrelator>,
        executor: Arc<dyn ScriptExecutor>,
        config: Arc<BridgeConfig>,
        events: broadcast::Sender<ViewerEvent>,
    ) -> Self {
        Self {
            name: correlator.target().to_string(),
            correlator,
            executor,
            config,
            events,
        }
    }

    /// Registered name; also the sandbox-side variable holding the viewer.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.correlator.is_destroyed()
    }

    pub(crate) fn correlator(&self) -> &Arc<CallCorrelator> {
        &self.correlator
    }

    /// Whether both handles point at the same registration, not merely the
    /// same name.
    pub fn is_same_target(&self, other: &PanoramaViewer) -> bool {
        Arc::ptr_eq(&self.correlator, &other.correlator)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    async fn call(&self, label: &str, method: &str) -> CallOutcome {
        let expr = format!("{}.{method}", self.name);
        self.correlator
            .invoke(self.executor.as_ref(), label, |key| {
                script::result_script(&self.config, &self.name, &expr, &key.to_string())
            })
            .await
    }

    async fn call_bool(&self, label: &str, method: &str) -> Result<bool, BridgeError> {
        Ok(to_bool(&self.call(label, method).await?))
    }

    fn command(&self, statement: String) -> Result<(), BridgeError> {
        self.correlator.ensure_live()?;
        self.executor.execute(&statement)?;
        tracing::debug!(viewer = %self.name, "Command submitted");
        Ok(())
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub async fn get_id(&self) -> Result<String, BridgeError> {
        Ok(to_text(&self.call("GetId", "getId()").await?))
    }

    pub async fn get_navbar_expanded(&self) -> Result<bool, BridgeError> {
        self.call_bool("GetNavbarExpanded", "getNavbarExpanded()").await
    }

    pub async fn get_navbar_visible(&self) -> Result<bool, BridgeError> {
        self.call_bool("GetNavbarVisible", "getNavbarVisible()").await
    }

    pub async fn get_time_travel_expanded(&self) -> Result<bool, BridgeError> {
        self.call_bool("GetTimeTravelExpanded", "getTimeTravelExpanded()")
            .await
    }

    pub async fn get_time_travel_visible(&self) -> Result<bool, BridgeError> {
        self.call_bool("GetTimeTravelVisible", "getTimeTravelVisible()")
            .await
    }

    pub async fn get_3d_cursor_visible(&self) -> Result<bool, BridgeError> {
        self.call_bool("Get3DCursorVisible", "get3DCursorVisible()")
            .await
    }

    pub async fn get_recordings_visible(&self) -> Result<bool, BridgeError> {
        self.call_bool("GetRecordingsVisible", "getRecordingsVisible()")
            .await
    }

    pub async fn get_button_enabled(
        &self,
        button: PanoramaViewerButton,
    ) -> Result<bool, BridgeError> {
        let method = format!("getButtonEnabled({})", button.expression(&self.config));
        self.call_bool("GetButtonEnabled", &method).await
    }

    pub async fn get_orientation(&self) -> Result<Orientation, BridgeError> {
        let value = self.call("GetOrientation", "getOrientation()").await?;
        Ok(Orientation::from_raw(&value))
    }

    /// Recording currently shown, without its thumbnails.
    pub async fn get_recording(&self) -> Result<Recording, BridgeError> {
        let expr = format!("{}.getRecording()", self.name);
        let value = self
            .correlator
            .invoke(self.executor.as_ref(), "GetRecording", |key| {
                script::stripped_result_script(&self.config, &self.name, &expr, &key.to_string())
            })
            .await?;
        Ok(Recording::from_raw(&value))
    }

    pub async fn get_viewer_color(&self) -> Result<Color, BridgeError> {
        let value = self.call("GetViewerColor", "getViewerColor()").await?;
        Ok(Color::from_raw(&value))
    }

    // ========================================================================
    // Opening Recordings
    // ========================================================================

    async fn search_recording(
        &self,
        label: &str,
        method: &str,
        query: String,
        srs: Option<&str>,
    ) -> Result<Recording, BridgeError> {
        let promise = format!(
            "{}.{method}({query}{})",
            self.name,
            script::srs_component(srs)
        );
        let value = self
            .correlator
            .invoke(self.executor.as_ref(), label, |key| {
                script::promise_result_script(&self.config, &self.name, &promise, &key.to_string())
            })
            .await?;
        Ok(Recording::from_raw(&value))
    }

    /// Open the recording nearest to an address. Fails with
    /// [`BridgeError::RemoteNotFound`] when nothing matches.
    pub async fn open_by_address(
        &self,
        query: &str,
        srs: Option<&str>,
    ) -> Result<Recording, BridgeError> {
        self.search_recording("OpenByAddress", "openByAddress", script::quote(query), srs)
            .await
    }

    pub async fn open_by_coordinate(
        &self,
        coordinate: &Coordinate,
        srs: Option<&str>,
    ) -> Result<Recording, BridgeError> {
        self.search_recording(
            "OpenByCoordinate",
            "openByCoordinate",
            script::coordinate_literal(coordinate),
            srs,
        )
        .await
    }

    pub async fn open_by_image_id(
        &self,
        image_id: &str,
        srs: Option<&str>,
    ) -> Result<Recording, BridgeError> {
        self.search_recording("OpenByImageId", "openByImageId", script::quote(image_id), srs)
            .await
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn toggle_navbar_expanded(&self, expanded: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleNavbarExpanded({});",
            self.name,
            script::js_bool(expanded)
        ))
    }

    pub fn toggle_navbar_visible(&self, visible: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleNavbarVisible({});",
            self.name,
            script::js_bool(visible)
        ))
    }

    pub fn toggle_time_travel_expanded(&self, expanded: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleTimeTravelExpanded({});",
            self.name,
            script::js_bool(expanded)
        ))
    }

    pub fn toggle_time_travel_visible(&self, visible: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleTimeTravelVisible({});",
            self.name,
            script::js_bool(visible)
        ))
    }

    pub fn toggle_3d_cursor(&self, visible: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggle3DCursor({});",
            self.name,
            script::js_bool(visible)
        ))
    }

    pub fn toggle_recordings_visible(&self, visible: bool) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleRecordingsVisible({});",
            self.name,
            script::js_bool(visible)
        ))
    }

    pub fn toggle_button_enabled(
        &self,
        button: PanoramaViewerButton,
        enabled: bool,
    ) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.toggleButtonEnabled({},{});",
            self.name,
            button.expression(&self.config),
            script::js_bool(enabled)
        ))
    }

    pub fn zoom_in(&self) -> Result<(), BridgeError> {
        self.command(format!("{}.zoomIn();", self.name))
    }

    pub fn zoom_out(&self) -> Result<(), BridgeError> {
        self.command(format!("{}.zoomOut();", self.name))
    }

    pub fn set_brightness(&self, value: f64) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.setBrightness({});",
            self.name,
            script::js_number(value)
        ))
    }

    pub fn set_contrast(&self, value: f64) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.setContrast({});",
            self.name,
            script::js_number(value)
        ))
    }

    pub fn rotate_left(&self, delta_yaw: f64) -> Result<(), BridgeError> {
        self.rotate("rotateLeft", delta_yaw)
    }

    pub fn rotate_right(&self, delta_yaw: f64) -> Result<(), BridgeError> {
        self.rotate("rotateRight", delta_yaw)
    }

    pub fn rotate_up(&self, delta_pitch: f64) -> Result<(), BridgeError> {
        self.rotate("rotateUp", delta_pitch)
    }

    pub fn rotate_down(&self, delta_pitch: f64) -> Result<(), BridgeError> {
        self.rotate("rotateDown", delta_pitch)
    }

    fn rotate(&self, method: &str, delta: f64) -> Result<(), BridgeError> {
        self.command(format!("{}.{method}({});", self.name, script::js_number(delta)))
    }

    pub fn set_orientation(&self, orientation: &Orientation) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.setOrientation({});",
            self.name,
            script::orientation_literal(orientation)
        ))
    }

    /// Select the feature of layer `layer_id` whose properties match.
    pub fn set_selected_feature_by_properties(
        &self,
        properties: &RawValue,
        layer_id: &str,
    ) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.setSelectedFeatureByProperties({properties},{});",
            self.name,
            script::quote(layer_id)
        ))
    }

    pub fn look_at_coordinate(
        &self,
        coordinate: &Coordinate,
        srs: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.command(format!(
            "{}.lookAtCoordinate({}{});",
            self.name,
            script::coordinate_literal(coordinate),
            script::srs_component(srs)
        ))
    }
}
