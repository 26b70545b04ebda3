//! Top-level bridge owned by the host.
//!
//! Holds the configuration, the script executor and the target registry. The
//! sandbox API object itself is registered as a target so API-level getters
//! go through the same correlation path as viewer getters.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use viewer_types::convert::{to_bool, to_list, to_text};

use crate::config::BridgeConfig;
use crate::correlator::{CallCorrelator, CallOutcome};
use crate::error::BridgeError;
use crate::executor::ScriptExecutor;
use crate::protocol::InboundMessage;
use crate::registry::{Routed, TargetRegistry};
use crate::script;
use crate::viewer::{panorama_event_set, PanoramaViewer};

pub struct ViewerBridge {
    config: Arc<BridgeConfig>,
    executor: Arc<dyn ScriptExecutor>,
    registry: TargetRegistry,
    api: Arc<CallCorrelator>,
    viewers: DashMap<String, PanoramaViewer>,
}

impl ViewerBridge {
    pub fn new(
        config: BridgeConfig,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Result<Self, BridgeError> {
        let registry = TargetRegistry::new();
        let api = registry.register(
            &config.api_object,
            config.sequence_modulus,
            config.max_orphaned_results,
        )?;
        Ok(Self {
            config: Arc::new(config),
            executor,
            registry,
            api,
            viewers: DashMap::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Live viewer registered under `name`.
    pub fn viewer(&self, name: &str) -> Option<PanoramaViewer> {
        self.viewers.get(name).map(|v| v.clone())
    }

    /// Host entry point for everything the sandbox sends back.
    pub fn dispatch(&self, message: InboundMessage) -> Routed {
        self.registry.dispatch(message)
    }

    pub fn dispatch_json(&self, text: &str) -> Result<Routed, BridgeError> {
        self.registry.dispatch_json(text)
    }

    // ========================================================================
    // API Calls
    // ========================================================================

    async fn call_api(&self, label: &str, method: &str) -> CallOutcome {
        let expr = format!("{}.{method}", self.config.api_object);
        self.api
            .invoke(self.executor.as_ref(), label, |key| {
                script::result_script(&self.config, &self.config.api_object, &expr, &key.to_string())
            })
            .await
    }

    pub async fn get_api_ready_state(&self) -> Result<bool, BridgeError> {
        Ok(to_bool(&self.call_api("GetApiReadyState", "getApiReadyState()").await?))
    }

    pub async fn get_application_name(&self) -> Result<String, BridgeError> {
        Ok(to_text(&self.call_api("GetApplicationName", "getApplicationName()").await?))
    }

    pub async fn get_application_version(&self) -> Result<String, BridgeError> {
        Ok(to_text(
            &self
                .call_api("GetApplicationVersion", "getApplicationVersion()")
                .await?,
        ))
    }

    pub async fn get_permissions(&self) -> Result<Vec<String>, BridgeError> {
        let value = self.call_api("GetPermissions", "getPermissions()").await?;
        Ok(to_list(&value).iter().map(to_text).collect())
    }

    // ========================================================================
    // Viewer Lifecycle
    // ========================================================================

    /// Create a panorama viewer under a generated name.
    ///
    /// `element_expr` and `options_expr` are script expressions evaluated in
    /// the sandbox (the host element and the viewer options object).
    pub fn add_panorama_viewer(
        &self,
        element_expr: &str,
        options_expr: &str,
    ) -> Result<PanoramaViewer, BridgeError> {
        let name = format!("panoramaViewer_{}", ulid::Ulid::new().to_string().to_lowercase());
        self.add_named_panorama_viewer(&name, element_expr, options_expr)
    }

    /// Create a panorama viewer bound to the sandbox variable `name` and wire
    /// up all of its events.
    pub fn add_named_panorama_viewer(
        &self,
        name: &str,
        element_expr: &str,
        options_expr: &str,
    ) -> Result<PanoramaViewer, BridgeError> {
        if !script::is_identifier(name) {
            return Err(BridgeError::InvalidTargetName(name.to_string()));
        }

        let correlator = self.registry.register(
            name,
            self.config.sequence_modulus,
            self.config.max_orphaned_results,
        )?;

        let create = format!(
            "window.{name}={}.addPanoramaViewer({element_expr},{options_expr});",
            self.config.api_object
        );
        if let Err(e) = self.executor.execute(&create) {
            let _ = self.registry.unregister_correlator(&correlator);
            return Err(e.into());
        }

        let (sender, _) = broadcast::channel(self.config.event_buffer);
        let events = panorama_event_set(&self.config, name, sender.clone());
        let connect = match self.registry.connect_events(name, events) {
            Ok(events) => events.render_connect_script(),
            Err(e) => {
                let _ = self.registry.unregister_correlator(&correlator);
                return Err(e);
            }
        };
        if let Err(e) = self.executor.execute(&connect) {
            let _ = self.registry.unregister_correlator(&correlator);
            return Err(e.into());
        }

        let viewer = PanoramaViewer::new(correlator, self.executor.clone(), self.config.clone(), sender);
        self.viewers.insert(name.to_string(), viewer.clone());
        tracing::info!(viewer = %name, "Panorama viewer added");
        Ok(viewer)
    }

    /// Destroy a viewer: calls still waiting on it fail with
    /// [`BridgeError::TargetGone`], its events are detached and the sandbox
    /// side is released.
    pub fn destroy_panorama_viewer(&self, viewer: &PanoramaViewer) -> Result<(), BridgeError> {
        let name = viewer.name();
        let events = self.registry.unregister_correlator(viewer.correlator())?;
        self.viewers
            .remove_if(name, |_, current| current.is_same_target(viewer));

        let mut teardown = events
            .map(|events| events.render_teardown_script())
            .unwrap_or_default();
        teardown.push_str(&format!(
            "{}.destroyPanoramaViewer({name});delete window.{name};",
            self.config.api_object
        ));
        self.executor.execute(&teardown)?;
        tracing::info!(viewer = %name, "Panorama viewer destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ChannelExecutor;
    use futures::FutureExt;
    use serde_json::json;

    fn bridge() -> (ViewerBridge, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (executor, rx) = ChannelExecutor::new();
        let bridge = ViewerBridge::new(BridgeConfig::default(), Arc::new(executor)).unwrap();
        (bridge, rx)
    }

    #[tokio::test]
    async fn test_api_call_is_correlated() {
        let (bridge, mut rx) = bridge();

        let call = bridge.get_permissions();
        tokio::pin!(call);
        assert!(call.as_mut().now_or_never().is_none());
        assert_eq!(
            rx.try_recv().unwrap(),
            r#"hostBridge.onResult("StreetSmartApi",StreetSmartApi.getPermissions(),"GetPermissions0");"#
        );

        bridge.dispatch(InboundMessage::result(
            "StreetSmartApi",
            "GetPermissions0",
            json!(["Panorama", "Measure"]),
        ));
        assert_eq!(
            call.await,
            Ok(vec!["Panorama".to_string(), "Measure".to_string()])
        );
    }

    #[test]
    fn test_invalid_viewer_name_rejected() {
        let (bridge, mut rx) = bridge();
        let result = bridge.add_named_panorama_viewer("bad name", "el", "{}");
        assert_eq!(
            result.err(),
            Some(BridgeError::InvalidTargetName("bad name".into()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_add_submits_create_then_connect() {
        let (bridge, mut rx) = bridge();
        let viewer = bridge
            .add_named_panorama_viewer("V1", "document.getElementById('p')", "{}")
            .unwrap();

        assert_eq!(viewer.name(), "V1");
        assert_eq!(
            rx.try_recv().unwrap(),
            "window.V1=StreetSmartApi.addPanoramaViewer(document.getElementById('p'),{});"
        );
        let connect = rx.try_recv().unwrap();
        assert!(connect.contains("V1.on(StreetSmartApi.Events.panoramaViewer.RECORDING_CLICK,"));
        assert!(connect.contains("V1.on(StreetSmartApi.Events.panoramaViewer.TIME_TRAVEL_CHANGE,"));

        assert_eq!(
            bridge.add_named_panorama_viewer("V1", "el", "{}").err(),
            Some(BridgeError::TargetExists("V1".into()))
        );
    }

    #[test]
    fn test_generated_names_are_identifiers() {
        let (bridge, _rx) = bridge();
        let viewer = bridge.add_panorama_viewer("el", "{}").unwrap();
        assert!(viewer.name().starts_with("panoramaViewer_"));
        assert!(script::is_identifier(viewer.name()));
        assert!(bridge.viewer(viewer.name()).is_some());
    }

    #[test]
    fn test_destroy_tears_down_and_releases() {
        let (bridge, mut rx) = bridge();
        let viewer = bridge.add_named_panorama_viewer("V1", "el", "{}").unwrap();
        while rx.try_recv().is_ok() {}

        bridge.destroy_panorama_viewer(&viewer).unwrap();

        let teardown = rx.try_recv().unwrap();
        assert!(teardown.contains("V1.off(StreetSmartApi.Events.panoramaViewer.VIEW_CHANGE,"));
        assert!(teardown.ends_with("StreetSmartApi.destroyPanoramaViewer(V1);delete window.V1;"));
        assert!(viewer.is_destroyed());
        assert!(bridge.viewer("V1").is_none());
        assert_eq!(
            bridge.destroy_panorama_viewer(&viewer),
            Err(BridgeError::TargetGone("V1".into()))
        );
    }

    #[test]
    fn test_stale_viewer_cannot_destroy_replacement() {
        let (bridge, mut rx) = bridge();
        let stale = bridge.add_named_panorama_viewer("V1", "el", "{}").unwrap();
        bridge.destroy_panorama_viewer(&stale).unwrap();
        let live = bridge.add_named_panorama_viewer("V1", "el", "{}").unwrap();
        while rx.try_recv().is_ok() {}

        assert_eq!(
            bridge.destroy_panorama_viewer(&stale),
            Err(BridgeError::TargetGone("V1".into()))
        );
        assert!(rx.try_recv().is_err());
        assert!(!live.is_destroyed());
        assert!(bridge.viewer("V1").is_some());
        assert_eq!(
            bridge.dispatch(InboundMessage::event("V1", "VIEW_LOAD_END", json!({}))),
            Routed::Event
        );
    }
}
