//! Event subscription sets.
//!
//! A target's event surface is wired and torn down as one unit: every binding
//! is attached by a single combined script and detached by a single combined
//! teardown script. Bindings cannot be removed individually.

use std::fmt;
use std::sync::Arc;

use viewer_types::RawValue;

use crate::config::BridgeConfig;
use crate::script;

/// Receives events routed to a target.
pub trait EventHandler: Send + Sync {
    fn handle(&self, target: &str, event_name: &str, payload: &RawValue);
}

impl<F> EventHandler for F
where
    F: Fn(&str, &str, &RawValue) + Send + Sync,
{
    fn handle(&self, target: &str, event_name: &str, payload: &RawValue) {
        self(target, event_name, payload)
    }
}

/// One sandbox-side event hooked up to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    pub owner: String,
    pub event_name: String,
    pub connect_script: String,
    pub teardown_script: String,
}

impl EventBinding {
    /// Binding that forwards `event_name` on `owner` to the host's event
    /// callback with the event detail.
    pub fn listener(config: &BridgeConfig, owner: &str, event_name: &str) -> Self {
        let (connect_script, teardown_script) = script::listener_scripts(config, owner, event_name);
        Self {
            owner: owner.to_string(),
            event_name: event_name.to_string(),
            connect_script,
            teardown_script,
        }
    }
}

#[derive(Clone)]
struct BoundHandler {
    binding: EventBinding,
    handler: Arc<dyn EventHandler>,
}

/// Immutable set of bindings owned by one target.
#[derive(Clone)]
pub struct EventSubscriptionSet {
    owner: String,
    bound: Vec<BoundHandler>,
}

impl fmt::Debug for EventSubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscriptionSet")
            .field("owner", &self.owner)
            .field("events", &self.event_names().collect::<Vec<_>>())
            .finish()
    }
}

impl EventSubscriptionSet {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            bound: Vec::new(),
        }
    }

    /// Add a binding (builder pattern). A later binding for an event name
    /// already present replaces the earlier one.
    pub fn bind(mut self, binding: EventBinding, handler: Arc<dyn EventHandler>) -> Self {
        self.bound
            .retain(|bound| bound.binding.event_name != binding.event_name);
        self.bound.push(BoundHandler { binding, handler });
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &EventBinding> {
        self.bound.iter().map(|bound| &bound.binding)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.bindings().map(|binding| binding.event_name.as_str())
    }

    /// Single script attaching every binding.
    pub fn render_connect_script(&self) -> String {
        self.bindings()
            .map(|binding| binding.connect_script.as_str())
            .collect()
    }

    /// Single script detaching every binding attached by
    /// [`render_connect_script`](Self::render_connect_script).
    pub fn render_teardown_script(&self) -> String {
        self.bindings()
            .map(|binding| binding.teardown_script.as_str())
            .collect()
    }

    /// Hand `payload` to the handler bound to `event_name`. Returns `false`
    /// when no binding matches.
    pub fn dispatch(&self, event_name: &str, payload: &RawValue) -> bool {
        match self
            .bound
            .iter()
            .find(|bound| bound.binding.event_name == event_name)
        {
            Some(bound) => {
                bound.handler.handle(&self.owner, event_name, payload);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn binding(name: &str) -> EventBinding {
        EventBinding {
            owner: "V1".to_string(),
            event_name: name.to_string(),
            connect_script: format!("on({name});"),
            teardown_script: format!("off({name});"),
        }
    }

    #[test]
    fn test_scripts_are_combined() {
        let noop: Arc<dyn EventHandler> = Arc::new(|_: &str, _: &str, _: &RawValue| {});
        let set = EventSubscriptionSet::new("V1")
            .bind(binding("A"), noop.clone())
            .bind(binding("B"), noop);

        assert_eq!(set.render_connect_script(), "on(A);on(B);");
        assert_eq!(set.render_teardown_script(), "off(A);off(B);");
        assert_eq!(set.event_names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_dispatch_by_event_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Arc<dyn EventHandler> =
            Arc::new(move |target: &str, event: &str, payload: &RawValue| {
                sink.lock()
                    .unwrap()
                    .push(format!("{target}/{event}/{payload}"));
            });
        let set = EventSubscriptionSet::new("V1").bind(binding("VIEW_CHANGE"), handler);

        assert!(set.dispatch("VIEW_CHANGE", &json!({"detail": 1})));
        assert!(!set.dispatch("IMAGE_CHANGE", &json!({})));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![r#"V1/VIEW_CHANGE/{"detail":1}"#.to_string()]
        );
    }

    #[test]
    fn test_rebinding_replaces() {
        let noop: Arc<dyn EventHandler> = Arc::new(|_: &str, _: &str, _: &RawValue| {});
        let set = EventSubscriptionSet::new("V1")
            .bind(binding("A"), noop.clone())
            .bind(binding("A"), noop);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_listener_binding() {
        let binding = EventBinding::listener(&BridgeConfig::default(), "V1", "VIEW_LOAD_END");
        assert_eq!(binding.owner, "V1");
        assert!(binding.connect_script.contains("V1.on("));
        assert!(binding.teardown_script.contains("V1.off("));
    }
}
