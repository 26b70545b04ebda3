//! Target Registry - maps target names to their live handles
//!
//! Inbound callbacks and events arrive tagged with a target name only. The
//! registry resolves that name to the target's correlator or its connected
//! event set. Anything addressed to a name that is not registered is logged
//! and dropped; the sandbox side has no way to receive an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use viewer_types::RawValue;

use crate::correlator::{CallCorrelator, CallOutcome, Resolution};
use crate::error::BridgeError;
use crate::events::EventSubscriptionSet;
use crate::protocol::InboundMessage;

struct TargetEntry {
    correlator: Arc<CallCorrelator>,
    events: Mutex<Option<Arc<EventSubscriptionSet>>>,
}

impl TargetEntry {
    fn events(&self) -> MutexGuard<'_, Option<Arc<EventSubscriptionSet>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where an inbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Callback(Resolution),
    Event,
    Dropped,
}

#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: Arc<DashMap<String, Arc<TargetEntry>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh target. Names are unique among live targets.
    pub fn register(
        &self,
        name: &str,
        sequence_modulus: u32,
        max_orphaned_results: usize,
    ) -> Result<Arc<CallCorrelator>, BridgeError> {
        match self.targets.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BridgeError::TargetExists(name.to_string())),
            Entry::Vacant(slot) => {
                let correlator = Arc::new(CallCorrelator::new(
                    name,
                    sequence_modulus,
                    max_orphaned_results,
                ));
                slot.insert(Arc::new(TargetEntry {
                    correlator: correlator.clone(),
                    events: Mutex::new(None),
                }));
                tracing::info!(viewer = %name, "Target registered");
                Ok(correlator)
            }
        }
    }

    /// Destroy and remove a target. Returns its connected event set, if any,
    /// so the caller can submit the teardown script.
    pub fn unregister(
        &self,
        name: &str,
    ) -> Result<Option<Arc<EventSubscriptionSet>>, BridgeError> {
        self.remove_target(name, None)
    }

    /// Like [`unregister`](Self::unregister), but only removes the entry
    /// that owns `correlator`. A stale handle never tears down a newer
    /// target that reused the name.
    pub fn unregister_correlator(
        &self,
        correlator: &Arc<CallCorrelator>,
    ) -> Result<Option<Arc<EventSubscriptionSet>>, BridgeError> {
        self.remove_target(correlator.target(), Some(correlator))
    }

    fn remove_target(
        &self,
        name: &str,
        expected: Option<&Arc<CallCorrelator>>,
    ) -> Result<Option<Arc<EventSubscriptionSet>>, BridgeError> {
        let entry = self
            .targets
            .get(name)
            .map(|e| e.clone())
            .ok_or_else(|| BridgeError::TargetGone(name.to_string()))?;
        if let Some(expected) = expected {
            if !Arc::ptr_eq(&entry.correlator, expected) {
                return Err(BridgeError::TargetGone(name.to_string()));
            }
        }

        // Destroyed before it leaves the map so no new call can slip in.
        let woken = entry.correlator.destroy();
        let removed = self
            .targets
            .remove_if(name, |_, current| Arc::ptr_eq(current, &entry));
        if removed.is_none() {
            // Another caller removed it first.
            return Err(BridgeError::TargetGone(name.to_string()));
        }

        let events = entry.events().take();
        tracing::info!(viewer = %name, woken, "Target destroyed");
        Ok(events)
    }

    pub fn correlator(&self, name: &str) -> Option<Arc<CallCorrelator>> {
        self.targets.get(name).map(|e| e.correlator.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Attach an event set to a target. Only one set may be connected at a
    /// time.
    pub fn connect_events(
        &self,
        name: &str,
        events: EventSubscriptionSet,
    ) -> Result<Arc<EventSubscriptionSet>, BridgeError> {
        let entry = self
            .targets
            .get(name)
            .map(|e| e.clone())
            .ok_or_else(|| BridgeError::TargetGone(name.to_string()))?;

        let mut connected = entry.events();
        if connected.is_some() {
            return Err(BridgeError::EventsConnected(name.to_string()));
        }
        let events = Arc::new(events);
        *connected = Some(events.clone());
        tracing::info!(viewer = %name, count = events.len(), "Events connected");
        Ok(events)
    }

    /// Detach and return the target's event set. Events that arrive later are
    /// dropped.
    pub fn disconnect_events(&self, name: &str) -> Option<Arc<EventSubscriptionSet>> {
        let entry = self.targets.get(name).map(|e| e.clone())?;
        let events = entry.events().take();
        if events.is_some() {
            tracing::info!(viewer = %name, "Events disconnected");
        }
        events
    }

    // ========================================================================
    // Inbound Routing
    // ========================================================================

    /// Hand a callback outcome to the target's correlator.
    pub fn route_callback(&self, name: &str, key: &str, outcome: CallOutcome) -> Option<Resolution> {
        let Some(correlator) = self.correlator(name) else {
            tracing::warn!(viewer = %name, key, "Dropped callback for unknown target");
            return None;
        };
        Some(correlator.resolve(key, outcome))
    }

    /// Hand an event to the target's connected event set. Returns `false`
    /// when it was dropped.
    pub fn route_event(&self, name: &str, event_name: &str, payload: &RawValue) -> bool {
        let events = self.targets.get(name).and_then(|entry| {
            let connected = entry.events();
            connected.clone()
        });

        let Some(events) = events else {
            tracing::warn!(viewer = %name, event = %event_name, "Dropped event for unknown or disconnected target");
            return false;
        };

        // Handlers run with no registry lock held.
        let handled = events.dispatch(event_name, payload);
        if !handled {
            tracing::warn!(viewer = %name, event = %event_name, "Dropped unbound event");
        }
        handled
    }

    /// Route one decoded inbound message.
    pub fn dispatch(&self, message: InboundMessage) -> Routed {
        match message {
            InboundMessage::Result { target, key, value } => self
                .route_callback(&target, &key, Ok(value))
                .map_or(Routed::Dropped, Routed::Callback),
            InboundMessage::NotFound {
                target,
                key,
                message,
            } => self
                .route_callback(&target, &key, Err(BridgeError::RemoteNotFound(message)))
                .map_or(Routed::Dropped, Routed::Callback),
            InboundMessage::Event {
                target,
                event,
                payload,
            } => {
                if self.route_event(&target, &event, &payload) {
                    Routed::Event
                } else {
                    Routed::Dropped
                }
            }
        }
    }

    /// Decode and route a raw inbound message.
    pub fn dispatch_json(&self, text: &str) -> Result<Routed, BridgeError> {
        let message: InboundMessage = serde_json::from_str(text).map_err(|e| {
            tracing::warn!(error = %e, "Undecodable inbound message");
            BridgeError::from(e)
        })?;
        Ok(self.dispatch(message))
    }
}
