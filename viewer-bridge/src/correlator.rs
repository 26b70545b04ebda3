//! Call correlation for a single target.
//!
//! The sandbox cannot return a value from a submitted script, so each call
//! reserves a correlation key (`label + sequence`), embeds it in the script and
//! waits for a callback that echoes it. The sequence is per target and is
//! bumped on every call regardless of label, so overlapping calls to the same
//! operation never share a key unless `sequence_modulus` of them are in flight
//! at once.
//!
//! All state for a target lives under one mutex. Critical sections are short
//! (allocate-and-insert, resolve-and-remove) and the lock is never held across
//! an `.await`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use viewer_types::RawValue;

use crate::error::BridgeError;
use crate::executor::ScriptExecutor;

/// Result delivered for one call: the raw value, or the error the callback
/// reported.
pub type CallOutcome = Result<RawValue, BridgeError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    label: String,
    sequence: u32,
}

impl CallKey {
    pub fn new(label: impl Into<String>, sequence: u32) -> Self {
        Self {
            label: label.into(),
            sequence,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.label, self.sequence)
    }
}

/// What happened to a routed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Woke the waiting caller.
    Delivered,
    /// The caller had already stopped waiting.
    Abandoned,
    /// The key was already resolved; this delivery was discarded.
    Duplicate,
    /// No call was waiting; kept as a pre-registration.
    Orphaned,
    /// The target is destroyed; dropped.
    Dropped,
}

enum Slot {
    Waiting(oneshot::Sender<CallOutcome>),
    Resolved(CallOutcome),
}

#[derive(Default)]
struct CorrelatorState {
    destroyed: bool,
    sequence: u32,
    pending: HashMap<String, Slot>,
    /// Keys of pre-registered results, oldest first.
    orphans: VecDeque<String>,
    /// Keys whose call already finished, oldest first. Late deliveries for
    /// these are duplicates, not pre-registrations.
    completed: VecDeque<String>,
}

impl CorrelatorState {
    fn next_sequence(&mut self, modulus: u32) -> u32 {
        let current = self.sequence;
        self.sequence = (current + 1) % modulus;
        current
    }

    fn forget_orphan(&mut self, key: &str) {
        self.orphans.retain(|orphan| orphan != key);
    }

    fn mark_completed(&mut self, key: String, capacity: usize) {
        self.completed.retain(|done| done != &key);
        self.completed.push_back(key);
        while self.completed.len() > capacity {
            self.completed.pop_front();
        }
    }

    fn is_completed(&self, key: &str) -> bool {
        self.completed.iter().any(|done| done == key)
    }
}

/// Outstanding calls of one target.
pub struct CallCorrelator {
    target: String,
    sequence_modulus: u32,
    max_orphaned_results: usize,
    state: Mutex<CorrelatorState>,
}

impl CallCorrelator {
    pub fn new(
        target: impl Into<String>,
        sequence_modulus: u32,
        max_orphaned_results: usize,
    ) -> Self {
        Self {
            target: target.into(),
            sequence_modulus: sequence_modulus.max(1),
            max_orphaned_results,
            state: Mutex::new(CorrelatorState::default()),
        }
    }

    /// One finished key per sequence number is enough: a key only comes back
    /// after the sequence wraps, and allocating it clears the mark.
    fn completed_capacity(&self) -> usize {
        self.sequence_modulus as usize
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn state(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// Number of slots held, waiting or pre-registered.
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Fail with `TargetGone` once the target is destroyed.
    pub fn ensure_live(&self) -> Result<(), BridgeError> {
        if self.is_destroyed() {
            return Err(BridgeError::TargetGone(self.target.clone()));
        }
        Ok(())
    }

    /// Submit a correlated call and wait for its callback.
    ///
    /// `build_script` receives the reserved key and must embed its text form
    /// so the sandbox can echo it back. A destroyed target fails before the
    /// executor is touched. Dropping the returned future releases the slot.
    pub async fn invoke<F>(
        &self,
        executor: &dyn ScriptExecutor,
        label: &str,
        build_script: F,
    ) -> CallOutcome
    where
        F: FnOnce(&CallKey) -> String,
    {
        let (key, rx) = {
            let mut state = self.state();
            if state.destroyed {
                return Err(BridgeError::TargetGone(self.target.clone()));
            }

            let key = CallKey::new(label, state.next_sequence(self.sequence_modulus));
            let composite = key.to_string();
            // The key is live again; forget that an earlier call used it.
            state.completed.retain(|done| done != &composite);
            match state.pending.remove(&composite) {
                Some(Slot::Resolved(outcome)) => {
                    state.forget_orphan(&composite);
                    state.mark_completed(composite.clone(), self.completed_capacity());
                    tracing::debug!(viewer = %self.target, key = %composite, "Call matched pre-registered result");
                    return outcome;
                }
                Some(waiting @ Slot::Waiting(_)) => {
                    state.pending.insert(composite.clone(), waiting);
                    return Err(BridgeError::KeyInUse(composite));
                }
                None => {}
            }

            let (tx, rx) = oneshot::channel();
            state.pending.insert(composite, Slot::Waiting(tx));
            (key, rx)
        };

        let mut guard = PendingGuard {
            correlator: self,
            key: Some(key.to_string()),
        };

        let script = build_script(&key);
        if let Err(e) = executor.execute(&script) {
            tracing::warn!(viewer = %self.target, key = %key, error = %e, "Failed to submit call");
            return Err(e.into());
        }
        tracing::debug!(viewer = %self.target, key = %key, "Call submitted");

        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(BridgeError::TargetGone(self.target.clone())));
        guard.key = None;
        outcome
    }

    /// Resolve the call registered under `key`. First resolution wins.
    pub fn resolve(&self, key: &str, outcome: CallOutcome) -> Resolution {
        let sender = {
            let mut state = self.state();
            match state.pending.remove(key) {
                Some(Slot::Waiting(tx)) => {
                    state.mark_completed(key.to_string(), self.completed_capacity());
                    tx
                }
                Some(resolved @ Slot::Resolved(_)) => {
                    state.pending.insert(key.to_string(), resolved);
                    tracing::debug!(viewer = %self.target, key, "Discarded duplicate result");
                    return Resolution::Duplicate;
                }
                None if state.destroyed => return Resolution::Dropped,
                None if state.is_completed(key) => {
                    tracing::debug!(viewer = %self.target, key, "Discarded late result for finished call");
                    return Resolution::Duplicate;
                }
                None => {
                    if self.max_orphaned_results == 0 {
                        return Resolution::Dropped;
                    }
                    state.pending.insert(key.to_string(), Slot::Resolved(outcome));
                    state.orphans.push_back(key.to_string());
                    while state.orphans.len() > self.max_orphaned_results {
                        if let Some(oldest) = state.orphans.pop_front() {
                            if matches!(state.pending.get(&oldest), Some(Slot::Resolved(_))) {
                                state.pending.remove(&oldest);
                            }
                        }
                    }
                    tracing::debug!(viewer = %self.target, key, "Pre-registered result without a waiting call");
                    return Resolution::Orphaned;
                }
            }
        };

        match sender.send(outcome) {
            Ok(()) => Resolution::Delivered,
            Err(_) => Resolution::Abandoned,
        }
    }

    /// Mark the target destroyed and fail every waiting call with
    /// `TargetGone`. Returns how many callers were woken.
    pub fn destroy(&self) -> usize {
        let waiting: Vec<oneshot::Sender<CallOutcome>> = {
            let mut state = self.state();
            if state.destroyed {
                return 0;
            }
            state.destroyed = true;
            state.orphans.clear();
            state.completed.clear();
            state
                .pending
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Waiting(tx) => Some(tx),
                    Slot::Resolved(_) => None,
                })
                .collect()
        };

        let woken = waiting.len();
        for tx in waiting {
            let _ = tx.send(Err(BridgeError::TargetGone(self.target.clone())));
        }
        woken
    }
}

/// Removes a still-waiting slot when its caller goes away.
struct PendingGuard<'a> {
    correlator: &'a CallCorrelator,
    key: Option<String>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let capacity = self.correlator.completed_capacity();
        let mut state = self.correlator.state();
        if matches!(state.pending.get(&key), Some(Slot::Waiting(_))) {
            state.pending.remove(&key);
            // A callback for the abandoned call may still arrive.
            state.mark_completed(key, capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ChannelExecutor, ExecutorError};
    use futures::FutureExt;
    use serde_json::json;
    use std::collections::HashSet;

    struct RejectingExecutor;

    impl ScriptExecutor for RejectingExecutor {
        fn execute(&self, _script: &str) -> Result<(), ExecutorError> {
            Err(ExecutorError::Rejected("frame unloaded".into()))
        }
    }

    fn correlator() -> CallCorrelator {
        CallCorrelator::new("V1", 1000, 8)
    }

    #[test]
    fn test_key_text_form() {
        assert_eq!(CallKey::new("GetOrientation", 7).to_string(), "GetOrientation7");
    }

    #[tokio::test]
    async fn test_destroyed_target_fails_without_submitting() {
        let correlator = correlator();
        let (executor, mut rx) = ChannelExecutor::new();
        correlator.destroy();

        let result = correlator
            .invoke(&executor, "GetId", |key| key.to_string())
            .await;

        assert_eq!(result, Err(BridgeError::TargetGone("V1".into())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let correlator = correlator();
        let (executor, mut rx) = ChannelExecutor::new();

        let first = correlator.invoke(&executor, "GetOrientation", |key| key.to_string());
        let second = correlator.invoke(&executor, "GetOrientation", |key| key.to_string());
        tokio::pin!(first);
        tokio::pin!(second);
        assert!(first.as_mut().now_or_never().is_none());
        assert!(second.as_mut().now_or_never().is_none());
        assert_eq!(rx.try_recv().unwrap(), "GetOrientation0");
        assert_eq!(rx.try_recv().unwrap(), "GetOrientation1");

        assert_eq!(
            correlator.resolve("GetOrientation1", Ok(json!({"yaw": 2}))),
            Resolution::Delivered
        );
        assert_eq!(second.await, Ok(json!({"yaw": 2})));
        assert!(first.as_mut().now_or_never().is_none());

        correlator.resolve("GetOrientation0", Ok(json!({"yaw": 1})));
        assert_eq!(first.await, Ok(json!({"yaw": 1})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_distinct_keys() {
        let correlator = correlator();
        let (executor, mut rx) = ChannelExecutor::new();

        let mut calls: Vec<_> = (0..16)
            .map(|_| {
                correlator
                    .invoke(&executor, "GetRecording", |key| key.to_string())
                    .boxed()
            })
            .collect();
        for call in calls.iter_mut() {
            assert!(call.as_mut().now_or_never().is_none());
        }

        let mut keys = Vec::new();
        while let Ok(key) = rx.try_recv() {
            keys.push(key);
        }
        let distinct: HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(keys.len(), 16);
        assert_eq!(distinct.len(), 16);

        for (index, key) in keys.iter().enumerate().rev() {
            assert_eq!(correlator.resolve(key, Ok(json!(index))), Resolution::Delivered);
        }
        for (index, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await, Ok(json!(index)));
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_discarded() {
        let correlator = correlator();
        let (executor, _rx) = ChannelExecutor::new();

        let call = correlator.invoke(&executor, "GetId", |key| key.to_string());
        tokio::pin!(call);
        assert!(call.as_mut().now_or_never().is_none());

        assert_eq!(correlator.resolve("GetId0", Ok(json!("a"))), Resolution::Delivered);
        assert_eq!(call.await, Ok(json!("a")));

        assert_eq!(correlator.resolve("GetId0", Ok(json!("b"))), Resolution::Duplicate);
        assert_eq!(correlator.resolve("GetId0", Ok(json!("c"))), Resolution::Duplicate);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_duplicate_does_not_answer_wrapped_call() {
        let correlator = CallCorrelator::new("V1", 2, 64);
        let (executor, mut rx) = ChannelExecutor::new();

        let call = correlator.invoke(&executor, "GetId", |key| key.to_string());
        tokio::pin!(call);
        assert!(call.as_mut().now_or_never().is_none());
        correlator.resolve("GetId0", Ok(json!("first")));
        assert_eq!(call.await, Ok(json!("first")));
        assert_eq!(
            correlator.resolve("GetId0", Ok(json!("stale"))),
            Resolution::Duplicate
        );

        let other = correlator.invoke(&executor, "GetOrientation", |key| key.to_string());
        tokio::pin!(other);
        assert!(other.as_mut().now_or_never().is_none());
        correlator.resolve("GetOrientation1", Ok(json!({})));
        assert_eq!(other.await, Ok(json!({})));

        // The sequence wrapped back to GetId0; the call must go out.
        let fresh = correlator.invoke(&executor, "GetId", |key| key.to_string());
        tokio::pin!(fresh);
        assert!(fresh.as_mut().now_or_never().is_none());
        assert_eq!(rx.try_recv().unwrap(), "GetId0");
        assert_eq!(rx.try_recv().unwrap(), "GetOrientation1");
        assert_eq!(rx.try_recv().unwrap(), "GetId0");

        assert_eq!(correlator.resolve("GetId0", Ok(json!("second"))), Resolution::Delivered);
        assert_eq!(fresh.await, Ok(json!("second")));
    }

    #[tokio::test]
    async fn test_late_result_for_dropped_call_is_discarded() {
        let correlator = correlator();
        let (executor, _rx) = ChannelExecutor::new();

        {
            let call = correlator.invoke(&executor, "GetId", |key| key.to_string());
            tokio::pin!(call);
            assert!(call.as_mut().now_or_never().is_none());
        }
        assert_eq!(correlator.resolve("GetId0", Ok(json!("late"))), Resolution::Duplicate);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wrapped_key_still_waiting_is_in_use() {
        let correlator = CallCorrelator::new("V1", 2, 8);
        let (executor, mut rx) = ChannelExecutor::new();

        let first = correlator.invoke(&executor, "GetId", |key| key.to_string());
        tokio::pin!(first);
        assert!(first.as_mut().now_or_never().is_none());

        let other = correlator.invoke(&executor, "GetOrientation", |key| key.to_string());
        tokio::pin!(other);
        assert!(other.as_mut().now_or_never().is_none());

        let collided = correlator
            .invoke(&executor, "GetId", |key| key.to_string())
            .await;
        assert_eq!(collided, Err(BridgeError::KeyInUse("GetId0".into())));
        assert_eq!(rx.try_recv().unwrap(), "GetId0");
        assert_eq!(rx.try_recv().unwrap(), "GetOrientation1");
        assert!(rx.try_recv().is_err());

        assert_eq!(correlator.resolve("GetId0", Ok(json!("ok"))), Resolution::Delivered);
        assert_eq!(first.await, Ok(json!("ok")));
    }

    #[tokio::test]
    async fn test_pre_registered_result_is_consumed() {
        let correlator = correlator();
        let (executor, mut rx) = ChannelExecutor::new();

        assert_eq!(correlator.resolve("GetId0", Ok(json!("early"))), Resolution::Orphaned);
        let result = correlator
            .invoke(&executor, "GetId", |key| key.to_string())
            .await;

        assert_eq!(result, Ok(json!("early")));
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_orphans_are_bounded() {
        let correlator = CallCorrelator::new("V1", 1000, 2);
        for key in ["A0", "B1", "C2"] {
            correlator.resolve(key, Ok(RawValue::Null));
        }
        assert_eq!(correlator.pending_count(), 2);
        // The oldest one was evicted.
        assert_eq!(correlator.resolve("A0", Ok(RawValue::Null)), Resolution::Orphaned);
        assert_eq!(correlator.resolve("C2", Ok(RawValue::Null)), Resolution::Duplicate);
    }

    #[tokio::test]
    async fn test_error_callback_reaches_caller() {
        let correlator = correlator();
        let (executor, _rx) = ChannelExecutor::new();

        let call = correlator.invoke(&executor, "OpenByAddress", |key| key.to_string());
        tokio::pin!(call);
        assert!(call.as_mut().now_or_never().is_none());

        correlator.resolve(
            "OpenByAddress0",
            Err(BridgeError::RemoteNotFound("no recording".into())),
        );
        assert_eq!(
            call.await,
            Err(BridgeError::RemoteNotFound("no recording".into()))
        );
    }

    #[tokio::test]
    async fn test_destroy_wakes_waiting_calls() {
        let correlator = correlator();
        let (executor, _rx) = ChannelExecutor::new();

        let call = correlator.invoke(&executor, "GetId", |key| key.to_string());
        tokio::pin!(call);
        assert!(call.as_mut().now_or_never().is_none());

        assert_eq!(correlator.destroy(), 1);
        assert_eq!(call.await, Err(BridgeError::TargetGone("V1".into())));
        assert_eq!(correlator.resolve("GetId0", Ok(RawValue::Null)), Resolution::Dropped);
        assert_eq!(correlator.destroy(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_slot() {
        let correlator = correlator();
        let (executor, _rx) = ChannelExecutor::new();

        {
            let call = correlator.invoke(&executor, "GetId", |key| key.to_string());
            tokio::pin!(call);
            assert!(call.as_mut().now_or_never().is_none());
            assert_eq!(correlator.pending_count(), 1);
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_failure_releases_slot() {
        let correlator = correlator();
        let result = correlator
            .invoke(&RejectingExecutor, "GetId", |key| key.to_string())
            .await;

        assert_eq!(
            result,
            Err(BridgeError::Submit(ExecutorError::Rejected("frame unloaded".into())))
        );
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_sequence_wraps() {
        let correlator = CallCorrelator::new("V1", 3, 0);
        let mut state = correlator.state();
        let sequences: Vec<u32> = (0..5).map(|_| state.next_sequence(3)).collect();
        assert_eq!(sequences, vec![0, 1, 2, 0, 1]);
    }
}
