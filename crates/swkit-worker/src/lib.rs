//! # SwKit Worker
//!
//! Worker lifecycle handling for the SwKit service-worker toolkit.
//!
//! ## Features
//!
//! - **Lifecycle events**: install, activate, message
//! - **Host contract**: skip-waiting and client-claim primitives
//! - **Controller**: one reaction method per lifecycle event
//! - **Worker scope**: configuration-driven wiring of precache + routing
//!
//! ## Architecture
//!
//! ```text
//! Host runtime (dispatches events, owns LifecycleState)
//!     │
//!     ├── install ──→ LifecycleController ──→ host.skip_waiting()
//!     ├── activate ─→ LifecycleController ──→ wait_until(host.claim_clients())
//!     ├── message ──→ LifecycleController ──→ host.skip_waiting() on SKIP_WAITING
//!     └── fetch ────→ WorkerScope ──→ Router ──→ strategies / catch-all
//! ```
//!
//! The controller holds no lifecycle state of its own: the host owns the
//! state machine and the controller only reacts, returning or registering
//! the futures the host must await.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, trace, warn};

pub mod clients;
pub mod host;
pub mod scope;

pub use clients::{Client, ClientRegistry};
pub use host::InProcessHost;
pub use scope::{NavigationConfig, NavigationStyle, WorkerConfig, WorkerScope};

/// The message `type` value that requests immediate promotion.
pub const SKIP_WAITING_MESSAGE: &str = "SKIP_WAITING";

// ==================== Errors ====================

/// Errors that can occur in worker lifecycle handling.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Host error: {0}")]
    Host(String),

    #[error("Invalid worker configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] swkit_cache::CacheError),

    #[error(transparent)]
    Routing(#[from] swkit_routing::RoutingError),

    #[error(transparent)]
    Precache(#[from] swkit_precache::PrecacheError),
}

// ==================== Lifecycle State ====================

/// Worker lifecycle states, owned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Install event running.
    Installing,
    /// Installed, waiting for existing clients to release the old worker.
    Waiting,
    /// Activate event running.
    Activating,
    /// Active and controlling clients. Terminal in this design.
    Active,
}

impl LifecycleState {
    /// Whether the worker controls clients.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Installing => write!(f, "installing"),
            LifecycleState::Waiting => write!(f, "waiting"),
            LifecycleState::Activating => write!(f, "activating"),
            LifecycleState::Active => write!(f, "active"),
        }
    }
}

// ==================== Events ====================

/// The install event. Carries nothing the controller needs beyond its
/// occurrence.
#[derive(Debug, Default)]
pub struct InstallEvent;

type PendingTask = Pin<Box<dyn Future<Output = Result<(), WorkerError>> + Send>>;

/// The activate event. Side effects the host must await before reporting
/// activation complete are registered with [`ActivateEvent::wait_until`].
#[derive(Default)]
pub struct ActivateEvent {
    pending: Vec<PendingTask>,
}

impl ActivateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the event's lifetime over a pending operation.
    pub fn wait_until(
        &mut self,
        task: impl Future<Output = Result<(), WorkerError>> + Send + 'static,
    ) {
        self.pending.push(Box::pin(task));
    }

    /// Number of registered pending operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Await every registered operation. The host calls this before it
    /// considers activation complete.
    pub async fn finish(self) -> Result<(), WorkerError> {
        for task in self.pending {
            task.await?;
        }
        Ok(())
    }
}

/// A structured message from a client.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Message payload.
    pub data: JsonValue,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self { data }
    }

    /// The payload's `type` field, when present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.data.get("type").and_then(|v| v.as_str())
    }
}

// ==================== Host Contract ====================

/// The primitives the host runtime exposes to the controller.
///
/// `skip_waiting` requests immediate promotion of this worker version and
/// must be idempotent; `claim_clients` attaches all open clients to this
/// worker without waiting for their next navigation.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    async fn skip_waiting(&self) -> Result<(), WorkerError>;
    async fn claim_clients(&self) -> Result<(), WorkerError>;
}

// ==================== Controller ====================

/// Reacts to host-dispatched lifecycle events.
///
/// Failure semantics follow the worker model: a failed side effect is
/// logged and swallowed, never fatal to the worker.
pub struct LifecycleController {
    host: Arc<dyn WorkerHost>,
}

impl LifecycleController {
    pub fn new(host: Arc<dyn WorkerHost>) -> Self {
        Self { host }
    }

    /// Install reaction: unconditionally request immediate promotion.
    pub async fn on_install(&self, _event: &InstallEvent) {
        info!("installed, skipping wait");
        match self.host.skip_waiting().await {
            Ok(()) => info!("installed, skipped waiting"),
            Err(error) => warn!(%error, "skip-waiting request failed"),
        }
    }

    /// Activate reaction: claim all open clients. The claim is registered
    /// on the event rather than awaited here, so the host controls when
    /// activation is considered complete.
    pub fn on_activate(&self, event: &mut ActivateEvent) {
        info!("activated, claiming clients");
        let host = Arc::clone(&self.host);
        event.wait_until(async move { host.claim_clients().await });
    }

    /// Message reaction: `SKIP_WAITING` requests promotion; anything else
    /// is ignored without error.
    pub async fn on_message(&self, event: &MessageEvent) {
        match event.message_type() {
            Some(kind) if kind == SKIP_WAITING_MESSAGE => {
                info!("message received, skipping wait");
                match self.host.skip_waiting().await {
                    Ok(()) => info!("message received, skipped wait"),
                    Err(error) => warn!(%error, "skip-waiting request failed"),
                }
            }
            other => {
                trace!(message_type = ?other, "ignoring message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        skips: AtomicU32,
        claims: AtomicU32,
    }

    #[async_trait]
    impl WorkerHost for CountingHost {
        async fn skip_waiting(&self) -> Result<(), WorkerError> {
            self.skips.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn claim_clients(&self) -> Result<(), WorkerError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct GatedHost {
        gate: tokio::sync::Notify,
        claims: AtomicU32,
    }

    #[async_trait]
    impl WorkerHost for GatedHost {
        async fn skip_waiting(&self) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn claim_clients(&self) -> Result<(), WorkerError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(())
        }
    }

    #[test]
    fn test_lifecycle_state_display() {
        assert_eq!(LifecycleState::Installing.to_string(), "installing");
        assert_eq!(LifecycleState::Active.to_string(), "active");
        assert!(LifecycleState::Active.is_active());
        assert!(!LifecycleState::Waiting.is_active());
    }

    #[test]
    fn test_message_type_extraction() {
        let event = MessageEvent::new(json!({"type": "SKIP_WAITING"}));
        assert_eq!(event.message_type(), Some("SKIP_WAITING"));

        assert_eq!(MessageEvent::new(json!({})).message_type(), None);
        assert_eq!(MessageEvent::new(JsonValue::Null).message_type(), None);
        assert_eq!(
            MessageEvent::new(json!({"type": 7})).message_type(),
            None
        );
    }

    #[tokio::test]
    async fn test_install_requests_skip_waiting_once() {
        let host = Arc::new(CountingHost::default());
        let controller = LifecycleController::new(host.clone());

        controller.on_install(&InstallEvent).await;
        assert_eq!(host.skips.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_triggers_exactly_one_skip() {
        let host = Arc::new(CountingHost::default());
        let controller = LifecycleController::new(host.clone());

        controller
            .on_message(&MessageEvent::new(json!({"type": "SKIP_WAITING"})))
            .await;
        assert_eq!(host.skips.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_messages_trigger_no_skip() {
        let host = Arc::new(CountingHost::default());
        let controller = LifecycleController::new(host.clone());

        controller
            .on_message(&MessageEvent::new(json!({"type": "OTHER"})))
            .await;
        controller
            .on_message(&MessageEvent::new(json!({"payload": 1})))
            .await;
        controller.on_message(&MessageEvent::new(JsonValue::Null)).await;

        assert_eq!(host.skips.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_activation_waits_for_claim_to_resolve() {
        let host = Arc::new(GatedHost {
            gate: tokio::sync::Notify::new(),
            claims: AtomicU32::new(0),
        });
        let controller = LifecycleController::new(host.clone());

        let mut event = ActivateEvent::new();
        controller.on_activate(&mut event);
        assert_eq!(event.pending_count(), 1);

        let activation = tokio::spawn(event.finish());
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Claim was invoked but has not resolved, so activation is still
        // pending.
        assert_eq!(host.claims.load(Ordering::SeqCst), 1);
        assert!(!activation.is_finished());

        host.gate.notify_one();
        activation.await.unwrap().unwrap();
        assert_eq!(host.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activate_claims_exactly_once() {
        let host = Arc::new(CountingHost::default());
        let controller = LifecycleController::new(host.clone());

        let mut event = ActivateEvent::new();
        controller.on_activate(&mut event);
        event.finish().await.unwrap();

        assert_eq!(host.claims.load(Ordering::SeqCst), 1);
    }
}
