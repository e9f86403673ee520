//! Reference in-process host.
//!
//! Real deployments embed the controller behind their own runtime; this
//! host implements the same contract in-process for tools and tests. It
//! owns the lifecycle state machine, as the host contract requires.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clients::{Client, ClientRegistry};
use crate::{LifecycleState, WorkerError, WorkerHost};

/// In-process host: lifecycle state plus an open-client registry.
pub struct InProcessHost {
    state: RwLock<LifecycleState>,
    clients: RwLock<ClientRegistry>,
}

impl InProcessHost {
    /// Create a host for a worker version that just began installing.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(LifecycleState::Installing),
            clients: RwLock::new(ClientRegistry::new()),
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Register an open client.
    pub async fn add_client(&self, client: Client) {
        self.clients.write().await.add(client);
    }

    /// Number of clients this worker controls.
    pub async fn controlled_clients(&self) -> usize {
        self.clients.read().await.controlled_count()
    }

    /// Install finished without a skip-waiting request; the worker parks
    /// behind existing clients.
    pub async fn enter_waiting(&self) {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Installing {
            *state = LifecycleState::Waiting;
        }
    }

    /// The activate event (including everything it waited on) finished.
    pub async fn complete_activation(&self) {
        let mut state = self.state.write().await;
        debug!(from = %state, "activation complete");
        *state = LifecycleState::Active;
    }
}

#[async_trait]
impl WorkerHost for InProcessHost {
    /// Promote an installing or waiting worker to activating. Repeated
    /// calls are no-ops, as are calls on an already activating or active
    /// worker.
    async fn skip_waiting(&self) -> Result<(), WorkerError> {
        let mut state = self.state.write().await;
        match *state {
            LifecycleState::Installing | LifecycleState::Waiting => {
                debug!(from = %state, "skip waiting, promoting");
                *state = LifecycleState::Activating;
            }
            LifecycleState::Activating | LifecycleState::Active => {}
        }
        Ok(())
    }

    async fn claim_clients(&self) -> Result<(), WorkerError> {
        self.clients.write().await.claim_all();
        Ok(())
    }
}
