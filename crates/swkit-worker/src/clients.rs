//! Open clients and the claim operation.

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

/// A client (an open page within the worker's scope).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID, assigned by the host.
    pub id: String,

    /// Page URL.
    pub url: Url,

    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// Create an uncontrolled client.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            controlled: false,
        }
    }
}

/// The set of open clients the host knows about.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Number of open clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of controlled clients.
    pub fn controlled_count(&self) -> usize {
        self.clients.values().filter(|c| c.controlled).count()
    }

    /// Attach every open client to this worker. Returns how many were
    /// newly claimed; already-controlled clients are unaffected.
    pub fn claim_all(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        debug!(claimed, total = self.clients.len(), "clients claimed");
        claimed
    }
}
