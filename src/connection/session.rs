use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ServerProfile;
use crate::connection::client::{ClientError, Connector, RemoteClient};

/// One live connection plus the server it belongs to.
///
/// Requests go through [`ActiveSession::request`], which holds the session's
/// gate for the whole closure, so at most one request is in flight per
/// connection even when several threads share the session.
pub struct ActiveSession {
    client: Box<dyn RemoteClient>,
    server: ServerProfile,
    gate: Mutex<()>,
}

impl ActiveSession {
    pub fn server(&self) -> &ServerProfile {
        &self.server
    }

    /// Run `f` with exclusive use of the client.
    pub fn request<T>(&self, f: impl FnOnce(&dyn RemoteClient) -> T) -> T {
        let _turn = self.gate.lock();
        f(self.client.as_ref())
    }

    /// Close the transport without waiting for the gate; a request running
    /// on another thread fails on its next round trip.
    fn close(&self) {
        self.client.close();
    }
}

/// Owns the single connection slot. `Connecting` only exists for the
/// duration of a [`SessionManager::connect`] call.
pub struct SessionManager {
    connector: Box<dyn Connector>,
    slot: Mutex<Option<Arc<ActiveSession>>>,
    // Serializes connect calls so two racing connects cannot both fill the slot.
    connecting: Mutex<()>,
}

impl SessionManager {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
            connecting: Mutex::new(()),
        }
    }

    /// Tear down any existing session, then open one to `server`.
    /// A failed attempt leaves the manager disconnected.
    pub fn connect(&self, server: ServerProfile) -> Result<Arc<ActiveSession>, ClientError> {
        let _connecting = self.connecting.lock();
        self.disconnect();

        debug!("connecting to '{}' ({}:{})", server.name, server.host, server.port);
        let client = self.connector.connect(&server)?;
        let session = Arc::new(ActiveSession {
            client,
            server,
            gate: Mutex::new(()),
        });

        let previous = self.slot.lock().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            previous.close();
        }
        info!("connected to '{}'", session.server.name);
        Ok(session)
    }

    /// Close and forget the current session. Returns whether one existed.
    pub fn disconnect(&self) -> bool {
        let taken = self.slot.lock().take();
        match taken {
            Some(session) => {
                session.close();
                info!("disconnected from '{}'", session.server.name);
                true
            }
            None => false,
        }
    }

    /// Drop `session` only if it is still the current one.
    pub fn invalidate(&self, session: &Arc<ActiveSession>) -> bool {
        let mut slot = self.slot.lock();
        let is_current = slot
            .as_ref()
            .map(|current| Arc::ptr_eq(current, session))
            .unwrap_or(false);
        if is_current {
            slot.take();
            drop(slot);
            session.close();
            info!("session to '{}' invalidated", session.server.name);
        }
        is_current
    }

    pub fn active(&self) -> Option<Arc<ActiveSession>> {
        self.slot.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn connected_server(&self) -> Option<ServerProfile> {
        self.slot.lock().as_ref().map(|s| s.server.clone())
    }
}
