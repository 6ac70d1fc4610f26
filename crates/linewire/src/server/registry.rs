use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{SendError, ServerError};
use crate::framing::encode_frame;
use crate::message::Response;
use crate::server::session::{SessionId, SessionInfo, SessionWriter};

struct Registered {
    info: SessionInfo,
    writer: Arc<SessionWriter>,
    disconnect: Arc<Notify>,
}

/// Tracks sessions that are currently serving.
///
/// A session is added once it has authenticated and removed when its
/// [`RegistrationGuard`] is dropped, which happens as soon as it stops
/// reading. Only one entry is allowed per [`SessionId`].
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Registered, ahash::RandomState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::default(),
        }
    }

    /// Add a session. Returns a guard that removes it again on drop.
    ///
    /// Returns an error if a session with the same id is already registered.
    pub(crate) fn register(
        self: &Arc<Self>,
        info: SessionInfo,
        writer: Arc<SessionWriter>,
        disconnect: Arc<Notify>,
    ) -> Result<RegistrationGuard, ServerError> {
        match self.sessions.entry(info.id) {
            Entry::Occupied(_) => Err(ServerError::SessionAlreadyActive(info.id)),
            Entry::Vacant(slot) => {
                let id = info.id;
                slot.insert(Registered {
                    info,
                    writer,
                    disconnect,
                });
                debug!(session_id = %id, "Session registered");
                Ok(RegistrationGuard {
                    id,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all registered sessions, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| entry.info.clone())
    }

    /// Write `response` to one session.
    pub async fn send_to(&self, id: &SessionId, response: &Response) -> Result<usize, SendError> {
        // Clone the writer out so no map shard is locked across the write.
        let writer = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.writer))
            .ok_or(SendError::Closed)?;
        writer.write_response(response).await
    }

    /// Write `response` to every registered session.
    ///
    /// The frame is encoded once. Returns how many sessions it was delivered
    /// to; failures on individual sessions are logged and skipped.
    ///
    /// Completes only once every write has finished, so a peer that stops
    /// reading holds the caller until its connection fails. Use
    /// [`broadcast_with_timeout`](Self::broadcast_with_timeout) to bound that.
    pub async fn broadcast(&self, response: &Response) -> usize {
        self.deliver(response, None).await
    }

    /// Like [`broadcast`](Self::broadcast), but each write gets at most
    /// `limit`. A session whose write times out may have received part of the
    /// frame, so its connection is closed and the session disconnected.
    pub async fn broadcast_with_timeout(&self, response: &Response, limit: Duration) -> usize {
        self.deliver(response, Some(limit)).await
    }

    async fn deliver(&self, response: &Response, limit: Option<Duration>) -> usize {
        let frame = match encode_frame(response) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Failed to encode broadcast, nothing sent");
                return 0;
            }
        };

        let targets: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (Arc::clone(&entry.writer), Arc::clone(&entry.disconnect)))
            .collect();

        let deliveries = targets.iter().map(|(writer, disconnect)| {
            let frame = &frame;
            async move {
                let result = match limit {
                    None => writer.write_frame(frame).await,
                    Some(limit) => match timeout(limit, writer.write_frame(frame)).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(session_id = %writer.session_id(), "Broadcast write timed out, dropping session");
                            disconnect.notify_one();
                            // Another writer may hold the lock on the same stalled stream.
                            let _ = timeout(limit, writer.close()).await;
                            return false;
                        }
                    },
                };
                match result {
                    Ok(_) => true,
                    Err(err) => {
                        debug!(session_id = %writer.session_id(), error = %err, "Broadcast not delivered");
                        false
                    }
                }
            }
        });

        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    /// Ask one session to stop reading. Returns `false` if it is not registered.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.disconnect.notify_one();
                true
            }
            None => false,
        }
    }

    /// Ask every registered session to stop reading.
    pub fn disconnect_all(&self) {
        for entry in self.sessions.iter() {
            entry.disconnect.notify_one();
        }
    }

    fn remove(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Keeps a session registered. When dropped, the session is removed.
pub struct RegistrationGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl RegistrationGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl fmt::Debug for RegistrationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationGuard")
            .field("id", &self.id)
            .finish()
    }
}
