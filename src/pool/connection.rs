use std::fmt;
use std::sync::Arc;

use super::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Opened,
    Closed,
}

/// One reconnectable resource handle.
///
/// ```text
/// Unopened --open--> Opened --close--> Closed --open--> Opened
/// ```
///
/// Reading the handle is split in two: [`peek_handle`](Self::peek_handle)
/// never touches the resource, [`ensure_handle`](Self::ensure_handle)
/// transparently reconnects an opened connection whose handle was lost or
/// died. Open failures are logged and reported as `None`.
pub struct Connection<B: Backend> {
    backend: Arc<B>,
    handle: Option<B::Handle>,
    state: ConnectionState,
}

impl<B: Backend> Connection<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Connection {
            backend,
            handle: None,
            state: ConnectionState::Unopened,
        }
    }

    /// Open a fresh handle, closing any current one first.
    pub fn open(&mut self) -> Option<&mut B::Handle> {
        if let Some(stale) = self.handle.take() {
            self.backend.close(stale);
        }
        match self.backend.connect() {
            Ok(handle) => {
                self.state = ConnectionState::Opened;
                self.handle = Some(handle);
                self.handle.as_mut()
            }
            Err(err) => {
                tracing::warn!(error = %err, state = ?self.state, "failed to open connection");
                None
            }
        }
    }

    /// Close the handle if there is one. A no-op when nothing is open.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.close(handle);
        }
        if self.state == ConnectionState::Opened {
            self.state = ConnectionState::Closed;
        }
    }

    /// Close, then open again.
    pub fn reopen(&mut self) -> Option<&mut B::Handle> {
        self.close();
        self.open()
    }

    /// The current handle, if any. No side effects.
    pub fn peek_handle(&self) -> Option<&B::Handle> {
        self.handle.as_ref()
    }

    /// The current handle, reconnecting first if the connection is meant to
    /// be open but its handle is missing or fails a ping.
    ///
    /// Returns `None` without reconnecting when the connection was never
    /// opened or was closed on purpose.
    pub fn ensure_handle(&mut self) -> Option<&mut B::Handle> {
        if self.state != ConnectionState::Opened {
            return None;
        }
        let alive = self
            .handle
            .as_ref()
            .is_some_and(|handle| self.backend.ping(handle));
        if !alive {
            tracing::debug!("connection handle lost, reconnecting");
            return self.reopen();
        }
        self.handle.as_mut()
    }

    /// Drop the handle after the caller saw it fail. The connection stays
    /// opened, so the next [`ensure_handle`](Self::ensure_handle) reconnects.
    pub fn mark_broken(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.close(handle);
        }
    }

    /// Opened with a handle that answers a ping. No side effects.
    pub fn is_healthy(&self) -> bool {
        self.state == ConnectionState::Opened
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| self.backend.ping(handle))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

impl<B: Backend> Drop for Connection<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: Backend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}
