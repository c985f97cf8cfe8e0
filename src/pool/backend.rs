use super::BackendError;

/// A kind of stateful resource the pool can manage.
///
/// Implementations know how to open a handle, tell whether one is still
/// usable, and close one. A database driver, a socket factory or a client
/// for an external service all fit.
pub trait Backend: Send + Sync {
    /// The live resource, e.g. a database connection.
    type Handle: Send;

    /// Open a new handle.
    fn connect(&self) -> Result<Self::Handle, BackendError>;

    /// Cheap liveness check. Must not reconnect or otherwise mutate.
    fn ping(&self, handle: &Self::Handle) -> bool;

    /// Close a handle. Must tolerate handles that are already broken.
    fn close(&self, handle: Self::Handle);
}
