//! Remote access helpers shared by the verifier, the synchronizer and the
//! poller.

pub mod memory;

pub use memory::MemoryTransport;

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{RemoteSession, RemoteTransport, SessionTarget};

/// Run a remote operation under a deadline
///
/// An elapsed deadline is reported as [`Error::Connection`].
pub async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::connection(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}

/// Open a session with a connect deadline
pub async fn open_session(
    transport: &dyn RemoteTransport,
    target: &SessionTarget,
    limit: Duration,
) -> Result<Box<dyn RemoteSession>> {
    bounded(
        &format!("connect to {}", target.host),
        limit,
        transport.connect(target),
    )
    .await
}

/// Close a session, logging rather than failing
///
/// By the time a session is closed its work has already succeeded or
/// failed; a close error does not change that outcome.
pub async fn close_quietly(session: Box<dyn RemoteSession>, host: &str) {
    if let Err(e) = session.close().await {
        tracing::debug!("Closing session to {} failed: {}", host, e);
    }
}
