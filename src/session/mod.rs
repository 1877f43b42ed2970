//! Session management
//!
//! A session is the unit of ownership binding one capture source, one relay
//! host, and one transport channel. The coordinator mediates configuration
//! changes and fault-tolerant teardown.

mod coordinator;

use std::future::Future;
use tracing::warn;

use crate::error::Result;

pub use coordinator::{CoordinatorState, SessionCoordinator};

/// No-throw wrapper for remote calls
///
/// A failure in one remote call never aborts the session: it is logged and
/// the call yields nothing.
pub(crate) async fn safe_call<T, F>(context: &str, op: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match op.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(context, error = %e, "Remote call failed, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_safe_call_swallows_errors() {
        let ok = safe_call("ok", async { Ok::<_, AppError>(5) }).await;
        assert_eq!(ok, Some(5));

        let err = safe_call("fail", async {
            Err::<u32, _>(AppError::Internal("boom".to_string()))
        })
        .await;
        assert_eq!(err, None);
    }
}
