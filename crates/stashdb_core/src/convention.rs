//! Result conventions for store operations.
//!
//! Store operations follow one of two conventions:
//!
//! - **Lenient** reads (`get`, `list`, `count`, `contains`) never fail. A
//!   failure is published as an error event and the caller receives the
//!   type's default value.
//! - **Strict** operations (every mutation) publish an error event and
//!   return the error.
//!
//! Either way exactly one event is published per failed operation. The
//! free functions [`safe_call`] and [`safe_void_call`] let callers apply
//! lenient semantics to any operation.

use crate::error::CoreResult;
use crate::events::{Change, EventBus, StoreEvent};
use std::future::Future;
use tracing::debug;

/// Publishes the failure of a lenient read and substitutes a default.
pub(crate) fn lenient<T: Default>(store: &str, op: &'static str, bus: &EventBus, result: CoreResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            debug!(store, op, error = %err, "read failed; returning default");
            bus.publish(&StoreEvent::Error(err));
            T::default()
        }
    }
}

/// Publishes the outcome of a strict operation.
///
/// `change` builds the change event from the successful result.
pub(crate) fn strict<T>(
    store: &str,
    op: &'static str,
    bus: &EventBus,
    result: CoreResult<T>,
    change: impl FnOnce(&T) -> Change,
) -> CoreResult<T> {
    match &result {
        Ok(value) => bus.publish(&StoreEvent::Change(change(value))),
        Err(err) => {
            debug!(store, op, error = %err, "operation failed");
            bus.publish(&StoreEvent::Error(err.clone()));
        }
    }
    result
}

/// Runs an operation, turning failure into `None`.
pub async fn safe_call<T, F>(operation: F) -> Option<T>
where
    F: Future<Output = CoreResult<T>>,
{
    match operation.await {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "suppressed operation failure");
            None
        }
    }
}

/// Runs an operation and discards both its result and its failure.
pub async fn safe_void_call<T, F>(operation: F)
where
    F: Future<Output = CoreResult<T>>,
{
    if let Err(err) = operation.await {
        debug!(error = %err, "suppressed operation failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::events::{listener, EventKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn capture(bus: &EventBus) -> Arc<Mutex<Vec<StoreEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Change, EventKind::Error] {
            let seen = Arc::clone(&seen);
            bus.subscribe(kind, listener(move |e| seen.lock().push(e.clone())));
        }
        seen
    }

    #[test]
    fn lenient_substitutes_default_and_reports() {
        let bus = EventBus::new();
        let seen = capture(&bus);

        let value: Vec<u8> = lenient("s", "list", &bus, Err(CoreError::not_found("gone")));
        assert!(value.is_empty());
        assert_eq!(seen.lock().len(), 1);
        assert!(matches!(seen.lock()[0], StoreEvent::Error(_)));

        assert_eq!(lenient("s", "count", &bus, Ok(3usize)), 3);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn strict_publishes_one_event_either_way() {
        let bus = EventBus::new();
        let seen = capture(&bus);

        let ok = strict("s", "clear", &bus, Ok(()), |_| Change::Clear);
        assert!(ok.is_ok());
        let err = strict::<()>("s", "clear", &bus, Err(CoreError::not_found("x")), |_| Change::Clear);
        assert!(err.is_err());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], StoreEvent::Change(Change::Clear));
        assert!(matches!(seen[1], StoreEvent::Error(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn safe_helpers_swallow_errors() {
        assert_eq!(safe_call(async { Ok::<_, CoreError>(5) }).await, Some(5));
        assert_eq!(
            safe_call(async { Err::<u8, _>(CoreError::validation("bad")) }).await,
            None
        );
        safe_void_call(async { Err::<(), _>(CoreError::validation("bad")) }).await;
    }
}
