//! Work items: deferred computations handed to the queue.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;

/// The deferred computation carried by a [`WorkItem`]
pub(crate) enum Operation<T> {
    /// Cooperative async work, run as a tokio task
    Async(BoxFuture<'static, Result<T, String>>),
    /// CPU-bound or blocking work, run on the blocking thread pool
    Blocking(Box<dyn FnOnce() -> Result<T, String> + Send + 'static>),
}

/// A single unit of work submitted to a [`BoundedTaskQueue`](super::BoundedTaskQueue)
///
/// The operation does not start until the queue grants it a slot. Errors are
/// converted to their display string when the item is built, so the queue can
/// report them as `ComputationFailed` regardless of the caller's error type.
pub struct WorkItem<T> {
    pub(crate) operation: Operation<T>,
    correlation_id: Option<String>,
    submitted_at: Instant,
}

impl<T: Send + 'static> WorkItem<T> {
    /// Wrap a future producing `Result<T, E>`
    pub fn new<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        let future = future.map(|r| r.map_err(|e| e.to_string())).boxed();
        Self::from_operation(Operation::Async(future))
    }

    /// Wrap a blocking closure; it runs on tokio's blocking pool
    pub fn blocking<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: fmt::Display,
    {
        Self::from_operation(Operation::Blocking(Box::new(move || f().map_err(|e| e.to_string()))))
    }

    fn from_operation(operation: Operation<T>) -> Self {
        Self { operation, correlation_id: None, submitted_at: Instant::now() }
    }

    /// Attach a correlation identifier used in logs
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

impl<T> WorkItem<T> {
    /// Correlation identifier, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// When the item was created
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Whether the item runs on the blocking pool
    pub fn is_blocking(&self) -> bool {
        matches!(self.operation, Operation::Blocking(_))
    }
}

impl<T> fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("correlation_id", &self.correlation_id)
            .field("blocking", &self.is_blocking())
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_metadata() {
        let item = WorkItem::new(async { Ok::<_, String>(1) }).with_correlation_id("req-42");
        assert_eq!(item.correlation_id(), Some("req-42"));
        assert!(!item.is_blocking());
        assert!(item.submitted_at() <= Instant::now());
    }

    #[test]
    fn test_blocking_item() {
        let item = WorkItem::blocking(|| Ok::<_, String>(7));
        assert!(item.is_blocking());
        assert!(item.correlation_id().is_none());
        match item.operation {
            Operation::Blocking(f) => assert_eq!(f(), Ok(7)),
            Operation::Async(_) => panic!("expected blocking operation"),
        }
    }

    #[tokio::test]
    async fn test_error_is_stringified() {
        let item = WorkItem::new(async { Err::<u32, _>(std::io::Error::other("disk gone")) });
        match item.operation {
            Operation::Async(fut) => assert_eq!(fut.await, Err("disk gone".to_string())),
            Operation::Blocking(_) => panic!("expected async operation"),
        }
    }
}
