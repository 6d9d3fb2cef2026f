//! Event handlers and the dispatch boundary
//!
//! A handler returns a [`HandlerResult`]. Dispatch runs every handler for a
//! record in order, capturing returned errors and panics alike, so one
//! failing handler never stops its siblings or the caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::warn;

use crate::events::Event;

/// Error returned by a failing handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one handler invocation
pub type HandlerResult = Result<(), HandlerError>;

/// Receives delivered events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: &Event) -> HandlerResult;

    /// Name used in logs and failure reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.f)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// A handler that failed during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
    pub panicked: bool,
}

/// Result of dispatching one event to its handlers
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Invoke every handler in order, containing failures.
pub async fn dispatch(handlers: &[Arc<dyn EventHandler>], event: &Event) -> DispatchReport {
    let mut report = DispatchReport::default();

    for handler in handlers {
        let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => {
                report.delivered += 1;
                continue;
            }
            Ok(Err(e)) => HandlerFailure {
                handler: handler.name().to_string(),
                message: e.to_string(),
                panicked: false,
            },
            Err(panic) => HandlerFailure {
                handler: handler.name().to_string(),
                message: panic_message(panic.as_ref()),
                panicked: true,
            },
        };

        warn!(
            handler = %failure.handler,
            panicked = failure.panicked,
            error = %failure.message,
            "Event handler failed"
        );
        report.failures.push(failure);
    }

    report
}
