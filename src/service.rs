//! Tower integration.
//!
//! [`HandlerService`] exposes a [`HandlerAdapter`] as a
//! `tower::Service<Envelope>`, so hosts can compose middleware (timeouts,
//! load shedding, tracing layers) around a handler without the core knowing
//! about any of it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use crate::adapter::{HandlerAdapter, HandlerError};
use crate::envelope::Envelope;
use crate::policy::ReturnValuePolicy;

/// Tower `Service` wrapper around a shared [`HandlerAdapter`].
///
/// The adapter is always ready: it performs no queueing of its own, so
/// readiness is delegated entirely to surrounding middleware.
pub struct HandlerService<P> {
    adapter: Arc<HandlerAdapter<P>>,
}

impl<P> HandlerService<P> {
    /// Wrap an adapter, taking ownership.
    pub fn new(adapter: HandlerAdapter<P>) -> Self {
        Self {
            adapter: Arc::new(adapter),
        }
    }

    /// Wrap an already-shared adapter.
    pub fn from_arc(adapter: Arc<HandlerAdapter<P>>) -> Self {
        Self { adapter }
    }
}

impl<P> Clone for HandlerService<P> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
        }
    }
}

impl<P> Service<Envelope> for HandlerService<P>
where
    P: ReturnValuePolicy + 'static,
{
    type Response = Option<Envelope>;
    type Error = HandlerError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Envelope) -> Self::Future {
        let adapter = Arc::clone(&self.adapter);
        Box::pin(async move { adapter.handle(&req).await })
    }
}
