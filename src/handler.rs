//! Handlers, actions, error handlers and the invocation chain.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Boxed future returned by handlers and actions.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Serves one request. Implemented for any `Fn(Request) -> Future`.
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response for this request.
    fn call(&self, request: Request) -> BoxFuture<crate::Result<Response>>;
}

impl fmt::Debug for dyn RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestHandler")
    }
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<crate::Result<Response>> {
        Box::pin((self)(request))
    }
}

/// Runs before the route handler.
///
/// An action either calls [`Chain::proceed`] to pass the request down
/// the chain, or returns a response of its own, which short-circuits
/// everything after it (the route handler included).
pub trait BeforeAction: Send + Sync + 'static {
    /// Inspect or act on the request, then proceed (or don't).
    fn apply(&self, request: Request, chain: Chain) -> BoxFuture<crate::Result<Response>>;
}

impl<F, Fut> BeforeAction for F
where
    F: Fn(Request, Chain) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn apply(&self, request: Request, chain: Chain) -> BoxFuture<crate::Result<Response>> {
        Box::pin((self)(request, chain))
    }
}

/// Transforms the application's response before it is written, error
/// fallbacks included.
pub trait AfterAction: Send + Sync + 'static {
    /// Return the response to transmit in place of `response`.
    fn apply(&self, request: Request, response: Response) -> BoxFuture<crate::Result<Response>>;
}

impl<F, Fut> AfterAction for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn apply(&self, request: Request, response: Response) -> BoxFuture<crate::Result<Response>> {
        Box::pin((self)(request, response))
    }
}

/// Converts a failed exchange into a fallback response.
///
/// Handlers run in registration order up to the configured attempt cap;
/// a handler that itself fails passes the turn to the next one. The
/// engine's built-in mapping is the backstop.
pub trait ErrorHandler: Send + Sync + 'static {
    /// Produce a fallback response, or fail to let the next handler try.
    fn handle(
        &self,
        error: Arc<Error>,
        request: Option<Request>,
    ) -> BoxFuture<crate::Result<Response>>;
}

impl<F, Fut> ErrorHandler for F
where
    F: Fn(Arc<Error>, Option<Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn handle(
        &self,
        error: Arc<Error>,
        request: Option<Request>,
    ) -> BoxFuture<crate::Result<Response>> {
        Box::pin((self)(error, request))
    }
}

pub(crate) type Terminal =
    Arc<dyn Fn(Request) -> BoxFuture<crate::Result<Response>> + Send + Sync>;

/// The rest of the before-action chain, ending at the route handler.
pub struct Chain {
    actions: VecDeque<Arc<dyn BeforeAction>>,
    terminal: Terminal,
}

impl Chain {
    pub(crate) fn new(actions: Vec<Arc<dyn BeforeAction>>, terminal: Terminal) -> Chain {
        Chain {
            actions: actions.into(),
            terminal,
        }
    }

    /// Continue with the next action, or the route handler when the
    /// chain is exhausted.
    pub fn proceed(mut self, request: Request) -> BoxFuture<crate::Result<Response>> {
        Box::pin(async move {
            match self.actions.pop_front() {
                Some(action) => action.apply(request, self).await,
                None => (self.terminal)(request).await,
            }
        })
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("remaining", &self.actions.len())
            .finish()
    }
}
