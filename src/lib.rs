#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # candor
//!
//! An embeddable, explicit HTTP/1.1 server library. No annotations, no
//! middleware framework, no hidden behavior: a byte-accurate exchange
//! engine with routes, actions and error handlers layered thinly on
//! top.
//!
//! The engine speaks HTTP/1.1 per RFC 7230/9112: exact CRLF rules,
//! `Content-Length` vs `Transfer-Encoding` framing, chunked bodies with
//! trailers, persistent connections with pipelining, idle timeouts and
//! graceful shutdown. What it deliberately does not do: HTTP/2+, TLS,
//! chunk extensions, or the HTTP/1.0 `keep-alive` extension.
//!
//! ```no_run
//! use candor::{HttpServer, Request, Response, Route};
//!
//! #[tokio::main]
//! async fn main() -> candor::Result<()> {
//!     let server = HttpServer::create();
//!     server.add(Route::new("/greet/:name")?.get(|req: Request| async move {
//!         let name = req.path_param("name").unwrap_or_default();
//!         Ok(Response::text(format!("Hello {}!", name)))
//!     }))?;
//!     server.start("127.0.0.1:8080").await?;
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub use crate::attributes::Attributes;
pub use crate::body::{BodyLength, ResponseBody};
pub use crate::config::HttpServerOptions;
pub use crate::error::{Error, Result};
pub use crate::event::{EventSink, ResponseStats, ServerEvent};
pub use crate::handler::{
    AfterAction, BeforeAction, BoxFuture, Chain, ErrorHandler, RequestHandler,
};
pub use crate::headers::Headers;
pub use crate::media::MediaType;
pub use crate::request::{Request, RequestBody, TrailerStatus};
pub use crate::response::{Response, ResponseBuilder};
pub use crate::route::{Route, Target};
pub use crate::server::HttpServer;
pub use crate::status::StatusCode;
pub use crate::version::HttpVersion;

mod attributes;
mod body;
mod config;
mod error;
mod event;
mod handler;
mod headers;
mod media;
mod proto;
mod request;
mod response;
mod route;
mod server;
mod status;
mod version;
