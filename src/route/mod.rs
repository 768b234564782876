//! Routes, the route registry, and request dispatch metadata.

mod actions;
mod target;
mod trie;

pub use self::target::Target;

pub(crate) use self::actions::ActionRegistry;
pub(crate) use self::trie::{parse_pattern, PatternSegment, Trie};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Kind, User};
use crate::handler::RequestHandler;
use crate::media::MediaType;

/// A pattern plus the handlers mounted on it.
///
/// ```
/// use candor::{Response, Route};
///
/// let route = Route::new("/greet/:name").unwrap().get(|req: candor::Request| async move {
///     let name = req.path_param("name").unwrap_or_default();
///     Ok(Response::text(format!("Hello {}!", name)))
/// });
/// # drop(route);
/// ```
pub struct Route {
    pattern: String,
    segments: Vec<PatternSegment>,
    endpoints: Vec<Endpoint>,
}

struct Endpoint {
    method: String,
    consumes: Option<MediaType>,
    produces: Option<MediaType>,
    handler: Arc<dyn RequestHandler>,
}

impl Route {
    /// Start a route at `pattern` (`/static/:param/*catch-all` grammar).
    pub fn new(pattern: &str) -> Result<Route, Error> {
        let segments = parse_pattern(pattern)?;
        Ok(Route {
            pattern: pattern.to_owned(),
            segments,
            endpoints: Vec::new(),
        })
    }

    /// The pattern this route was created with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Mount a handler for an arbitrary method.
    pub fn handle(mut self, method: &str, handler: impl RequestHandler) -> Route {
        self.endpoints.push(Endpoint {
            method: method.to_ascii_uppercase(),
            consumes: None,
            produces: None,
            handler: Arc::new(handler),
        });
        self
    }

    /// Mount a handler constrained by consumed and produced media types.
    ///
    /// `consumes` filters on the request `Content-Type`, `produces` on
    /// the request `Accept` list; `None` means "anything".
    pub fn handle_media(
        mut self,
        method: &str,
        consumes: Option<&str>,
        produces: Option<&str>,
        handler: impl RequestHandler,
    ) -> Result<Route, Error> {
        let parse = |range: Option<&str>| -> Result<Option<MediaType>, Error> {
            range.map(|s| {
                MediaType::parse(s).ok_or_else(|| Error::new_user(User::MediaRangeSyntax))
            })
            .transpose()
        };
        self.endpoints.push(Endpoint {
            method: method.to_ascii_uppercase(),
            consumes: parse(consumes)?,
            produces: parse(produces)?,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Mount a GET handler.
    pub fn get(self, handler: impl RequestHandler) -> Route {
        self.handle("GET", handler)
    }

    /// Mount a POST handler.
    pub fn post(self, handler: impl RequestHandler) -> Route {
        self.handle("POST", handler)
    }

    /// Mount a PUT handler.
    pub fn put(self, handler: impl RequestHandler) -> Route {
        self.handle("PUT", handler)
    }

    /// Mount a DELETE handler.
    pub fn delete(self, handler: impl RequestHandler) -> Route {
        self.handle("DELETE", handler)
    }

    /// Mount a HEAD handler.
    pub fn head(self, handler: impl RequestHandler) -> Route {
        self.handle("HEAD", handler)
    }

    pub(crate) fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Pick the handler for `(method, content-type, accept)`.
    pub(crate) fn select(
        &self,
        method: &str,
        content_type: Option<&MediaType>,
        accept: &[MediaType],
    ) -> Result<Arc<dyn RequestHandler>, Error> {
        let by_method: Vec<&Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.method == method)
            .collect();
        if by_method.is_empty() {
            return Err(Error::new(Kind::MethodNotAllowed));
        }

        let by_type: Vec<&Endpoint> = by_method
            .into_iter()
            .filter(|e| match (&e.consumes, content_type) {
                (Some(range), Some(ct)) => range.covers(ct),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        if by_type.is_empty() {
            return Err(Error::new(Kind::UnsupportedMediaType));
        }

        let chosen = by_type.into_iter().find(|e| match &e.produces {
            _ if accept.is_empty() => true,
            None => true,
            Some(produced) => accept.iter().any(|range| range.compatible(produced)),
        });
        match chosen {
            Some(e) => Ok(Arc::clone(&e.handler)),
            None => Err(Error::new(Kind::NotAcceptable)),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

/// A matched route with its bound path parameters.
#[derive(Debug)]
pub(crate) struct RouteMatch {
    pub(crate) route: Arc<Route>,
    pub(crate) params_raw: HashMap<String, String>,
    pub(crate) params_decoded: HashMap<String, String>,
}

/// The shared, concurrently-mutable route table.
pub(crate) struct RouteRegistry {
    trie: Trie<Route>,
}

impl RouteRegistry {
    pub(crate) fn new() -> RouteRegistry {
        RouteRegistry { trie: Trie::new() }
    }

    pub(crate) fn add(&self, route: Route) -> Result<(), Error> {
        let segments = route.segments.clone();
        self.trie.insert(&segments, route)
    }

    pub(crate) fn remove(&self, pattern: &str) -> Result<(), Error> {
        let segments = parse_pattern(pattern)?;
        self.trie.remove(&segments).map(|_| ())
    }

    /// Find the route for a target and bind its path parameters by the
    /// names in the winning pattern.
    pub(crate) fn lookup(&self, target: &Target) -> Result<RouteMatch, Error> {
        let hit = self
            .trie
            .lookup(target.raw_segments(), target.decoded_segments())
            .ok_or_else(|| Error::new(Kind::RouteNotFound))?;

        let mut params_raw = HashMap::new();
        let mut params_decoded = HashMap::new();
        let mut positional = hit.params.into_iter();
        for seg in hit.value.segments() {
            match seg {
                PatternSegment::Param(name) => {
                    if let Some((raw, decoded)) = positional.next() {
                        params_raw.insert(name.clone(), raw);
                        params_decoded.insert(name.clone(), decoded);
                    }
                }
                PatternSegment::CatchAll(name) => {
                    if let Some((raw, decoded)) = hit.catch_all.clone() {
                        params_raw.insert(name.clone(), raw);
                        params_decoded.insert(name.clone(), decoded);
                    }
                }
                PatternSegment::Static(_) => {}
            }
        }
        Ok(RouteMatch {
            route: hit.value,
            params_raw,
            params_decoded,
        })
    }
}

impl fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RouteRegistry")
    }
}
