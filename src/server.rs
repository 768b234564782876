//! The accept loop and server lifecycle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::config::HttpServerOptions;
use crate::error::{Error, User};
use crate::event::{EventSink, ServerEvent, TraceSink};
use crate::handler::{AfterAction, BeforeAction, ErrorHandler};
use crate::proto::exchange::Connection;
use crate::route::{parse_pattern, ActionRegistry, Route, RouteRegistry};

/// Everything registered on a server: routes, actions, error handlers.
pub(crate) struct AppRegistry {
    pub(crate) routes: RouteRegistry,
    pub(crate) before: ActionRegistry<Arc<dyn BeforeAction>>,
    pub(crate) after: ActionRegistry<Arc<dyn AfterAction>>,
    pub(crate) error_handlers: RwLock<Vec<Arc<dyn ErrorHandler>>>,
}

/// An embeddable HTTP/1.1 server.
///
/// ```no_run
/// use candor::{HttpServer, Response, Route};
///
/// # async fn run() -> candor::Result<()> {
/// let server = HttpServer::create();
/// server.add(Route::new("/hello")?.get(|_req: candor::Request| async {
///     Ok(Response::text("hi"))
/// }))?;
/// let addr = server.start("127.0.0.1:8080").await?;
/// println!("listening on {}", addr);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpServer {
    shared: Arc<Shared>,
}

struct Shared {
    config: Arc<HttpServerOptions>,
    app: Arc<AppRegistry>,
    events: RwLock<Arc<dyn EventSink>>,
    running: Arc<AtomicBool>,
    children: Mutex<HashMap<u64, Child>>,
    /// Children that finished before registration completed.
    reaped: Mutex<HashSet<u64>>,
    next_child: AtomicU64,
    drained: tokio::sync::Notify,
    control: Mutex<Option<Control>>,
}

struct Control {
    shutdown: watch::Sender<bool>,
    listener_task: tokio::task::JoinHandle<()>,
}

struct Child {
    started: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl HttpServer {
    /// A server with default options.
    pub fn create() -> HttpServer {
        HttpServer::with_options(HttpServerOptions::default())
    }

    /// A server with the given options.
    pub fn with_options(config: HttpServerOptions) -> HttpServer {
        HttpServer {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                app: Arc::new(AppRegistry {
                    routes: RouteRegistry::new(),
                    before: ActionRegistry::new(),
                    after: ActionRegistry::new(),
                    error_handlers: RwLock::new(Vec::new()),
                }),
                events: RwLock::new(Arc::new(TraceSink)),
                running: Arc::new(AtomicBool::new(false)),
                children: Mutex::new(HashMap::new()),
                reaped: Mutex::new(HashSet::new()),
                next_child: AtomicU64::new(0),
                drained: tokio::sync::Notify::new(),
                control: Mutex::new(None),
            }),
        }
    }

    /// Replace the event sink (default: forwarded to `tracing`).
    pub fn set_event_sink(&self, sink: impl EventSink) {
        *self
            .shared
            .events
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(sink);
    }

    /// Register a route. Fails on pattern collision or duplication.
    pub fn add(&self, route: Route) -> Result<(), Error> {
        self.shared.app.routes.add(route)
    }

    /// Remove the route registered at a pattern.
    pub fn remove(&self, pattern: &str) -> Result<(), Error> {
        self.shared.app.routes.remove(pattern)
    }

    /// Register a before-action at a pattern.
    pub fn before(&self, pattern: &str, action: impl BeforeAction) -> Result<(), Error> {
        let segments = parse_pattern(pattern)?;
        self.shared.app.before.insert(&segments, Arc::new(action))
    }

    /// Register an after-action at a pattern.
    pub fn after(&self, pattern: &str, action: impl AfterAction) -> Result<(), Error> {
        let segments = parse_pattern(pattern)?;
        self.shared.app.after.insert(&segments, Arc::new(action))
    }

    /// Append an error handler to the chain.
    pub fn add_error_handler(&self, handler: impl ErrorHandler) {
        self.shared
            .app
            .error_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Whether the listener is accepting.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn start(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr, Error> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(Error::new_user(User::ServerAlreadyRunning));
        }
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(Error::new_io(e));
            }
        };
        let local = listener.local_addr().map_err(Error::new_io)?;
        let (shutdown, signal) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let listener_task = tokio::spawn(accept_loop(listener, shared, signal));
        *self.control() = Some(Control {
            shutdown,
            listener_task,
        });
        self.shared.dispatch(ServerEvent::Started { addr: local });
        Ok(local)
    }

    /// Graceful stop with no deadline: close the listener, let active
    /// exchanges finish, close idle connections.
    pub async fn stop(&self) {
        self.stop_inner(None).await;
    }

    /// Graceful stop; connections still active at the deadline are
    /// force-closed.
    pub async fn stop_within(&self, deadline: Duration) {
        self.stop_inner(Some(deadline)).await;
    }

    /// Close the listener and every connection immediately.
    pub async fn kill(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.close_listener().await;
        for (_, child) in self.shared.children().drain() {
            child.abort.abort();
        }
        self.shared.dispatch(ServerEvent::Stopped);
    }

    async fn stop_inner(&self, deadline: Option<Duration>) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.close_listener().await;

        // Idle children never received a request byte; nothing is lost
        // by closing them now. The second sweep catches connections
        // that raced the listener close.
        self.shared.sweep_idle();
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.shared.sweep_idle();

        match deadline {
            None => self.shared.wait_drained().await,
            Some(limit) => {
                if tokio::time::timeout(limit, self.shared.wait_drained())
                    .await
                    .is_err()
                {
                    debug!("stop deadline elapsed; force-closing children");
                    for (_, child) in self.shared.children().drain() {
                        child.abort.abort();
                    }
                }
            }
        }
        self.shared.dispatch(ServerEvent::Stopped);
    }

    async fn close_listener(&self) {
        let control = self.control().take();
        if let Some(control) = control {
            let _ = control.shutdown.send(true);
            let _ = control.listener_task.await;
        }
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Option<Control>> {
        self.shared.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut signal: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = signal.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!("accepted connection from {}", peer);
                    shared.spawn_child(stream);
                }
                Err(e) => debug!("accept failed: {}", e),
            }
        }
    }
}

/// Deregisters a child when its task ends, however it ends.
struct DoneGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.shared.child_done(self.id);
    }
}

impl Shared {
    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Child>> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, event: ServerEvent) {
        let sink = Arc::clone(&*self.events.read().unwrap_or_else(|e| e.into_inner()));
        sink.dispatch(event);
    }

    fn spawn_child(self: &Arc<Self>, stream: tokio::net::TcpStream) {
        let id = self.next_child.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::open(
            stream,
            Arc::clone(&self.config),
            Arc::clone(&self.app),
            Arc::clone(&*self.events.read().unwrap_or_else(|e| e.into_inner())),
            Arc::clone(&self.running),
        );
        let started = connection.started_flag();
        let guard = DoneGuard {
            shared: Arc::clone(self),
            id,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            connection.serve().await;
        });

        let mut children = self.children();
        if self
            .reaped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
        {
            // the connection already finished; nothing to track
            return;
        }
        children.insert(
            id,
            Child {
                started,
                abort: handle.abort_handle(),
            },
        );
    }

    fn child_done(&self, id: u64) {
        let mut children = self.children();
        if children.remove(&id).is_none() {
            self.reaped
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id);
        }
        if children.is_empty() {
            self.drained.notify_waiters();
        }
    }

    fn sweep_idle(&self) {
        for child in self.children().values() {
            if !child.started.load(Ordering::Acquire) {
                child.abort.abort();
            }
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.children().is_empty() {
                return;
            }
            notified.await;
        }
    }
}
