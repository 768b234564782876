//! Server configuration.

use std::time::Duration;

/// Tunables consumed by the exchange engine.
///
/// Built in the consuming-builder style; every option has a default that
/// suits an internet-facing deployment.
///
/// ```
/// use candor::HttpServerOptions;
/// use std::time::Duration;
///
/// let opts = HttpServerOptions::default()
///     .max_request_head_size(16_000)
///     .timeout_idle_connection(Duration::from_secs(30));
/// # drop(opts);
/// ```
#[derive(Debug, Clone)]
pub struct HttpServerOptions {
    pub(crate) max_request_head_size: usize,
    pub(crate) max_request_trailers_size: usize,
    pub(crate) max_error_responses: u32,
    pub(crate) max_error_recovery_attempts: u32,
    pub(crate) timeout_idle_connection: Duration,
    pub(crate) discard_rejected_informational: bool,
    pub(crate) reject_clients_using_http_1_0: bool,
    pub(crate) immediately_continue_expect_100: bool,
    pub(crate) add_date_header: bool,
}

impl Default for HttpServerOptions {
    fn default() -> HttpServerOptions {
        HttpServerOptions {
            max_request_head_size: 8_000,
            max_request_trailers_size: 8_000,
            max_error_responses: 7,
            max_error_recovery_attempts: 5,
            timeout_idle_connection: Duration::from_secs(90),
            discard_rejected_informational: true,
            reject_clients_using_http_1_0: false,
            immediately_continue_expect_100: false,
            add_date_header: false,
        }
    }
}

impl HttpServerOptions {
    /// Maximum number of bytes processed while parsing a request head
    /// before the exchange fails with a too-large error.
    ///
    /// Default: 8 000.
    pub fn max_request_head_size(mut self, size: usize) -> Self {
        self.max_request_head_size = size;
        self
    }

    /// Maximum number of bytes processed while parsing request trailers.
    ///
    /// Default: 8 000.
    pub fn max_request_trailers_size(mut self, size: usize) -> Self {
        self.max_request_trailers_size = size;
        self
    }

    /// Maximum number of consecutive 4xx/5xx responses sent on one
    /// connection before the connection is closed.
    ///
    /// Default: 7.
    pub fn max_error_responses(mut self, max: u32) -> Self {
        self.max_error_responses = max;
        self
    }

    /// Maximum number of error handlers attempted for one failed
    /// exchange before the canned 500 fallback is used.
    ///
    /// Default: 5.
    pub fn max_error_recovery_attempts(mut self, max: u32) -> Self {
        self.max_error_recovery_attempts = max;
        self
    }

    /// Maximum duration of inactivity on a channel read or write before
    /// the corresponding stream is shut down.
    ///
    /// Default: 90 seconds.
    pub fn timeout_idle_connection(mut self, timeout: Duration) -> Self {
        self.timeout_idle_connection = timeout;
        self
    }

    /// When an interim 1xx response cannot be sent to the client (the
    /// client is HTTP/1.0, or a repeated 100 Continue), silently discard
    /// it instead of failing the write with a rejection error.
    ///
    /// Default: `true`.
    pub fn discard_rejected_informational(mut self, discard: bool) -> Self {
        self.discard_rejected_informational = discard;
        self
    }

    /// Fail exchanges from HTTP/1.0 clients with 426 Upgrade Required.
    ///
    /// Default: `false`.
    pub fn reject_clients_using_http_1_0(mut self, reject: bool) -> Self {
        self.reject_clients_using_http_1_0 = reject;
        self
    }

    /// Respond 100 Continue immediately when a request carries
    /// `Expect: 100-continue`, instead of waiting for the first body
    /// read.
    ///
    /// Default: `false`.
    pub fn immediately_continue_expect_100(mut self, immediately: bool) -> Self {
        self.immediately_continue_expect_100 = immediately;
        self
    }

    /// Add a cached `Date` header to final responses that do not carry
    /// one.
    ///
    /// Default: `false`. Responses otherwise contain exactly what the
    /// application (and mandatory framing) put there.
    pub fn add_date_header(mut self, add: bool) -> Self {
        self.add_date_header = add;
        self
    }
}
