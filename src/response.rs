//! Responses and canned response constructors.

use std::fmt;

use bytes::Bytes;

use crate::body::{BodyLength, ResponseBody};
use crate::headers::Headers;
use crate::status::StatusCode;

/// An application-produced HTTP response.
///
/// The engine owns framing: `Content-Length`, `Transfer-Encoding` and
/// `Connection` are derived from the body and connection state by the
/// response processor; setting `Transfer-Encoding` here is an error.
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<String>,
    pub(crate) headers: Headers,
    pub(crate) body: ResponseBody,
    pub(crate) trailers: Option<Headers>,
}

impl Response {
    /// Start building a response with this status.
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder {
            status,
            reason: None,
            headers: Headers::new(),
            trailers: None,
        }
    }

    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers; used by after-actions.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The declared body length.
    pub fn body_length(&self) -> BodyLength {
        self.body.length()
    }

    /// Whether this response is interim (1xx).
    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    // ===== canned responses =====

    /// 200 OK with a `text/plain; charset=utf-8` body.
    pub fn text(body: impl Into<String>) -> Response {
        Response::builder(StatusCode::OK)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(ResponseBody::full(Bytes::from(body.into())))
    }

    /// 200 OK with an `text/html; charset=utf-8` body.
    pub fn html(body: impl Into<String>) -> Response {
        Response::builder(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(ResponseBody::full(Bytes::from(body.into())))
    }

    /// 200 OK with an `application/octet-stream` body.
    pub fn bytes(body: impl Into<Bytes>) -> Response {
        Response::builder(StatusCode::OK)
            .header("Content-Type", "application/octet-stream")
            .body(ResponseBody::full(body.into()))
    }

    /// 204 No Content.
    pub fn no_content() -> Response {
        Response::builder(StatusCode::NO_CONTENT).empty()
    }

    /// A bodyless response with `Content-Length: 0`.
    pub fn status_only(status: StatusCode) -> Response {
        Response::builder(status).empty()
    }

    /// 100 Continue.
    pub fn continue_100() -> Response {
        Response::builder(StatusCode::CONTINUE).empty()
    }

    /// 400 Bad Request, empty body.
    pub fn bad_request() -> Response {
        Response::status_only(StatusCode::BAD_REQUEST)
    }

    /// 404 Not Found, empty body.
    pub fn not_found() -> Response {
        Response::status_only(StatusCode::NOT_FOUND)
    }

    /// 408 Request Timeout, empty body.
    pub fn request_timeout() -> Response {
        Response::status_only(StatusCode::REQUEST_TIMEOUT)
    }

    /// 413 Payload Too Large, empty body.
    pub fn payload_too_large() -> Response {
        Response::status_only(StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// 426 Upgrade Required, advertising HTTP/1.1.
    pub fn upgrade_required() -> Response {
        Response::builder(StatusCode::UPGRADE_REQUIRED)
            .header("Upgrade", "HTTP/1.1")
            .header("Connection", "upgrade")
            .empty()
    }

    /// 500 Internal Server Error, empty body.
    pub fn internal_server_error() -> Response {
        Response::status_only(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 501 Not Implemented, empty body.
    pub fn not_implemented() -> Response {
        Response::status_only(StatusCode::NOT_IMPLEMENTED)
    }

    /// 503 Service Unavailable, empty body.
    pub fn service_unavailable() -> Response {
        Response::status_only(StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Builder for [`Response`].
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    trailers: Option<Headers>,
}

impl ResponseBuilder {
    /// Override the reason phrase.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Append a header field.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append a trailer field, declaring it in the `Trailer` header.
    ///
    /// Trailers only reach clients at HTTP/1.1 or above, and force
    /// chunked framing.
    pub fn trailer(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let declared = match self.headers.get("Trailer") {
            Some(existing) => format!("{}, {}", existing, name),
            None => name.clone(),
        };
        self.headers.set("Trailer", declared);
        self.trailers
            .get_or_insert_with(Headers::new)
            .append(name, value);
        self
    }

    /// Finish with the given body.
    pub fn body(self, body: impl Into<ResponseBody>) -> Response {
        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: body.into(),
            trailers: self.trailers,
        }
    }

    /// Finish with an empty body.
    pub fn empty(self) -> Response {
        self.body(ResponseBody::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_declares_type_and_length() {
        let rsp = Response::text("hi");
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(
            rsp.headers().get("content-type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(rsp.body_length(), BodyLength::Known(2));
    }

    #[test]
    fn trailer_builder_declares_names() {
        let rsp = Response::builder(StatusCode::OK)
            .trailer("X-Sum", "1")
            .trailer("X-Count", "2")
            .body("data");
        assert_eq!(rsp.headers().get("Trailer"), Some("X-Sum, X-Count"));
        let trailers = rsp.trailers.as_ref().unwrap();
        assert_eq!(trailers.get("X-Sum"), Some("1"));
        assert_eq!(trailers.get("X-Count"), Some("2"));
    }
}
