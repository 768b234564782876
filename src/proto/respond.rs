//! The response processor: persistence, framing and validation.

use crate::body::BodyLength;
use crate::error::{Error, User};
use crate::response::Response;
use crate::version::HttpVersion;

/// Connection facts the processor decides against.
#[derive(Debug)]
pub(crate) struct WriteContext {
    /// `None` for early errors where no request head exists.
    pub(crate) req_version: Option<HttpVersion>,
    pub(crate) req_method: Option<String>,
    /// The request carried `Connection: close`.
    pub(crate) req_wants_close: bool,
    pub(crate) input_open: bool,
    pub(crate) server_running: bool,
}

impl WriteContext {
    /// Context for responses produced before any request head parsed.
    pub(crate) fn early(input_open: bool, server_running: bool) -> WriteContext {
        WriteContext {
            req_version: None,
            req_method: None,
            req_wants_close: false,
            input_open,
            server_running,
        }
    }
}

/// How the response body goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseFraming {
    /// Exactly this many body bytes, declared via `Content-Length`.
    Sized(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// Unknown length to a pre-1.1 client: write until close.
    CloseDelimited,
}

/// A response ready for serialization.
#[derive(Debug)]
pub(crate) struct Finalized {
    pub(crate) response: Response,
    pub(crate) framing: ResponseFraming,
    /// The connection must close once this response is written.
    pub(crate) close: bool,
}

/// Apply the wire rules to an application response, in order:
/// persistence decision, chunking decision, framing validation.
pub(crate) fn finalize(mut rsp: Response, ctx: &WriteContext) -> Result<Finalized, Error> {
    // 1. persistence: interim responses and responses already marked
    //    close are left alone
    if !rsp.status().is_informational() && !rsp.headers().has_token("Connection", "close") {
        let must_close = !matches!(ctx.req_version, Some(v) if v.is_at_least_1_1())
            || ctx.req_wants_close
            || !ctx.input_open
            || !ctx.server_running;
        if must_close {
            rsp.headers_mut().set("Connection", "close");
        }
    }

    // Framing is the server's job, full stop.
    if rsp.headers().contains("Transfer-Encoding") {
        return Err(Error::new_user(User::TransferEncodingSet));
    }

    let status = rsp.status();
    let code = status.as_u16();
    let client_1_1 = matches!(ctx.req_version, Some(v) if v.is_at_least_1_1());
    let is_head = matches!(ctx.req_method.as_deref(), Some("HEAD"));
    let is_connect_2xx =
        matches!(ctx.req_method.as_deref(), Some("CONNECT")) && status.is_success();

    // 3. chunking decision
    let length = rsp.body_length();
    let framing = if !client_1_1 {
        if rsp.trailers.is_some() {
            // the client cannot parse them
            rsp.trailers = None;
            rsp.headers_mut().remove("Trailer");
        }
        match length {
            BodyLength::Known(n) => ResponseFraming::Sized(n),
            BodyLength::Unknown => ResponseFraming::CloseDelimited,
        }
    } else if length == BodyLength::Unknown || rsp.trailers.is_some() {
        if rsp.headers().contains("Content-Length") {
            return Err(Error::new_user(User::ConflictingFraming));
        }
        rsp.headers_mut().append("Transfer-Encoding", "chunked");
        ResponseFraming::Chunked
    } else {
        match length {
            BodyLength::Known(n) => ResponseFraming::Sized(n),
            BodyLength::Unknown => unreachable!("unknown length is chunked"),
        }
    };

    // 4. framing validation
    let forbids_body =
        status.is_informational() || code == 204 || code == 304 || is_connect_2xx;
    if (forbids_body || is_head) && framing != ResponseFraming::Sized(0) {
        return Err(Error::new_user(User::BodyForbidden));
    }

    match framing {
        ResponseFraming::Sized(n) => {
            if status.is_informational() || code == 204 || is_connect_2xx {
                // bodyless statuses omit Content-Length entirely
                rsp.headers_mut().remove("Content-Length");
            } else if code == 304 || is_head {
                // an app-declared length describes the entity, not this
                // payload; leave it be
                if is_head && !rsp.headers().contains("Content-Length") {
                    rsp.headers_mut().set("Content-Length", "0");
                }
            } else {
                match rsp.headers().content_length() {
                    Ok(Some(declared)) if declared != n => {
                        return Err(Error::new_user(User::BodyLengthMismatch));
                    }
                    Ok(_) => {
                        let mut buf = itoa::Buffer::new();
                        rsp.headers_mut().set("Content-Length", buf.format(n));
                    }
                    Err(_) => return Err(Error::new_user(User::BodyLengthMismatch)),
                }
            }
        }
        ResponseFraming::Chunked => {}
        ResponseFraming::CloseDelimited => {
            rsp.headers_mut().remove("Content-Length");
        }
    }

    let close = !status.is_informational()
        && (rsp.headers().has_token("Connection", "close")
            || framing == ResponseFraming::CloseDelimited);

    Ok(Finalized {
        response: rsp,
        framing,
        close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use crate::status::StatusCode;

    fn ctx_1_1() -> WriteContext {
        WriteContext {
            req_version: Some(HttpVersion::HTTP_11),
            req_method: Some("GET".to_owned()),
            req_wants_close: false,
            input_open: true,
            server_running: true,
        }
    }

    #[test]
    fn persistent_response_sets_content_length() {
        let f = finalize(Response::text("hi"), &ctx_1_1()).unwrap();
        assert!(!f.close);
        assert_eq!(f.framing, ResponseFraming::Sized(2));
        assert_eq!(f.response.headers().get("Content-Length"), Some("2"));
        assert!(!f.response.headers().contains("Connection"));
    }

    #[test]
    fn early_error_closes() {
        let f = finalize(Response::bad_request(), &WriteContext::early(true, true)).unwrap();
        assert!(f.close);
        assert_eq!(f.response.headers().get("Connection"), Some("close"));
        assert_eq!(f.response.headers().get("Content-Length"), Some("0"));
    }

    #[test]
    fn http_1_0_request_closes() {
        let mut ctx = ctx_1_1();
        ctx.req_version = Some(HttpVersion::HTTP_10);
        let f = finalize(Response::text("hi"), &ctx).unwrap();
        assert!(f.close);
    }

    #[test]
    fn request_connection_close_is_honored() {
        let mut ctx = ctx_1_1();
        ctx.req_wants_close = true;
        assert!(finalize(Response::text("hi"), &ctx).unwrap().close);
    }

    #[test]
    fn stopping_server_closes() {
        let mut ctx = ctx_1_1();
        ctx.server_running = false;
        assert!(finalize(Response::text("hi"), &ctx).unwrap().close);
    }

    #[test]
    fn unknown_length_is_chunked_for_1_1() {
        let body = crate::body::ResponseBody::streamed(futures_util::stream::empty::<
            std::io::Result<bytes::Bytes>,
        >());
        let rsp = Response::builder(StatusCode::OK).body(body);
        let f = finalize(rsp, &ctx_1_1()).unwrap();
        assert_eq!(f.framing, ResponseFraming::Chunked);
        assert_eq!(f.response.headers().get("Transfer-Encoding"), Some("chunked"));
        assert!(!f.response.headers().contains("Content-Length"));
    }

    #[test]
    fn unknown_length_is_close_delimited_for_1_0() {
        let body = crate::body::ResponseBody::streamed(futures_util::stream::empty::<
            std::io::Result<bytes::Bytes>,
        >());
        let rsp = Response::builder(StatusCode::OK).body(body);
        let mut ctx = ctx_1_1();
        ctx.req_version = Some(HttpVersion::HTTP_10);
        let f = finalize(rsp, &ctx).unwrap();
        assert_eq!(f.framing, ResponseFraming::CloseDelimited);
        assert!(f.close);
        assert!(!f.response.headers().contains("Transfer-Encoding"));
    }

    #[test]
    fn trailers_force_chunked_and_are_stripped_for_1_0() {
        let rsp = Response::builder(StatusCode::OK).trailer("X-T", "1").body("data");
        let f = finalize(rsp, &ctx_1_1()).unwrap();
        assert_eq!(f.framing, ResponseFraming::Chunked);

        let rsp = Response::builder(StatusCode::OK).trailer("X-T", "1").body("data");
        let mut ctx = ctx_1_1();
        ctx.req_version = Some(HttpVersion::HTTP_10);
        let f = finalize(rsp, &ctx).unwrap();
        assert_eq!(f.framing, ResponseFraming::Sized(4));
        assert!(f.response.trailers.is_none());
        assert!(!f.response.headers().contains("Trailer"));
    }

    #[test]
    fn app_set_transfer_encoding_is_rejected() {
        let rsp = Response::builder(StatusCode::OK)
            .header("Transfer-Encoding", "chunked")
            .body("x");
        assert!(finalize(rsp, &ctx_1_1()).unwrap_err().is_user());
    }

    #[test]
    fn declared_length_must_match() {
        let rsp = Response::builder(StatusCode::OK)
            .header("Content-Length", "999")
            .body("abc");
        assert!(finalize(rsp, &ctx_1_1()).unwrap_err().is_user());
    }

    #[test]
    fn head_must_be_empty_and_may_keep_length() {
        let mut ctx = ctx_1_1();
        ctx.req_method = Some("HEAD".to_owned());
        let rsp = Response::builder(StatusCode::OK)
            .header("Content-Length", "42")
            .empty();
        let f = finalize(rsp, &ctx).unwrap();
        assert_eq!(f.framing, ResponseFraming::Sized(0));
        assert_eq!(f.response.headers().get("Content-Length"), Some("42"));

        let rsp = Response::text("not empty");
        assert!(finalize(rsp, &ctx).unwrap_err().is_user());
    }

    #[test]
    fn no_content_omits_content_length() {
        let f = finalize(Response::no_content(), &ctx_1_1()).unwrap();
        assert_eq!(f.framing, ResponseFraming::Sized(0));
        assert!(!f.response.headers().contains("Content-Length"));
    }

    #[test]
    fn not_modified_requires_empty_body() {
        let rsp = Response::builder(StatusCode::NOT_MODIFIED).empty();
        assert!(finalize(rsp, &ctx_1_1()).is_ok());
        let rsp = Response::builder(StatusCode::NOT_MODIFIED).body("oops");
        assert!(finalize(rsp, &ctx_1_1()).is_err());
    }
}
