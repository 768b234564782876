#![deny(rust_2018_idioms)]

//! End-to-end wire tests: a real listener, raw bytes on a TCP socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use candor::{
    Chain, HttpServer, HttpServerOptions, Request, Response, ResponseBody, Route, StatusCode,
};

async fn serve(server: HttpServer) -> (HttpServer, SocketAddr) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let addr = server.start("127.0.0.1:0").await.expect("server start");
    (server, addr)
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

async fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read_exact");
    buf
}

async fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            // a hard reset still means "closed" here
            Ok(Err(_)) => break,
            Err(_) => panic!("read timed out"),
        }
    }
    buf
}

fn hello_server() -> HttpServer {
    let server = HttpServer::create();
    server
        .add(Route::new("/hello").unwrap().get(|_req: Request| async {
            Ok(Response::text("hi"))
        }))
        .unwrap();
    server
}

#[tokio::test]
async fn hello_plain_text_exact_bytes() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let expected: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        Content-Length: 2\r\n\
        \r\n\
        hi";
    assert_eq!(read_exactly(&mut stream, expected.len()).await, expected);
}

#[tokio::test]
async fn path_parameter_echo() {
    let server = HttpServer::create();
    server
        .add(
            Route::new("/greet/:name")
                .unwrap()
                .get(|req: Request| async move {
                    let name = req.path_param("name").unwrap_or_default();
                    Ok(Response::text(format!("Hello {}!", name)))
                }),
        )
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /greet/John HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let expected: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        Content-Length: 11\r\n\
        \r\n\
        Hello John!";
    assert_eq!(read_exactly(&mut stream, expected.len()).await, expected);
}

#[tokio::test]
async fn percent_encoded_path_parameter_is_decoded() {
    let server = HttpServer::create();
    server
        .add(
            Route::new("/greet/:name")
                .unwrap()
                .get(|req: Request| async move {
                    let decoded = req.path_param("name").unwrap();
                    let raw = req.path_param_raw("name").unwrap();
                    Ok(Response::text(format!("{}|{}", decoded, raw)))
                }),
        )
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /greet/Jo%68n HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_to_close(&mut stream).await;
    let text = String::from_utf8(response).unwrap();
    assert!(text.ends_with("John|Jo%68n"), "got: {}", text);
}

#[tokio::test]
async fn chunked_round_trip() {
    let server = HttpServer::create();
    server
        .add(Route::new("/echo").unwrap().post(|req: Request| async move {
            let body = req.body().bytes().await?;
            // unknown length forces chunked framing on the way out
            let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(body) });
            Ok(Response::builder(StatusCode::OK).body(ResponseBody::streamed(stream)))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(
            b"POST /echo HTTP/1.1\r\n\
              Transfer-Encoding: chunked\r\n\
              Connection: close\r\n\
              \r\n\
              5\r\nabcde\r\n3\r\nfgh\r\n0\r\n\r\n",
        )
        .await
        .unwrap();

    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    let (head, body) = response.split_once("\r\n\r\n").expect("head/body split");
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Transfer-Encoding: chunked"));
    assert_eq!(body, "8\r\nabcdefgh\r\n0\r\n\r\n");
}

#[tokio::test]
async fn chunked_request_wins_over_content_length() {
    let server = HttpServer::create();
    server
        .add(Route::new("/echo").unwrap().post(|req: Request| async move {
            let text = req.body().text().await?;
            Ok(Response::text(text))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(
            b"POST /echo HTTP/1.1\r\n\
              Content-Length: 9999\r\n\
              Transfer-Encoding: chunked\r\n\
              Connection: close\r\n\
              \r\n\
              2\r\nok\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.ends_with("\r\nok"), "got: {}", response);
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let one: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        Content-Length: 2\r\n\
        \r\n\
        hi";
    let both = read_exactly(&mut stream, one.len() * 2).await;
    assert_eq!(&both[..one.len()], one);
    assert_eq!(&both[one.len()..], one);
}

#[tokio::test]
async fn pipelining_resumes_exactly_after_request_body() {
    let server = HttpServer::create();
    server
        .add(Route::new("/len").unwrap().post(|req: Request| async move {
            let text = req.body().text().await?;
            Ok(Response::text(text))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    // the second request starts exactly where the first body ends
    stream
        .write_all(
            b"POST /len HTTP/1.1\r\nContent-Length: 5\r\n\r\nfirstPOST /len HTTP/1.1\r\nContent-Length: 6\r\n\r\nsecond",
        )
        .await
        .unwrap();

    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\n";
    let one = format!("{}Content-Length: 5\r\n\r\nfirst", head);
    let two = format!("{}Content-Length: 6\r\n\r\nsecond", head);
    let all = read_exactly(&mut stream, one.len() + two.len()).await;
    assert_eq!(String::from_utf8(all).unwrap(), format!("{}{}", one, two));
}

#[tokio::test]
async fn early_error_answers_400_and_closes() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream.write_all(b"XXX /incomplete").await.unwrap();
    stream.shutdown().await.unwrap();

    let expected: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\
        Connection: close\r\n\
        Content-Length: 0\r\n\
        \r\n";
    assert_eq!(read_to_close(&mut stream).await, expected);
}

#[tokio::test]
async fn idle_timeout_closes_without_a_response() {
    let server = HttpServer::with_options(
        HttpServerOptions::default().timeout_idle_connection(Duration::from_millis(200)),
    );
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    // send nothing at all
    let leftovers = read_to_close(&mut stream).await;
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn http_1_0_is_never_persistent() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("hi"));
}

#[tokio::test]
async fn http_1_0_rejected_when_configured() {
    let server = HttpServer::with_options(
        HttpServerOptions::default().reject_clients_using_http_1_0(true),
    );
    let (_server, addr) = serve(server).await;
    let mut stream = connect(addr).await;
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
}

#[tokio::test]
async fn expect_100_continue_immediately_when_configured() {
    let server = HttpServer::with_options(
        HttpServerOptions::default().immediately_continue_expect_100(true),
    );
    server
        .add(Route::new("/up").unwrap().post(|req: Request| async move {
            let text = req.body().text().await?;
            Ok(Response::text(text))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(
            b"POST /up HTTP/1.1\r\n\
              Expect: 100-continue\r\n\
              Content-Length: 4\r\n\
              Connection: close\r\n\
              \r\n\
              data",
        )
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("data"));
}

#[tokio::test]
async fn expect_100_continue_sent_on_first_body_read() {
    let server = HttpServer::create();
    server
        .add(Route::new("/up").unwrap().post(|req: Request| async move {
            let text = req.body().text().await?;
            Ok(Response::text(text))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(
            b"POST /up HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 4\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    // the interim response arrives once the handler pulls the body
    let interim: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
    assert_eq!(read_exactly(&mut stream, interim.len()).await, interim);
    stream.write_all(b"data").await.unwrap();
    let rest = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(rest.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(rest.ends_with("data"));
}

#[tokio::test]
async fn not_found_for_unrouted_target() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[tokio::test]
async fn method_not_allowed() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"DELETE /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
}

#[tokio::test]
async fn head_size_limit_one_byte_over_fails() {
    // "GET / HTTP/1.1\r\n\r\n" is 18 bytes
    let request: &[u8] = b"GET / HTTP/1.1\r\n\r\n";

    let at_limit = HttpServer::with_options(
        HttpServerOptions::default().max_request_head_size(request.len()),
    );
    at_limit
        .add(Route::new("/").unwrap().get(|_req: Request| async {
            Ok(Response::text("ok"))
        }))
        .unwrap();
    let (_server, addr) = serve(at_limit).await;
    let mut stream = connect(addr).await;
    stream.write_all(request).await.unwrap();
    let response = read_exactly(&mut stream, 15).await;
    assert_eq!(&response[..], b"HTTP/1.1 200 OK");

    let under = HttpServer::with_options(
        HttpServerOptions::default().max_request_head_size(request.len() - 1),
    );
    let (_server, addr) = serve(under).await;
    let mut stream = connect(addr).await;
    stream.write_all(request).await.unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(
        response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"),
        "got: {}",
        response
    );
}

#[tokio::test]
async fn before_action_can_short_circuit() {
    let server = hello_server();
    server
        .before("/hello", |req: Request, chain: Chain| async move {
            if req.headers().contains("Authorization") {
                chain.proceed(req).await
            } else {
                Ok(Response::status_only(StatusCode::from_u16(401).unwrap()))
            }
        })
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nAuthorization: yes\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn after_action_decorates_every_response() {
    let server = hello_server();
    server
        .after("/*all", |_req: Request, mut rsp: Response| async move {
            rsp.headers_mut().set("X-Served-By", "candor");
            Ok(rsp)
        })
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.contains("X-Served-By: candor\r\n"));
}

#[tokio::test]
async fn error_handler_chain_produces_fallback() {
    let server = HttpServer::create();
    server
        .add(Route::new("/boom").unwrap().get(|_req: Request| async move {
            Err::<Response, _>(candor::Error::application("boom"))
        }))
        .unwrap();
    server.add_error_handler(
        |_err: Arc<candor::Error>, _req: Option<Request>| async move {
            Ok(Response::builder(StatusCode::SERVICE_UNAVAILABLE)
                .header("Retry-After", "1")
                .empty())
        },
    );
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /boom HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(response.contains("Retry-After: 1\r\n"));
}

#[tokio::test]
async fn response_trailers_follow_the_last_chunk() {
    let server = HttpServer::create();
    server
        .add(Route::new("/t").unwrap().get(|_req: Request| async {
            Ok(Response::builder(StatusCode::OK)
                .trailer("X-Checksum", "abc123")
                .body("payload"))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /t HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.contains("Trailer: X-Checksum"));
    assert!(head.contains("Transfer-Encoding: chunked"));
    assert_eq!(body, "7\r\npayload\r\n0\r\nX-Checksum: abc123\r\n\r\n");
}

#[tokio::test]
async fn request_trailers_are_readable() {
    let server = HttpServer::create();
    server
        .add(Route::new("/t").unwrap().post(|req: Request| async move {
            let body = req.body().text().await?;
            let trailers = req.trailers().await?.expect("trailers");
            Ok(Response::text(format!(
                "{}:{}",
                body,
                trailers.get("X-Sum").unwrap_or("?")
            )))
        }))
        .unwrap();
    let (_server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(
            b"POST /t HTTP/1.1\r\n\
              Transfer-Encoding: chunked\r\n\
              Connection: close\r\n\
              \r\n\
              2\r\nhi\r\n0\r\nX-Sum: 42\r\n\r\n",
        )
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.ends_with("hi:42"), "got: {}", response);
}

#[tokio::test]
async fn graceful_stop_waits_for_the_active_exchange() {
    let server = HttpServer::create();
    server
        .add(Route::new("/slow").unwrap().get(|_req: Request| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Response::text("done"))
        }))
        .unwrap();
    let (server, addr) = serve(server).await;

    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /slow HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    // give the request a moment to reach the handler, then stop
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopper = {
        let server = server.clone();
        tokio::spawn(async move { server.stop().await })
    };

    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    // a stopping server injects Connection: close
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("done"));
    stopper.await.unwrap();

    // new connections are refused once the listener is closed
    assert!(!server.is_running());
    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err() || {
        let mut s = refused.unwrap();
        s.write_all(b"GET /slow HTTP/1.1\r\n\r\n").await.ok();
        read_to_close(&mut s).await.is_empty()
    });
}

#[tokio::test]
async fn kill_closes_immediately() {
    let server = HttpServer::create();
    let (server, addr) = serve(server).await;
    let mut stream = connect(addr).await;
    server.kill().await;
    let leftovers = read_to_close(&mut stream).await;
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn lone_cr_in_head_is_rejected() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nBad\rHeader: x\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn lf_only_request_head_is_accepted() {
    let (_server, addr) = serve(hello_server()).await;
    let mut stream = connect(addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\nConnection: close\n\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_close(&mut stream).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("hi"));
}
