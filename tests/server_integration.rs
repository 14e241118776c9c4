//! End-to-end tests against a live server on loopback

use bytes::Bytes;
use h1serve::config::ServerConfig;
use h1serve::http::{
    Error, HandlerResult, HttpRequest, HttpResponse, HttpServer, ServerState, Status,
    StreamingResponse,
};
use h1serve::log::Logger;
use h1serve::net::Connection;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Logger that keeps every message for inspection
#[derive(Default)]
struct RecordingLogger {
    errors: Mutex<Vec<String>>,
    debugs: Mutex<Vec<String>>,
    fatals: Mutex<Vec<String>>,
}

impl RecordingLogger {
    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn debugs(&self) -> Vec<String> {
        self.debugs.lock().unwrap().clone()
    }

    fn fatals(&self) -> Vec<String> {
        self.fatals.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn debug(&self, message: &str) {
        self.debugs.lock().unwrap().push(message.to_string());
    }

    fn fatal(&self, message: &str) {
        self.fatals.lock().unwrap().push(message.to_string());
    }
}

struct Running {
    server: Arc<HttpServer>,
    handle: thread::JoinHandle<h1serve::http::Result<()>>,
    addr: SocketAddr,
}

impl Running {
    fn stop(self) {
        self.server.finish();
        self.handle.join().unwrap().unwrap();
        assert_eq!(self.server.state(), ServerState::Finished);
    }
}

fn config() -> ServerConfig {
    ServerConfig::builder()
        .host("127.0.0.1")
        .port(0)
        .workers(4)
        .max_body_size(1024)
        .build()
        .unwrap()
}

fn start<H>(config: ServerConfig, handler: H, logger: Arc<RecordingLogger>) -> Running
where
    H: Fn(HttpRequest, &Connection) -> HandlerResult + Send + Sync + 'static,
{
    let server = Arc::new(HttpServer::with_logger(config, handler, logger));
    let runner = Arc::clone(&server);
    let handle = thread::spawn(move || runner.listen_and_serve());

    for _ in 0..400 {
        if let Some(addr) = server.local_addr() {
            return Running {
                server,
                handle,
                addr,
            };
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("server did not start listening");
}

fn echo_body(request: HttpRequest, _conn: &Connection) -> HandlerResult {
    let body = format!(
        "{} {} host={} body={}",
        request.method(),
        request.path(),
        request.headers().get("Host").unwrap_or("-"),
        String::from_utf8_lossy(request.body())
    );
    Ok(HttpResponse::builder().body(body).build().into())
}

fn read_reply(stream: &mut TcpStream) -> String {
    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    reply
}

#[test]
fn test_split_get_request() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(config(), echo_body, logger);

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.set_nodelay(true).unwrap();
    stream.write_all(b"GET /a HTTP/1.1\r\nHo").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"st: x\r\n\r\n").unwrap();

    let reply = read_reply(&mut stream);
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("GET /a host=x body="));

    running.stop();
}

#[test]
fn test_body_in_single_byte_writes() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(config(), echo_body, logger);

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
        .write_all(b"POST /up HTTP/1.1\r\nContent-Length: 5\r\n\r\n")
        .unwrap();
    for byte in b"hello" {
        thread::sleep(Duration::from_millis(10));
        stream.write_all(&[*byte]).unwrap();
    }

    let reply = read_reply(&mut stream);
    assert!(reply.contains("Content-Length: 26\r\n"));
    assert!(reply.ends_with("POST /up host=- body=hello"));

    running.stop();
}

#[test]
fn test_oversized_body_never_reaches_handler() {
    let logger = Arc::new(RecordingLogger::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let running = start(
        config(),
        move |request: HttpRequest, conn: &Connection| -> HandlerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            echo_body(request, conn)
        },
        Arc::clone(&logger),
    );

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10000000\r\n\r\n")
        .unwrap();

    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(reply.is_empty());

    running.stop();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(logger
        .errors()
        .iter()
        .any(|m| m.to_lowercase().contains("entity too large")));
}

#[test]
fn test_oversized_header_block() {
    let logger = Arc::new(RecordingLogger::default());
    let config = ServerConfig::builder()
        .host("127.0.0.1")
        .port(0)
        .workers(1)
        .max_header_size(512)
        .build()
        .unwrap();
    let running = start(config, echo_body, Arc::clone(&logger));

    let mut stream = TcpStream::connect(running.addr).unwrap();
    let mut request = b"GET / HTTP/1.1\r\n".to_vec();
    request.extend_from_slice(format!("X-Big: {}\r\n\r\n", "a".repeat(2048)).as_bytes());
    let _ = stream.write_all(&request);

    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(reply.is_empty());

    running.stop();
    assert!(logger
        .errors()
        .iter()
        .any(|m| m.contains("header block exceeds 512 bytes")));
}

#[test]
fn test_handler_error_closes_without_response() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(
        config(),
        |_request: HttpRequest, _conn: &Connection| -> HandlerResult { Err("no route".into()) },
        Arc::clone(&logger),
    );

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.write_all(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "");

    running.stop();
    assert!(logger.errors().iter().any(|m| m.contains("no route")));
}

#[test]
fn test_handler_panic_is_isolated() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(
        config(),
        |request: HttpRequest, conn: &Connection| -> HandlerResult {
            if request.path() == "/boom" {
                panic!("handler exploded");
            }
            echo_body(request, conn)
        },
        Arc::clone(&logger),
    );

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.write_all(b"GET /boom HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut stream), "");

    // The worker survives and keeps serving.
    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.write_all(b"GET /fine HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_reply(&mut stream).ends_with("GET /fine host=- body="));

    running.stop();
    assert!(logger
        .errors()
        .iter()
        .any(|m| m.contains("handler exploded")));
}

#[test]
fn test_streaming_response() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(
        config(),
        |_request: HttpRequest, _conn: &Connection| -> HandlerResult {
            let chunks = vec![Bytes::from_static(b"one,"), Bytes::from_static(b"two")];
            Ok(StreamingResponse::from_chunks(Status::OK, chunks).into())
        },
        logger,
    );

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.write_all(b"GET /s HTTP/1.1\r\n\r\n").unwrap();
    let reply = read_reply(&mut stream);

    assert!(reply.contains("Transfer-Encoding: chunked\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("\r\n\r\n4\r\none,\r\n3\r\ntwo\r\n0\r\n\r\n"));

    running.stop();
}

#[test]
fn test_verbose_logs_timing() {
    let logger = Arc::new(RecordingLogger::default());
    let config = ServerConfig::builder()
        .host("127.0.0.1")
        .port(0)
        .workers(1)
        .verbose(true)
        .build()
        .unwrap();
    let running = start(config, echo_body, Arc::clone(&logger));

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.write_all(b"PUT /t?x=1 HTTP/1.1\r\n\r\n").unwrap();
    read_reply(&mut stream);

    running.stop();
    assert!(logger
        .debugs()
        .iter()
        .any(|m| m.starts_with("PUT /t -> 200 (")));
}

#[test]
fn test_concurrent_clients() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(config(), echo_body, logger);
    let addr = running.addr;

    let clients: Vec<_> = (0..16)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                let request = format!("GET /client/{} HTTP/1.1\r\n\r\n", i);
                stream.write_all(request.as_bytes()).unwrap();
                let reply = read_reply(&mut stream);
                assert!(reply.ends_with(&format!("GET /client/{} host=- body=", i)));
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }
    running.stop();
}

#[test]
fn test_finish_is_idempotent() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(config(), echo_body, logger);

    running.server.finish();
    running.server.finish();
    running.stop();
}

#[test]
fn test_listen_after_finish() {
    let logger = Arc::new(RecordingLogger::default());
    let running = start(config(), echo_body, logger);
    let server = Arc::clone(&running.server);
    running.stop();

    assert!(matches!(server.listen_and_serve(), Err(Error::ServerFinished)));
}

#[test]
fn test_address_in_use() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let logger = Arc::new(RecordingLogger::default());
    let config = ServerConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .workers(1)
        .build()
        .unwrap();
    let server = HttpServer::with_logger(config, echo_body, Arc::clone(&logger) as Arc<dyn Logger>);

    let result = server.listen_and_serve();
    assert!(matches!(result, Err(Error::Network(_))));
    assert_eq!(server.state(), ServerState::Finished);
    assert_eq!(logger.fatals().len(), 1);
    assert!(logger.fatals()[0].contains("bind"));
}
