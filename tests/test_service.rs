//! End-to-end tests: a configured server, exercised through the
//! outbound registry, all on one reactor thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use switchboard::call::{Callable, Outcome, PendingReply, Task};
use switchboard::config;
use switchboard::http::connection::Connection;
use switchboard::http::request::Method;
use switchboard::http::response::StatusCode;
use switchboard::outbound::{ConnectionDef, Registry, Resource};
use switchboard::reactor::Reactor;
use switchboard::router::{HandlerResult, Router};
use switchboard::server::{self, HandlerRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MICRO: &str = r"
SERVER test 0
  ROUTE /test/ping$
    GET ping
  ROUTE /test/boom$
    GET boom
  ROUTE /test/delayed$
    GET delayed
  ROUTE /test/black_hole$
    GET black_hole
";

fn handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.add("ping", |_request, _groups, _kwargs| {
        Ok(HandlerResult::Reply(json!({"ping": "pong"})))
    });
    handlers.add("boom", |_request, _groups, _kwargs| {
        anyhow::bail!("handler exploded")
    });
    handlers.add("delayed", |request, _groups, _kwargs| {
        let step = Callable::with_callback(|callback, _| {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                callback(Outcome::Success(json!({"took": "a while"})));
            });
        });
        request.call(step).send();
        Ok(HandlerResult::Delayed)
    });
    handlers.add("black_hole", |request, _groups, _kwargs| {
        // keep the reply slot alive without ever resolving it
        std::mem::forget(request.clone());
        Ok(HandlerResult::Delayed)
    });
    handlers
}

fn start_service(reactor: &Reactor) -> SocketAddr {
    let cfg = config::parse(MICRO).unwrap();
    let addrs = server::start(reactor, &cfg, &handlers()).unwrap();
    addrs[0]
}

fn registry_for(addr: SocketAddr) -> Registry {
    let base = url::Url::parse(&format!("http://127.0.0.1:{}", addr.port())).unwrap();
    let mut def = ConnectionDef::new("local", base);
    def.set_timeout(Duration::from_secs(2));
    def.add_resource(Resource::new("ping", "/test/ping", Method::GET));
    def.add_resource(Resource::new("missing", "/test/nope", Method::GET));
    def.add_resource(Resource::new("ping_post", "/test/ping", Method::POST));
    def.add_resource(Resource::new("boom", "/test/boom", Method::GET));
    def.add_resource(Resource::new("delayed", "/test/delayed", Method::GET));
    let mut black_hole = Resource::new("black_hole", "/test/black_hole", Method::GET);
    black_hole.timeout = Some(Duration::from_millis(200));
    def.add_resource(black_hole);

    let mut registry = Registry::new();
    registry.add(def);
    registry
}

fn invoke(reactor: &Reactor, registry: &Registry, resource: &str) -> Outcome {
    let call = registry.resource("local", resource).unwrap();
    // the invocation spawns its connection driver, so it happens on the
    // reactor, not before entering it
    reactor.wait(async move { call.pending(vec![], HashMap::new()).await })
}

#[test]
fn test_ping_round_trip() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let outcome = invoke(&reactor, &registry, "ping");

    assert_eq!(outcome, Outcome::Success(json!({"ping": "pong"})));
}

#[test]
fn test_unmatched_path_surfaces_as_error() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let outcome = invoke(&reactor, &registry, "missing");

    assert_eq!(
        outcome,
        Outcome::Error(StatusCode::NotFound.reason_phrase().to_string())
    );
}

#[test]
fn test_wrong_method_surfaces_as_error() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let outcome = invoke(&reactor, &registry, "ping_post");

    assert_eq!(
        outcome,
        Outcome::Error(StatusCode::MethodNotAllowed.reason_phrase().to_string())
    );
}

#[test]
fn test_handler_failure_is_opaque_500() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let outcome = invoke(&reactor, &registry, "boom");

    // the peer sees the status, never the handler's error text
    assert_eq!(
        outcome,
        Outcome::Error(StatusCode::InternalServerError.reason_phrase().to_string())
    );
}

#[test]
fn test_delayed_handler_replies_when_chain_resolves() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let outcome = invoke(&reactor, &registry, "delayed");

    assert_eq!(outcome, Outcome::Success(json!({"took": "a while"})));
}

#[test]
fn test_unresponsive_peer_times_out() {
    let reactor = Reactor::new().unwrap();
    let addr = start_service(&reactor);
    let registry = registry_for(addr);

    let started = Instant::now();
    let outcome = invoke(&reactor, &registry, "black_hole");

    assert_eq!(outcome, Outcome::Error("timeout".to_string()));
    assert!(started.elapsed() < Duration::from_secs(1));
}

fn ping_router() -> Rc<Router> {
    let mut router = Router::new();
    router.add_route("/test/ping$").unwrap().set(
        Method::GET,
        Rc::new(|_, _, _| Ok(HandlerResult::Reply(json!({"ping": "pong"})))),
    );
    Rc::new(router)
}

async fn serve_one(idle_timeout: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = ping_router();
    tokio::task::spawn_local(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = Connection::new(stream, router, idle_timeout).run().await;
    });
    addr
}

#[test]
fn test_idle_connection_closes_gracefully() {
    let reactor = Reactor::new().unwrap();

    let n = reactor.wait(async {
        let addr = serve_one(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // send nothing; the server closes once the idle window elapses
        let mut buf = [0u8; 16];
        tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("idle connection was not closed")
            .unwrap()
    });

    assert_eq!(n, 0);
}

#[test]
fn test_partial_request_is_not_idled_out() {
    let reactor = Reactor::new().unwrap();

    let response = reactor.wait(async {
        let addr = serve_one(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // stall mid-message well past the idle window; the timeout only
        // applies between messages
        client.write_all(b"GET /test/ping HTT").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.write_all(b"P/1.1\r\n\r\n").await.unwrap();

        let mut data = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), async {
            let mut buf = [0u8; 1024];
            loop {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0, "server closed before replying");
                data.extend_from_slice(&buf[..n]);
                if data.windows(4).any(|w| w == b"pong") {
                    break;
                }
            }
        })
        .await
        .expect("no response to the completed request");
        String::from_utf8_lossy(&data).into_owned()
    });

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("pong"));
}

#[test]
fn test_unresolved_handler_fails_start() {
    let reactor = Reactor::new().unwrap();
    let cfg = config::parse("SERVER s 0\n  ROUTE /x$\n    GET nobody\n").unwrap();

    let err = server::start(&reactor, &cfg, &HandlerRegistry::new()).unwrap_err();

    assert!(err.to_string().contains("nobody"));
}

#[test]
fn test_task_timeout_fires_and_late_resolution_is_dropped() {
    let reactor = Reactor::new().unwrap();

    let started = Instant::now();
    let outcome = reactor.wait(async {
        let (pending, callback) = PendingReply::new();
        let task = Task::new(callback);

        // the step answers long after the deadline
        let slow = Callable::with_task(|task, _| {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                task.respond(json!("too late"));
            });
        });
        task.call(slow).timeout(Duration::from_millis(100)).send();
        pending.await
    });

    assert_eq!(outcome, Outcome::Error("timeout".to_string()));
    assert!(started.elapsed() < Duration::from_secs(1));
}
