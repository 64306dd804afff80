use serde_json::json;

use switchboard::config;
use switchboard::http::response::StatusCode;
use switchboard::reactor::Reactor;
use switchboard::router::HandlerResult;
use switchboard::server::{self, HandlerRegistry};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let path = std::env::var("MICRO_FILE").unwrap_or_else(|_| "micro".to_string());
    let config = config::load(&path)?;

    let mut handlers = HandlerRegistry::new();
    handlers.add("ping", |_request, _groups, _kwargs| {
        Ok(HandlerResult::Reply(json!({"ping": "pong"})))
    });
    handlers.add("echo", |request, groups, _kwargs| {
        let body = request.json().unwrap_or(serde_json::Value::Null);
        request.respond(StatusCode::Ok, Some(&json!({"groups": groups, "body": body})));
        Ok(HandlerResult::Delayed)
    });

    let reactor = Reactor::new()?;
    server::start(&reactor, &config, &handlers)?;

    let stop = reactor.stop_handle();
    reactor.register(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            stop.stop();
        }
    });

    reactor.run_forever();
    Ok(())
}
