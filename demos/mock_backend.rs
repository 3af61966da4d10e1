//! A backend instance for trying the gateway by hand.
//!
//! ```text
//! cargo run --example mock_backend -- --port 3001 --name user-1 --fail-rate 0.3
//! ```

use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Clone)]
struct Args {
    #[arg(long, default_value_t = 3001)]
    port: u16,

    #[arg(long, default_value = "instance")]
    name: String,

    /// Fraction of requests answered with 500.
    #[arg(long, default_value_t = 0.0)]
    fail_rate: f64,

    /// Added latency per request.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

async fn handle(State(args): State<Arc<Args>>) -> (StatusCode, String) {
    if args.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }
    if fastrand::f64() < args.fail_rate {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{} failed\n", args.name));
    }
    (StatusCode::OK, format!("Hello from {}\n", args.name))
}

#[tokio::main]
async fn main() {
    let args = Arc::new(Args::parse());
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(handle)
        .with_state(args.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    println!("{} listening on http://{}", args.name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
