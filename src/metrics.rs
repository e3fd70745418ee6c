// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Core loop metrics --------
pub static POLLS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("polls_total", "polling loop iterations").unwrap());

pub static POLL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("poll_errors_total", "degraded poll stages (label: stage)"),
        &["stage"],
    )
    .unwrap()
});

pub static API_RETRIES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("api_retries_total", "transient API retries (429/5xx)").unwrap());

// -------- Trading metrics --------
pub static ENTRIES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("entries_total", "long entries submitted").unwrap());

pub static EXITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exits_total", "position closes (label: reason = tp|sl|trail)"),
        &["reason"],
    )
    .unwrap()
});

pub static BRAKES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "brakes_total",
            "circuit breaker activations (label: kind = throttle|loss_pause|drawdown)",
        ),
        &["kind"],
    )
    .unwrap()
});

// -------- Risk state visibility --------
pub static SESSION_PNL_USD: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("session_pnl_usd", "accumulated realized PnL (USD)").unwrap());

pub static POSITION_PNL_PCT: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "position_pnl_pct",
        "PnL-on-margin of the open position (percent)",
    )
    .unwrap()
});

pub static PEAK_PNL_PCT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("trailing_peak_pnl_pct", "peak PnL while position open").unwrap());

pub static TRAILING_ARMED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("trailing_armed", "1 if trailing stop armed").unwrap());

pub static CONSEC_LOSSES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("consecutive_losses", "current loss streak").unwrap());

pub static TRADES_IN_WINDOW: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("trades_in_window", "trades in the trailing 3600s window").unwrap()
});

// ---- Config visibility (symbol / leverage) ----
pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbol (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub static CONFIG_LEVERAGE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_leverage", "configured leverage").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(POLLS.clone())),
        REGISTRY.register(Box::new(POLL_ERRORS.clone())),
        REGISTRY.register(Box::new(API_RETRIES.clone())),
        REGISTRY.register(Box::new(ENTRIES.clone())),
        REGISTRY.register(Box::new(EXITS.clone())),
        REGISTRY.register(Box::new(BRAKES.clone())),
        REGISTRY.register(Box::new(SESSION_PNL_USD.clone())),
        REGISTRY.register(Box::new(POSITION_PNL_PCT.clone())),
        REGISTRY.register(Box::new(PEAK_PNL_PCT.clone())),
        REGISTRY.register(Box::new(TRAILING_ARMED.clone())),
        REGISTRY.register(Box::new(CONSEC_LOSSES.clone())),
        REGISTRY.register(Box::new(TRADES_IN_WINDOW.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
        REGISTRY.register(Box::new(CONFIG_LEVERAGE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
