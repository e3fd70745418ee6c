// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : aster_scalper_rust — smart long scalper for Aster perps in Rust
Module  : config.rs
Version : 0.3.0
License : MIT (see LICENSE)

Summary : Polls the Aster futures REST API, derives EMA/ATR/slope context
          from 1m candles, runs a dip->bounce long entry with TP/SL/trailing
          exits, enforces trade-frequency / loss-streak / drawdown brakes,
          exposes Prometheus metrics, and records JSONL trade events.
=============================================================================
*/
use std::env;
use std::str::FromStr;

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential env {0}")]
    MissingCredential(&'static str),
}

/// Parameter strategi & transport. Semua dari ENV dengan default dari
/// konfigurasi produksi yang berjalan.
#[derive(Clone, Debug)]
pub struct Args {
    // instrument
    pub symbol: String,
    pub leverage: u32,
    pub margin_usd: f64,

    // exits
    pub tp_pnl: f64,       // close di +X% on margin
    pub sl_pnl: f64,       // hard stop -X% on margin
    pub trail_arm_pnl: f64,
    pub trail_giveup: f64,

    // entry guards
    pub ema_fast: usize,
    pub ema_mid: usize,
    pub ema_slow: usize,
    pub pullback_min: f64, // last closed 1m change <= -X% (dip)
    pub slope_len: usize,
    pub min_atr_pct: f64,

    // loop & cooldown
    pub poll_sec: u64,
    pub base_cooldown_s: i64,

    // market data
    pub kline_interval: String,
    pub kline_limit: u32,

    // transport
    pub rest_url: String,
    pub recv_window: u64,
    pub timeout_s: u64,
    pub max_retry: u32,
    pub backoff_ms: u64,

    // observability
    pub metrics_port: u16,
    pub record_file: Option<String>,
}

/// Rem risiko sesi (circuit breakers).
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_trades_per_hour: usize,
    pub max_consec_losses: u32,
    pub session_drawdown_usd: f64,
    pub throttle_wait_s: u64,
    pub loss_pause_s: u64,
}

/// Kredensial Aster: user wallet, signer wallet, private key signer, API key.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub signer: String,
    pub priv_key: String,
    pub api_key: String,
}

// Jangan bocorkan private key lewat {:?}
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("signer", &self.signer)
            .field("priv_key", &"<redacted>")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_credential(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingCredential(key)),
    }
}

pub fn load() -> Result<(Args, Limits, Credentials), ConfigError> {
    // Pastikan .env dibaca (RECORD_FILE, kredensial, dll)
    let _ = dotenv();

    let args = Args {
        symbol: env::var("SYMBOL").unwrap_or_else(|_| "ASTERUSDT".to_string()),
        leverage: env_parse("LEVERAGE", 33),
        margin_usd: env_parse("MARGIN_USD", 10.0),

        tp_pnl: env_parse("TP_PNL", 33.0),
        sl_pnl: env_parse("SL_PNL", 10.0),
        trail_arm_pnl: env_parse("TRAIL_ARM_PNL", 20.0),
        trail_giveup: env_parse("TRAIL_GIVEUP", 12.0),

        ema_fast: env_parse("EMA_FAST", 9),
        ema_mid: env_parse("EMA_MID", 50),
        ema_slow: env_parse("EMA_SLOW", 200),
        pullback_min: env_parse("PULLBACK_MIN", 0.25),
        slope_len: env_parse("SLOPE_LEN", 5),
        min_atr_pct: env_parse("MIN_ATR_PCT", 0.15),

        poll_sec: env_parse("POLL_SEC", 3),
        base_cooldown_s: env_parse("BASE_COOLDOWN", 10),

        kline_interval: env::var("KLINE_INTERVAL").unwrap_or_else(|_| "1m".to_string()),
        kline_limit: env_parse("KLINE_LIMIT", 240),

        rest_url: env::var("ASTER_REST_URL")
            .unwrap_or_else(|_| "https://fapi.asterdex.com".to_string()),
        recv_window: env_parse("RECV_WINDOW", 5000),
        timeout_s: env_parse("TIMEOUT_S", 15),
        max_retry: env_parse("MAX_RETRY", 3),
        backoff_ms: env_parse("BACKOFF_MS", 1500),

        metrics_port: env_parse("METRICS_PORT", 9898),
        record_file: env::var("RECORD_FILE").ok(),
    };

    let limits = Limits {
        max_trades_per_hour: env_parse("MAX_TRADES_PER_HOUR", 8),
        max_consec_losses: env_parse("MAX_CONSEC_LOSSES", 5),
        session_drawdown_usd: env_parse("SESSION_DRAWDOWN_USD", 4.0),
        throttle_wait_s: env_parse("THROTTLE_WAIT_SEC", 60),
        loss_pause_s: env_parse("LOSS_PAUSE_SEC", 600),
    };

    let creds = Credentials {
        user: env_credential("ASTER_USER")?,
        signer: env_credential("ASTER_SIGNER")?,
        priv_key: env_credential("ASTER_SIGNER_PRIVKEY")?,
        api_key: env_credential("ASTER_API_KEY")?,
    };

    Ok((args, limits, creds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing() {
        assert_eq!(env_parse("DEFINITELY_NOT_SET_XYZ", 42u32), 42);
    }

    #[test]
    fn missing_credential_is_error() {
        std::env::remove_var("ASTER_TEST_MISSING");
        assert!(env_credential("ASTER_TEST_MISSING").is_err());
    }
}
