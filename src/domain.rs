// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

/// Satu candle dari endpoint klines, urut dari yang tertua.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Posisi exchange-side yang sudah dinormalisasi. Dibaca ulang setiap poll,
/// tidak pernah di-cache antar iterasi.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Position {
    Flat,
    Open {
        side: PositionSide,
        qty: f64,
        entry: f64,
    },
}

impl Position {
    pub fn is_flat(&self) -> bool {
        matches!(self, Position::Flat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TrailGiveup,
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::TrailGiveup => "trail",
            ExitReason::TakeProfit => "tp",
            ExitReason::StopLoss => "sl",
        }
    }
}

/// Event untuk recorder JSONL (lihat recorder.rs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Entry {
        ts: i64,
        symbol: String,
        qty: String,
        px: f64,
    },
    Exit {
        ts: i64,
        symbol: String,
        reason: ExitReason,
        pnl_pct: f64,
        session_pnl_usd: f64,
    },
    Brake {
        ts: i64,
        kind: String,
    },
    Note(String),
}
