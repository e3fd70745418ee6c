// ===============================
// src/position.rs
// ===============================
//
// Baca posisi exchange-side untuk satu simbol dan normalisasi ke
// Position::{Flat, Open}. Error dikembalikan apa adanya; kebijakan fail-open
// (anggap flat setelah warning) diputuskan caller di loop utama.
//
use reqwest::Method;
use serde_json::{json, Value};

use crate::domain::{Position, PositionSide};
use crate::transport::{ApiClient, ApiError};

pub async fn read(api: &ApiClient, symbol: &str) -> Result<Position, ApiError> {
    let v = api.call(Method::GET, "/positionRisk", json!({})).await?;
    Ok(parse_position(&v, symbol))
}

fn num_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_position(payload: &Value, symbol: &str) -> Position {
    let rows: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for p in rows {
        let sym = p
            .get("symbol")
            .or_else(|| p.get("instrumentId"))
            .and_then(Value::as_str);
        if sym != Some(symbol) {
            continue;
        }
        let amt = p
            .get("positionAmt")
            .or_else(|| p.get("size"))
            .and_then(num_f64)
            .unwrap_or(0.0);
        let entry = p
            .get("entryPrice")
            .or_else(|| p.get("entry"))
            .and_then(num_f64)
            .unwrap_or(0.0);
        // debu di bawah 1e-12 dianggap flat
        if amt.abs() < 1e-12 {
            continue;
        }
        let side = if amt > 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        return Position::Open {
            side,
            qty: amt.abs(),
            entry,
        };
    }

    Position::Flat
}
