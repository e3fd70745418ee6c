// ===============================
// src/market.rs
// ===============================
//
// Market data adapters (read-only, tanpa tanda tangan):
// - last_price       : /ticker/price
// - mark_price       : /premiumIndex (payload bisa objek atau array tunggal)
// - klines           : /klines -> Vec<Candle>, urut dari yang tertua
// - exchange_filters : /exchangeInfo -> tick/step/min/max/minNotional exact
//
// Harga jalan sebagai f64; nilai filter dipertahankan sebagai Decimal karena
// pembulatan step/notional harus exact (lihat executor.rs).
//
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::Candle;
use crate::transport::{ApiClient, ApiError};

#[derive(Debug, Clone)]
pub struct ExchangeFilters {
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
}

pub async fn last_price(api: &ApiClient, symbol: &str) -> Result<f64, ApiError> {
    let v = api
        .get_public("/ticker/price", &[("symbol", symbol.to_string())])
        .await?;
    parse_price(&v)
}

pub async fn mark_price(api: &ApiClient, symbol: &str) -> Result<f64, ApiError> {
    let v = api
        .get_public("/premiumIndex", &[("symbol", symbol.to_string())])
        .await?;
    parse_mark_price(&v)
}

pub async fn klines(
    api: &ApiClient,
    symbol: &str,
    interval: &str,
    limit: u32,
) -> Result<Vec<Candle>, ApiError> {
    let v = api
        .get_public(
            "/klines",
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await?;
    parse_klines(&v)
}

pub async fn exchange_filters(api: &ApiClient, symbol: &str) -> Result<ExchangeFilters, ApiError> {
    let v = api.get_public("/exchangeInfo", &[]).await?;
    parse_filters(&v, symbol)
}

// ---- parsing (pure, supaya bisa diuji tanpa HTTP) ----

fn num_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_price(v: &Value) -> Result<f64, ApiError> {
    v.get("price")
        .and_then(num_f64)
        .ok_or(ApiError::Payload("ticker/price missing price"))
}

fn parse_mark_price(v: &Value) -> Result<f64, ApiError> {
    // premiumIndex kadang pulang sebagai array satu elemen
    let obj = match v {
        Value::Array(items) => items
            .first()
            .ok_or(ApiError::Payload("premiumIndex empty array"))?,
        other => other,
    };
    obj.get("markPrice")
        .and_then(num_f64)
        .ok_or(ApiError::Payload("premiumIndex missing markPrice"))
}

fn parse_klines(v: &Value) -> Result<Vec<Candle>, ApiError> {
    let rows = v.as_array().ok_or(ApiError::Payload("klines not an array"))?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row
            .as_array()
            .ok_or(ApiError::Payload("kline row not an array"))?;
        let cell = |i: usize| -> Result<f64, ApiError> {
            cells
                .get(i)
                .and_then(num_f64)
                .ok_or(ApiError::Payload("kline cell not numeric"))
        };
        out.push(Candle {
            open_time: cells
                .first()
                .and_then(Value::as_i64)
                .ok_or(ApiError::Payload("kline missing open time"))?,
            open: cell(1)?,
            high: cell(2)?,
            low: cell(3)?,
            close: cell(4)?,
        });
    }
    Ok(out)
}

fn dec_or(filter: Option<&Value>, key: &str, default: Decimal) -> Decimal {
    filter
        .and_then(|f| f.get(key))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_filters(info: &Value, symbol: &str) -> Result<ExchangeFilters, ApiError> {
    use rust_decimal_macros::dec;

    let symbols = info
        .get("symbols")
        .and_then(Value::as_array)
        .ok_or(ApiError::Payload("exchangeInfo missing symbols"))?;

    for s in symbols {
        if s.get("symbol").and_then(Value::as_str) != Some(symbol) {
            continue;
        }
        let filters = s
            .get("filters")
            .and_then(Value::as_array)
            .ok_or(ApiError::Payload("exchangeInfo missing filters"))?;
        let by_type = |t: &str| -> Option<&Value> {
            filters
                .iter()
                .find(|f| f.get("filterType").and_then(Value::as_str) == Some(t))
        };

        let price = by_type("PRICE_FILTER");
        // MARKET_LOT_SIZE lebih relevan untuk market order; fallback ke LOT_SIZE
        let lot = by_type("MARKET_LOT_SIZE").or_else(|| by_type("LOT_SIZE"));
        let notional = by_type("MIN_NOTIONAL");

        return Ok(ExchangeFilters {
            tick_size: dec_or(price, "tickSize", dec!(0.000001)),
            min_qty: dec_or(lot, "minQty", dec!(0.0)),
            max_qty: dec_or(lot, "maxQty", dec!(999999999)),
            step_size: dec_or(lot, "stepSize", dec!(0.001)),
            min_notional: dec_or(notional, "notional", dec!(0)),
        });
    }

    Err(ApiError::UnknownInstrument(symbol.to_string()))
}
