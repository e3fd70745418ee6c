// ===============================
// src/executor.rs
// ===============================
//
// Eksekusi order market: hitung quantity yang patuh filter exchange
// (step/min/max/minNotional, semua exact Decimal), submit open long atau
// reduce-only close. Gagal entry (qty di bawah minimum, reject exchange)
// dikembalikan sebagai error; caller log dan lanjut tanpa transisi state.
//
use rand::Rng;
use reqwest::Method;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Position, PositionSide};
use crate::market::ExchangeFilters;
use crate::position;
use crate::signer::timestamp_ms;
use crate::transport::{ApiClient, ApiError};

#[derive(Debug, Error)]
pub enum QtyError {
    #[error("computed qty {qty} below exchange minQty {min}")]
    BelowMin { qty: Decimal, min: Decimal },
    #[error("price/mark/margin must be positive and finite")]
    BadInput,
}

pub fn floor_to_step(x: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return x;
    }
    (x / step).floor() * step
}

/// Quantity target = margin * leverage / price, dibulatkan ke bawah ke step,
/// dijepit ke maxQty, lalu dinaikkan seperlunya agar qty * mark >= minNotional.
pub fn compute_qty(
    price: f64,
    mark: f64,
    fil: &ExchangeFilters,
    margin_usd: f64,
    leverage: u32,
) -> Result<Decimal, QtyError> {
    let price = Decimal::from_f64(price)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or(QtyError::BadInput)?;
    let mark = Decimal::from_f64(mark)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or(QtyError::BadInput)?;
    let margin = Decimal::from_f64(margin_usd)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or(QtyError::BadInput)?;

    let target_notional = margin * Decimal::from(leverage);
    let mut qty = (target_notional / price).min(fil.max_qty);
    qty = floor_to_step(qty, fil.step_size);

    if qty < fil.min_qty {
        return Err(QtyError::BelowMin {
            qty,
            min: fil.min_qty,
        });
    }

    if qty * mark < fil.min_notional {
        let need = fil.min_notional / mark;
        qty = qty.max(floor_to_step(need + fil.step_size, fil.step_size));
    }

    Ok(qty.normalize())
}

fn client_order_id() -> String {
    format!("SC-{}-{}", timestamp_ms(), rand::thread_rng().gen::<u32>())
}

pub async fn place_market(
    api: &ApiClient,
    symbol: &str,
    side: &str,
    qty: &str,
    reduce_only: bool,
) -> Result<Value, ApiError> {
    api.call(
        Method::POST,
        "/order",
        json!({
            "symbol": symbol,
            "side": side,
            "type": "MARKET",
            "quantity": qty,
            "reduceOnly": reduce_only.to_string(),
            "positionSide": "BOTH",
            "newClientOrderId": client_order_id(),
        }),
    )
    .await
}

pub async fn open_long(api: &ApiClient, symbol: &str, qty: &Decimal) -> Result<Value, ApiError> {
    place_market(api, symbol, "BUY", &qty.to_string(), false).await
}

/// Tutup posisi apapun yang terbaca, reduce-only, satu market order.
pub async fn close_position(api: &ApiClient, symbol: &str) -> Result<(), ApiError> {
    match position::read(api, symbol).await? {
        Position::Flat => {
            info!("no position to close");
        }
        Position::Open {
            side: PositionSide::Long,
            qty,
            ..
        } => {
            info!(qty, "closing LONG");
            place_market(api, symbol, "SELL", &qty.to_string(), true).await?;
        }
        Position::Open {
            side: PositionSide::Short,
            qty,
            ..
        } => {
            warn!(qty, "reducing unexpected SHORT");
            place_market(api, symbol, "BUY", &qty.to_string(), true).await?;
        }
    }
    Ok(())
}

pub async fn set_leverage(api: &ApiClient, symbol: &str, leverage: u32) -> Result<Value, ApiError> {
    api.call(
        Method::POST,
        "/leverage",
        json!({"symbol": symbol, "leverage": leverage.to_string()}),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters(min_qty: Decimal, max_qty: Decimal, step: Decimal, min_notional: Decimal) -> ExchangeFilters {
        ExchangeFilters {
            tick_size: dec!(0.000001),
            min_qty,
            max_qty,
            step_size: step,
            min_notional,
        }
    }

    fn assert_compliant(qty: Decimal, mark: f64, fil: &ExchangeFilters) {
        assert!(qty >= fil.min_qty, "qty {qty} < minQty {}", fil.min_qty);
        assert!(qty <= fil.max_qty, "qty {qty} > maxQty {}", fil.max_qty);
        assert_eq!(
            qty % fil.step_size,
            Decimal::ZERO,
            "qty {qty} not multiple of step {}",
            fil.step_size
        );
        let mark = Decimal::from_f64(mark).unwrap();
        assert!(
            qty * mark >= fil.min_notional,
            "notional {} < minNotional {}",
            qty * mark,
            fil.min_notional
        );
    }

    #[test]
    fn qty_targets_margin_times_leverage() {
        let fil = filters(dec!(0.1), dec!(999999999), dec!(0.001), dec!(5));
        // 10 USD * 33x / 2.0 = 165
        let qty = compute_qty(2.0, 2.0, &fil, 10.0, 33).unwrap();
        assert_eq!(qty, dec!(165));
        assert_compliant(qty, 2.0, &fil);
    }

    #[test]
    fn qty_floors_to_step() {
        let fil = filters(dec!(1), dec!(999999999), dec!(1), dec!(0));
        // 330 / 1.7 = 194.117... -> 194
        let qty = compute_qty(1.7, 1.7, &fil, 10.0, 33).unwrap();
        assert_eq!(qty, dec!(194));
        assert_compliant(qty, 1.7, &fil);
    }

    #[test]
    fn qty_clamped_to_max() {
        let fil = filters(dec!(0.1), dec!(100), dec!(0.001), dec!(0));
        let qty = compute_qty(0.01, 0.01, &fil, 10.0, 33).unwrap();
        assert_eq!(qty, dec!(100));
        assert_compliant(qty, 0.01, &fil);
    }

    #[test]
    fn qty_below_min_is_error() {
        let fil = filters(dec!(1000), dec!(999999999), dec!(1), dec!(0));
        // 330 / 2.0 = 165 < minQty 1000
        assert!(matches!(
            compute_qty(2.0, 2.0, &fil, 10.0, 33),
            Err(QtyError::BelowMin { .. })
        ));
    }

    #[test]
    fn qty_bumped_to_min_notional() {
        let fil = filters(dec!(0.1), dec!(999999999), dec!(0.001), dec!(5));
        // 1 USD * 1x / 2.0 = 0.5 -> notional 1.0 < 5 -> bump ke >= 2.5
        let qty = compute_qty(2.0, 2.0, &fil, 1.0, 1).unwrap();
        assert!(qty >= dec!(2.5));
        assert_compliant(qty, 2.0, &fil);
    }

    #[test]
    fn bad_inputs_rejected() {
        let fil = filters(dec!(0.1), dec!(999999999), dec!(0.001), dec!(0));
        assert!(matches!(
            compute_qty(0.0, 1.0, &fil, 10.0, 33),
            Err(QtyError::BadInput)
        ));
        assert!(matches!(
            compute_qty(1.0, 1.0, &fil, -10.0, 33),
            Err(QtyError::BadInput)
        ));
    }

    #[test]
    fn client_order_id_unique_prefix() {
        let a = client_order_id();
        let b = client_order_id();
        assert!(a.starts_with("SC-"));
        assert_ne!(a, b);
    }
}
