// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : aster_scalper_rust — smart long scalper for Aster perps in Rust
Module  : main.rs
Version : 0.3.0
License : MIT (see LICENSE)

Summary : Polls the Aster futures REST API, derives EMA/ATR/slope context
          from 1m candles, runs a dip->bounce long entry with TP/SL/trailing
          exits, enforces trade-frequency / loss-streak / drawdown brakes,
          exposes Prometheus metrics, and records JSONL trade events.
=============================================================================
*/
mod config;
mod domain;
mod engine;
mod executor;
mod indicators;
mod market;
mod metrics;
mod position;
mod recorder;
mod signer;
mod transport;

use chrono::Utc;
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tracing::{error, info, warn};

use crate::config::{Args, Limits};
use crate::domain::{Event, Position, PositionSide};
use crate::engine::{Engine, EngineCfg, ExitCheck, FlatGate};
use crate::indicators::{IndicatorCfg, Snapshot};
use crate::market::ExchangeFilters;
use crate::transport::ApiClient;

// Jeda singkat setelah order tereksekusi, biar posisi settle sebelum poll lagi
const SETTLE_S: u64 = 2;

#[derive(Debug)]
enum LoopExit {
    SessionStopped,
    Interrupted,
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config, limits, credentials ----
    let (args, limits, creds) = match config::load() {
        Ok(x) => x,
        Err(e) => {
            error!(error = %e, "config error, aborting before any trade");
            std::process::exit(1);
        }
    };

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        symbol = %args.symbol,
        leverage = args.leverage,
        margin_usd = args.margin_usd,
        tp_pnl = args.tp_pnl,
        sl_pnl = args.sl_pnl,
        trail_arm = args.trail_arm_pnl,
        trail_giveup = args.trail_giveup,
        poll_sec = args.poll_sec,
        rest = %args.rest_url,
        "startup config"
    );
    metrics::CONFIG_SYMBOL.with_label_values(&[&args.symbol]).set(1);
    metrics::CONFIG_LEVERAGE.set(args.leverage as i64);

    // ---- API client (signer di dalamnya) ----
    let api = match ApiClient::new(&args, &creds) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "api client init failed (credentials?)");
            std::process::exit(1);
        }
    };

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(1024);
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Leverage: best-effort (exchange bisa sudah di posisi yang sama) ----
    match executor::set_leverage(&api, &args.symbol, args.leverage).await {
        Ok(_) => info!(leverage = args.leverage, "leverage set"),
        Err(e) => warn!(error = %e, "leverage set failed"),
    }

    // ---- Filters: fatal kalau instrument tidak dikenal ----
    let filters = match market::exchange_filters(&api, &args.symbol).await {
        Ok(f) => {
            info!(
                step = %f.step_size,
                min_qty = %f.min_qty,
                min_notional = %f.min_notional,
                "instrument filters"
            );
            f
        }
        Err(e) => {
            error!(error = %e, "exchange filters unavailable, aborting");
            std::process::exit(1);
        }
    };

    let ind_cfg = IndicatorCfg {
        ema_fast: args.ema_fast,
        ema_mid: args.ema_mid,
        ema_slow: args.ema_slow,
        atr_len: 14,
        slope_len: args.slope_len,
    };
    let mut eng = Engine::new(EngineCfg::from_args(&args), limits.clone());

    // ---- Main loop; ctrl-c memicu flatten best-effort lalu keluar ----
    let exit = tokio::select! {
        exit = trade_loop(&args, &limits, &api, &filters, &ind_cfg, &mut eng, &rec_tx) => exit,
        _ = tokio::signal::ctrl_c() => {
            warn!("manual stop requested");
            LoopExit::Interrupted
        }
    };

    if let Err(e) = executor::close_position(&api, &args.symbol).await {
        error!(error = %e, "flatten on exit failed");
    }
    match exit {
        LoopExit::SessionStopped => info!(
            session_pnl_usd = eng.state.session_pnl_usd,
            "session stopped on drawdown brake"
        ),
        LoopExit::Interrupted => info!("stopped by interrupt"),
    }
}

async fn trade_loop(
    args: &Args,
    limits: &Limits,
    api: &ApiClient,
    filters: &ExchangeFilters,
    ind_cfg: &IndicatorCfg,
    eng: &mut Engine,
    rec_tx: &mpsc::Sender<Event>,
) -> LoopExit {
    let poll = Duration::from_secs(args.poll_sec);
    let settle = Duration::from_secs(SETTLE_S);

    loop {
        metrics::POLLS.inc();
        let now = Utc::now().timestamp();
        eng.prune_trades(now);
        metrics::TRADES_IN_WINDOW.set(eng.state.trades_in_window() as i64);

        // Posisi dibaca sekali di awal iterasi — satu-satunya view yang
        // dipakai sampai iterasi selesai. Gagal baca -> fail-open ke flat.
        let pos = match position::read(api, &args.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "read position failed, assuming flat");
                metrics::POLL_ERRORS.with_label_values(&["position"]).inc();
                Position::Flat
            }
        };

        let px = match market::last_price(api, &args.symbol).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "price fetch failed");
                metrics::POLL_ERRORS.with_label_values(&["price"]).inc();
                sleep(poll).await;
                continue;
            }
        };

        let candles =
            match market::klines(api, &args.symbol, &args.kline_interval, args.kline_limit).await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "klines fetch failed");
                    metrics::POLL_ERRORS.with_label_values(&["klines"]).inc();
                    sleep(poll).await;
                    continue;
                }
            };

        let snap = match Snapshot::compute(&candles, ind_cfg) {
            Some(s) => s,
            None => {
                warn!(candles = candles.len(), "not enough candles for indicators");
                sleep(poll).await;
                continue;
            }
        };

        match pos {
            // ───── ACTIVE LONG ─────
            Position::Open {
                side: PositionSide::Long,
                qty,
                entry,
            } => {
                let pnl = engine::pnl_pct_on_margin_long(entry, px, args.leverage);
                metrics::POSITION_PNL_PCT.set(pnl);

                match eng.evaluate_open(pnl) {
                    ExitCheck::Hold { armed_now } => {
                        if armed_now {
                            info!(pnl_pct = pnl, "trailing armed");
                            metrics::TRAILING_ARMED.set(1);
                        }
                        metrics::PEAK_PNL_PCT.set(eng.state.peak_pnl);
                        info!(
                            px,
                            qty,
                            entry,
                            pnl_pct = pnl,
                            peak_pct = eng.state.peak_pnl,
                            "holding LONG"
                        );
                    }
                    ExitCheck::Close(reason) => {
                        info!(reason = reason.label(), pnl_pct = pnl, "exit -> close");
                        match executor::close_position(api, &args.symbol).await {
                            Ok(()) => {
                                eng.record_close(pnl, reason, now, args.margin_usd);
                                metrics::EXITS.with_label_values(&[reason.label()]).inc();
                                metrics::SESSION_PNL_USD.set(eng.state.session_pnl_usd);
                                metrics::CONSEC_LOSSES.set(eng.state.consec_losses as i64);
                                metrics::TRAILING_ARMED.set(0);
                                metrics::PEAK_PNL_PCT.set(0.0);
                                let _ = rec_tx.try_send(Event::Exit {
                                    ts: now,
                                    symbol: args.symbol.clone(),
                                    reason,
                                    pnl_pct: pnl,
                                    session_pnl_usd: eng.state.session_pnl_usd,
                                });
                                sleep(settle).await;
                                continue;
                            }
                            Err(e) => {
                                // State tidak disentuh; poll berikutnya coba lagi
                                error!(error = %e, "close failed");
                                metrics::POLL_ERRORS.with_label_values(&["close"]).inc();
                            }
                        }
                    }
                }
            }

            // ───── UNEXPECTED SHORT ─────
            Position::Open {
                side: PositionSide::Short,
                qty,
                ..
            } => {
                warn!(qty, "unexpected SHORT view, flattening");
                if let Err(e) = executor::close_position(api, &args.symbol).await {
                    error!(error = %e, "short flatten failed");
                    metrics::POLL_ERRORS.with_label_values(&["close"]).inc();
                }
                sleep(settle).await;
                continue;
            }

            // ───── FLAT ─────
            Position::Flat => {
                metrics::POSITION_PNL_PCT.set(0.0);

                match eng.gate_entry(&snap, now) {
                    FlatGate::Throttled => {
                        info!(
                            max_per_hour = limits.max_trades_per_hour,
                            wait_s = limits.throttle_wait_s,
                            "throttle: max trades/hour reached"
                        );
                        metrics::BRAKES.with_label_values(&["throttle"]).inc();
                        let _ = rec_tx.try_send(Event::Brake {
                            ts: now,
                            kind: "throttle".to_string(),
                        });
                        sleep(Duration::from_secs(limits.throttle_wait_s)).await;
                        continue;
                    }
                    FlatGate::PauseLossStreak => {
                        warn!(
                            losses = eng.state.consec_losses,
                            pause_s = limits.loss_pause_s,
                            "max consecutive losses reached, pausing"
                        );
                        metrics::BRAKES.with_label_values(&["loss_pause"]).inc();
                        let _ = rec_tx.try_send(Event::Brake {
                            ts: now,
                            kind: "loss_pause".to_string(),
                        });
                        sleep(Duration::from_secs(limits.loss_pause_s)).await;
                        eng.end_pause();
                        metrics::CONSEC_LOSSES.set(0);
                        continue;
                    }
                    FlatGate::StopSession => {
                        error!(
                            session_pnl_usd = eng.state.session_pnl_usd,
                            limit_usd = limits.session_drawdown_usd,
                            "session drawdown hit, stopping session"
                        );
                        metrics::BRAKES.with_label_values(&["drawdown"]).inc();
                        let _ = rec_tx.try_send(Event::Brake {
                            ts: now,
                            kind: "drawdown".to_string(),
                        });
                        return LoopExit::SessionStopped;
                    }
                    FlatGate::Cooldown { remaining_s, .. } => {
                        info!(
                            remaining_s,
                            loss_streak = eng.state.consec_losses,
                            "flat | cooldown"
                        );
                        sleep(poll).await;
                        continue;
                    }
                    FlatGate::NoEntry(sig) => {
                        info!(
                            regime = sig.regime_ok,
                            atr_pct = sig.atr_pct,
                            dip = sig.dip,
                            bounce = sig.bounce,
                            slope_pct = sig.slope_pct,
                            "flat | no entry"
                        );
                    }
                    FlatGate::Enter(sig) => {
                        let mark = match market::mark_price(api, &args.symbol).await {
                            Ok(m) => m,
                            Err(e) => {
                                error!(error = %e, "mark price fetch failed");
                                metrics::POLL_ERRORS.with_label_values(&["mark"]).inc();
                                sleep(poll).await;
                                continue;
                            }
                        };
                        match executor::compute_qty(px, mark, filters, args.margin_usd, args.leverage)
                        {
                            Ok(qty) => {
                                info!(
                                    qty = %qty,
                                    px,
                                    atr_pct = sig.atr_pct,
                                    slope_pct = sig.slope_pct,
                                    "entry -> BUY"
                                );
                                match executor::open_long(api, &args.symbol, &qty).await {
                                    Ok(resp) => {
                                        info!(orig_qty = ?resp.get("origQty"), "BUY ok");
                                        eng.record_entry();
                                        metrics::ENTRIES.inc();
                                        metrics::TRAILING_ARMED.set(0);
                                        metrics::PEAK_PNL_PCT.set(0.0);
                                        let _ = rec_tx.try_send(Event::Entry {
                                            ts: now,
                                            symbol: args.symbol.clone(),
                                            qty: qty.to_string(),
                                            px,
                                        });
                                        sleep(settle).await;
                                        continue;
                                    }
                                    Err(e) => {
                                        error!(error = %e, "entry order failed");
                                        metrics::POLL_ERRORS.with_label_values(&["entry"]).inc();
                                    }
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "entry sizing failed");
                                metrics::POLL_ERRORS.with_label_values(&["qty"]).inc();
                            }
                        }
                    }
                }
            }
        }

        sleep(poll).await;
    }
}
