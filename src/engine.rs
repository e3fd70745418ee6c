// ===============================
// src/engine.rs
// ===============================
//
// State machine posisi/risiko: FLAT -> LONG_ACTIVE (dengan sub-flag trailing)
// -> kembali FLAT, plus PAUSED (cooldown loss-streak) dan SESSION_STOPPED
// (drawdown sesi, terminal). Engine ini satu-satunya pemilik RiskState;
// loop utama hanya mengeksekusi verdict-nya.
//
// Semua fungsi deterministik terhadap (snapshot, state, now) supaya bisa
// diuji tanpa polling loop.
//
use std::collections::VecDeque;

use crate::config::{Args, Limits};
use crate::domain::ExitReason;
use crate::indicators::Snapshot;

const TRADE_WINDOW_S: i64 = 3600;

/// PnL-on-margin posisi long, dalam persen dari margin (bukan dari harga).
pub fn pnl_pct_on_margin_long(entry: f64, last: f64, leverage: u32) -> f64 {
    (last - entry) / entry * leverage as f64 * 100.0
}

/// Pengali cooldown super-linear terhadap loss streak.
pub fn cooldown_multiplier(consec_losses: u32) -> i64 {
    match consec_losses {
        0 => 1,
        1 => 3,
        2 => 6,
        _ => 12,
    }
}

#[derive(Debug, Clone)]
pub struct EngineCfg {
    pub tp_pnl: f64,
    pub sl_pnl: f64,
    pub trail_arm_pnl: f64,
    pub trail_giveup: f64,
    pub base_cooldown_s: i64,
    pub pullback_min: f64,
    pub min_atr_pct: f64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            tp_pnl: 33.0,
            sl_pnl: 10.0,
            trail_arm_pnl: 20.0,
            trail_giveup: 12.0,
            base_cooldown_s: 10,
            pullback_min: 0.25,
            min_atr_pct: 0.15,
        }
    }
}

impl EngineCfg {
    pub fn from_args(args: &Args) -> Self {
        Self {
            tp_pnl: args.tp_pnl,
            sl_pnl: args.sl_pnl,
            trail_arm_pnl: args.trail_arm_pnl,
            trail_giveup: args.trail_giveup,
            base_cooldown_s: args.base_cooldown_s,
            pullback_min: args.pullback_min,
            min_atr_pct: args.min_atr_pct,
        }
    }
}

/// Risk state sesi — hidup selama proses, satu penulis (engine ini),
/// sengaja tidak dipersist.
#[derive(Debug, Default)]
pub struct RiskState {
    trade_times: VecDeque<i64>,
    pub consec_losses: u32,
    pub session_pnl_usd: f64,
    pub last_exit_ts: i64,
    pub trailing_armed: bool,
    pub peak_pnl: f64,
}

impl RiskState {
    pub fn trades_in_window(&self) -> usize {
        self.trade_times.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntrySignals {
    pub regime_ok: bool,
    pub atr_ok: bool,
    pub dip: bool,
    pub bounce: bool,
    pub atr_pct: f64,
    pub slope_pct: f64,
}

impl EntrySignals {
    pub fn all(&self) -> bool {
        self.regime_ok && self.atr_ok && self.dip && self.bounce
    }
}

/// Verdict untuk state FLAT, urutan evaluasi: rem dulu, sinyal belakangan.
#[derive(Debug)]
pub enum FlatGate {
    /// Rem frekuensi: >= max trade dalam 3600s, tunggu tanpa ubah state lain.
    Throttled,
    /// Loss streak kena batas: pause, lalu caller panggil end_pause().
    PauseLossStreak,
    /// Drawdown sesi kena batas: terminal, loop harus berhenti.
    StopSession,
    /// Masih dalam cooldown dinamis dan tidak ada bounce yang membatalkannya.
    Cooldown {
        remaining_s: i64,
        signals: EntrySignals,
    },
    /// Gate tidak lolos; sinyal disertakan untuk logging.
    NoEntry(EntrySignals),
    /// Semua gate lolos: buka long.
    Enter(EntrySignals),
}

/// Verdict untuk posisi LONG aktif. Satu poll maksimal satu Close;
/// arming trailing bisa terjadi bersamaan dengan Hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCheck {
    Hold { armed_now: bool },
    Close(ExitReason),
}

pub struct Engine {
    cfg: EngineCfg,
    limits: Limits,
    pub state: RiskState,
}

impl Engine {
    pub fn new(cfg: EngineCfg, limits: Limits) -> Self {
        Self {
            cfg,
            limits,
            state: RiskState::default(),
        }
    }

    /// Buang timestamp trade yang lebih tua dari 3600s. Panggil di awal
    /// setiap iterasi.
    pub fn prune_trades(&mut self, now: i64) {
        while let Some(&front) = self.state.trade_times.front() {
            if now - front > TRADE_WINDOW_S {
                self.state.trade_times.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn signals(&self, snap: &Snapshot) -> EntrySignals {
        let atr_pct = snap.atr_pct();
        EntrySignals {
            regime_ok: snap.ema_mid > snap.ema_slow,
            // ATR tidak tersedia -> gate gagal (pasar belum cukup data)
            atr_ok: atr_pct.map_or(false, |p| p >= self.cfg.min_atr_pct),
            dip: snap.chg_last_pct <= -self.cfg.pullback_min,
            bounce: snap.last_close > snap.ema_fast && snap.slope_pct > 0.0,
            atr_pct: atr_pct.unwrap_or(0.0),
            slope_pct: snap.slope_pct,
        }
    }

    /// Evaluasi state FLAT: circuit breaker berurutan, lalu cooldown
    /// (bounce mem-bypass cooldown sepenuhnya), lalu gate entry.
    pub fn gate_entry(&mut self, snap: &Snapshot, now: i64) -> FlatGate {
        if self.state.trade_times.len() >= self.limits.max_trades_per_hour {
            return FlatGate::Throttled;
        }
        if self.state.consec_losses >= self.limits.max_consec_losses {
            return FlatGate::PauseLossStreak;
        }
        if -self.state.session_pnl_usd >= self.limits.session_drawdown_usd {
            return FlatGate::StopSession;
        }

        let signals = self.signals(snap);
        let dyn_cooldown = self.cfg.base_cooldown_s * cooldown_multiplier(self.state.consec_losses);
        let since_exit = now - self.state.last_exit_ts;
        if since_exit < dyn_cooldown && !signals.bounce {
            return FlatGate::Cooldown {
                remaining_s: dyn_cooldown - since_exit,
                signals,
            };
        }

        if signals.all() {
            FlatGate::Enter(signals)
        } else {
            FlatGate::NoEntry(signals)
        }
    }

    /// Evaluasi posisi LONG aktif. Prioritas: arm trailing (tanpa close),
    /// trail-giveup, take-profit, stop-loss.
    pub fn evaluate_open(&mut self, pnl: f64) -> ExitCheck {
        self.state.peak_pnl = self.state.peak_pnl.max(pnl);

        let mut armed_now = false;
        if !self.state.trailing_armed && pnl >= self.cfg.trail_arm_pnl {
            self.state.trailing_armed = true;
            armed_now = true;
        }

        if self.state.trailing_armed && (self.state.peak_pnl - pnl) >= self.cfg.trail_giveup {
            return ExitCheck::Close(ExitReason::TrailGiveup);
        }
        if pnl >= self.cfg.tp_pnl {
            return ExitCheck::Close(ExitReason::TakeProfit);
        }
        if pnl <= -self.cfg.sl_pnl {
            return ExitCheck::Close(ExitReason::StopLoss);
        }

        ExitCheck::Hold { armed_now }
    }

    /// Bookkeeping setelah close tereksekusi. Loss streak: TP selalu reset,
    /// SL selalu menambah, trail-giveup mengikuti tanda PnL saat exit.
    pub fn record_close(&mut self, pnl: f64, reason: ExitReason, now: i64, margin_usd: f64) {
        self.state.session_pnl_usd += pnl / 100.0 * margin_usd;
        self.state.last_exit_ts = now;
        self.state.trailing_armed = false;
        self.state.peak_pnl = 0.0;
        self.state.consec_losses = match reason {
            ExitReason::TakeProfit => 0,
            ExitReason::StopLoss => self.state.consec_losses + 1,
            ExitReason::TrailGiveup => {
                if pnl > 0.0 {
                    0
                } else {
                    self.state.consec_losses + 1
                }
            }
        };
        self.state.trade_times.push_back(now);
    }

    /// Bookkeeping setelah entry tereksekusi.
    pub fn record_entry(&mut self) {
        self.state.peak_pnl = 0.0;
        self.state.trailing_armed = false;
    }

    /// Selesai pause loss-streak: reset counter, kembali ke evaluasi FLAT.
    pub fn end_pause(&mut self) {
        self.state.consec_losses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn test_limits() -> Limits {
        Limits {
            max_trades_per_hour: 8,
            max_consec_losses: 5,
            session_drawdown_usd: 4.0,
            throttle_wait_s: 60,
            loss_pause_s: 600,
        }
    }

    fn test_engine() -> Engine {
        Engine::new(EngineCfg::default(), test_limits())
    }

    fn snap(
        last_close: f64,
        chg_last_pct: f64,
        ema_fast: f64,
        ema_mid: f64,
        ema_slow: f64,
        atr: Option<f64>,
        slope_pct: f64,
    ) -> Snapshot {
        Snapshot {
            last_close,
            chg_last_pct,
            ema_fast,
            ema_mid,
            ema_slow,
            atr,
            slope_pct,
        }
    }

    fn entry_snap() -> Snapshot {
        // regime: 105 > 100; ATR% = 0.20/100*100 = 0.20 >= 0.15;
        // dip: -0.30 <= -0.25; bounce: 100.00 > 99.80 dan slope +0.10
        snap(100.0, -0.30, 99.80, 105.0, 100.0, Some(0.20), 0.10)
    }

    #[test]
    fn cooldown_multiplier_table() {
        let expect = [(0, 1), (1, 3), (2, 6), (3, 12), (4, 12)];
        for (losses, mult) in expect {
            assert_eq!(cooldown_multiplier(losses), mult);
        }
    }

    #[test]
    fn scenario_a_entry_gate_opens() {
        let mut eng = test_engine();
        match eng.gate_entry(&entry_snap(), NOW) {
            FlatGate::Enter(sig) => {
                assert!(sig.regime_ok && sig.atr_ok && sig.dip && sig.bounce);
            }
            other => panic!("expected Enter, got {other:?}"),
        }
    }

    #[test]
    fn scenario_b_take_profit_resets_loss_streak() {
        let mut eng = test_engine();
        eng.state.consec_losses = 2;
        let pnl = pnl_pct_on_margin_long(100.0, 101.0, 33);
        assert!((pnl - 33.0).abs() < 1e-9);
        // arm (33 >= 20) terjadi di poll yang sama, tapi TP yang menutup
        assert_eq!(eng.evaluate_open(pnl), ExitCheck::Close(ExitReason::TakeProfit));
        eng.record_close(pnl, ExitReason::TakeProfit, NOW, 10.0);
        assert_eq!(eng.state.consec_losses, 0);
        assert!((eng.state.session_pnl_usd - 3.3).abs() < 1e-9);
        assert_eq!(eng.state.trades_in_window(), 1);
    }

    #[test]
    fn scenario_c_stop_loss_boundary() {
        let mut eng = test_engine();
        let hold_pnl = pnl_pct_on_margin_long(100.0, 99.70, 33);
        assert!(hold_pnl > -10.0);
        assert_eq!(eng.evaluate_open(hold_pnl), ExitCheck::Hold { armed_now: false });

        let stop_pnl = pnl_pct_on_margin_long(100.0, 99.69, 33);
        assert!(stop_pnl <= -10.0);
        assert_eq!(eng.evaluate_open(stop_pnl), ExitCheck::Close(ExitReason::StopLoss));
        eng.record_close(stop_pnl, ExitReason::StopLoss, NOW, 10.0);
        assert_eq!(eng.state.consec_losses, 1);
    }

    #[test]
    fn scenario_d_trailing_giveup_fires_before_tp_sl() {
        let mut eng = test_engine();
        assert_eq!(eng.evaluate_open(5.0), ExitCheck::Hold { armed_now: false });
        assert!(!eng.state.trailing_armed);

        assert_eq!(eng.evaluate_open(25.0), ExitCheck::Hold { armed_now: true });
        assert!(eng.state.trailing_armed);
        assert_eq!(eng.state.peak_pnl, 25.0);

        // drop 5% dari peak -> masih hold
        assert_eq!(eng.evaluate_open(20.0), ExitCheck::Hold { armed_now: false });
        // drop 13% dari peak >= giveup 12 -> close via trail, bukan TP/SL
        assert_eq!(
            eng.evaluate_open(12.0),
            ExitCheck::Close(ExitReason::TrailGiveup)
        );
        eng.record_close(12.0, ExitReason::TrailGiveup, NOW, 10.0);
        // exit masih profit -> streak reset
        assert_eq!(eng.state.consec_losses, 0);
        assert!(!eng.state.trailing_armed);
        assert_eq!(eng.state.peak_pnl, 0.0);
    }

    #[test]
    fn scenario_e_session_drawdown_stops() {
        let mut eng = test_engine();
        for pnl in [-13.0, -14.0, -14.0] {
            eng.record_close(pnl, ExitReason::StopLoss, NOW, 10.0);
        }
        assert!((eng.state.session_pnl_usd + 4.1).abs() < 1e-9);
        match eng.gate_entry(&entry_snap(), NOW) {
            FlatGate::StopSession => {}
            other => panic!("expected StopSession, got {other:?}"),
        }
    }

    #[test]
    fn trail_giveup_at_loss_counts_as_loss() {
        let mut eng = test_engine();
        eng.state.consec_losses = 1;
        eng.record_close(-1.0, ExitReason::TrailGiveup, NOW, 10.0);
        assert_eq!(eng.state.consec_losses, 2);
    }

    #[test]
    fn trailing_peak_non_decreasing_until_close() {
        let mut eng = test_engine();
        let mut prev_peak = 0.0;
        for pnl in [21.0, 30.0, 28.0, 31.0, 30.5] {
            eng.evaluate_open(pnl);
            assert!(eng.state.peak_pnl >= prev_peak);
            assert!(eng.state.peak_pnl >= pnl);
            prev_peak = eng.state.peak_pnl;
        }
        eng.record_close(30.5, ExitReason::TakeProfit, NOW, 10.0);
        assert_eq!(eng.state.peak_pnl, 0.0);
    }

    #[test]
    fn throttle_brake_counts_sliding_window() {
        let mut eng = test_engine();
        for i in 0..8 {
            eng.record_close(1.0, ExitReason::TakeProfit, NOW - 100 + i, 10.0);
        }
        match eng.gate_entry(&entry_snap(), NOW) {
            FlatGate::Throttled => {}
            other => panic!("expected Throttled, got {other:?}"),
        }
        // setelah window bergeser melewati 3600s, rem lepas
        eng.prune_trades(NOW + 4000);
        assert_eq!(eng.state.trades_in_window(), 0);
        match eng.gate_entry(&entry_snap(), NOW + 4000) {
            FlatGate::Enter(_) => {}
            other => panic!("expected Enter, got {other:?}"),
        }
    }

    #[test]
    fn loss_streak_pauses_then_resets() {
        let mut eng = test_engine();
        eng.state.consec_losses = 5;
        match eng.gate_entry(&entry_snap(), NOW) {
            FlatGate::PauseLossStreak => {}
            other => panic!("expected PauseLossStreak, got {other:?}"),
        }
        eng.end_pause();
        assert_eq!(eng.state.consec_losses, 0);
    }

    #[test]
    fn cooldown_blocks_without_bounce() {
        let mut eng = test_engine();
        eng.state.last_exit_ts = NOW - 5; // base cooldown 10s, baru 5s
        // bounce false: close <= ema_fast
        let s = snap(99.0, -0.30, 99.80, 105.0, 100.0, Some(0.20), 0.10);
        match eng.gate_entry(&s, NOW) {
            FlatGate::Cooldown { remaining_s, .. } => assert_eq!(remaining_s, 5),
            other => panic!("expected Cooldown, got {other:?}"),
        }
    }

    #[test]
    fn bounce_bypasses_cooldown() {
        let mut eng = test_engine();
        eng.state.consec_losses = 3; // dyn cooldown = 10 * 12 = 120s
        eng.state.last_exit_ts = NOW - 1;
        match eng.gate_entry(&entry_snap(), NOW) {
            FlatGate::Enter(sig) => assert!(sig.bounce),
            other => panic!("expected Enter via bounce bypass, got {other:?}"),
        }
    }

    #[test]
    fn unavailable_atr_fails_gate() {
        let mut eng = test_engine();
        let s = snap(100.0, -0.30, 99.80, 105.0, 100.0, None, 0.10);
        match eng.gate_entry(&s, NOW) {
            FlatGate::NoEntry(sig) => assert!(!sig.atr_ok),
            other => panic!("expected NoEntry, got {other:?}"),
        }
    }

    #[test]
    fn entry_resets_trailing_only() {
        let mut eng = test_engine();
        eng.state.peak_pnl = 9.0;
        eng.state.trailing_armed = true;
        eng.state.consec_losses = 2;
        eng.record_entry();
        assert_eq!(eng.state.peak_pnl, 0.0);
        assert!(!eng.state.trailing_armed);
        assert_eq!(eng.state.consec_losses, 2);
    }
}
