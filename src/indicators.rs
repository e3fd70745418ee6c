// ===============================
// src/indicators.rs
// ===============================
//
// Indikator murni di atas deret candle (tertua -> terbaru). Tidak ada I/O,
// tidak ada state; engine yang menafsirkan hasilnya.
//
// Catatan EMA: di-seed dengan nilai PERTAMA dari window yang dipotong
// (length * 3 candle terakhir), bukan SMA dan bukan full history. Bias seed
// sudah meluruh sebelum mencapai nilai terbaru pada window selebar itu —
// aproksimasi finite-window yang disengaja, jangan "diperbaiki" ke
// full-history EMA.
//
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct IndicatorCfg {
    pub ema_fast: usize,
    pub ema_mid: usize,
    pub ema_slow: usize,
    pub atr_len: usize,
    pub slope_len: usize,
}

impl Default for IndicatorCfg {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_mid: 50,
            ema_slow: 200,
            atr_len: 14,
            slope_len: 5,
        }
    }
}

/// Hasil satu kali evaluasi indikator atas deret candle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub last_close: f64,
    /// Perubahan % close terakhir vs close sebelumnya (negatif = dip).
    pub chg_last_pct: f64,
    pub ema_fast: f64,
    pub ema_mid: f64,
    pub ema_slow: f64,
    /// None kalau sampel true-range < atr_len.
    pub atr: Option<f64>,
    pub slope_pct: f64,
}

impl Snapshot {
    pub fn compute(candles: &[Candle], cfg: &IndicatorCfg) -> Option<Self> {
        let n = candles.len();
        if n < cfg.slope_len.max(2) {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let c1 = closes[n - 1];
        let c2 = closes[n - 2];

        Some(Self {
            last_close: c1,
            chg_last_pct: (c1 - c2) / c2 * 100.0,
            ema_fast: ema(window(&closes, cfg.ema_fast * 3), cfg.ema_fast),
            ema_mid: ema(window(&closes, cfg.ema_mid * 3), cfg.ema_mid),
            ema_slow: ema(window(&closes, cfg.ema_slow * 3), cfg.ema_slow),
            atr: atr(&closes, &highs, &lows, cfg.atr_len),
            slope_pct: slope_pct(&closes, cfg.slope_len),
        })
    }

    /// ATR sebagai persen dari harga terakhir.
    pub fn atr_pct(&self) -> Option<f64> {
        self.atr.map(|a| a / self.last_close * 100.0)
    }
}

/// n nilai terakhir (atau semuanya kalau deret lebih pendek).
pub fn window(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// EMA rekursif, seed = elemen pertama slice, k = 2/(length+1).
pub fn ema(values: &[f64], length: usize) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let k = 2.0 / (length as f64 + 1.0);
    let mut e = values[0];
    for x in &values[1..] {
        e = x * k + e * (1.0 - k);
    }
    e
}

/// ATR Wilder: TR = max(h-l, |h-prevC|, |l-prevC|), seed = TR pertama,
/// lalu a = (a*(len-1) + tr) / len atas seluruh deret TR.
pub fn atr(closes: &[f64], highs: &[f64], lows: &[f64], length: usize) -> Option<f64> {
    if closes.len() < 2 || length == 0 {
        return None;
    }
    let trs: Vec<f64> = highs[1..]
        .iter()
        .zip(&lows[1..])
        .zip(&closes[..closes.len().saturating_sub(1)])
        .map(|((&h, &l), &pc)| (h - l).max((h - pc).abs()).max((l - pc).abs()))
        .collect();
    if trs.len() < length {
        return None;
    }
    let mut a = trs[0];
    for tr in &trs[1..] {
        a = (a * (length as f64 - 1.0) + tr) / length as f64;
    }
    Some(a)
}

/// Perubahan % close terakhir vs close n-candle sebelumnya (closes[len-n]).
pub fn slope_pct(closes: &[f64], n: usize) -> f64 {
    let len = closes.len();
    if n == 0 || len < n {
        return 0.0;
    }
    let reference = closes[len - n];
    (closes[len - 1] - reference) / reference * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64, eps: f64) {
        assert!(
            (actual - expected).abs() < eps,
            "expected {expected}, got {actual}"
        );
    }

    fn make_candles(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                open_time: 1_700_000_000_000 + i as i64 * 60_000,
                open,
                high,
                low,
                close,
            })
            .collect()
    }

    #[test]
    fn ema_seeds_with_first_value() {
        // k = 2/(3+1) = 0.5; e=10 -> 10.5 -> 11.25
        let vals = [10.0, 11.0, 12.0];
        assert_approx(ema(&vals, 3), 11.25, EPS);
    }

    #[test]
    fn ema_single_value_is_identity() {
        assert_approx(ema(&[42.0], 9), 42.0, EPS);
    }

    #[test]
    fn window_takes_tail() {
        let vals = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(window(&vals, 2), &[3.0, 4.0]);
        assert_eq!(window(&vals, 10), &vals[..]);
    }

    #[test]
    fn atr_wilder_known_values() {
        let closes = [102.0, 106.0, 99.0, 101.0];
        let highs = [105.0, 108.0, 107.0, 103.0];
        let lows = [95.0, 100.0, 98.0, 97.0];
        // TRs: max(8,6,2)=8, max(9,1,8)=9, max(6,4,2)=6
        // seed 8 -> (8*2+9)/3 = 25/3 -> (25/3*2+6)/3 = 68/9
        let a = atr(&closes, &highs, &lows, 3).unwrap();
        assert_approx(a, 68.0 / 9.0, EPS);
    }

    #[test]
    fn atr_unavailable_below_sample_minimum() {
        let closes = [100.0, 101.0, 102.0];
        let highs = [101.0, 102.0, 103.0];
        let lows = [99.0, 100.0, 101.0];
        assert!(atr(&closes, &highs, &lows, 14).is_none());
    }

    #[test]
    fn slope_measures_against_nth_back() {
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0];
        // referensi = closes[len-5] = 100
        assert_approx(slope_pct(&closes, 5), 4.0, EPS);
        assert_approx(slope_pct(&closes, 1), 0.0, EPS);
    }

    #[test]
    fn snapshot_pullback_and_fields() {
        let candles = make_candles(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.6, 99.6, 100.2),
            (100.2, 100.8, 99.9, 100.5),
            (100.5, 100.9, 100.1, 100.6),
            (100.6, 100.7, 99.8, 100.3),
        ]);
        let cfg = IndicatorCfg {
            ema_fast: 2,
            ema_mid: 2,
            ema_slow: 2,
            atr_len: 3,
            slope_len: 5,
        };
        let snap = Snapshot::compute(&candles, &cfg).unwrap();
        assert_approx(snap.last_close, 100.3, EPS);
        // (100.3 - 100.6) / 100.6 * 100
        assert_approx(snap.chg_last_pct, (100.3 - 100.6) / 100.6 * 100.0, EPS);
        assert!(snap.atr.is_some());
        assert!(snap.atr_pct().unwrap() > 0.0);
    }

    #[test]
    fn snapshot_none_when_series_too_short() {
        let candles = make_candles(&[(100.0, 100.5, 99.5, 100.0)]);
        assert!(Snapshot::compute(&candles, &IndicatorCfg::default()).is_none());
    }
}
