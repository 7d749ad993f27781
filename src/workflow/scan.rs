//! Pattern and signal scan
//!
//! Harmonic patterns are validated remotely from the last five pivots
//! (X, A, B, C, D). Candle signals are found locally on the most recent
//! bars. A failed remote call counts as "no pattern"; the scan still
//! completes.

use tracing::{debug, info};

use super::reducer::WorkflowPatch;
use super::state::{DetectedPattern, SignalBar, SignalKind};
use crate::api::{validate_harmonic_or_none, AnalysisApi, HarmonicValidateRequest};
use crate::types::{Direction, Ohlc, PivotPoint};

/// Bars inspected for entry signals
pub const SIGNAL_LOOKBACK: usize = 5;

/// Pin bar: body at most this share of the range
const PIN_MAX_BODY: f64 = 1.0 / 3.0;
/// Pin bar: rejection wick at least this share of the range
const PIN_MIN_WICK: f64 = 0.6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternScan {
    pub patterns: Vec<DetectedPattern>,
    pub signals: Vec<SignalBar>,
}

impl PatternScan {
    /// Patch recording the results and marking the scan complete
    pub fn into_patch(self) -> WorkflowPatch {
        WorkflowPatch {
            pattern_scan_complete: Some(true),
            detected_patterns: Some(self.patterns),
            signals: Some(self.signals),
            ..WorkflowPatch::default()
        }
    }
}

/// XABCD request from the five most recent pivots
pub fn harmonic_request(pivots: &[PivotPoint]) -> Option<HarmonicValidateRequest> {
    if pivots.len() < 5 {
        return None;
    }
    let mut sorted: Vec<&PivotPoint> = pivots.iter().collect();
    sorted.sort_by_key(|p| p.index);
    let last = &sorted[sorted.len() - 5..];
    Some(HarmonicValidateRequest {
        x: last[0].price,
        a: last[1].price,
        b: last[2].price,
        c: last[3].price,
        d: last[4].price,
    })
}

/// Run the full scan for one timeframe
pub async fn scan_patterns(
    api: Option<&dyn AnalysisApi>,
    timeframe: &str,
    pivots: &[PivotPoint],
    bars: &[Ohlc],
    direction: Option<Direction>,
) -> PatternScan {
    let mut patterns = Vec::new();

    match (api, harmonic_request(pivots)) {
        (Some(api), Some(request)) => {
            if let Some(pattern) = validate_harmonic_or_none(api, &request).await {
                info!("Harmonic {} found on {}", pattern.name, timeframe);
                patterns.push(DetectedPattern {
                    name: pattern.name,
                    timeframe: timeframe.to_string(),
                    direction: pattern.direction,
                    confidence: pattern.confidence,
                    completion_price: pattern.completion_price,
                });
            }
        }
        (_, None) => debug!("Fewer than five pivots on {}, skipping harmonic check", timeframe),
        (None, Some(_)) => debug!("No analysis backend, skipping harmonic check"),
    }

    let signals = detect_signals(bars, direction);
    PatternScan { patterns, signals }
}

/// Candle signals on the last [`SIGNAL_LOOKBACK`] bars, optionally only
/// those agreeing with `direction`
pub fn detect_signals(bars: &[Ohlc], direction: Option<Direction>) -> Vec<SignalBar> {
    let start = bars.len().saturating_sub(SIGNAL_LOOKBACK);
    let mut signals = Vec::new();

    for i in start..bars.len() {
        let found = [
            pin_bar(bars, i),
            engulfing(bars, i),
            inside_bar_break(bars, i),
        ];
        for (kind, dir) in found.into_iter().flatten() {
            if direction.is_some_and(|d| d != dir) {
                continue;
            }
            let bar = &bars[i];
            let (trigger_price, invalidation_price) = match dir {
                Direction::Long => (bar.high, bar.low),
                Direction::Short => (bar.low, bar.high),
            };
            signals.push(SignalBar {
                kind,
                bar_index: i,
                direction: dir,
                trigger_price,
                invalidation_price,
                timestamp: bar.timestamp,
            });
        }
    }
    signals
}

fn pin_bar(bars: &[Ohlc], i: usize) -> Option<(SignalKind, Direction)> {
    let bar = &bars[i];
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return None;
    }
    let body = (bar.close - bar.open).abs();
    if body / range > PIN_MAX_BODY {
        return None;
    }
    let lower_wick = bar.open.min(bar.close) - bar.low;
    let upper_wick = bar.high - bar.open.max(bar.close);
    if lower_wick / range >= PIN_MIN_WICK {
        Some((SignalKind::PinBar, Direction::Long))
    } else if upper_wick / range >= PIN_MIN_WICK {
        Some((SignalKind::PinBar, Direction::Short))
    } else {
        None
    }
}

fn engulfing(bars: &[Ohlc], i: usize) -> Option<(SignalKind, Direction)> {
    let prev = bars.get(i.checked_sub(1)?)?;
    let bar = &bars[i];
    let bullish = prev.close < prev.open
        && bar.close > bar.open
        && bar.open <= prev.close
        && bar.close >= prev.open;
    let bearish = prev.close > prev.open
        && bar.close < bar.open
        && bar.open >= prev.close
        && bar.close <= prev.open;
    match (bullish, bearish) {
        (true, _) => Some((SignalKind::Engulfing, Direction::Long)),
        (_, true) => Some((SignalKind::Engulfing, Direction::Short)),
        _ => None,
    }
}

fn inside_bar_break(bars: &[Ohlc], i: usize) -> Option<(SignalKind, Direction)> {
    let mother = bars.get(i.checked_sub(2)?)?;
    let inside = &bars[i - 1];
    let bar = &bars[i];
    if inside.high > mother.high || inside.low < mother.low {
        return None;
    }
    if bar.close > inside.high {
        Some((SignalKind::InsideBarBreak, Direction::Long))
    } else if bar.close < inside.low {
        Some((SignalKind::InsideBarBreak, Direction::Short))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use crate::api::HarmonicPattern;
    use crate::types::PivotType;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Ohlc {
        Ohlc {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    fn pivots(prices: &[f64]) -> Vec<PivotPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PivotPoint {
                index: i * 3,
                price,
                pivot_type: if i % 2 == 0 { PivotType::Low } else { PivotType::High },
                timestamp: 0,
                is_manual: false,
            })
            .collect()
    }

    #[test]
    fn test_pin_bar_directions() {
        let bullish = vec![bar(100.0, 100.5, 96.0, 100.2)];
        let signals = detect_signals(&bullish, None);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::PinBar);
        assert_eq!(signals[0].direction, Direction::Long);
        assert_eq!(signals[0].trigger_price, 100.5);
        assert_eq!(signals[0].invalidation_price, 96.0);

        let bearish = vec![bar(100.0, 104.0, 99.6, 99.8)];
        assert_eq!(detect_signals(&bearish, None)[0].direction, Direction::Short);
        assert!(detect_signals(&bearish, Some(Direction::Long)).is_empty());
    }

    #[test]
    fn test_engulfing() {
        let bars = vec![bar(101.0, 101.2, 99.8, 100.0), bar(99.9, 102.5, 99.5, 102.0)];
        let signals = detect_signals(&bars, Some(Direction::Long));
        assert!(signals
            .iter()
            .any(|s| s.kind == SignalKind::Engulfing && s.bar_index == 1));
    }

    #[test]
    fn test_inside_bar_break() {
        let bars = vec![
            bar(100.0, 105.0, 95.0, 103.0),
            bar(101.0, 103.0, 99.0, 102.0),
            bar(102.0, 104.0, 101.5, 103.5),
        ];
        let signals = detect_signals(&bars, None);
        assert!(signals
            .iter()
            .any(|s| s.kind == SignalKind::InsideBarBreak && s.direction == Direction::Long));
    }

    #[test]
    fn test_only_recent_bars_scanned() {
        let mut bars = vec![bar(100.0, 100.5, 96.0, 100.2)];
        bars.extend((0..SIGNAL_LOOKBACK).map(|_| bar(100.0, 101.0, 99.0, 100.0)));
        assert!(detect_signals(&bars, None).iter().all(|s| s.bar_index != 0));
    }

    #[test]
    fn test_harmonic_request_uses_last_five() {
        assert!(harmonic_request(&pivots(&[1.0, 2.0, 3.0, 4.0])).is_none());
        let request = harmonic_request(&pivots(&[9.0, 1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!((request.x, request.d), (1.0, 5.0));
    }

    #[tokio::test]
    async fn test_scan_completes_with_pattern() {
        let api = MockApi {
            harmonic: Some(HarmonicPattern {
                name: "Gartley".into(),
                direction: Some(Direction::Long),
                confidence: Some(0.8),
                completion_price: Some(1.2),
            }),
            ..MockApi::default()
        };
        let scan = scan_patterns(
            Some(&api),
            "4H",
            &pivots(&[1.0, 2.0, 1.4, 1.8, 1.2]),
            &[],
            Some(Direction::Long),
        )
        .await;
        assert_eq!(scan.patterns.len(), 1);
        assert_eq!(scan.patterns[0].name, "Gartley");

        let patch = scan.into_patch();
        assert_eq!(patch.pattern_scan_complete, Some(true));
    }

    #[tokio::test]
    async fn test_scan_without_backend_still_completes() {
        let scan = scan_patterns(None, "4H", &pivots(&[1.0, 2.0, 1.4, 1.8, 1.2]), &[], None).await;
        assert!(scan.patterns.is_empty());
        assert_eq!(scan.into_patch().pattern_scan_complete, Some(true));
    }
}
