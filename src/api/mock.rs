//! Scripted [`AnalysisApi`] for tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::AnalysisApi;
use super::models::*;
use crate::types::Ohlc;

/// One scripted pivot-detection reply
pub struct ScriptedDetect {
    pub delay: Duration,
    pub response: Result<PivotDetectResponse>,
}

#[derive(Default)]
pub struct MockApi {
    pub bars: Vec<Ohlc>,
    pub fail_market_data: bool,
    pub detect_replies: Mutex<VecDeque<ScriptedDetect>>,
    pub fibonacci: Option<FibonacciResponse>,
    /// Served ahead of `fibonacci` while any remain
    pub fibonacci_replies: Mutex<VecDeque<(Duration, FibonacciResponse)>>,
    pub harmonic: Option<HarmonicPattern>,
    pub market_data_calls: AtomicUsize,
    pub detect_calls: AtomicUsize,
}

impl MockApi {
    pub fn with_bars(count: usize) -> Self {
        let bars = (0..count)
            .map(|i| Ohlc {
                timestamp: 1_700_000_000_000 + i as i64 * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 10.0,
            })
            .collect();
        Self {
            bars,
            ..Self::default()
        }
    }

    pub fn push_detect(&self, delay: Duration, response: Result<PivotDetectResponse>) {
        self.detect_replies
            .lock()
            .unwrap()
            .push_back(ScriptedDetect { delay, response });
    }

    pub fn push_fibonacci(&self, delay: Duration, response: FibonacciResponse) {
        self.fibonacci_replies
            .lock()
            .unwrap()
            .push_back((delay, response));
    }
}

pub fn detected(points: &[(usize, f64, crate::types::PivotType)]) -> PivotDetectResponse {
    PivotDetectResponse {
        pivots: points
            .iter()
            .map(|&(index, price, pivot_type)| DetectedPivot {
                index,
                price,
                pivot_type,
            })
            .collect(),
        ..PivotDetectResponse::default()
    }
}

#[async_trait]
impl AnalysisApi for MockApi {
    async fn market_data(&self, _symbol: &str, _timeframe: &str, _periods: usize) -> Result<Vec<Ohlc>> {
        self.market_data_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_market_data {
            return Err(anyhow!("market data unavailable"));
        }
        Ok(self.bars.clone())
    }

    async fn detect_pivots(&self, _request: &PivotDetectRequest) -> Result<PivotDetectResponse> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.detect_replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.response
            }
            None => Err(anyhow!("no scripted detect reply")),
        }
    }

    async fn fibonacci_levels(
        &self,
        _kind: FibonacciKind,
        _request: &FibonacciRequest,
    ) -> Result<FibonacciResponse> {
        let scripted = self.fibonacci_replies.lock().unwrap().pop_front();
        if let Some((delay, response)) = scripted {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return Ok(response);
        }
        self.fibonacci
            .clone()
            .ok_or_else(|| anyhow!("fibonacci endpoint unavailable"))
    }

    async fn validate_harmonic(&self, _request: &HarmonicValidateRequest) -> Result<Option<HarmonicPattern>> {
        Ok(self.harmonic.clone())
    }
}
