//! External analysis collaborators
//!
//! # Components
//!
//! - [`client`] - the [`AnalysisApi`] contract and its HTTP implementation
//! - [`models`] - request/response data types
//!
//! # Endpoints Used
//!
//! - `GET market-data?symbol&timeframe&periods` - OHLC bars
//! - `POST pivot/detect` - swing pivot detection
//! - `POST fibonacci/retracement`, `POST fibonacci/extension` - level prices
//! - `POST harmonic/validate` - XABCD pattern validation
//!
//! Callers degrade failures to empty results; nothing here retries.

pub mod client;
pub mod models;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{validate_harmonic_or_none, AnalysisApi, HttpAnalysisClient, DEFAULT_BASE_URL};
pub use models::{
    DetectedPivot, FibonacciKind, FibonacciRequest, FibonacciResponse, HarmonicPattern,
    HarmonicValidateRequest, PivotDetectRequest, PivotDetectResponse,
};
