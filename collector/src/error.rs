//! Failure taxonomy of one schedule entry.
//!
//! Every variant here is caught at the scheduler's per-entry boundary and turns
//! into "skip this entry for this round". Incomplete synthesis groups are not
//! errors, see [`crate::synthesizer::SkipReason`].

use shared::{StoreError, Timeframe};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure, timeout or unreadable body.
    #[error("{timeframe} kline request failed: {source}")]
    Transport {
        timeframe: Timeframe,
        #[source]
        source: reqwest::Error,
    },

    /// The exchange answered with a non-success status.
    #[error("{timeframe} kline request returned HTTP {status}: {body}")]
    Status {
        timeframe: Timeframe,
        status: u16,
        body: String,
    },

    /// The payload did not have the expected kline record shape.
    #[error("{timeframe} kline response is malformed: {reason}")]
    MalformedResponse { timeframe: Timeframe, reason: String },

    #[error("{0} has no exchange kline interval")]
    UnsupportedInterval(Timeframe),
}

impl FetchError {
    /// Only transport failures and server-side (5xx) statuses are retried.
    /// Client errors such as a bad symbol or a rate-limit ban (429, 418) and
    /// malformed payloads will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => (500..600).contains(status),
            FetchError::MalformedResponse { .. } | FetchError::UnsupportedInterval(_) => false,
        }
    }

    pub fn malformed(timeframe: Timeframe, reason: impl Into<String>) -> Self {
        FetchError::MalformedResponse {
            timeframe,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("batch for {symbol} {timeframe} contains a {found_symbol} {found_timeframe} record")]
    MixedBatch {
        symbol: String,
        timeframe: Timeframe,
        found_symbol: String,
        found_timeframe: Timeframe,
    },

    #[error("{timeframe} record at {open_time} is not on the {timeframe} grid")]
    Misaligned { timeframe: Timeframe, open_time: i64 },

    #[error("{timeframe} write failed: {source}")]
    Storage {
        timeframe: Timeframe,
        #[source]
        source: StoreError,
    },
}

/// Anything that can make a schedule entry give up for the current round.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("{timeframe} read failed: {source}")]
    Read {
        timeframe: Timeframe,
        #[source]
        source: StoreError,
    },
}
