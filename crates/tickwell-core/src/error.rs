use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Closed classification of remote-fetch failures.
///
/// Produced by the remote-call wrapper at the point of failure; downstream
/// layers branch on the kind and never re-inspect message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The upstream provider rejected the call for exceeding its quota.
    RateLimited,
    /// The credential is valid but lacks permission for this endpoint.
    AccessDenied,
    /// The pipeline itself is misconfigured (missing credential, bad
    /// endpoint name). Not recoverable by caching or retrying.
    Configuration,
    /// Anything else: network hiccups, upstream 5xx, malformed responses.
    Transient,
    /// A call (or the whole fan-out budget) ran out of time.
    TimedOut,
    /// The call succeeded but carried no usable data.
    EmptyResult,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AccessDenied => "access_denied",
            Self::Configuration => "configuration",
            Self::Transient => "transient",
            Self::TimedOut => "timed_out",
            Self::EmptyResult => "empty_result",
        }
    }

    /// Whether the degradation ladder may fall through to stale or synthetic
    /// data after this failure. `Configuration` is the one kind that must
    /// propagate: no amount of cached data substitutes for a broken
    /// credential.
    pub const fn degradable(self) -> bool {
        !matches!(self, Self::Configuration)
    }

    /// Whether the retry middleware may attempt the call again.
    pub const fn retryable(self) -> bool {
        matches!(self, Self::Transient | Self::TimedOut)
    }

    /// Classify a foreign free-text failure message.
    ///
    /// Only for wrapping errors raised by code outside this crate (provider
    /// SDKs, transport shims). The phrase table mirrors the upstream
    /// provider's rejection messages; anything unrecognized is `Transient`.
    pub fn classify(message: &str) -> Self {
        const RATE_LIMIT_PHRASES: &[&str] = &[
            "too many requests",
            "rate limit",
            "calls per minute",
            "calls per day",
            "quota exceeded",
        ];
        const ACCESS_PHRASES: &[&str] = &[
            "permission denied",
            "insufficient permission",
            "not authorized",
            "access denied",
            "upgrade your plan",
        ];
        const CONFIG_PHRASES: &[&str] = &[
            "invalid api key",
            "missing api key",
            "unknown endpoint",
            "invalid endpoint name",
            "token is required",
        ];

        let lower = message.to_ascii_lowercase();
        if RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p)) {
            Self::RateLimited
        } else if ACCESS_PHRASES.iter().any(|p| lower.contains(p)) {
            Self::AccessDenied
        } else if CONFIG_PHRASES.iter().any(|p| lower.contains(p)) {
            Self::Configuration
        } else {
            Self::Transient
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure raised by a remote fetch operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({kind})")]
pub struct FetchError {
    kind: ErrorKind,
    message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimedOut, message)
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyResult, message)
    }

    /// Wrap a foreign free-text failure, classifying it by message.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn degradable(&self) -> bool {
        self.kind.degradable()
    }

    pub const fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

/// Failures internal to the tiered cache.
///
/// Read-path I/O problems are swallowed by the cache itself (an unreadable
/// entry is reported as absent); these surface only from `set` and the
/// administrative sweeps.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("namespace must be a non-empty [A-Za-z0-9_-] identifier: '{0}'")]
    InvalidNamespace(String),

    #[error("cannot prepare cache directory '{path}': {source}")]
    BaseDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache disk write for '{namespace}' failed: {source}")]
    DiskWrite {
        namespace: String,
        #[source]
        source: std::io::Error,
    },
}
