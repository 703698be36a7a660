// ---------------------------------------------------------------------------
// AdapterError — the three-way failure classification
// ---------------------------------------------------------------------------

/// Adapter failures, classified the way the dispatcher routes them.
///
/// - `Transient`: network trouble, 5xx, rate limiting, timeouts. Retried
///   with backoff by whichever worker owns the retry policy.
/// - `Permanent`: validation or request errors. No retry.
/// - `AuthExpired`: credentials died. The adapter is disabled and the
///   operator alerted; queue state is preserved.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
    #[error("auth expired: {0}")]
    AuthExpired(String),
}

impl AdapterError {
    pub fn transient(msg: impl Into<String>) -> Self {
        AdapterError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        AdapterError::Permanent(msg.into())
    }

    pub fn auth_expired(msg: impl Into<String>) -> Self {
        AdapterError::AuthExpired(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, AdapterError::AuthExpired(_))
    }

    /// A call that outlived its deadline counts as transient.
    pub fn timeout(op: &str, secs: u64) -> Self {
        AdapterError::Transient(format!("{} timed out after {}s", op, secs))
    }
}
