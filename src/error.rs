use std::fmt;

/// Errors raised by the grid engine and risk multiplier, invariant
/// violations per the error-kind taxonomy (kind 5): the enclosing task
/// logs and surfaces via the notifier, but must not silently continue.
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Risk manager invoked before `set_opposite`/`create_linked_pair`.
    RiskManagerNotLinked(String),
    /// Grid ladder failed a validity check after a mutation.
    LadderInvariantViolation(String),
    /// A strategy's intent emission is suppressed by an active same-order error.
    SameOrderHalted { strat_id: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::RiskManagerNotLinked(direction) => write!(
                f,
                "PositionRiskManager({direction}) requires opposite position to be linked; \
                 use set_opposite() or PositionRiskManager::create_linked_pair()"
            ),
            CoreError::LadderInvariantViolation(msg) => write!(f, "grid ladder invariant violated: {msg}"),
            CoreError::SameOrderHalted { strat_id } => {
                write!(f, "{strat_id}: intent emission halted by same-order error")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Classification of exchange-facing errors, per the error-kind taxonomy
/// (kinds 1-3). The executor and retry queue branch on this.
#[derive(Debug, Clone)]
pub enum ExchangeError {
    /// Transient transport failure (timeout, connection reset). Retry.
    Transient(String),
    /// Cancel raced a fill/cancel already applied exchange-side. No retry, treat as cancelled.
    BenignCancelRace(String),
    /// Place raced a prior successful placement of the same deterministic
    /// `client_order_id`. No retry, treat as placed.
    DuplicateOrderId(String),
    /// Authoritative refusal (insufficient balance, invalid symbol, rate limit). Drop after retry budget.
    AuthoritativeRefusal(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Transient(msg) => write!(f, "transient transport error: {msg}"),
            ExchangeError::BenignCancelRace(msg) => write!(f, "benign cancel race: {msg}"),
            ExchangeError::DuplicateOrderId(msg) => write!(f, "duplicate order id: {msg}"),
            ExchangeError::AuthoritativeRefusal(msg) => write!(f, "authoritative refusal: {msg}"),
        }
    }
}

impl std::error::Error for ExchangeError {}

impl ExchangeError {
    /// Classifies a raw exchange error message into one of the three
    /// REST-facing kinds, per §4.4: "already filled / already cancelled /
    /// not found" are benign; everything else defaults to authoritative
    /// unless it looks like a transport failure.
    pub fn classify_cancel_failure(message: &str) -> ExchangeError {
        let lower = message.to_lowercase();
        let benign = ["already filled", "already cancelled", "already canceled", "not found", "order not exists"];
        if benign.iter().any(|needle| lower.contains(needle)) {
            ExchangeError::BenignCancelRace(message.to_string())
        } else if lower.contains("timeout") || lower.contains("connection") {
            ExchangeError::Transient(message.to_string())
        } else {
            ExchangeError::AuthoritativeRefusal(message.to_string())
        }
    }

    /// Classifies a raw exchange error message from a place attempt, per
    /// §9's idempotency-under-retries requirement: "duplicate order id" is
    /// benign (the deterministic client_order_id was already accepted).
    pub fn classify_place_failure(message: &str) -> ExchangeError {
        let lower = message.to_lowercase();
        let duplicate = ["duplicate order id", "duplicate client order id", "order already exists", "order link id already exists"];
        if duplicate.iter().any(|needle| lower.contains(needle)) {
            ExchangeError::DuplicateOrderId(message.to_string())
        } else if lower.contains("timeout") || lower.contains("connection") {
            ExchangeError::Transient(message.to_string())
        } else {
            ExchangeError::AuthoritativeRefusal(message.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }
}

/// Errors from the anchor store / risk-limit cache's durable-file I/O.
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Serde(serde_json::Error),
    /// The target path is a symlink, rejected per §6 to avoid writing
    /// through an attacker- or operator-controlled redirect.
    SymlinkRejected(String),
    /// The file exceeds the configured size bound.
    TooLarge { path: String, bytes: u64, limit: u64 },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "io error: {e}"),
            PersistenceError::Serde(e) => write!(f, "serde error: {e}"),
            PersistenceError::SymlinkRejected(path) => write!(f, "refusing to operate on symlink: {path}"),
            PersistenceError::TooLarge { path, bytes, limit } => write!(f, "{path} is {bytes} bytes, exceeds limit of {limit}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serde(e)
    }
}
