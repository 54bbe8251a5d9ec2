use thiserror::Error;

/// Every failure a reducer can report back to the caller.
/// Returning any of these from a reducer rolls back its transaction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GameError {
    #[error("No session found")]
    NoSession,

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient XP: balance {balance}, required {required}")]
    InsufficientXp { balance: i64, required: i64 },

    #[error("stale XP balance: expected version {expected}, found {actual}")]
    StaleBalance { expected: u64, actual: u64 },

    #[error("XP amount must be non-zero")]
    ZeroAmount,

    #[error("XP amount must be positive, got {0}")]
    NegativeAmount(i64),

    #[error("XP balance overflow")]
    Overflow,

    #[error("invalid probability: {0}")]
    InvalidProbability(String),

    #[error("{0} is out of stock")]
    OutOfStock(String),

    #[error("no spins remaining for today ({used}/{allowed})")]
    NoSpinsRemaining { used: u32, allowed: u32 },

    #[error("minimum level not reached: requires {required}, has {current}")]
    LevelTooLow { required: u32, current: u32 },

    #[error("already redeemed: {0}")]
    AlreadyRedeemed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ledger mismatch for {user_id} at transaction {transaction_id}: expected balance {expected}, recorded {recorded}")]
    LedgerMismatch {
        user_id: String,
        transaction_id: u64,
        expected: i64,
        recorded: i64,
    },
}

impl GameError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        GameError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Reducers speak `Result<(), String>`; this lets `?` cross that boundary.
impl From<GameError> for String {
    fn from(err: GameError) -> Self {
        err.to_string()
    }
}
