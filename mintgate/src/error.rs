use thiserror::Error;

/// Reading the reward catalog failed. Returned to the caller; never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch rewards: {status_text}")]
    Status { status: u16, status_text: String },
    #[error("failed to reach rewards source {location}: {message}")]
    Transport { location: String, message: String },
    #[error("failed to read rewards file {location}: {message}")]
    Io { location: String, message: String },
    #[error("invalid rewards document: {0}")]
    Decode(String),
    #[error("invalid rewards source {0:?}")]
    InvalidSource(String),
}

/// The ownership oracle could not answer. Never surfaced past the evaluator.
#[derive(Debug, Error)]
#[error("ownership query for {wallet} in {collection} failed: {message}")]
pub struct OwnershipQueryError {
    pub wallet: String,
    pub collection: String,
    pub message: String,
}

impl OwnershipQueryError {
    pub fn new(wallet: &str, collection: &str, message: impl ToString) -> Self {
        Self {
            wallet: wallet.to_string(),
            collection: collection.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("failed to subscribe to {event_type}: {message}")]
pub struct SubscriptionError {
    pub event_type: String,
    pub message: String,
}

impl SubscriptionError {
    pub fn new(event_type: &str, message: impl ToString) -> Self {
        Self {
            event_type: event_type.to_string(),
            message: message.to_string(),
        }
    }
}

/// One raw event could not be turned into a mint record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed event in transaction {transaction_id:?}: {reason}")]
pub struct MalformedEventError {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("{0} requires MintGate::start to be called first")]
    NotStarted(&'static str),
    #[error("{0} called after MintGate::shutdown")]
    ShutDown(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Failures talking to the Flow Access API.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status} body={body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid flow address {0:?}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
