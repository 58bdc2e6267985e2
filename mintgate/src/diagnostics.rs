//! Structured diagnostics.
//!
//! Components never log directly; they report [`Diagnostic`]s to the sink
//! they were constructed with. [`TracingSink`] forwards them to `tracing`,
//! [`MemorySink`] keeps them for inspection.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::evaluator::AccessDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    CatalogFetched {
        location: String,
        offers: usize,
    },
    RefreshFailed {
        error: String,
    },
    OffersUnlocked {
        wallet: Option<String>,
        unlocked: usize,
        total: usize,
    },
    OwnershipQueryFailed {
        wallet: String,
        collection: String,
        error: String,
    },
    AccessEvaluated {
        wallet: String,
        collection: String,
        decision: AccessDecision,
    },
    /// Trait requirements are accepted without being checked.
    TraitCheckSkipped {
        collection: String,
        traits: Vec<String>,
    },
    EvaluationTimedOut {
        offer_id: String,
        timeout_ms: u64,
    },
    ListenerStarted {
        event_type: String,
    },
    ListenerStopped {
        event_type: String,
    },
    SubscriptionFailed {
        event_type: String,
        error: String,
    },
    EventPollFailed {
        event_type: String,
        error: String,
    },
    MalformedEvent {
        transaction_id: String,
        reason: String,
    },
    MintObserved {
        transaction_id: String,
        token_id: String,
        owner: String,
    },
    RewardSurfaceShown {
        offers: usize,
    },
    WalletChanged {
        wallet: Option<String>,
    },
    /// A refresh finished after a newer one had already been applied.
    StaleRefreshDiscarded {
        generation: u64,
    },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Self::RefreshFailed { .. }
            | Self::OwnershipQueryFailed { .. }
            | Self::EvaluationTimedOut { .. }
            | Self::SubscriptionFailed { .. }
            | Self::EventPollFailed { .. }
            | Self::MalformedEvent { .. } => Severity::Warn,
            Self::TraitCheckSkipped { .. }
            | Self::ListenerStarted { .. }
            | Self::ListenerStopped { .. }
            | Self::MintObserved { .. }
            | Self::RewardSurfaceShown { .. }
            | Self::WalletChanged { .. } => Severity::Info,
            Self::CatalogFetched { .. }
            | Self::StaleRefreshDiscarded { .. }
            | Self::OffersUnlocked { .. }
            | Self::AccessEvaluated { .. } => Severity::Debug,
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Emits diagnostics as `tracing` events.
///
/// Warnings are always emitted. Everything else only when `verbose` is set,
/// which mirrors the SDK's `debug` switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    verbose: bool,
}

impl TracingSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn shared(verbose: bool) -> SharedSink {
        Arc::new(Self::new(verbose))
    }
}

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        if !self.verbose && diagnostic.severity() < Severity::Warn {
            return;
        }
        match diagnostic {
            Diagnostic::CatalogFetched { location, offers } => {
                debug!(location = %location, offers, "reward catalog fetched")
            }
            Diagnostic::RefreshFailed { error } => warn!(error = %error, "reward refresh failed"),
            Diagnostic::OffersUnlocked {
                wallet,
                unlocked,
                total,
            } => debug!(wallet = ?wallet, unlocked, total, "reward offers evaluated"),
            Diagnostic::OwnershipQueryFailed {
                wallet,
                collection,
                error,
            } => warn!(
                wallet = %wallet,
                collection = %collection,
                error = %error,
                "ownership query failed, treating wallet as holding nothing"
            ),
            Diagnostic::AccessEvaluated {
                wallet,
                collection,
                decision,
            } => debug!(
                wallet = %wallet,
                collection = %collection,
                decision = ?decision,
                "access evaluated"
            ),
            Diagnostic::TraitCheckSkipped { collection, traits } => info!(
                collection = %collection,
                traits = ?traits,
                "trait requirements are not checked yet"
            ),
            Diagnostic::EvaluationTimedOut {
                offer_id,
                timeout_ms,
            } => warn!(offer_id = %offer_id, timeout_ms, "access evaluation timed out"),
            Diagnostic::ListenerStarted { event_type } => {
                info!(event_type = %event_type, "listening for mint events")
            }
            Diagnostic::ListenerStopped { event_type } => {
                info!(event_type = %event_type, "stopped listening for mint events")
            }
            Diagnostic::SubscriptionFailed { event_type, error } => {
                warn!(event_type = %event_type, error = %error, "event subscription failed")
            }
            Diagnostic::EventPollFailed { event_type, error } => {
                warn!(event_type = %event_type, error = %error, "event poll failed")
            }
            Diagnostic::MalformedEvent {
                transaction_id,
                reason,
            } => warn!(
                transaction_id = %transaction_id,
                reason = %reason,
                "skipping malformed mint event"
            ),
            Diagnostic::MintObserved {
                transaction_id,
                token_id,
                owner,
            } => info!(
                transaction_id = %transaction_id,
                token_id = %token_id,
                owner = %owner,
                "mint observed"
            ),
            Diagnostic::RewardSurfaceShown { offers } => info!(offers, "reward surface shown"),
            Diagnostic::WalletChanged { wallet } => {
                info!(wallet = ?wallet, "wallet changed, re-evaluating rewards")
            }
            Diagnostic::StaleRefreshDiscarded { generation } => {
                debug!(generation, "discarding result of superseded refresh")
            }
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, matches: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| matches(d))
            .count()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: Diagnostic) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
