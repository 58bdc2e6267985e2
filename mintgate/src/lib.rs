//! NFT-gated rewards for Flow collections.
//!
//! A [`MintGate`] reads a reward catalog, decides which offers the connected
//! wallet unlocks from its on-chain holdings, and watches the collection for
//! new mints so the matching offers can be shown right after a purchase.

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod flow;
pub mod gate;
pub mod listener;
pub mod model;
pub mod oracle;
pub mod sdk;
pub mod task;
pub mod wallet;

pub use config::{Environment, SdkConfig, TargetNetwork};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, SharedSink, TracingSink};
pub use error::{Error, Result, UsageError};
pub use listener::{EventFilter, EventSource, RawEvent, Subscription};
pub use model::{
    MintContext, MintRecord, OwnershipSnapshot, Requirement, RewardCategory, RewardOffer,
    WalletIdentity,
};
pub use oracle::OwnershipOracle;
pub use sdk::{MintGate, MintGateBuilder, Redemption, RewardSurface};
pub use wallet::{WalletMirror, WalletProvider};
