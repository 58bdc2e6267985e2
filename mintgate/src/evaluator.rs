use std::sync::Arc;

use crate::diagnostics::{Diagnostic, SharedSink};
use crate::model::{OwnershipSnapshot, Requirement};
use crate::oracle::OwnershipOracle;

/// Outcome of the access rules for one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    NoHoldings,
    InsufficientBalance { required: u64, held: u64 },
    MissingRequiredToken,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// The conjunctive rule set, first failing rule wins.
///
/// Trait requirements are not evaluated here; see [`AccessEvaluator::evaluate`].
pub fn decide(requirement: &Requirement, snapshot: &OwnershipSnapshot) -> AccessDecision {
    if !snapshot.has_nfts {
        return AccessDecision::NoHoldings;
    }

    if let Some(required) = requirement.min_balance.filter(|&min| min > 0) {
        if snapshot.balance < required {
            return AccessDecision::InsufficientBalance {
                required,
                held: snapshot.balance,
            };
        }
    }

    // any one of the listed tokens is enough
    if requirement.restricts_tokens()
        && !requirement
            .required_token_ids()
            .iter()
            .any(|id| snapshot.owns(id))
    {
        return AccessDecision::MissingRequiredToken;
    }

    AccessDecision::Granted
}

/// Decides whether a wallet unlocks a requirement. Fails closed.
#[derive(Clone)]
pub struct AccessEvaluator {
    oracle: Arc<dyn OwnershipOracle>,
    sink: SharedSink,
}

impl AccessEvaluator {
    pub fn new(oracle: Arc<dyn OwnershipOracle>, sink: SharedSink) -> Self {
        Self { oracle, sink }
    }

    pub async fn evaluate(&self, requirement: &Requirement, wallet: &str) -> bool {
        let collection = &requirement.contract_address;

        // 1. Snapshot; an oracle failure counts as holding nothing
        let snapshot = match self.oracle.query(wallet, collection).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.sink.record(Diagnostic::OwnershipQueryFailed {
                    wallet: wallet.to_string(),
                    collection: collection.clone(),
                    error: e.to_string(),
                });
                OwnershipSnapshot::empty()
            }
        };

        // 2. Ownership, balance and token rules
        let decision = decide(requirement, &snapshot);

        // 3. Traits pass unchecked
        if decision.is_granted() && requirement.has_traits() {
            self.sink.record(Diagnostic::TraitCheckSkipped {
                collection: collection.clone(),
                traits: requirement
                    .traits
                    .iter()
                    .flat_map(|t| t.keys().cloned())
                    .collect(),
            });
        }

        self.sink.record(Diagnostic::AccessEvaluated {
            wallet: wallet.to_string(),
            collection: collection.clone(),
            decision,
        });
        decision.is_granted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::error::OwnershipQueryError;
    use async_trait::async_trait;

    struct FixedOracle(Result<OwnershipSnapshot, String>);

    #[async_trait]
    impl OwnershipOracle for FixedOracle {
        async fn query(
            &self,
            wallet: &str,
            collection: &str,
        ) -> Result<OwnershipSnapshot, OwnershipQueryError> {
            self.0
                .clone()
                .map_err(|m| OwnershipQueryError::new(wallet, collection, m))
        }
    }

    fn evaluator(result: Result<OwnershipSnapshot, String>) -> (AccessEvaluator, Arc<MemorySink>) {
        let sink = MemorySink::new();
        (
            AccessEvaluator::new(Arc::new(FixedOracle(result)), sink.clone()),
            sink,
        )
    }

    fn snapshot(balance: u64, ids: &[&str]) -> OwnershipSnapshot {
        OwnershipSnapshot {
            has_nfts: balance > 0,
            balance,
            token_ids: ids.iter().map(|s| s.to_string()).collect(),
            metadata: Vec::new(),
        }
    }

    #[test]
    fn unrestricted_requirement_follows_holdings() {
        let req = Requirement::for_collection("0xabc");
        assert_eq!(decide(&req, &snapshot(0, &[])), AccessDecision::NoHoldings);
        assert_eq!(decide(&req, &snapshot(1, &["1"])), AccessDecision::Granted);

        let zero = Requirement::for_collection("0xabc").with_min_balance(0);
        assert_eq!(decide(&zero, &snapshot(1, &["1"])), AccessDecision::Granted);
        assert_eq!(decide(&zero, &snapshot(0, &[])), AccessDecision::NoHoldings);
    }

    #[test]
    fn min_balance_is_enforced() {
        let req = Requirement::for_collection("0xABC").with_min_balance(2);
        assert_eq!(
            decide(&req, &snapshot(1, &["1"])),
            AccessDecision::InsufficientBalance {
                required: 2,
                held: 1
            }
        );
        assert_eq!(
            decide(&req, &snapshot(3, &["1", "2", "3"])),
            AccessDecision::Granted
        );
    }

    #[test]
    fn token_ids_need_one_match() {
        let req = Requirement::for_collection("0xabc").with_token_ids(["7", "9"]);
        assert_eq!(decide(&req, &snapshot(1, &["9"])), AccessDecision::Granted);
        assert_eq!(
            decide(&req, &snapshot(2, &["1", "2"])),
            AccessDecision::MissingRequiredToken
        );

        let empty = Requirement::for_collection("0xabc").with_token_ids(Vec::<String>::new());
        assert_eq!(decide(&empty, &snapshot(1, &["1"])), AccessDecision::Granted);
    }

    #[test]
    fn balance_is_checked_before_tokens() {
        let req = Requirement::for_collection("0xabc")
            .with_min_balance(2)
            .with_token_ids(["7"]);
        assert!(matches!(
            decide(&req, &snapshot(1, &["7"])),
            AccessDecision::InsufficientBalance { .. }
        ));
        assert_eq!(decide(&req, &snapshot(2, &["7", "8"])), AccessDecision::Granted);
    }

    #[tokio::test]
    async fn oracle_failure_denies() {
        let (evaluator, sink) = evaluator(Err("script failed".into()));
        let granted = evaluator
            .evaluate(&Requirement::for_collection("0xabc"), "0x01")
            .await;
        assert!(!granted);
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::OwnershipQueryFailed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn traits_pass_with_notice() {
        let (evaluator, sink) = evaluator(Ok(snapshot(1, &["1"])));
        let req = Requirement::for_collection("0xabc").with_trait("background", "forest");
        assert!(evaluator.evaluate(&req, "0x01").await);
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::TraitCheckSkipped { traits, .. } if traits == &["background".to_string()])),
            1
        );
    }

    #[tokio::test]
    async fn denied_requirement_with_traits_has_no_trait_notice() {
        let (evaluator, sink) = evaluator(Ok(snapshot(0, &[])));
        let req = Requirement::for_collection("0xabc").with_trait("background", "forest");
        assert!(!evaluator.evaluate(&req, "0x01").await);
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::TraitCheckSkipped { .. })),
            0
        );
    }
}
