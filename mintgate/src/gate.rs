//! Reward gate: which catalog offers a wallet currently unlocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::catalog::CatalogFetcher;
use crate::diagnostics::{Diagnostic, SharedSink};
use crate::error::FetchError;
use crate::evaluator::AccessEvaluator;
use crate::model::{MintContext, Requirement, RewardOffer, WalletIdentity};
use crate::task::{cancelled, BackgroundTask};
use crate::wallet::WalletProvider;

#[derive(Debug, Clone)]
pub struct RewardGateOptions {
    pub source: String,
    /// Upper bound for a single offer's evaluation; on expiry the offer is
    /// left out.
    pub evaluation_timeout: Duration,
}

#[derive(Debug, Default)]
struct GateState {
    catalog: Vec<RewardOffer>,
    unlocked: Vec<RewardOffer>,
    /// Wallet address `unlocked` was evaluated for.
    evaluated_for: Option<String>,
    /// Generation of the last applied refresh or reset.
    generation: u64,
    last_error: Option<String>,
}

pub struct RewardGate {
    fetcher: CatalogFetcher,
    evaluator: AccessEvaluator,
    wallet: Arc<dyn WalletProvider>,
    options: RewardGateOptions,
    sink: SharedSink,
    state: RwLock<GateState>,
    generations: AtomicU64,
}

impl RewardGate {
    pub fn new(
        fetcher: CatalogFetcher,
        evaluator: AccessEvaluator,
        wallet: Arc<dyn WalletProvider>,
        options: RewardGateOptions,
        sink: SharedSink,
    ) -> Self {
        Self {
            fetcher,
            evaluator,
            wallet,
            options,
            sink,
            state: RwLock::new(GateState::default()),
            generations: AtomicU64::new(0),
        }
    }

    /// Re-reads the catalog and re-evaluates every offer for the connected
    /// wallet. On failure the previous unlocked set stays in place.
    ///
    /// Overlapping refreshes are applied in the order they started; a
    /// refresh that finishes after a newer one was applied is discarded.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let generation = self.next_generation();
        let offers = match self.fetcher.fetch(&self.options.source).await {
            Ok(offers) => offers,
            Err(e) => {
                self.sink.record(Diagnostic::RefreshFailed {
                    error: e.to_string(),
                });
                let mut state = self.write_state();
                if state.generation < generation {
                    state.last_error = Some(e.to_string());
                }
                return Err(e);
            }
        };
        self.sink.record(Diagnostic::CatalogFetched {
            location: self.options.source.clone(),
            offers: offers.len(),
        });

        let wallet = self.wallet.connected_wallet();
        let unlocked = match &wallet {
            Some(wallet) => self.unlock(&offers, &wallet.address).await,
            None => Vec::new(),
        };
        let wallet = wallet.map(|w| w.address);
        self.sink.record(Diagnostic::OffersUnlocked {
            wallet: wallet.clone(),
            unlocked: unlocked.len(),
            total: offers.len(),
        });

        let mut state = self.write_state();
        if state.generation > generation {
            drop(state);
            self.sink
                .record(Diagnostic::StaleRefreshDiscarded { generation });
            return Ok(());
        }
        state.generation = generation;
        state.catalog = offers;
        state.unlocked = unlocked;
        state.evaluated_for = wallet;
        state.last_error = None;
        Ok(())
    }

    /// Withdraws the unlocked set right away, e.g. when the wallet goes
    /// away. Refreshes still in flight are discarded.
    pub fn clear_unlocked(&self) {
        let generation = self.next_generation();
        let mut state = self.write_state();
        state.generation = generation;
        state.unlocked.clear();
        state.evaluated_for = None;
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Evaluates all offers concurrently and keeps the granted ones in
    /// catalog order.
    async fn unlock(&self, offers: &[RewardOffer], wallet: &str) -> Vec<RewardOffer> {
        let timeout = self.options.evaluation_timeout;
        let checks = offers.iter().map(|offer| async move {
            match tokio::time::timeout(timeout, self.evaluator.evaluate(&offer.requirements, wallet))
                .await
            {
                Ok(true) => Some(offer.clone()),
                Ok(false) => None,
                Err(_) => {
                    self.sink.record(Diagnostic::EvaluationTimedOut {
                        offer_id: offer.id.clone(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                    None
                }
            }
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Offers unlocked by the last successful refresh. Empty when that
    /// refresh was for a wallet other than the one connected now.
    pub fn unlocked(&self) -> Vec<RewardOffer> {
        let current = self.wallet.connected_wallet().map(|w| w.address);
        let state = self.read_state();
        if state.evaluated_for.is_none() || state.evaluated_for != current {
            return Vec::new();
        }
        state.unlocked.clone()
    }

    /// The raw catalog of the last successful refresh.
    pub fn catalog(&self) -> Vec<RewardOffer> {
        self.read_state().catalog.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_state().last_error.clone()
    }

    /// Narrows the unlocked set to offers relevant to one mint.
    pub fn personalized_offers(&self, mint: Option<&MintContext>) -> Vec<RewardOffer> {
        personalize(&self.unlocked(), mint)
    }

    /// Ad hoc access check, independent of the catalog.
    pub async fn check_access(&self, requirement: &Requirement, wallet: &str) -> bool {
        self.evaluator.evaluate(requirement, wallet).await
    }

    /// Re-runs [`refresh`](Self::refresh) every `period` until the returned
    /// task is shut down or dropped. The first run happens one period from
    /// now.
    pub fn spawn_auto_refresh(self: &Arc<Self>, period: Duration) -> BackgroundTask {
        let gate = Arc::clone(self);
        BackgroundTask::spawn("reward-auto-refresh", move |mut cancel| async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    _ = ticker.tick() => {
                        // failures are already recorded by refresh
                        let _ = gate.refresh().await;
                    }
                }
            }
        })
    }

    /// Re-evaluates whenever `changes` reports a different wallet. The
    /// previous wallet's offers are withdrawn before the new evaluation
    /// starts.
    pub fn spawn_wallet_watch(
        self: &Arc<Self>,
        mut changes: watch::Receiver<Option<WalletIdentity>>,
    ) -> BackgroundTask {
        let gate = Arc::clone(self);
        BackgroundTask::spawn("wallet-watch", move |mut cancel| async move {
            let mut current = usable_address(&changes.borrow_and_update());
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = usable_address(&changes.borrow_and_update());
                        if next == current {
                            continue;
                        }
                        current = next;
                        gate.sink.record(Diagnostic::WalletChanged {
                            wallet: current.clone(),
                        });
                        gate.clear_unlocked();
                        let _ = gate.refresh().await;
                    }
                }
            }
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, GateState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, GateState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn usable_address(wallet: &Option<WalletIdentity>) -> Option<String> {
    wallet
        .as_ref()
        .filter(|w| w.is_usable())
        .map(|w| w.address.clone())
}

/// Without a mint every offer passes. With one, the offer's collection must
/// match the mint contract (ignoring case) and, if the offer lists token
/// ids, the minted token must be one of them.
pub fn personalize(offers: &[RewardOffer], mint: Option<&MintContext>) -> Vec<RewardOffer> {
    let Some(mint) = mint else {
        return offers.to_vec();
    };
    offers
        .iter()
        .filter(|offer| {
            let req = &offer.requirements;
            req.targets(&mint.contract_address)
                && (!req.restricts_tokens()
                    || req.required_token_ids().iter().any(|id| *id == mint.token_id))
        })
        .cloned()
        .collect()
}
