//! The `MintGate` entry point.
//!
//! Wires the catalog, access evaluation, wallet and mint listener together
//! and exposes the consumer operations. Construction is done through
//! [`MintGate::builder`]; nothing touches the network until
//! [`MintGate::start`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::catalog::CatalogFetcher;
use crate::config::SdkConfig;
use crate::diagnostics::{Diagnostic, SharedSink, TracingSink};
use crate::error::{Error, FlowError, UsageError};
use crate::evaluator::AccessEvaluator;
use crate::flow::{FlowAccessClient, FlowEventSource, FlowOwnershipOracle};
use crate::gate::{RewardGate, RewardGateOptions};
use crate::listener::{EventSource, ListenerStatus, MintListener};
use crate::model::{MintContext, MintRecord, Requirement, RewardOffer};
use crate::oracle::OwnershipOracle;
use crate::task::{cancelled, BackgroundTask};
use crate::wallet::{WalletMirror, WalletProvider};

/// What the host application should currently display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardSurface {
    pub visible: bool,
    pub offers: Vec<RewardOffer>,
    /// The mint the offers were narrowed to, if any.
    pub mint: Option<MintContext>,
}

pub type RedeemHandler = Arc<dyn Fn(&RewardOffer) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The registered redeem handler took care of it.
    Handled,
    /// No handler; the host should open the offer's redemption link.
    OpenLink(String),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

pub struct MintGateBuilder {
    config: SdkConfig,
    oracle: Option<Arc<dyn OwnershipOracle>>,
    event_source: Option<Arc<dyn EventSource>>,
    wallet: Option<Arc<dyn WalletProvider>>,
    sink: Option<SharedSink>,
    redeem: Option<RedeemHandler>,
}

impl MintGateBuilder {
    pub fn with_oracle(mut self, oracle: Arc<dyn OwnershipOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// Replaces the built-in [`WalletMirror`]. Providers that report
    /// [`WalletProvider::changes`] are re-evaluated automatically; otherwise
    /// call [`MintGate::refresh`] after the wallet changes.
    pub fn with_wallet_provider(mut self, wallet: Arc<dyn WalletProvider>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_diagnostics(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn on_redeem(mut self, handler: impl Fn(&RewardOffer) + Send + Sync + 'static) -> Self {
        self.redeem = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<MintGate, Error> {
        let config = self.config;
        config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| TracingSink::shared(config.debug));

        let mut http = reqwest::Client::builder();
        if !config.http_timeout.is_zero() {
            http = http.timeout(config.http_timeout);
        }
        let http = http
            .build()
            .map_err(|e| FlowError::Network(e.to_string()))?;

        // Flow adapters fill whatever the integrator did not supply
        let flow = || FlowAccessClient::new(config.access_node_url(), http.clone());
        let oracle: Arc<dyn OwnershipOracle> = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(FlowOwnershipOracle::new(
                flow()?,
                config.target_network.nft_standard_address(),
                config.asset_type.clone(),
            )),
        };
        let event_source: Arc<dyn EventSource> = match self.event_source {
            Some(source) => source,
            None => Arc::new(FlowEventSource::new(
                flow()?,
                config.poll_interval,
                Arc::clone(&sink),
            )),
        };
        let (wallet, mirror): (Arc<dyn WalletProvider>, _) = match self.wallet {
            Some(wallet) => (wallet, None),
            None => {
                let mirror = Arc::new(WalletMirror::new());
                (mirror.clone() as Arc<dyn WalletProvider>, Some(mirror))
            }
        };

        let gate = Arc::new(RewardGate::new(
            CatalogFetcher::new(http.clone(), config.app_base_url()?),
            AccessEvaluator::new(oracle, Arc::clone(&sink)),
            Arc::clone(&wallet),
            RewardGateOptions {
                source: config.rewards_source_url.clone(),
                evaluation_timeout: config.evaluation_timeout,
            },
            Arc::clone(&sink),
        ));

        let (mint_tx, mint_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(MintListener::new(
            event_source,
            config.event_filter()?,
            Arc::new(move |record: MintRecord| {
                // receiver is gone only after shutdown
                let _ = mint_tx.send(record);
            }),
            Arc::clone(&sink),
        ));

        let (surface, _) = watch::channel(RewardSurface::default());
        Ok(MintGate {
            config,
            gate,
            listener,
            wallet,
            mirror,
            sink,
            surface: Arc::new(surface),
            redeem: Mutex::new(self.redeem),
            mints: Mutex::new(Some(mint_rx)),
            lifecycle: Mutex::new(Lifecycle::Created),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

pub struct MintGate {
    config: SdkConfig,
    gate: Arc<RewardGate>,
    listener: Arc<MintListener>,
    wallet: Arc<dyn WalletProvider>,
    mirror: Option<Arc<WalletMirror>>,
    sink: SharedSink,
    surface: Arc<watch::Sender<RewardSurface>>,
    redeem: Mutex<Option<RedeemHandler>>,
    mints: Mutex<Option<mpsc::UnboundedReceiver<MintRecord>>>,
    lifecycle: Mutex<Lifecycle>,
    /// Also serializes `start` and `shutdown`.
    tasks: tokio::sync::Mutex<Vec<BackgroundTask>>,
}

impl fmt::Debug for MintGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintGate")
            .field("config", &self.config)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl MintGate {
    pub fn builder(config: SdkConfig) -> MintGateBuilder {
        MintGateBuilder {
            config,
            oracle: None,
            event_source: None,
            wallet: None,
            sink: None,
            redeem: None,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// The built-in wallet mirror, unless a custom provider was supplied.
    pub fn wallet_mirror(&self) -> Option<Arc<WalletMirror>> {
        self.mirror.clone()
    }

    /// Loads the catalog, starts the mint listener and, if configured, the
    /// auto-refresh loop. A failing initial refresh or subscription does
    /// not fail startup; both are reported and visible through
    /// [`last_error`](Self::last_error) and
    /// [`listener_error`](Self::listener_error).
    pub async fn start(&self) -> Result<(), UsageError> {
        let mut tasks = self.tasks.lock().await;
        match self.lifecycle() {
            Lifecycle::Running => return Ok(()),
            Lifecycle::ShutDown => return Err(UsageError::ShutDown("start")),
            Lifecycle::Created => {}
        }

        // 1. Initial catalog load and evaluation
        if self.gate.refresh().await.is_ok() {
            info!(unlocked = self.gate.unlocked().len(), "rewards loaded");
        }

        // 2. Mint dispatch
        let mints = self
            .mints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mints) = mints {
            tasks.push(self.spawn_dispatcher(mints));
        }

        // 3. Re-evaluation on wallet change
        if let Some(changes) = self.wallet.changes() {
            tasks.push(self.gate.spawn_wallet_watch(changes));
        }

        // 4. Listener
        let _ = self.listener.start_listening().await;

        // 5. Periodic refresh
        if let Some(period) = self.config.auto_refresh_interval() {
            tasks.push(self.gate.spawn_auto_refresh(period));
        }

        self.set_lifecycle(Lifecycle::Running);
        Ok(())
    }

    /// Stops the listener and every background task and hides the surface.
    /// Further calls are no-ops.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.lifecycle() == Lifecycle::ShutDown {
            return;
        }
        self.set_lifecycle(Lifecycle::ShutDown);

        self.listener.stop_listening().await;
        for task in tasks.drain(..) {
            task.shutdown().await;
        }
        self.surface.send_replace(RewardSurface::default());
        info!("mintgate shut down");
    }

    /// Re-reads the catalog and re-evaluates it for the connected wallet.
    pub async fn refresh(&self) -> Result<(), Error> {
        self.ensure_running("refresh")?;
        self.gate.refresh().await?;
        Ok(())
    }

    /// Offers unlocked by the connected wallet.
    pub fn rewards(&self) -> Result<Vec<RewardOffer>, UsageError> {
        self.ensure_running("rewards")?;
        Ok(self.gate.unlocked())
    }

    pub fn last_error(&self) -> Option<String> {
        self.gate.last_error()
    }

    pub async fn listener_status(&self) -> ListenerStatus {
        self.listener.status().await
    }

    pub fn listener_error(&self) -> Option<String> {
        self.listener.last_error()
    }

    /// Makes the reward surface visible with the unlocked offers, narrowed
    /// to `mint` when given.
    pub fn show_rewards(&self, mint: Option<MintContext>) -> Result<(), UsageError> {
        self.ensure_running("show_rewards")?;
        let offers = self.gate.personalized_offers(mint.as_ref());
        show(&self.surface, &self.sink, offers, mint);
        Ok(())
    }

    /// Hides the surface and drops the offers and mint it was showing.
    pub fn hide_rewards(&self) -> Result<(), UsageError> {
        self.ensure_running("hide_rewards")?;
        self.surface.send_replace(RewardSurface::default());
        Ok(())
    }

    /// Observes what should be displayed. Available before `start`.
    pub fn surface(&self) -> watch::Receiver<RewardSurface> {
        self.surface.subscribe()
    }

    /// Checks one requirement against the connected wallet; `false` when no
    /// wallet is connected.
    pub async fn check_access(&self, requirement: &Requirement) -> Result<bool, UsageError> {
        self.ensure_running("check_access")?;
        let Some(wallet) = self.wallet.connected_wallet() else {
            return Ok(false);
        };
        Ok(self.gate.check_access(requirement, &wallet.address).await)
    }

    /// Registers the handler invoked by [`redeem`](Self::redeem), replacing
    /// any previous one.
    pub fn on_redeem(&self, handler: impl Fn(&RewardOffer) + Send + Sync + 'static) {
        *self.redeem.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn redeem(&self, offer: &RewardOffer) -> Result<Redemption, UsageError> {
        self.ensure_running("redeem")?;
        let handler = self
            .redeem
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(offer);
            return Ok(Redemption::Handled);
        }
        Ok(match &offer.redemption_url {
            Some(url) if !url.trim().is_empty() => Redemption::OpenLink(url.clone()),
            _ => Redemption::Unavailable,
        })
    }

    fn spawn_dispatcher(&self, mut mints: mpsc::UnboundedReceiver<MintRecord>) -> BackgroundTask {
        let gate = Arc::clone(&self.gate);
        let surface = Arc::clone(&self.surface);
        let sink = Arc::clone(&self.sink);
        BackgroundTask::spawn("mint-dispatch", move |mut cancel| async move {
            loop {
                let record = tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    record = mints.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };
                sink.record(Diagnostic::MintObserved {
                    transaction_id: record.transaction_id.clone(),
                    token_id: record.token_id.clone(),
                    owner: record.owner.clone(),
                });
                let mint = MintContext::from(&record);
                let offers = gate.personalized_offers(Some(&mint));
                if !offers.is_empty() {
                    show(&surface, &sink, offers, Some(mint));
                }
            }
        })
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), UsageError> {
        match self.lifecycle() {
            Lifecycle::Running => Ok(()),
            Lifecycle::Created => Err(UsageError::NotStarted(operation)),
            Lifecycle::ShutDown => Err(UsageError::ShutDown(operation)),
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

fn show(
    surface: &watch::Sender<RewardSurface>,
    sink: &SharedSink,
    offers: Vec<RewardOffer>,
    mint: Option<MintContext>,
) {
    sink.record(Diagnostic::RewardSurfaceShown {
        offers: offers.len(),
    });
    surface.send_replace(RewardSurface {
        visible: true,
        offers,
        mint,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::error::{OwnershipQueryError, SubscriptionError};
    use crate::listener::{EventFilter, EventHandler, Subscription};
    use crate::model::{OwnershipSnapshot, RewardCategory};
    use async_trait::async_trait;

    struct NoHoldings;

    #[async_trait]
    impl OwnershipOracle for NoHoldings {
        async fn query(&self, _: &str, _: &str) -> Result<OwnershipSnapshot, OwnershipQueryError> {
            Ok(OwnershipSnapshot::empty())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl EventSource for Unreachable {
        async fn subscribe(
            &self,
            filter: &EventFilter,
            _: EventHandler,
        ) -> Result<Subscription, SubscriptionError> {
            Err(SubscriptionError::new(&filter.event_type(), "unreachable"))
        }
    }

    fn offer(redemption_url: Option<&str>) -> RewardOffer {
        RewardOffer {
            id: "r1".into(),
            title: "Poster".into(),
            description: String::new(),
            category: RewardCategory::PhysicalItem,
            value: "1".into(),
            image_url: None,
            expires_at: None,
            requirements: Requirement::for_collection("0xf8d6e0586b0a20c7"),
            redemption_url: redemption_url.map(str::to_string),
            lit_conditions: None,
        }
    }

    fn gate(sink: Arc<MemorySink>) -> MintGate {
        let mut config = SdkConfig::new("key");
        // nothing is served here; the initial refresh fails and is reported
        config.rewards_source_url = "file:///nonexistent/mintgate/rewards.json".into();
        config.auto_refresh = false;
        MintGate::builder(config)
            .with_oracle(Arc::new(NoHoldings))
            .with_event_source(Arc::new(Unreachable))
            .with_diagnostics(sink)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn operations_require_start() {
        let gate = gate(MemorySink::new());
        assert_eq!(gate.rewards().unwrap_err(), UsageError::NotStarted("rewards"));
        assert!(matches!(gate.show_rewards(None), Err(UsageError::NotStarted(_))));
        assert!(matches!(gate.redeem(&offer(None)), Err(UsageError::NotStarted(_))));
        assert!(matches!(
            gate.check_access(&Requirement::for_collection("0x01")).await,
            Err(UsageError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn start_tolerates_failed_refresh_and_subscription() {
        let sink = MemorySink::new();
        let gate = gate(sink.clone());
        gate.start().await.unwrap();

        assert!(gate.rewards().unwrap().is_empty());
        assert!(gate.last_error().is_some());
        assert_eq!(gate.listener_status().await, ListenerStatus::Idle);
        assert!(gate.listener_error().unwrap().contains("unreachable"));
        assert_eq!(sink.count(|d| matches!(d, Diagnostic::RefreshFailed { .. })), 1);

        // starting again is a no-op
        gate.start().await.unwrap();
        assert_eq!(sink.count(|d| matches!(d, Diagnostic::RefreshFailed { .. })), 1);
    }

    #[tokio::test]
    async fn shutdown_is_final() {
        let gate = gate(MemorySink::new());
        gate.start().await.unwrap();
        gate.shutdown().await;
        gate.shutdown().await;
        assert_eq!(gate.rewards().unwrap_err(), UsageError::ShutDown("rewards"));
        assert_eq!(gate.start().await.unwrap_err(), UsageError::ShutDown("start"));
    }

    #[tokio::test]
    async fn redeem_prefers_handler_then_link() {
        let gate = gate(MemorySink::new());
        gate.start().await.unwrap();

        assert_eq!(
            gate.redeem(&offer(Some("https://shop.example/r1"))).unwrap(),
            Redemption::OpenLink("https://shop.example/r1".into())
        );
        assert_eq!(gate.redeem(&offer(None)).unwrap(), Redemption::Unavailable);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        gate.on_redeem(move |offer| store.lock().unwrap().push(offer.id.clone()));
        assert_eq!(
            gate.redeem(&offer(Some("https://shop.example/r1"))).unwrap(),
            Redemption::Handled
        );
        assert_eq!(*seen.lock().unwrap(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn check_access_without_wallet_is_false() {
        let gate = gate(MemorySink::new());
        gate.start().await.unwrap();
        assert!(gate.wallet_mirror().is_some());
        assert!(!gate
            .check_access(&Requirement::for_collection("0xf8d6e0586b0a20c7"))
            .await
            .unwrap());
    }

    #[test]
    fn mainnet_without_contract_is_rejected() {
        let mut config = SdkConfig::new("key");
        config.target_network = crate::config::TargetNetwork::Mainnet;
        let err = MintGate::builder(config)
            .with_oracle(Arc::new(NoHoldings))
            .with_event_source(Arc::new(Unreachable))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
