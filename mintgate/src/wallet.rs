use tokio::sync::watch;

use crate::model::WalletIdentity;

/// Capability to read the currently connected wallet.
pub trait WalletProvider: Send + Sync {
    fn connected_wallet(&self) -> Option<WalletIdentity>;

    /// Notified whenever the connected wallet may have changed. Providers
    /// without one leave re-evaluation to an explicit refresh; until then
    /// offers evaluated for another wallet are withheld.
    fn changes(&self) -> Option<watch::Receiver<Option<WalletIdentity>>> {
        None
    }
}

/// Mirrors the state of an external wallet connector.
///
/// The integrator pushes connector changes in; each change replaces the
/// identity wholesale. Identities that are not usable read as absent.
#[derive(Debug)]
pub struct WalletMirror {
    state: watch::Sender<Option<WalletIdentity>>,
}

impl Default for WalletMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletMirror {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn connect(&self, identity: WalletIdentity) {
        self.state.send_replace(Some(identity));
    }

    pub fn disconnect(&self) {
        self.state.send_replace(None);
    }

    /// Notified on every connect/disconnect.
    pub fn subscribe(&self) -> watch::Receiver<Option<WalletIdentity>> {
        self.state.subscribe()
    }
}

impl WalletProvider for WalletMirror {
    fn connected_wallet(&self) -> Option<WalletIdentity> {
        self.state
            .borrow()
            .as_ref()
            .filter(|w| w.is_usable())
            .cloned()
    }

    fn changes(&self) -> Option<watch::Receiver<Option<WalletIdentity>>> {
        Some(self.subscribe())
    }
}
