use anyhow::{Context, Result};
use std::env;

use mintgate::{MintGate, RewardOffer, SdkConfig, WalletIdentity};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default = if debug { "mintgate=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn print_offers(offers: &[RewardOffer]) {
    if offers.is_empty() {
        println!("   (none)");
    }
    for offer in offers {
        println!("   🎁 {} [{}] {}", offer.title, offer.category, offer.value);
        if let Some(url) = &offer.redemption_url {
            println!("      redeem at {}", url);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables win
    dotenvy::dotenv().ok();

    let config = SdkConfig::from_env().context("Invalid MINTGATE_* configuration")?;
    init_tracing(config.debug);

    println!("✅ Configuration loaded");
    println!("   Network: {}", config.target_network);
    println!("   Access node: {}", config.access_node_url());
    println!("   Rewards: {}", config.rewards_source_url);

    let gate = MintGate::builder(config)
        .build()
        .context("Failed to set up MintGate")?;

    // 1. Wallet to evaluate, if any
    if let (Ok(address), Some(mirror)) = (env::var("MINTGATE_WALLET"), gate.wallet_mirror()) {
        let provider = env::var("MINTGATE_WALLET_PROVIDER").unwrap_or_else(|_| "cli".to_string());
        mirror.connect(WalletIdentity::connected(address.clone(), provider));
        println!("👛 Wallet: {}", address);
    } else {
        println!("👛 No wallet connected (set MINTGATE_WALLET)");
    }

    // 2. Catalog, evaluation and listener
    gate.start().await?;
    if let Some(err) = gate.last_error() {
        eprintln!("⚠️  Could not load rewards: {}", err);
    }
    if let Some(err) = gate.listener_error() {
        eprintln!("⚠️  Not listening for mints: {}", err);
    }

    println!("\n🔓 Unlocked rewards:");
    print_offers(&gate.rewards()?);

    // 3. Mint notifications until Ctrl-C
    println!("\n👂 Listening for mints (Ctrl-C to quit)...");
    let mut surface = gate.surface();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = surface.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = surface.borrow_and_update().clone();
                if !current.visible {
                    continue;
                }
                match &current.mint {
                    Some(mint) => println!(
                        "\n✨ Mint of token #{} on {}:",
                        mint.token_id, mint.contract_address
                    ),
                    None => println!("\n✨ Rewards:"),
                }
                print_offers(&current.offers);
            }
        }
    }

    gate.shutdown().await;
    println!("\n👋 Stopped");
    Ok(())
}
