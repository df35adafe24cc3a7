//! ==============================================================================
//! main.rs - safelabs sensor node entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the lab sensor node: reads temperature/humidity, gas and motion,
//!     keeps an occupancy signal, switches the lab AC (relay proxy led) off
//!     when the room is empty, and mirrors everything to the realtime database.
//!
//! responsibilities:
//!     - load node.toml and install the tracing subscriber
//!     - pick the hardware backend (mock, or rppal with --features hardware)
//!     - connect the realtime database client (bounded retries)
//!     - serve the local status/override api
//!     - run the control loop until ctrl-c, then switch the AC off
//!
//! relationships:
//!     - uses: node.rs (control loop), store.rs (database), hal.rs (pins),
//!             api.rs (local http), config.rs (node.toml)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                     node process                          │
//!     │  ┌───────────────┐   commands   ┌──────────────────────┐  │
//!     │  │  local api    │ ───────────▶ │  control loop        │  │
//!     │  │ (port 3000)   │ ◀─────────── │  (single task)       │  │
//!     │  └───────────────┘   status     └──────────┬───────────┘  │
//!     │                                            │              │
//!     └────────────────────────────────────────────┼──────────────┘
//!                              ┌───────────────────┼──────────────┐
//!                              ▼                                  ▼
//!                     ┌────────────────┐                ┌──────────────────┐
//!                     │ gpio / adc /   │                │ realtime db      │
//!                     │ dht22          │                │ (REST)           │
//!                     └────────────────┘                └──────────────────┘
//!
//! ==============================================================================

mod api;
mod automation;
mod clock;
mod config;
mod domain;
mod hal;
mod node;
mod paths;
mod sensors;
mod store;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use crate::domain::NodeStatus;
use crate::store::FirebaseStore;

/// pending manual overrides; the api answers 503 beyond this
const COMMAND_QUEUE: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  SafeLabs Sensor Node");
    println!("  \"Occupancy-aware AC automation\"");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::NodeConfig::load_or_default();
    init_tracing(&config.logging.level);
    config.print_summary();

    // step 2: hardware
    #[cfg(feature = "hardware")]
    let hal = hal::PiHal::new();
    #[cfg(not(feature = "hardware"))]
    let hal = hal::MockHal::new();

    // step 3: realtime database
    let store = FirebaseStore::new(&config.database)?;
    if !store.is_configured() {
        tracing::warn!("[STORE] No database url configured - running offline");
    } else {
        let retry = Duration::from_millis(config.database.connect_retry_ms);
        match store.connect_with_retry(config.database.connect_attempts, retry).await {
            Ok(()) => tracing::info!("[STORE] ✓ Database ready"),
            // the ac poll keeps probing, so this is not fatal
            Err(e) => tracing::warn!("[STORE] Connection failed: {}", e),
        }
    }

    // step 4: shared status + local api
    let status = Arc::new(RwLock::new(NodeStatus::default()));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    if config.api.enabled {
        let api_state = api::ApiState { status: status.clone(), commands: commands_tx.clone() };
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(&bind, api_state).await {
                tracing::error!("[API] server error: {:#}", e);
            }
        });
    }

    // step 5: control loop
    let mut node = node::SensorNode::new(config, hal, store, clock::SystemClock::new(), status)?;
    node.start().await;
    println!("\n✓ System Ready - Starting data collection...\n");

    node.run(commands_rx, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[NODE] cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    drop(commands_tx);
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
