//! # flashcheck - Post-Flash Validation Station
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   apps/flashcheck (THE BINARY)                  │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐    │
//! │  │   CLI       │    │  Query API  │    │  Session runners │    │
//! │  │  (clap)     │    │   (axum)    │    │  (serial links)  │    │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘    │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │                   ┌─────────────────┐                          │
//! │                   │ flashcheck-core │                          │
//! │                   │   (THE LOGIC)   │                          │
//! │                   └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Test the device on /dev/ttyUSB0 after flashing
//! flashcheck run --port /dev/ttyUSB0 --mac 24:0A:C4:12:AB:CD
//!
//! # Today's results
//! flashcheck sessions --date 2026-10-19
//!
//! # Query API
//! flashcheck serve --host 0.0.0.0 --port 8080
//! ```

use clap::Parser;
use flashcheck::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // FLASHCHECK_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("FLASHCHECK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flashcheck=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  ┌─┐┬  ┌─┐┌─┐┬ ┬┌─┐┬ ┬┌─┐┌─┐┬┌─
  ├┤ │  ├─┤└─┐├─┤│  ├─┤├┤ │  ├┴┐
  └  ┴─┘┴ ┴└─┘┴ ┴└─┘┴ ┴└─┘└─┘┴ ┴

  Post-flash validation station v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
