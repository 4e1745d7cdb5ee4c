//! # Storefront
//!
//! Order and payment server.
//!
//! ## Usage
//!
//! ```bash
//! # Optional overrides (see config/shop.toml)
//! export BASE_URL=https://shop.example.com
//! export DUMMY_PAYMENT_SUCCESS_RATE=80
//! export LOG_FORMAT=json
//!
//! # Run the server
//! storefront
//! ```

use shop_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    print_banner();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!(
        "Payment providers: {:?}",
        state.payments.registry().codes()
    );
    info!("Webhook ack policy: {:?}", state.webhook_ack);

    let app = routes::create_router(state);

    info!("🚀 Storefront starting on http://{}", addr);

    if !is_prod {
        info!("📝 Health: http://{}/health", addr);
        info!("🛒 Orders: POST http://{}/api/v1/orders", addr);
        info!("🔔 Webhook: POST http://{}/webhook/{{provider}}", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn print_banner() {
    println!(
        r#"
  🛒 Storefront 🛒
  ━━━━━━━━━━━━━━━━━━━━━━━
  Orders and payments
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
