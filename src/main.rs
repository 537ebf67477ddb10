mod sync;
mod transport;

use std::sync::Arc;
use tracing::{error, info};

use crate::sync::{
    CriticalTable, LogNotifier, RealtimeSyncConfig, RealtimeSyncStack, TableRow,
};
use crate::transport::{GatewayClient, WebPlatform};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();

    info!("Starting realtime sync service");

    let http_url = std::env::var("IMMOO_GATEWAY_HTTP_URL")
        .unwrap_or_else(|_| "http://localhost:4000".to_string());
    let ws_url = std::env::var("IMMOO_GATEWAY_WS_URL")
        .unwrap_or_else(|_| "ws://localhost:4000/realtime".to_string());
    let user_id = std::env::var("IMMOO_USER_ID").ok();

    let transport = match GatewayClient::new(http_url, ws_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create gateway client: {}", e);
            return;
        }
    };
    let stack = RealtimeSyncStack::new(
        transport,
        Arc::new(WebPlatform),
        Arc::new(LogNotifier),
        RealtimeSyncConfig::default(),
    );

    let _unregister_errors = stack.errors().on_error(|sync_error| {
        info!(
            "Sync error observed: [{}/{}] {}",
            sync_error.category, sync_error.severity, sync_error.message
        );
    });

    let _unregister_properties =
        stack
            .listeners()
            .register_callback(CriticalTable::Properties, |change| {
                if let Some(TableRow::Property(property)) = &change.new {
                    info!(
                        "Property change: {} {}",
                        change.event_type.as_str(),
                        property.title
                    );
                }
            });

    if let Err(e) = stack.start(user_id.as_deref()).await {
        error!("Failed to start realtime sync: {}", e);
        return;
    }

    info!("Realtime sync running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    stack.stop().await;
    info!("Realtime sync stopped");
}
