//! Demonstration host: a service with a WebSocket control plane.
//!
//! Run with: cargo run -p console-server-demo
//!
//! Then connect a WebSocket client to ws://localhost:3000/ws and send:
//!   {"type":"hello","client_name":"console","machine_name":"ops-1"}
//!   {"type":"command","text":"Help"}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use svc_control_core::traits::{Credentials, Principal, SecurityProvider, Transport};
use svc_control_core::MemorySettings;
use svc_control_plane::{ControlConfig, ServiceController};
use svc_control_process::JobFn;
use svc_control_transport::{TransportEvent, WsState, WsTransport, create_ws_router};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Accepts any presented credentials; commands are not access-checked.
struct OpenSecurity;

impl SecurityProvider for OpenSecurity {
    fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Principal> {
        credentials.map(|c| Principal {
            name: c.username.clone(),
            authenticated: true,
        })
    }

    fn is_resource_securable(&self, _command: &str) -> bool {
        false
    }

    fn is_resource_accessible(&self, _principal: &Principal, _command: &str) -> bool {
        true
    }
}

fn backup_job() -> JobFn {
    Arc::new(|ctx| {
        Box::pin(async move {
            tracing::info!(args = ?ctx.args, "backup running");
            let mut cancel = ctx.cancel;
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(10)) => {
                    tracing::info!("backup finished");
                }
                _ = &mut cancel => {
                    tracing::info!("backup aborted");
                }
            }
            Ok(())
        })
    })
}

fn cleanup_job() -> JobFn {
    Arc::new(|_ctx| {
        Box::pin(async {
            tracing::info!("cleanup finished");
            Ok(())
        })
    })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ControlConfig {
        service_name: "DemoService".to_string(),
        support_telnet_sessions: true,
        ..ControlConfig::default()
    };

    let transport = Arc::new(WsTransport::new());
    let controller = ServiceController::new(
        config,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(OpenSecurity),
        Arc::new(MemorySettings::new()),
    );

    controller.add_process("Backup", backup_job(), vec!["incremental".to_string()]);
    controller
        .add_scheduled_process("Cleanup", cleanup_job(), vec![], "0 0 * * *")
        .expect("cleanup schedule rule is valid");
    controller.start().await.expect("control plane failed to start");

    // Pump transport events into the controller.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let pump = Arc::clone(&controller);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::Connected(id) => pump.on_client_connected(id),
                TransportEvent::Payload(id, payload) => pump.on_client_data(id, payload).await,
                TransportEvent::Disconnected(id) => pump.on_client_disconnected(id).await,
            }
        }
    });

    let app = create_ws_router(WsState {
        transport,
        events: events_tx,
    })
    .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("control plane listening on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
