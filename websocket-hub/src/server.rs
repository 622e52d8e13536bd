use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::HubConfig,
    dispatch::Dispatcher,
    error::{ErrorReceiver, HubError},
    hub::Hub,
    registry::PeerInfo,
    transport::{TransportError, split_socket},
};

#[derive(Clone)]
struct AppState {
    hub: Hub,
    config: HubConfig,
}

/// A hub served over WebSocket on a bound listener.
pub struct Server {
    listener: TcpListener,
    hub: Hub,
    dispatcher: Dispatcher,
    errors: ErrorReceiver,
    config: HubConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: HubConfig) -> Self {
        let (hub, dispatcher, errors) = Hub::new(&config);
        Self {
            listener,
            hub,
            dispatcher,
            errors,
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            hub,
            dispatcher,
            errors,
            config,
        } = self;

        tokio::spawn(log_errors(errors));

        let (stop_dispatch, dispatch_stopped) = oneshot::channel::<()>();
        let dispatch = tokio::spawn(dispatcher.run_until(async move {
            let _ = dispatch_stopped.await;
        }));

        let app = router(AppState {
            hub: hub.clone(),
            config,
        });
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("hub shutting down");
        hub.close_all().await;
        let _ = stop_dispatch.send(());
        if let Err(err) = dispatch.await {
            warn!(error = ?err, "dispatch loop ended abnormally");
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(&state.config.path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let AppState { hub, config } = state;
    let errors = hub.errors();

    ws.write_buffer_size(config.write_buffer_size)
        .on_failed_upgrade(move |err| {
            warn!(%remote_addr, error = %err, "websocket upgrade failed");
            errors.report(HubError::Upgrade(TransportError::new(err)));
        })
        .on_upgrade(move |socket| handle_socket(socket, remote_addr, hub))
}

async fn handle_socket(socket: WebSocket, remote_addr: SocketAddr, hub: Hub) {
    let (sink, stream) = split_socket(socket);
    hub.connect(sink, stream, PeerInfo::new(remote_addr));
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "peers": state.hub.registry().len(),
    }))
}

async fn log_errors(mut errors: ErrorReceiver) {
    while let Some(error) = errors.recv().await {
        warn!(%error, "hub error");
    }
}
