use std::net::SocketAddr;
use tracing::info;

use super::{routes::create_router, state::AppState};
use crate::coordination::ShutdownToken;
use crate::error::{DroverError, Result};

/// HTTP control and probe server
#[derive(Clone)]
pub struct ApiServer {
    state: AppState,
    addr: SocketAddr,
}

impl ApiServer {
    pub fn new(state: AppState, host: &str, port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|e| {
            DroverError::Validation(format!("invalid API address {}:{}: {}", host, port, e))
        })?;
        Ok(Self { state, addr })
    }

    /// Serve until the token fires
    pub async fn run(&self, mut token: ShutdownToken) -> Result<()> {
        let app = create_router(self.state.clone());

        info!("Starting API server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| DroverError::Internal(format!("API server error: {}", e)))?;

        info!("API server stopped");
        Ok(())
    }
}
