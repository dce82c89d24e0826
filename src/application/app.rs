use crate::config::Settings;
use crate::proxy::state::{ConfigCell, PublicState};
use crate::proxy::types::SERVICE_NAME;
use crate::proxy::{EventWriter, ProxyService, Recorder};
use crate::Result;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    listener: TcpListener,
    config: Arc<ConfigCell>,
    service: ProxyService,
}

/// The single line printed to stdout once the listener is bound
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupInfo {
    pub service: &'static str,
    pub bind: String,
    pub port: u16,
    #[serde(flatten)]
    pub state: PublicState,
}

impl Application {
    /// Bind the listener and wire the proxy service
    #[instrument(skip(settings), fields(bind = %settings.bind, port = settings.port))]
    pub async fn new(settings: Settings) -> Result<Self> {
        let listener = TcpListener::bind((settings.bind.as_str(), settings.port)).await?;
        let config = Arc::new(ConfigCell::new(settings.runtime.clone()));
        let base_dir = std::env::current_dir()?;
        let service = ProxyService::new(Arc::clone(&config), EventWriter::spawn(), base_dir)?;

        Ok(Self {
            settings,
            listener,
            config,
            service,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn startup_info(&self) -> Result<StartupInfo> {
        Ok(StartupInfo {
            service: SERVICE_NAME,
            bind: self.settings.bind.clone(),
            port: self.local_addr()?.port(),
            state: self.config.snapshot().public_view(),
        })
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then flush the capture log
    #[instrument(skip_all)]
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let startup = serde_json::to_string(&self.startup_info()?)?;
        println!("{startup}");
        info!(addr = %self.local_addr()?, "modelbox listening");

        let recorder: Recorder = self.service.recorder().clone();
        axum::serve(self.listener, self.service.into_router())
            .with_graceful_shutdown(shutdown)
            .await?;

        recorder.flush().await;
        info!("modelbox stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn binds_an_ephemeral_port_and_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("cap.jsonl");
        let mut settings = Settings::from_vars(
            [("MODELBOX_MODE", "mock"), ("MODELBOX_UPSTREAM_API_KEY", "secret")],
            Path::new("/"),
        )
        .unwrap();
        settings.port = 0;
        settings.runtime.log_file_path = log.clone();

        let app = Application::new(settings).await.unwrap();
        let info = app.startup_info().unwrap();
        let json = serde_json::to_value(&info).unwrap();

        assert_ne!(info.port, 0);
        assert_eq!(json["service"], "modelbox");
        assert_eq!(json["bind"], "127.0.0.1");
        assert_eq!(json["mode"], "mock");
        assert_eq!(json["hasUpstreamApiKey"], true);
        assert_eq!(json["logFile"], log.display().to_string());
        assert!(!json.to_string().contains("\"secret\""));
    }
}
