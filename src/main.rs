use anyhow::Result;
use modelbox::config::{LogFormat, Settings};
use modelbox::Application;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(settings.log_format);

    info!(mode = %settings.runtime.mode, "Starting modelbox");

    let app = Application::new(settings).await?;
    app.run().await?;

    Ok(())
}

// stdout is reserved for the startup line
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}
