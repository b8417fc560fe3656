//! Startup wiring: configuration, logging and the orchestrator.

use anyhow::{Context, Result};
use conclave_config::AppConfig;
use conclave_dispatch::{Executor, Orchestrator, SimulatedExecutor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Load configuration from `path` when given, otherwise from the standard
/// locations.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    Ok(config)
}

/// Build an orchestrator around `executor`.
pub fn build_orchestrator(config: AppConfig, executor: Arc<dyn Executor>) -> Result<Orchestrator> {
    let pools = config.pools.len();
    let orchestrator =
        Orchestrator::new(config, executor).context("building orchestrator from config")?;
    tracing::info!(
        "Orchestrator ready: {} workers across {} configured pools",
        orchestrator.registry().len(),
        pools
    );
    Ok(orchestrator)
}

/// Default executor when no inference backend is wired in.
pub fn simulated_executor(delay_ms: u64) -> Arc<dyn Executor> {
    Arc::new(SimulatedExecutor::new(Duration::from_millis(delay_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [api]
            port = 4100

            [[pools]]
            name = "primary"

            [[pools.workers]]
            id = "analyst"
            capabilities = ["analysis"]
            "#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.api.port, 4100);

        let orchestrator = build_orchestrator(config, simulated_executor(0)).unwrap();
        assert!(orchestrator.registry().contains("analyst"));
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/conclave.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/conclave.toml"));
    }
}
