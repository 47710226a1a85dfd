//! Shadow Attack Data - Main Entry Point

use anyhow::Context;

use shadow_attack_data::constants::{load_dotenv, APP_NAME, APP_VERSION};
use shadow_attack_data::{run, PipelineConfig};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() -> anyhow::Result<()> {
    // .env first so RUST_LOG from it reaches the logger
    let env_file = load_dotenv(None);
    init_logging();
    if let Some(path) = env_file {
        log::info!("Loaded environment from {}", path.display());
    }

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);
    log::info!("Using device: CPU (native ndarray inference)");

    let config = PipelineConfig::from_env().context("Failed to load configuration")?;
    log::info!("Shadow data: {}", config.shadow_data_dir.display());
    log::info!("Models: {}", config.model_dir.display());
    log::info!("Output: {}", config.output_dir.display());

    let report = run(&config).context("Attack data pipeline failed")?;

    if let Some(combined) = &report.combined {
        log::info!(
            "Done: {} models, {} skipped, {} attacker train / {} test records",
            report.models.len(),
            report.skipped.len(),
            combined.train_records,
            combined.test_records
        );
    } else {
        log::info!(
            "Done: {} models, {} skipped (combine disabled)",
            report.models.len(),
            report.skipped.len()
        );
    }

    Ok(())
}
