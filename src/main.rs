use anyhow::Context;
use abstractor::{app, cli::args_from_env, config::Config, logging::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = args_from_env()?;
    let config = Config::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;
    let logging_guard = init_tracing(&config.logging).context("failed to initialize logging")?;

    let summary = app::run(config, logging_guard.run_id(), args.patients).await?;
    eprintln!(
        "abstractor finished: {} completed, {} failed, {} cancelled, {} low-confidence, {} with overrides",
        summary.patients_completed,
        summary.patients_failed,
        summary.patients_cancelled,
        summary.low_confidence_patients,
        summary.override_patients
    );
    Ok(())
}
