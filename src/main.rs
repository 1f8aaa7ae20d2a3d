use anyhow::Context;

use bank_ledger::config::AppConfig;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn init_schema_requested() -> bool {
    std::env::args().any(|a| a == "--init-schema")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).context("Failed to load config")?;
    let _log_guard = bank_ledger::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        driver = %app_config.database.driver,
        "Starting bank ledger"
    );

    let ledger = bank_ledger::service::connect(&app_config, init_schema_requested())
        .await
        .context("Failed to open ledger store")?;

    bank_ledger::gateway::run_server(&app_config.server_address, ledger)
        .await
        .with_context(|| format!("Gateway failed on {}", app_config.server_address))?;

    Ok(())
}
