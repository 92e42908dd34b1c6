use anyhow::{Context, Result};
use std::sync::Arc;
use fieldcore::config::HostConfig;
use fieldcore::core::{field_context, run_tick_driver, FieldRegistry, HostState};
use fieldcore::social::LocalSocialRegistry;
use fieldcore::template::TemplateCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/host.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: field_host [--conf FILE]");
                return Ok(());
            }
            "--conf" if i + 1 < args.len() => { i += 1; conf_file = args[i].clone(); }
            _ => {}
        }
        i += 1;
    }

    let config = HostConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    let catalog = TemplateCatalog::from_file(&config.templates)
        .with_context(|| format!("Cannot load templates: {}", config.templates))?;

    let state = HostState::from_config(&config);
    tracing::info!(
        "[host] Field Host Started. node={} world={} channel={}",
        state.node_name, state.world_id, state.channel_id
    );

    let social = Arc::new(LocalSocialRegistry::new());
    let context = field_context(&config, social);
    let registry = FieldRegistry::build(&catalog, &config.fields, &context)
        .context("Cannot build fields")?;

    let driver = tokio::spawn(run_tick_driver(
        registry.fields(),
        config.tick_interval(),
        state.subscribe_shutdown(),
    ));

    tracing::info!(
        "[host] [ready] {} fields on {}:{}",
        registry.len(), state.host, state.port
    );

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("[host] Shutting down...");
    state.request_shutdown();
    driver.await.context("Tick driver panicked")?;
    Ok(())
}
