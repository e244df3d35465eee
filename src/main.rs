//! Vertex AI Proxy - OpenAI-compatible gateway for Google Vertex AI

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vertex_proxy::{
    auth::{ApplicationDefaultCredentials, CredentialProvider},
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, ModelCatalog},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Models { ref format }) => run_models(&cli, format),
        Some(Command::Config) => run_print_config(&cli),
        Some(Command::CheckAuth) => run_check_auth(&cli).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Print the advertised models
fn run_models(cli: &Cli, format: &str) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    let catalog = ModelCatalog::from_config(&config.vertex);

    if format == "json" {
        match serde_json::to_string_pretty(&catalog.list()) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize models: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        for id in catalog.ids() {
            println!("{id}");
        }
    }
    ExitCode::SUCCESS
}

/// Print the merged configuration
fn run_print_config(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Fetch one token to verify credentials
async fn run_check_auth(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    let adc = match ApplicationDefaultCredentials::new() {
        Ok(adc) => adc,
        Err(e) => {
            error!("Failed to create credential provider: {e}");
            return ExitCode::FAILURE;
        }
    };

    match adc.fetch(&config.auth.scopes).await {
        Ok(credential) => {
            let remaining = credential.time_until_expiry().unwrap_or_default();
            println!(
                "Credentials OK: token expires at {} (in {}s)",
                credential.expiry,
                remaining.as_secs()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to obtain access token: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        vertexai_location = %config.vertex.location,
        vertexai_project = %config.vertex.project,
        "Configuration"
    );

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting Vertex AI proxy"
    );

    let provider: Arc<dyn CredentialProvider> = match ApplicationDefaultCredentials::new() {
        Ok(adc) => Arc::new(adc),
        Err(e) => {
            error!("Failed to create credential provider: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match Gateway::new(config, provider) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
