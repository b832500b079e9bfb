use clap::Subcommand;
use serde_json::{Value, json};
use toolbridge_core::catalog::validate_catalog;
use toolbridge_core::error::BridgeError;
use toolbridge_mcp_runtime::BridgeConfig;
use toolbridge_mcp_runtime::backend::BackendClient;
use toolbridge_mcp_runtime::util::to_pretty_json;

use crate::util::{api_request, exit_error, print_json};

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Fetch the backend catalog directly and report which entries survive validation
    Check {
        /// Backend base URL (otherwise TOOLBRIDGE_BACKEND_URL)
        #[arg(long, env = "TOOLBRIDGE_BACKEND_URL")]
        backend_url: Option<String>,
    },
    /// Show the catalog snapshot served by a running API
    Show,
    /// Ask a running API to refresh its catalog now
    Refresh,
}

pub async fn run(api_url: &str, token: Option<&str>, raw: bool, command: CatalogCommands) -> i32 {
    match command {
        CatalogCommands::Check { backend_url } => {
            let config = match BridgeConfig::from_env(backend_url.as_deref()) {
                Ok(config) => config,
                Err(e) => exit_error(
                    &e.to_string(),
                    Some("Pass --backend-url or set TOOLBRIDGE_BACKEND_URL"),
                ),
            };
            match check_report(&config).await {
                Ok(report) => {
                    print_json(&report, raw);
                    0
                }
                Err(e) => {
                    let err = json!({
                        "error": e.code(),
                        "message": e.to_string(),
                        "backend": config.backend_url,
                    });
                    eprintln!("{}", to_pretty_json(&err));
                    3
                }
            }
        }
        CatalogCommands::Show => {
            api_request(api_url, reqwest::Method::GET, "/catalog", token, raw).await
        }
        CatalogCommands::Refresh => {
            api_request(api_url, reqwest::Method::POST, "/admin/refresh", token, raw).await
        }
    }
}

/// Fetch and validate the catalog the same way the bridge does, without
/// installing anything.
pub async fn check_report(config: &BridgeConfig) -> Result<Value, BridgeError> {
    let backend = BackendClient::new(&config.backend_url, config.backend_token.clone())?;
    let build = backend
        .fetch_version(config.version_timeout)
        .await
        .ok()
        .map(|version| version.build);
    let raw = backend
        .fetch_catalog(config.catalog_max_bytes, config.catalog_timeout)
        .await?;
    let report = validate_catalog(&raw, &config.api_prefix, build);

    let kept: Vec<Value> = report
        .catalog
        .entries
        .iter()
        .map(|entry| {
            json!({
                "name": entry.name,
                "method": entry.method.as_str(),
                "path": entry.path,
                "params": entry.params.len(),
            })
        })
        .collect();

    Ok(json!({
        "backend": config.backend_url,
        "build": report.catalog.build,
        "received": raw.len(),
        "kept": kept,
        "dropped": report.dropped,
    }))
}
