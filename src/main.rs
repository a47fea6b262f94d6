//! Tenant Broker CLI
//!
//! Signs in once with the device code flow, then lists every tenant the
//! account can see and the subscriptions inside each of them.
//!
//! # Usage
//! ```bash
//! # Default Azure public cloud, table output
//! tenant-broker
//!
//! # JSON report, cache contents after sign-in and after discovery
//! tenant-broker --format json --dump-cache
//!
//! # Give up after five minutes
//! tenant-broker --deadline 300
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tenant_broker::config::{
    BrokerConfig, DEFAULT_AUTHORITY, DEFAULT_AUTHORITY_TEMPLATE, DEFAULT_CLIENT_ID,
    DEFAULT_MANAGEMENT_ENDPOINT, DEFAULT_SCOPE,
};
use tenant_broker::identity::{HttpTokenEndpoint, PublicClientFactory};
use tenant_broker::management::ManagementDirectory;
use tenant_broker::{Context, DiscoveryReport, RealmDiscovery, TokenCacheStore};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tenant-broker")]
#[command(about = "Sign in once, discover every tenant and subscription", long_about = None)]
#[command(version)]
struct Cli {
    /// Public client (application) id
    #[arg(long, env = "BROKER_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    client_id: String,

    /// Authority for the interactive sign-in
    #[arg(long, env = "BROKER_AUTHORITY", default_value = DEFAULT_AUTHORITY)]
    authority: String,

    /// Per-tenant authority, `{tenant}` is replaced by the tenant id
    #[arg(long, env = "BROKER_AUTHORITY_TEMPLATE", default_value = DEFAULT_AUTHORITY_TEMPLATE)]
    authority_template: String,

    /// Resource scope to request (repeatable)
    #[arg(
        long = "scope",
        env = "BROKER_SCOPE",
        value_delimiter = ',',
        default_value = DEFAULT_SCOPE
    )]
    scopes: Vec<String>,

    /// Management API base URL
    #[arg(long, env = "BROKER_MANAGEMENT_ENDPOINT", default_value = DEFAULT_MANAGEMENT_ENDPOINT)]
    management_endpoint: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value = "30", env = "BROKER_HTTP_TIMEOUT")]
    http_timeout: u64,

    /// Abort the whole run after this many seconds
    #[arg(long, env = "BROKER_DEADLINE")]
    deadline: Option<u64>,

    /// Print the token cache after sign-in and after discovery
    #[arg(long)]
    dump_cache: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, env = "BROKER_JSON_LOGS")]
    json_logs: bool,
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            client_id: self.client_id.clone(),
            authority: self.authority.clone(),
            authority_template: self.authority_template.clone(),
            scopes: self.scopes.clone(),
            management_endpoint: self.management_endpoint.clone(),
            http_timeout: Duration::from_secs(self.http_timeout),
            deadline: self.deadline.map(Duration::from_secs),
        }
    }
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("🚀 Tenant Broker starting...");

    let config = cli
        .broker_config()
        .validate()
        .context("Invalid configuration")?;

    info!(
        client_id = %config.client_id,
        authority = %config.authority,
        scopes = ?config.scopes,
        "Configuration loaded"
    );

    // One cache for every identity client of the run
    let cache = Arc::new(TokenCacheStore::new());
    let endpoint = HttpTokenEndpoint::new(config.http_timeout)
        .context("Failed to create identity HTTP client")?;
    let identities = PublicClientFactory::new(
        config.client_id.clone(),
        cache.clone(),
        Arc::new(endpoint),
    );
    let directory = ManagementDirectory::new(
        config.management_endpoint.clone(),
        config.scopes.clone(),
        config.http_timeout,
    )
    .context("Failed to create management HTTP client")?;

    let discovery = RealmDiscovery::new(
        identities,
        directory,
        config.authority.clone(),
        config.authority_template.clone(),
        config.scopes.clone(),
    );

    // Ctrl-C cancels whatever call is in flight
    let (mut ctx, cancel) = Context::with_cancel();
    if let Some(deadline) = config.deadline {
        ctx = ctx.with_timeout(deadline);
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️  Interrupted, cancelling discovery");
            cancel.cancel();
        }
    });

    let result = discovery
        .run_with(&ctx, |_| {
            if cli.dump_cache {
                eprintln!("Token cache after sign-in:\n{}", cache.dump());
            }
        })
        .await;

    if cli.dump_cache {
        eprintln!("Token cache after discovery:\n{}", cache.dump());
    }

    let report = result.context("Discovery failed")?;

    info!(
        tenants = report.tenants.len(),
        subscriptions = report.subscriptions.len(),
        "✅ Discovery finished"
    );

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<()> {
    // RUST_LOG wins unless --verbose asks for everything
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

// ============================================================
// Output
// ============================================================

fn print_report(report: &DiscoveryReport) {
    println!("\nSigned in as {}", report.account.username);

    println!("\n{:<36} {:<30} {:<30}", "TENANT ID", "NAME", "DEFAULT DOMAIN");
    println!("{}", "-".repeat(98));
    for tenant in &report.tenants {
        println!(
            "{:<36} {:<30} {:<30}",
            tenant.tenant_id,
            truncate(tenant.display_name.as_deref().unwrap_or("-"), 30),
            truncate(tenant.default_domain.as_deref().unwrap_or("-"), 30)
        );
    }

    println!(
        "\n{:<36} {:<30} {:<36} {:<10}",
        "SUBSCRIPTION ID", "NAME", "TENANT ID", "STATE"
    );
    println!("{}", "-".repeat(115));
    for subscription in &report.subscriptions {
        println!(
            "{:<36} {:<30} {:<36} {:<10}",
            subscription.subscription_id,
            truncate(subscription.display_name.as_deref().unwrap_or("-"), 30),
            subscription.tenant_id.as_deref().unwrap_or("-"),
            subscription.state.as_deref().unwrap_or("-")
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
