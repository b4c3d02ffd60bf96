//! azure-login - resolve a working Azure login from whatever this host offers

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use azure_login::auth::{
    Account, AuthConfiguration, AuthType, AzureEnvironment, DeviceCodeInfo, Resolver, TokenCache,
    WorkerPool,
};
use azure_login::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "azure-login")]
#[command(about = "Find, build and validate a working Azure login", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a login and show what it can reach
    Login(LoginArgs),

    /// List subscriptions visible to the resolved login
    Subscriptions(LoginArgs),

    /// Show which login methods are usable here and what is cached
    Status,

    /// Save login defaults to the config file (secrets are never stored)
    Configure(ConfigureArgs),

    /// Clear cached refresh tokens
    Logout,
}

#[derive(Args)]
struct LoginArgs {
    /// AUTO, SERVICE_PRINCIPAL, MANAGED_IDENTITY, DEVICE_CODE, OAUTH2, VSCODE or AZURE_CLI
    #[arg(short = 't', long = "type")]
    auth_type: Option<AuthType>,

    /// Application (client) id
    #[arg(long)]
    client: Option<String>,

    /// Tenant id or domain
    #[arg(long)]
    tenant: Option<String>,

    /// Client secret
    #[arg(long, env = "AZURE_LOGIN_KEY", hide_env_values = true)]
    key: Option<String>,

    /// PEM file (certificate and private key)
    #[arg(long)]
    certificate: Option<String>,

    #[arg(long, env = "AZURE_LOGIN_CERTIFICATE_PASSWORD", hide_env_values = true)]
    certificate_password: Option<String>,

    /// Cloud: azure, azure_china, azure_us_government, azure_germany
    #[arg(short, long)]
    environment: Option<AzureEnvironment>,

    #[arg(long)]
    proxy_host: Option<String>,

    #[arg(long)]
    proxy_port: Option<u16>,

    /// Subscription to select (repeatable)
    #[arg(short, long = "subscription")]
    subscriptions: Vec<String>,
}

#[derive(Args)]
struct ConfigureArgs {
    /// AUTO, SERVICE_PRINCIPAL, MANAGED_IDENTITY, DEVICE_CODE, OAUTH2, VSCODE or AZURE_CLI
    #[arg(short = 't', long = "type")]
    auth_type: Option<AuthType>,

    #[arg(long)]
    client: Option<String>,

    #[arg(long)]
    tenant: Option<String>,

    #[arg(short, long)]
    environment: Option<AzureEnvironment>,

    #[arg(long)]
    proxy_host: Option<String>,

    #[arg(long)]
    proxy_port: Option<u16>,

    /// Subscription to select (repeatable; replaces the saved selection)
    #[arg(short, long = "subscription")]
    subscriptions: Vec<String>,
}

impl ConfigureArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            auth_type: self.auth_type,
            client: self.client,
            tenant: self.tenant,
            environment: self.environment,
            proxy_host: self.proxy_host,
            proxy_port: self.proxy_port,
            subscriptions: self.subscriptions,
            ..Overrides::default()
        }
    }
}

impl LoginArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            auth_type: self.auth_type,
            client: self.client,
            tenant: self.tenant,
            key: self.key,
            certificate: self.certificate,
            certificate_password: self.certificate_password,
            environment: self.environment,
            proxy_host: self.proxy_host,
            proxy_port: self.proxy_port,
            subscriptions: self.subscriptions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login(args) => {
            tracing::info!("Starting authentication flow...");
            let (account, executor) = login(args).await?;
            print_account(&account).await?;
            executor.shutdown();
        }
        Commands::Subscriptions(args) => {
            let (account, executor) = login(args).await?;
            list_subscriptions(&account).await?;
            executor.shutdown();
        }
        Commands::Status => {
            status(&Config::load()?)?;
        }
        Commands::Configure(args) => {
            let mut config = Config::load()?;
            config.update(args.into_overrides());
            config.save()?;
            println!("Saved defaults to {}", Config::config_path()?.display());
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            let cache = TokenCache::default_location()?;
            cache.clear()?;
            println!("Cleared cached logins in {}", cache.path().display());
        }
    }

    Ok(())
}

/// Resolve with file defaults, flag overrides and Ctrl-C cancellation.
async fn login(args: LoginArgs) -> Result<(Account, WorkerPool)> {
    let executor = WorkerPool::new(1);
    let mut config = Config::load()?.into_auth_configuration(args.into_overrides());
    config.executor = Some(executor.clone());
    config.device_code_callback = Some(Arc::new(|info: &DeviceCodeInfo| {
        println!("\n{}\n", info.message);
    }));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let account = Resolver::from_environment()
        .resolve_with_cancellation(&config, cancel)
        .await?;
    Ok((account, executor))
}

async fn print_account(account: &Account) -> Result<()> {
    println!("Authenticated!");
    println!("  Method:      {}", account.strategy());
    println!("  Environment: {}", account.environment());
    println!("  Tenant:      {}", account.tenant_id().unwrap_or("unknown"));

    let selected = account
        .selected_subscriptions()
        .await
        .context("Failed to list subscriptions")?;
    if selected.is_empty() {
        println!("  No subscriptions selected.");
    }
    for sub in &selected {
        println!("  Subscription: {} ({})", sub.display_name, sub.id);
    }
    Ok(())
}

async fn list_subscriptions(account: &Account) -> Result<()> {
    let marked = account
        .available_subscriptions()
        .await
        .context("Failed to list subscriptions")?;

    if marked.is_empty() {
        println!("No subscriptions visible to this login.");
        return Ok(());
    }

    println!("{} subscription(s):\n", marked.len());
    for sub in &marked {
        let marker = if sub.is_selected { "*" } else { " " };
        println!(
            " {} {}  {}  (tenant {})",
            marker, sub.id, sub.display_name, sub.tenant_id
        );
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let resolver = Resolver::from_environment();
    // `login` always supplies an executor and callback for device code
    let probe_config = AuthConfiguration {
        auth_type: config.auth_type,
        client: config.client.clone(),
        tenant: config.tenant.clone(),
        environment: config.environment.clone().unwrap_or_default(),
        executor: Some(WorkerPool::new(1)),
        device_code_callback: Some(Arc::new(|_: &DeviceCodeInfo| {})),
        ..AuthConfiguration::default()
    };

    println!("Configured type: {}", config.auth_type);
    println!("Login methods (in AUTO order):");
    for (kind, availability) in resolver.probe_availability(&probe_config) {
        match availability {
            azure_login::auth::Availability::Available => println!("  [x] {}", kind),
            azure_login::auth::Availability::Unavailable(reason) => {
                println!("  [ ] {} - {}", kind, reason)
            }
        }
    }

    let Some(cache) = resolver.token_cache() else {
        println!("\nNo token cache location on this platform.");
        return Ok(());
    };
    let logins = cache.load()?;
    if logins.is_empty() {
        println!("\nNo cached logins. Run 'azure-login login'.");
        return Ok(());
    }
    println!("\nCached logins ({}):", cache.path().display());
    for login in &logins {
        let updated = chrono::DateTime::from_timestamp(login.updated_at as i64, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!(
            "  {} / {} / client {} (home tenant {}, updated {})",
            login.environment,
            login.tenant,
            login.client_id,
            login.home_tenant.as_deref().unwrap_or("unknown"),
            updated
        );
    }
    Ok(())
}
