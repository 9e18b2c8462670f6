//! Taskgate Server - Main entry point
//!
//! Role and permission administration service with route-level access control.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use taskgate_core::{
    api::{self, AppState},
    audit::{AuditLogger, DEFAULT_AUDIT_BUFFER},
    config::Config,
    observability,
    rbac::{JwtIdentityProvider, PermissionDeriver, Principal, RouteTable, Seeder, User},
    store,
};

/// Taskgate - role and permission administration with route-level access control
#[derive(Parser)]
#[command(name = "taskgate-server", version, about, propagate_version = true)]
struct Cli {
    /// Configuration file, layered under TASKGATE__* environment variables
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the store, seed and serve the API (default)
    Serve,

    /// Reconcile the permission catalog and role grants, then exit
    Seed,

    /// Print every API route with its access policy
    Routes,

    /// User directory operations
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user and print a bearer token for it
    Add {
        #[arg(long)]
        username: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        /// Role name, e.g. OWNER or USER
        #[arg(long, default_value = "USER")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    observability::init_tracing(&config.observability)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Seed => seed(config).await,
        Commands::Routes => print_routes(&config),
        Commands::User(UserCommands::Add {
            username,
            name,
            email,
            role,
        }) => add_user(config, username, name, email, role).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Taskgate Server");

    let metrics = observability::init_metrics()?;
    let catalog = config.rbac.catalog();
    let routes = RouteTable::default_api().resolve(&PermissionDeriver::default(), &catalog)?;
    info!(routes = routes.count(), "Route table resolved");
    let identity = Arc::new(JwtIdentityProvider::new(&config.auth)?);

    let store = store::connect(&config.database).await?;

    // Serve whatever graph exists even if seeding failed
    if let Err(e) = Seeder::new(store.clone(), catalog).seed().await {
        warn!(error = %e, "Continuing with the existing role-permission graph");
    }

    let audit = AuditLogger::spawn(store.clone(), DEFAULT_AUDIT_BUFFER);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState::new(store, identity, audit, routes, config).with_metrics(metrics);
    let app = api::build_router(state)?;

    info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn seed(config: Config) -> anyhow::Result<()> {
    let store = store::connect(&config.database).await?;
    let report = Seeder::new(store, config.rbac.catalog()).seed().await?;

    println!(
        "permissions created: {}\nroles created: {}\ngrants created: {}",
        report.permissions_created, report.roles_created, report.grants_created
    );
    Ok(())
}

fn print_routes(config: &Config) -> anyhow::Result<()> {
    let routes = RouteTable::default_api().resolve(&PermissionDeriver::default(), &config.rbac.catalog())?;
    print!("{}", routes);
    Ok(())
}

async fn add_user(
    config: Config,
    username: String,
    name: String,
    email: String,
    role: String,
) -> anyhow::Result<()> {
    let store = store::connect(&config.database).await?;
    if config.database.url.is_none() {
        warn!("The user will only exist for the lifetime of this command");
    }

    let role = store
        .find_role_by_name(&role)
        .await?
        .with_context(|| format!("No role named '{}'; run `taskgate-server seed` first", role))?;

    let user = User::new(username, name, email, role.id);
    store.create_user(&user).await?;

    let token = JwtIdentityProvider::new(&config.auth)?
        .issue(&Principal::for_user(&user, config.auth.token_ttl()))?;

    println!("user id: {}\nrole: {}\ntoken: {}", user.id, role.name, token);
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
