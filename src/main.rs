use clap::{Parser, Subcommand};
use std::path::PathBuf;

use paperstack::models::Role;
use paperstack::users::NewUser;
use paperstack::{auth, config, db, docserver, gateway, migrate, stats, users, vecserver, worker};

#[derive(Parser)]
#[command(
    name = "pstack",
    about = "paperstack — server-side core of a research-paper analysis platform",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/pstack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and bootstrap admin
    Init,

    /// Start one of the cluster's HTTP services
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Run the ingestion worker pool
    Worker {
        /// Concurrent jobs per process
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },

    /// Operator commands against the identity store
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Print a corpus statistics snapshot
    Stats,
}

#[derive(Subcommand)]
enum ServeService {
    /// The externally exposed gateway (auth, routing, LLM orchestration)
    Gateway,
    /// The document service (uploads, documents, jobs)
    Documents,
    /// The vector index service (chunking, embedding, search)
    Vector,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Create an account directly in the store
    CreateUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        full_name: String,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,
    },

    /// Delete refresh credentials that are past their expiry
    PurgeTokens,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            users::bootstrap_admin(&pool, &cfg.gateway).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve { service } => {
            init_tracing();
            match service {
                ServeService::Gateway => gateway::run_server(&cfg).await?,
                ServeService::Documents => docserver::run_server(&cfg).await?,
                ServeService::Vector => vecserver::run_server(&cfg).await?,
            }
        }
        Commands::Worker { concurrency } => {
            init_tracing();
            worker::run_pool(&cfg, concurrency).await?;
        }
        Commands::Admin { action } => match action {
            AdminAction::CreateUser {
                email,
                password,
                full_name,
                admin,
            } => {
                if let Some(rule) = auth::password_policy_violation(&password) {
                    anyhow::bail!("password {rule}");
                }
                let pool = db::connect(&cfg).await?;
                migrate::run_migrations(&pool).await?;
                let created = users::create(
                    &pool,
                    NewUser {
                        email: &email,
                        password: &password,
                        full_name: &full_name,
                        organization: None,
                        role: if admin { Role::Admin } else { Role::User },
                    },
                )
                .await?;
                match created {
                    Some(user) => println!("Created {} ({})", user.email, user.role.as_str()),
                    None => anyhow::bail!("an account with this email already exists"),
                }
            }
            AdminAction::PurgeTokens => {
                let pool = db::connect(&cfg).await?;
                let purged = auth::purge_expired_refresh_tokens(&pool).await?;
                println!("Purged {purged} expired refresh credentials.");
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
