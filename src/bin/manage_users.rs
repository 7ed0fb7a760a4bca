use auth_demo::auth::{PasswordHasher, PgUserStore};
use auth_demo::settings::Settings;
use auth_demo::{create_admin, set_admin};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;

/// Manage the users of the auth demo database.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an administrator, prompting for the password.
    CreateAdmin {
        #[arg(long)]
        email: String,
    },
    /// Grant or revoke admin rights of an existing user.
    SetAdmin {
        #[arg(long)]
        email: String,
        #[arg(long, action = clap::ArgAction::Set)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new()?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;
    sqlx::migrate!("database/migrations").run(&pool).await?;
    let users = PgUserStore::new(&pool);

    match cli.command {
        Command::CreateAdmin { email } => {
            let password = rpassword::prompt_password("Admin password: ")?;
            let id = create_admin(&users, &PasswordHasher::new(), &email, &password).await?;
            println!("Created admin {} with id {}", email, id);
        }
        Command::SetAdmin { email, admin } => {
            set_admin(&users, &email, admin).await?;
            println!("{} is admin: {}", email, admin);
        }
    }
    Ok(())
}
