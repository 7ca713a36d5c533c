use anyhow::Result;
use clap::{Parser, Subcommand};
use df_core::identity;

#[derive(Parser)]
#[command(name = "df", version, about = "Deck feedback pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feedback submission gateway
    Gateway,
    /// Apply database migrations
    Migrate,
    /// Print the deterministic fingerprint of a question prompt
    QuestionHash {
        /// Question prompt text
        prompt: String,
    },
    /// Show (or create) the locally persisted session/presentation identity
    Session {
        /// Identity file path
        #[arg(long, env = "IDENTITY_PATH", default_value = "data/identity.json")]
        path: String,
        /// Also derive a presentation id for this module
        #[arg(long)]
        module: Option<String>,
        /// Pretty-print JSON output
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway => {
            let config = df_gateway::load_config()?;
            df_gateway::run(config).await?;
        }
        Commands::Migrate => {
            df_core::logging::init("df-cli");
            let database_url = df_core::config::required_env("DATABASE_URL")?;
            let pool = df_core::db::connect(&database_url).await?;
            df_core::migrations::run(&pool).await?;
            tracing::info!("migrations applied");
        }
        Commands::QuestionHash { prompt } => {
            println!("{}", identity::question_hash(&prompt));
        }
        Commands::Session {
            path,
            module,
            pretty,
        } => {
            let mut file = identity::IdentityFile::load_or_generate(&path)?;
            let presentation_id = match module.as_deref() {
                Some(module_id) => Some(file.presentation_id(module_id)?),
                None => None,
            };
            let output = serde_json::json!({
                "sessionId": file.session_id,
                "presentationId": presentation_id
            });
            let rendered = if pretty {
                serde_json::to_string_pretty(&output)?
            } else {
                serde_json::to_string(&output)?
            };
            println!("{rendered}");
        }
    }

    Ok(())
}
