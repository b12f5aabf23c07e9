use access_gate::auth::opaque::{OpaqueToken, SCOPE_ACTIVATION, SCOPE_AUTHENTICATION};
use access_gate::auth::SignedTokens;
use access_gate::config::loader::SECRET_ENV;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gatectl")]
#[command(about = "Operator CLI for the access gate", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:4000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Authentication,
    Activation,
}

#[derive(Subcommand)]
enum Commands {
    /// Show request counters and dependency health
    Vars,
    /// Mint a signed token for a user
    Mint {
        #[arg(long, env = SECRET_ENV)]
        secret: String,
        #[arg(long)]
        subject: i64,
        #[arg(long, default_value = "access-gate")]
        issuer: String,
        #[arg(long, default_value = "access-gate")]
        audience: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 86_400)]
        ttl: u64,
    },
    /// Generate an opaque token and the hash to store for it
    Opaque {
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
        #[arg(long, value_enum, default_value_t = Scope::Authentication)]
        scope: Scope,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Vars => {
            let res = reqwest::Client::new()
                .get(format!("{}/debug/vars", cli.url))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Mint {
            secret,
            subject,
            issuer,
            audience,
            ttl,
        } => {
            let tokens = SignedTokens::new(secret.as_bytes(), &issuer, &audience, ttl);
            println!("{}", tokens.issue(subject)?);
        }
        Commands::Opaque {
            user_id,
            ttl_hours,
            scope,
        } => {
            let scope = match scope {
                Scope::Authentication => SCOPE_AUTHENTICATION,
                Scope::Activation => SCOPE_ACTIVATION,
            };
            let token = chrono::Duration::try_hours(ttl_hours)
                .and_then(|ttl| OpaqueToken::generate(user_id, ttl, scope))
                .ok_or_else(|| format!("--ttl-hours {ttl_hours} is out of range"))?;
            let out = json!({
                "plaintext": token.plaintext,
                "hash": hex::encode(token.hash),
                "user_id": token.user_id,
                "expiry": token.expiry,
                "scope": token.scope,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gate returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
