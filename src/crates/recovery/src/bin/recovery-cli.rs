//! recovery-cli - inspect failure classification and error routing
//!
//! Useful for checking how a given error message will be treated before
//! wiring new tools or routing rules into the server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use recovery::{
    CallContext, Framework, FrameworkConfig, RouteErrorConfig, RoutingOutcome, ToolContext,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recovery-cli")]
#[command(about = "Inspect failure classification and error routing", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file (RECOVERY_* variables override it)
    #[arg(short, long, global = true, env = "RECOVERY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an error message and print the failure analysis as JSON
    Classify {
        /// Raw error text
        message: String,
    },

    /// Route a tool failure and print the decision as JSON
    Route {
        /// Tool that failed, e.g. build_image
        #[arg(short, long)]
        source_tool: String,
        /// Error type reported by the tool
        #[arg(short = 't', long, default_value = "")]
        error_type: String,
        /// Error code reported by the tool
        #[arg(long, default_value = "")]
        error_code: String,
        /// Error message
        #[arg(short, long, default_value = "")]
        message: String,
        /// Retries already spent
        #[arg(short, long, default_value_t = 0)]
        retry_count: u32,
        /// Extra routing rules (YAML, `rules:` list), added to the defaults
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Tool context values visible to rule conditions, as key=value
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn parse_context_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    recovery::logging::init_tracing(&cli.log_level);

    let config = FrameworkConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Classify { message } => {
            let analysis = recovery::analyze_text(&message);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }

        Commands::Route {
            source_tool,
            error_type,
            error_code,
            message,
            retry_count,
            rules,
            context,
        } => {
            let framework = Framework::new(config)?;
            if let Some(path) = rules {
                let loaded = framework
                    .router()
                    .load_rules(&path)
                    .with_context(|| format!("failed to load rules from {}", path.display()))?;
                tracing::info!(rules = loaded, "Loaded routing rules");
            }

            let session_id = format!("cli-{}", uuid::Uuid::new_v4());
            let ctx = CallContext::new()
                .with_tool("recovery-cli")
                .with_session(session_id.clone());

            if !context.is_empty() {
                let mut tool_context = ToolContext::new(source_tool.clone());
                for pair in &context {
                    let (key, value) = pair
                        .split_once('=')
                        .with_context(|| format!("expected KEY=VALUE, got {:?}", pair))?;
                    tool_context = tool_context.with_value(key, parse_context_value(value));
                }
                framework
                    .store()
                    .share_context(&ctx, &session_id, &format!("tool_{}", source_tool), tool_context)
                    .await?;
            }

            let outcome = framework
                .router()
                .route_error(
                    &ctx,
                    RouteErrorConfig::new(session_id, source_tool)
                        .with_error_type(error_type)
                        .with_error_code(error_code)
                        .with_message(message)
                        .with_retry_count(retry_count),
                )
                .await?;

            let output = match &outcome {
                RoutingOutcome::Routed(decision) => {
                    serde_json::json!({"routed": true, "decision": decision})
                }
                RoutingOutcome::NoRoute { fallback } => {
                    serde_json::json!({"routed": false, "decision": fallback})
                }
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            framework.close().await?;
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
