// realtime-feedback/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use anyhow::Context;
    use clap::{Parser, Subcommand};
    use dotenvy::dotenv;
    use realtime_feedback::{
        telemetry, ChangeEvent, ChangeKind, CursorPosition, EngineConfig, FeedbackEngine,
        FeedbackLevel, Phase, ProviderRegistry, SessionConfig,
    };
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;
    use tracing::warn;

    #[derive(Parser)]
    #[command(name = "realtime-feedback", version, about = "Multi-provider source feedback")]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Run every enabled provider over the given files and print the feedback as JSON
        Analyze {
            #[arg(required = true)]
            files: Vec<PathBuf>,

            #[arg(long, default_value = "cli")]
            user: String,

            #[arg(long, default_value = "normal")]
            level: FeedbackLevel,

            /// Comma separated provider ids; all registered providers when omitted
            #[arg(long, value_delimiter = ',')]
            providers: Option<Vec<String>>,

            /// Let the debounce timer start the deferred phase instead of
            /// triggering it right after each file
            #[arg(long)]
            debounce_ms: Option<u64>,

            /// How long to wait for deferred feedback per file
            #[arg(long, default_value_t = 10_000)]
            wait_ms: u64,

            /// Skip the deferred phase
            #[arg(long)]
            instant_only: bool,
        },
        /// List registered providers
        Providers,
        /// Print the effective engine configuration
        Config,
    }

    pub async fn run() -> anyhow::Result<()> {
        dotenv().ok();
        let cli = Cli::parse();
        if matches!(cli.command, Command::Config) {
            telemetry::init_tracing();
        } else {
            telemetry::init_tracing_with("warn");
        }
        let config = EngineConfig::from_env()?;

        match cli.command {
            Command::Analyze {
                files,
                user,
                level,
                providers,
                debounce_ms,
                wait_ms,
                instant_only,
            } => {
                let registry = ProviderRegistry::with_builtin(&config)?;
                let engine = FeedbackEngine::new(config, registry)?;

                let mut session_config = SessionConfig::default()
                    .with_level(level)
                    .with_auto_triggers(debounce_ms.is_some() && !instant_only);
                if let Some(delay_ms) = debounce_ms {
                    session_config = session_config.with_debounce_ms(delay_ms);
                }
                if let Some(providers) = providers {
                    session_config = session_config.with_providers(providers);
                }
                let run_deferred =
                    !instant_only && engine.registry().has_enabled(Phase::Deferred, &session_config);
                let session = engine.start_session(&user, session_config);
                let receiver = engine.subscribe(&session)?;

                let mut reports = Vec::with_capacity(files.len());
                for path in &files {
                    let content = std::fs::read_to_string(path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let file_path = path.to_string_lossy().to_string();
                    let event = ChangeEvent::new(
                        session.clone(),
                        file_path.clone(),
                        content,
                        CursorPosition::default(),
                        ChangeKind::Edit,
                    );
                    let instant = engine.process_change(event).await?;

                    let mut deferred = None;
                    let armed = run_deferred
                        && (debounce_ms.is_some()
                            || engine.trigger_deferred(&session, &file_path).await?);
                    if armed {
                        match tokio::time::timeout(Duration::from_millis(wait_ms), receiver.recv()).await {
                            Ok(feedback) => deferred = feedback,
                            Err(_) => warn!("No deferred feedback for {} within {}ms", file_path, wait_ms),
                        }
                    }

                    reports.push(json!({
                        "file": file_path,
                        "instant": instant,
                        "deferred": deferred,
                    }));
                }

                let metrics = engine.end_session(&session).await?;
                let output = json!({
                    "reports": reports,
                    "session": metrics,
                    "cache": engine.cache_stats(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                engine.shutdown().await;
            }
            Command::Providers => {
                let registry = ProviderRegistry::with_builtin(&config)?;
                println!("{}", serde_json::to_string_pretty(&registry.metadata())?);
            }
            Command::Config => {
                config.validate()?;
                config.print_config();
            }
        }

        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
