// pickup: command-line client for pickup-daemon
//
// Commands:
//   pickup last                     Most recent saved context
//   pickup history [--json]         Saved contexts, newest first
//   pickup jump <index>             Print `path:line:column` for an entry
//   pickup resume [--force]         Welcome-back summary
//   pickup clear | prune --days N   Drop history
//   pickup export [--output FILE] | import <FILE>
//   pickup settings [set ... | reload]
//   pickup ping | shutdown
//
// Every history command takes --workspace (defaults to the current directory).

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use pickup_lib::{
    daemon::{
        client::{into_result, send_request, DaemonClient},
        config::Config,
        protocol::{DaemonRequest, DaemonResponse},
        settings::SettingsPatch,
    },
    logging::setup_tracing,
};

#[derive(Parser, Debug)]
#[command(
    name = "pickup",
    version,
    about = "Remembers where you left off in your editor"
)]
struct Cli {
    /// Workspace whose history to use (defaults to the current directory)
    #[arg(long, short = 'w', global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the most recent saved context.
    Last,
    /// List saved contexts, newest first.
    History {
        /// Print the raw contexts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the location of a history entry as `path:line:column` (1-based).
    Jump {
        /// Position in `pickup history`
        index: usize,
    },
    /// Show the welcome-back summary.
    Resume {
        /// Show it even if it was already shown today or is disabled
        #[arg(long)]
        force: bool,
    },
    /// Delete all saved contexts for the workspace.
    Clear,
    /// Delete saved contexts older than the given age.
    Prune {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Write the history as JSON.
    Export {
        /// File to write instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Replace the history with a previously exported JSON file.
    Import { file: PathBuf },
    /// Show or change daemon settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Check that the daemon is reachable.
    Ping,
    /// Stop the daemon.
    Shutdown,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Change individual settings.
    Set(SetArgs),
    /// Re-read settings.json from disk.
    Reload,
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long)]
    idle_timeout_minutes: Option<u64>,
    #[arg(long)]
    max_history_size: Option<usize>,
    /// Replaces the exclude list; repeat for several patterns
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclude_patterns: Option<Vec<String>>,
    #[arg(long)]
    auto_show_resume_popup: Option<bool>,
    /// Replaces the keyword list; repeat for several keywords
    #[arg(long = "todo-keyword", value_name = "KEYWORD")]
    todo_keywords: Option<Vec<String>>,
}

impl From<SetArgs> for SettingsPatch {
    fn from(args: SetArgs) -> Self {
        SettingsPatch {
            idle_timeout_minutes: args.idle_timeout_minutes,
            max_history_size: args.max_history_size,
            exclude_patterns: args.exclude_patterns,
            auto_show_resume_popup: args.auto_show_resume_popup,
            todo_keywords: args.todo_keywords,
        }
    }
}

fn workspace_folder(explicit: Option<PathBuf>) -> Result<Option<String>> {
    let dir = match explicit {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let dir = dir.canonicalize().unwrap_or(dir);
    Ok(Some(dir.to_string_lossy().to_string()))
}

fn request(config: &Config, request: DaemonRequest) -> Result<DaemonResponse> {
    into_result(send_request(config, request)?)
}

fn unexpected(response: DaemonResponse) -> anyhow::Error {
    anyhow!("unexpected response from daemon: {:?}", response)
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let workspace = workspace_folder(cli.workspace)?;

    match cli.command {
        Commands::Last => match request(
            &config,
            DaemonRequest::Latest {
                workspace_folder: workspace,
            },
        )? {
            DaemonResponse::Context {
                context: Some(context),
                status,
            } => {
                if let Some(status) = status {
                    println!("{}", status);
                }
                println!(
                    "{}:{}:{}",
                    context.file_path,
                    context.line + 1,
                    context.column + 1
                );
                if let Some(note) = context.note {
                    println!("{}", note);
                }
            }
            DaemonResponse::Context { context: None, .. } => println!("No saved context yet"),
            other => return Err(unexpected(other)),
        },

        Commands::History { json } => match request(
            &config,
            DaemonRequest::History {
                workspace_folder: workspace,
            },
        )? {
            DaemonResponse::History { contexts, items } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&contexts)?);
                } else if items.is_empty() {
                    println!("No saved contexts");
                } else {
                    for (index, item) in items.iter().enumerate() {
                        println!("{:>3}  {}  {}", index, item.label, item.description);
                        println!("     {}", item.detail);
                    }
                }
            }
            other => return Err(unexpected(other)),
        },

        Commands::Jump { index } => match request(
            &config,
            DaemonRequest::ResolveJump {
                workspace_folder: workspace,
                index,
            },
        )? {
            DaemonResponse::JumpTarget { target } => {
                println!(
                    "{}:{}:{}",
                    target.file_path,
                    target.line + 1,
                    target.column + 1
                );
            }
            other => return Err(unexpected(other)),
        },

        Commands::Resume { force } => match request(
            &config,
            DaemonRequest::ResumePrompt {
                workspace_folder: workspace,
                force,
            },
        )? {
            DaemonResponse::ResumePrompt {
                prompt: Some(prompt),
            } => {
                println!("{}", prompt.message);
                if let Some(summary) = prompt.git_summary {
                    println!("\n{}", summary);
                }
                if let Some(preview) = prompt.preview {
                    println!("\n{}", preview);
                }
            }
            DaemonResponse::ResumePrompt { prompt: None } => println!("Nothing to resume"),
            other => return Err(unexpected(other)),
        },

        Commands::Clear => {
            request(
                &config,
                DaemonRequest::ClearHistory {
                    workspace_folder: workspace,
                },
            )?;
            println!("History cleared");
        }

        Commands::Prune { days } => match request(
            &config,
            DaemonRequest::Prune {
                workspace_folder: workspace,
                max_age_days: days,
            },
        )? {
            DaemonResponse::Pruned { removed } => {
                println!("Removed {} context(s) older than {} days", removed, days)
            }
            other => return Err(unexpected(other)),
        },

        Commands::Export { output } => match request(
            &config,
            DaemonRequest::Export {
                workspace_folder: workspace,
            },
        )? {
            DaemonResponse::Exported { data } => match output {
                Some(path) => {
                    std::fs::write(&path, data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("History exported to {}", path.display());
                }
                None => println!("{}", data),
            },
            other => return Err(unexpected(other)),
        },

        Commands::Import { file } => {
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            match request(
                &config,
                DaemonRequest::Import {
                    workspace_folder: workspace,
                    data,
                },
            )? {
                DaemonResponse::Imported { count } => {
                    println!("Imported {} context(s)", count)
                }
                other => return Err(unexpected(other)),
            }
        }

        Commands::Settings { action } => {
            let req = match action {
                None => DaemonRequest::GetSettings,
                Some(SettingsAction::Set(args)) => DaemonRequest::UpdateSettings {
                    patch: args.into(),
                },
                Some(SettingsAction::Reload) => DaemonRequest::ReloadSettings,
            };
            match request(&config, req)? {
                DaemonResponse::Settings { settings } => {
                    println!("{}", serde_json::to_string_pretty(&settings)?)
                }
                other => return Err(unexpected(other)),
            }
        }

        Commands::Ping => {
            // no auto-start: ping reports on the daemon that is actually running
            let mut client = DaemonClient::connect(&config, false)?;
            match into_result(client.request(DaemonRequest::Ping)?)? {
                DaemonResponse::Pong => println!("pong"),
                other => return Err(unexpected(other)),
            }
        }

        Commands::Shutdown => {
            let mut client = match DaemonClient::connect(&config, false) {
                Ok(client) => client,
                Err(_) => {
                    println!("Daemon is not running");
                    return Ok(());
                }
            };
            client.request(DaemonRequest::Shutdown)?;
            println!("Daemon stopping");
        }
    }

    Ok(())
}

fn main() {
    setup_tracing();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
