use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voice_recorder::audio::CpalBackend;
use voice_recorder::notify::{HomeAssistantNotifier, LogNotifier, Notifier};
use voice_recorder::settings::{self, CardSettings};
use voice_recorder::upload::UploadCoordinator;
use voice_recorder::{spawn_session, SessionHandle};

#[derive(Parser)]
#[command(name = "voice-recorder", version, about = "Record voice clips and upload them to Home Assistant")]
struct Cli {
    /// Settings file (defaults to <config dir>/voice-recorder/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one recorder card driven from stdin (default)
    Record,
    /// Write a settings file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// One line of stdin input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    /// Bare Enter: toggles in every button mode
    Click,
    Press,
    Release,
    Event(String),
    Status,
    Quit,
    Help,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "" => Input::Click,
            "press" => Input::Press,
            "release" => Input::Release,
            "event" => Input::Event(arg.to_string()),
            "status" => Input::Status,
            "quit" | "exit" => Input::Quit,
            "help" => Input::Help,
            other => Input::Unknown(other.to_string()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => settings::default_settings_path()?,
    };

    match cli.command.unwrap_or(Command::Record) {
        Command::Init { force } => init(&path, force),
        Command::Record => record(&path).await,
    }
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    settings::save_settings(path, &CardSettings::default())?;
    println!("Wrote {}", path.display());
    println!("Set \"token\" to a Home Assistant long-lived access token before recording.");
    Ok(())
}

async fn record(path: &Path) -> anyhow::Result<()> {
    let mut card_settings = settings::load_settings(path)?;
    card_settings.apply_env_overrides();
    let config = card_settings
        .validate()
        .with_context(|| format!("invalid settings in {}", path.display()))?;

    let uploader = UploadCoordinator::new(&config.base_url, config.token.clone())?
        .with_browser_id(config.browser_id.clone())
        .with_user_id(config.user_id.clone());
    let notifier: Arc<dyn Notifier> =
        match HomeAssistantNotifier::new(&config.base_url, config.token.clone()) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                log::warn!("Notifications unavailable ({}), logging instead", e);
                Arc::new(LogNotifier)
            }
        };

    let handle = spawn_session(
        &config,
        Box::new(CpalBackend::new()),
        Arc::new(uploader),
        notifier,
    );

    print_help(&handle);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match Input::parse(&line) {
            Input::Click => handle.toggle().await,
            Input::Press => handle.press().await,
            Input::Release => handle.release().await,
            Input::Event(name) => handle.select_event_name(&name).await,
            Input::Status => {
                println!("{}", serde_json::to_string(&handle.status())?);
                Ok(())
            }
            Input::Quit => break,
            Input::Help => {
                print_help(&handle);
                Ok(())
            }
            Input::Unknown(other) => {
                println!("Unknown command {:?} (try \"help\")", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            log::error!("{}", e);
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn print_help(handle: &SessionHandle) {
    let config = handle.config();
    println!("Commands:");
    println!("  <Enter>        start or stop recording");
    println!("  press/release  button edges (hold mode records between them)");
    println!("  event <name>   select the event name for the next upload");
    println!("  status         print the current status");
    println!("  quit           release the microphone and exit");
    if !config.event_options.is_empty() {
        println!("Event options: {}", config.event_options.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_enter_is_a_single_click() {
        assert_eq!(Input::parse(""), Input::Click);
        assert_eq!(Input::parse("   "), Input::Click);
    }

    #[test]
    fn commands_and_arguments_are_parsed() {
        assert_eq!(Input::parse("press"), Input::Press);
        assert_eq!(Input::parse("release\n"), Input::Release);
        assert_eq!(
            Input::parse("event  kitchen door "),
            Input::Event("kitchen door".to_string())
        );
        assert_eq!(Input::parse("exit"), Input::Quit);
        assert_eq!(Input::parse("record"), Input::Unknown("record".to_string()));
    }
}
