use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use earshot::cli::{Cli, Commands, ConfigAction};
use earshot::command::CommandListener;
use earshot::config::Config;
use earshot::models::local::{cache_dir, list_assets, models_dir};
use earshot::models::{InMemoryModelProvider, LocalModelProvider, ModelProvider};
use earshot::output::{PrintingHandler, TerminalListener};
use earshot::session::{Session, SessionConfig, SessionState};
use earshot::stt::ScriptedEngine;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose, cli.quiet);
    tracing::debug!(version = %earshot::version_string(), "earshot starting");

    match cli.command {
        Commands::Replay {
            script,
            local,
            wake_words,
            timeout,
        } => {
            run_replay(
                &config,
                &script,
                local,
                wake_words,
                Duration::from_secs(timeout),
                cli.quiet,
            )?;
        }
        Commands::Models => {
            list_models(&config);
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), &config)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "earshot", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // An explicit path must exist
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// `RUST_LOG` wins; otherwise -q / -v / -vv, then the configured level.
fn init_logging(config: &Config, verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => config.log.level.clone(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_err()
    {
        eprintln!("earshot: logging already initialized");
    }
}

fn configured_models_dir(config: &Config) -> PathBuf {
    config.model.models_dir.clone().unwrap_or_else(models_dir)
}

/// Drive a session with a scripted engine until every utterance has played.
fn run_replay(
    config: &Config,
    script: &Path,
    local: bool,
    wake_words: Vec<String>,
    timeout: Duration,
    quiet: bool,
) -> Result<()> {
    let engine = ScriptedEngine::from_file(script)
        .with_context(|| format!("Failed to load script {}", script.display()))?;
    let utterances = engine.remaining();

    let provider: Box<dyn ModelProvider> = if local {
        Box::new(LocalModelProvider::new(configured_models_dir(config), cache_dir()))
    } else {
        Box::new(InMemoryModelProvider::new())
    };

    let wake_words = if wake_words.is_empty() {
        config.commands.wake_words.clone()
    } else {
        wake_words
    };
    let listener = Arc::new(CommandListener::new(
        Arc::new(TerminalListener::new(quiet)),
        Arc::new(PrintingHandler),
        wake_words,
    ));

    let session = Session::new(
        SessionConfig::from_model_config(&config.model),
        provider.as_ref(),
        Arc::new(engine.clone()),
        listener,
    )?;

    let deadline = Instant::now() + timeout;
    if !wait_until(deadline, || {
        session.is_ready() || session.state() == SessionState::Failed
    }) {
        session.close();
        bail!("Model not ready after {}s", timeout.as_secs());
    }
    if !session.is_ready() {
        session.close();
        bail!("Model provisioning failed");
    }

    session.start_listening();

    // Every script has been consumed once the recognizer after the last one starts
    let finished = wait_until(deadline, || {
        engine.stats().created > utterances || !session.is_listening()
    });
    let listening = session.is_listening();
    session.close();

    if !finished {
        bail!("Replay did not finish within {}s", timeout.as_secs());
    }
    if !listening {
        bail!("Recognizer stopped before the script finished");
    }
    if !quiet {
        eprintln!("{} Replayed {} utterance(s)", "✓".green(), utterances);
    }
    Ok(())
}

fn wait_until(deadline: Instant, condition: impl Fn() -> bool) -> bool {
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn list_models(config: &Config) {
    let dir = configured_models_dir(config);
    let assets = list_assets(&dir);

    if assets.is_empty() {
        eprintln!("No model assets in {}", dir.display());
        return;
    }

    println!("Model assets in {}:", dir.display());
    for asset in assets {
        if asset == config.model.asset {
            println!("  {} {}", asset, "(configured)".green());
        } else {
            println!("  {}", asset);
        }
    }
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    config: &Config,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
