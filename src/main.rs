use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use llama_agent::{ChatSession, TurnEvent, TurnOutcome};
use llama_client::{display_error, display_fragment, display_turn, display_warning, role_avatar};
use llama_config::{ChatConfig, API_TOKEN_ENV};
use llama_core::{ChatError, ModelSelector, Role};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "llama-chat")]
#[command(about = "Chat with Llama 2 models hosted on Replicate", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.llama-chat/config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct SessionOverrides {
    /// Model variant: llama2-7b or llama2-13b
    #[arg(short, long)]
    model: Option<ModelSelector>,

    /// Sampling temperature (0.01 - 1.0)
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus sampling threshold (0.01 - 1.0)
    #[arg(long)]
    top_p: Option<f32>,

    /// Maximum response length (20 - 80)
    #[arg(long)]
    max_length: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation mode
    Chat {
        #[command(flatten)]
        overrides: SessionOverrides,
    },

    /// Send a single prompt and print the reply
    Ask {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        #[command(flatten)]
        overrides: SessionOverrides,
    },

    /// List the selectable model variants
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Chat { overrides } => {
            let config = apply_overrides(config, &overrides)?;
            if let Some(session) = open_session(&config)? {
                interactive_chat(session, &config).await?;
            }
        }
        Commands::Ask { prompt, overrides } => {
            let config = apply_overrides(config, &overrides)?;
            if let Some(session) = open_session(&config)? {
                ask(session, &prompt).await?;
            }
        }
        Commands::Models => {
            list_models(&config);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ChatConfig> {
    if let Some(path) = path {
        info!("Loading configuration from: {:?}", path);
        return ChatConfig::from_yaml(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    let default_path = ChatConfig::default_config_path();
    if default_path.exists() {
        info!("Loading configuration from: {:?}", default_path);
        Ok(ChatConfig::from_yaml(&default_path)?)
    } else {
        info!("Using default configuration");
        Ok(ChatConfig::default())
    }
}

fn apply_overrides(mut config: ChatConfig, overrides: &SessionOverrides) -> Result<ChatConfig> {
    if let Some(model) = overrides.model {
        config.model = model;
    }
    if let Some(temperature) = overrides.temperature {
        config.sampling.temperature = temperature;
    }
    if let Some(top_p) = overrides.top_p {
        config.sampling.top_p = top_p;
    }
    if let Some(max_length) = overrides.max_length {
        config.sampling.max_length = max_length;
    }
    config.validate()?;
    Ok(config)
}

/// Returns `None` when no API token is available; the session is never built in that case.
fn open_session(config: &ChatConfig) -> Result<Option<ChatSession>> {
    match ChatSession::from_config(config) {
        Ok(session) => Ok(Some(session)),
        Err(ChatError::MissingApiToken) => {
            println!(
                "🔑 Please provide a valid Replicate API token to start chatting \
                 (set {API_TOKEN_ENV} or replicate.api_token in the config file)."
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn render_event(event: TurnEvent<'_>) {
    match event {
        TurnEvent::Fragment(text) => display_fragment(text),
        TurnEvent::RetryWarning { attempt, max_attempts } => display_warning(attempt, max_attempts),
        // Reported from the turn outcome
        TurnEvent::Failed(_) => {}
    }
}

async fn run_turn(session: &mut ChatSession, input: &str) -> TurnOutcome {
    print!("{} {}> ", role_avatar(Role::Assistant), Role::Assistant);
    io::stdout().flush().ok();

    let outcome = session.submit(input, render_event).await;
    println!();
    if !outcome.is_completed() {
        display_error(&outcome.user_message());
    }
    outcome
}

async fn interactive_chat(mut session: ChatSession, config: &ChatConfig) -> Result<()> {
    println!("{}", config.app.title);
    println!("Model: {} | temperature {} | top_p {} | max_length {}",
        session.model(),
        session.sampling().temperature(),
        session.sampling().top_p(),
        session.sampling().max_length());
    println!("Type '/clear' to clear the chat history, '/save FILE' to export it,");
    println!("'/model NAME' to switch models, '/set PARAM VALUE' to change sampling,");
    println!("'/history' to replay the chat, 'exit' to quit");
    println!("═══════════════════════════════════════\n");

    for turn in session.conversation().turns() {
        display_turn(turn);
    }

    loop {
        print!("\n{} {}> ", role_avatar(Role::User), Role::User);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            println!();
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        if input == "/clear" {
            session.reset();
            for turn in session.conversation().turns() {
                display_turn(turn);
            }
            continue;
        }

        if input == "/history" {
            for turn in session.conversation().turns() {
                display_turn(turn);
            }
            continue;
        }

        if let Some(path) = command_arg(input, "/save") {
            if path.is_empty() {
                display_error("Usage: /save FILE");
            } else if let Err(e) = session.conversation().export_json(path) {
                display_error(&format!("Failed to save transcript: {e}"));
            } else {
                println!("💾 Saved {} turns to {path}", session.conversation().len());
            }
            continue;
        }

        if let Some(name) = command_arg(input, "/model") {
            match name.parse::<ModelSelector>() {
                Ok(model) => {
                    session.set_model(model);
                    println!("Now using {model}");
                }
                Err(e) => display_error(&e.to_string()),
            }
            continue;
        }

        if let Some(args) = command_arg(input, "/set") {
            match args.split_once(char::is_whitespace) {
                Some((name, value)) => match session.sampling().with_setting(name, value.trim()) {
                    Ok(sampling) => {
                        session.set_sampling(sampling);
                        println!("temperature {} | top_p {} | max_length {}",
                            sampling.temperature(),
                            sampling.top_p(),
                            sampling.max_length());
                    }
                    Err(e) => display_error(&e.to_string()),
                },
                None => display_error("Usage: /set temperature|top_p|max_length VALUE"),
            }
            continue;
        }

        run_turn(&mut session, input).await;
    }

    Ok(())
}

/// Argument text of a slash command, `None` when `input` is a different command
fn command_arg<'a>(input: &'a str, command: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(command)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

async fn ask(mut session: ChatSession, prompt: &str) -> Result<()> {
    let outcome = run_turn(&mut session, prompt).await;
    if let TurnOutcome::Failed { error } = outcome {
        bail!(error);
    }
    Ok(())
}

fn list_models(config: &ChatConfig) {
    println!("\n🦙 Available Models:");
    println!("═══════════════════════════════════════");

    for model in ModelSelector::ALL {
        let marker = if model == config.model { " (selected)" } else { "" };
        println!("\n📦 {model}{marker}");
        println!("   {}", model.model_id());
    }
    println!();
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter))
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arg_requires_word_boundary() {
        assert_eq!(command_arg("/save chat.json", "/save"), Some("chat.json"));
        assert_eq!(command_arg("/save", "/save"), Some(""));
        assert_eq!(command_arg("/model   13b ", "/model"), Some("13b"));
        assert_eq!(command_arg("/saved notes", "/save"), None);
        assert_eq!(command_arg("/modelx", "/model"), None);
        assert_eq!(command_arg("/settings", "/set"), None);
        assert_eq!(command_arg("hello /save", "/save"), None);
    }

    #[test]
    fn test_overrides_are_validated() {
        let overrides = SessionOverrides {
            model: Some(ModelSelector::Llama2_13B),
            temperature: Some(0.5),
            ..Default::default()
        };
        let config = apply_overrides(ChatConfig::default(), &overrides).unwrap();
        assert_eq!(config.model, ModelSelector::Llama2_13B);
        assert_eq!(config.sampling.temperature, 0.5);

        let out_of_range = SessionOverrides {
            max_length: Some(500),
            ..Default::default()
        };
        assert!(apply_overrides(ChatConfig::default(), &out_of_range).is_err());
    }
}
