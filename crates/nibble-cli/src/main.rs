//! nibble - food photo nutrition assistant

mod commands;
mod config;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nibble_agent::{AgentEvent, ProviderTransport, RetryConfig};
use nibble_ai::providers::google::GoogleProvider;
use nibble_pipeline::{
    Pipeline, PipelineConfig, PipelineInput, Services, Session, StateStore, ThreadId,
    session::{NO_RESPONSE_PLACEHOLDER, NO_RESULT_PLACEHOLDER},
    tools::{EncyclopediaSource, NutritionixClient, WikipediaClient},
};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// nibble - estimate calories and protein from a food photo
#[derive(Parser, Debug)]
#[command(name = "nibble")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Food photo to analyse (jpg, png, webp)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Question to ask about the analysis
    #[arg(short, long)]
    question: Option<String>,

    /// Gemini model to use (default: gemini-2.5-flash)
    #[arg(short, long)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Answer --question in a separate step instead of chaining it onto the analysis
    #[arg(long)]
    no_chain: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        // prefix match covers every nibble_* crate
        EnvFilter::new("nibble=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init().context("failed to create config file")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();
    let pipeline = Arc::new(build_pipeline(&args, &cfg)?);
    let printer = spawn_event_printer(pipeline.subscribe());

    let result = if args.image.is_some() || args.question.is_some() {
        run_once(&pipeline, args.image.as_deref(), args.question.as_deref()).await
    } else {
        run_interactive(Session::new(Arc::clone(&pipeline))).await
    };

    printer.abort();
    result
}

fn build_pipeline(args: &Args, cfg: &config::Config) -> anyhow::Result<Pipeline> {
    let Some(gemini_key) = cfg.gemini_api_key() else {
        anyhow::bail!(
            "No Gemini API key found.\n\
             Set GEMINI_API_KEY (environment or .env) or add it to the config file: nibble --init-config"
        );
    };
    let Some((app_id, app_key)) = cfg.nutritionix_credentials() else {
        anyhow::bail!(
            "No Nutritionix credentials found.\n\
             Set NUTRITIONIX_APP_ID and NUTRITIONIX_API_KEY or add them to the config file."
        );
    };

    let model_id = args
        .model
        .clone()
        .or(cfg.model.clone())
        .unwrap_or_else(|| nibble_ai::models::DEFAULT_MODEL_ID.to_string());
    if nibble_ai::models::get_model(&model_id).is_none() {
        tracing::warn!("Unknown model '{}', using generic Gemini settings", model_id);
    }
    let model = nibble_ai::models::get_model_or_custom(&model_id);

    let timeout = cfg.request_timeout();
    let transport = ProviderTransport::new(Arc::new(GoogleProvider::new(gemini_key)))
        .with_retry_config(RetryConfig::with_max_retries(cfg.max_retries.unwrap_or(0)))
        .with_request_timeout(timeout);

    let encyclopedia: Option<Arc<dyn EncyclopediaSource>> = if cfg.encyclopedia.unwrap_or(false) {
        Some(Arc::new(WikipediaClient::new(timeout)?))
    } else {
        None
    };

    let services = Services {
        transport: Arc::new(transport),
        model,
        nutrition: Arc::new(NutritionixClient::new(app_id, app_key, timeout)?),
        encyclopedia,
    };

    let config = PipelineConfig {
        max_turns: cfg.max_turns.unwrap_or(nibble_agent::DEFAULT_MAX_TURNS),
        chain_follow_up: !args.no_chain && cfg.chain_follow_up.unwrap_or(true),
        ..Default::default()
    };

    let store = match cfg.state_ttl() {
        Some(ttl) => StateStore::with_ttl(ttl),
        None => StateStore::new(),
    };

    Ok(Pipeline::new(services, config, Arc::new(store)))
}

/// Print tool activity to stderr while stages run
fn spawn_event_printer(
    mut receiver: broadcast::Receiver<AgentEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                AgentEvent::AgentStart { agent } => {
                    tracing::debug!("{} started", agent);
                }
                AgentEvent::ToolExecutionStart {
                    tool_name,
                    arguments,
                    ..
                } => {
                    let query = arguments
                        .get("query")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    eprintln!("[{}: {}]", tool_name, query);
                }
                AgentEvent::ToolExecutionEnd {
                    tool_name,
                    result,
                    is_error: true,
                    ..
                } => {
                    eprintln!("[{} failed: {}]", tool_name, utils::truncate_chars(&result, 200));
                }
                AgentEvent::AgentEnd {
                    agent,
                    total_turns,
                    total_usage,
                } => {
                    tracing::debug!(
                        "{} finished after {} turns ({} in, {} out tokens)",
                        agent,
                        total_turns,
                        total_usage.input,
                        total_usage.output
                    );
                }
                _ => {}
            }
        }
    })
}

fn print_section(title: &str, body: Option<&str>, placeholder: &str) {
    println!("== {} ==", title);
    println!(
        "{}\n",
        body.filter(|b| !b.trim().is_empty()).unwrap_or(placeholder)
    );
}

async fn run_once(
    pipeline: &Pipeline,
    image: Option<&std::path::Path>,
    question: Option<&str>,
) -> anyhow::Result<()> {
    let thread = ThreadId::new();

    let mut input = match image {
        Some(path) => {
            let (bytes, mime) = utils::load_image(path).await?;
            PipelineInput::image(bytes, mime)
        }
        None => PipelineInput::default(),
    };
    if let Some(q) = question {
        input = input.with_question(q);
    }

    let invocation = pipeline.invoke(&thread, input).await?;
    let mut state = invocation.state;

    if image.is_some() {
        print_section(
            "Nutrition Analysis",
            state.analysis_result.as_deref(),
            NO_RESULT_PLACEHOLDER,
        );
    }

    if let Some(q) = question {
        // Without chaining the question still needs its own invocation.
        if image.is_some() && !pipeline.config().chain_follow_up {
            state = pipeline
                .invoke(&thread, PipelineInput::question(q))
                .await?
                .state;
        }
        print_section(
            "Updated Analysis",
            state.follow_up_answer.as_deref(),
            NO_RESPONSE_PLACEHOLDER,
        );
    }

    Ok(())
}

async fn run_interactive(mut session: Session) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("nibble session: {}", session.thread_id());
        eprintln!("Start with /image <path>, or /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input) {
            match result {
                commands::CommandResult::SubmitImage(path) => {
                    let (bytes, mime) = match utils::load_image(&path).await {
                        Ok(loaded) => loaded,
                        Err(e) => {
                            eprintln!("Error: {:#}", e);
                            continue;
                        }
                    };
                    match session.submit_image(bytes, mime).await {
                        Ok(analysis) => print_section(
                            "Nutrition Analysis",
                            Some(&analysis),
                            NO_RESULT_PLACEHOLDER,
                        ),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            print_section("Nutrition Analysis", None, NO_RESULT_PLACEHOLDER);
                        }
                    }
                }
                commands::CommandResult::ShowHistory => {
                    println!("{}\n", utils::render_history(session.history()));
                }
                commands::CommandResult::Reset => {
                    session.reset();
                    println!("New session started: {}", session.thread_id());
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        if !session.analysis_done() {
            println!("Tip: upload a photo with /image <path> first for answers about your meal.");
        }

        match session.ask(input).await {
            Ok(answer) => print_section("Updated Analysis", Some(&answer), NO_RESPONSE_PLACEHOLDER),
            Err(e) => {
                eprintln!("Error: {}", e);
                print_section("Updated Analysis", None, NO_RESPONSE_PLACEHOLDER);
            }
        }
    }

    Ok(())
}
