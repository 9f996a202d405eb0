use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::Confirm;
use gemtranslate::config::Config;
use gemtranslate::document::SUPPORTED_EXTENSIONS;
use gemtranslate::interactive::run_interactive_wizard;
use gemtranslate::keys::mask_key;
use gemtranslate::pipeline::{
    collect_inputs, print_summary, translate_batch, BatchReport, TranslateOptions,
    TranslationContext,
};
use gemtranslate::project::ProjectManager;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code for a batch that finished with failed files.
const EXIT_PARTIAL: u8 = 2;
/// Exit code after Ctrl+C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "gemtranslate")]
#[command(version, about = "Translate JSON, YAML, TOML, SRT, text and Markdown files with Gemini")]
#[command(long_about = "Translate structured and text files with Google Gemini.\n\n\
    Multiple API keys (GEMINI_API_KEYS=key1,key2) are rotated across requests.\n\
    Run without a command for the interactive wizard.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Translate files or folders
    Translate(TranslateArgs),

    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Inspect or remove project folders
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct TranslateArgs {
    /// Files or folders to translate
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Target language code (e.g., vi, ja, fr)
    #[arg(short = 't', long = "to")]
    to: Option<String>,

    /// Number of concurrent API requests
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory for translated copies
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Keep the original file name instead of adding the language suffix
    #[arg(long)]
    keep_name: bool,

    /// Descend into subfolders
    #[arg(short, long)]
    recursive: bool,

    /// Gemini model name
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum characters per request
    #[arg(long)]
    chunk_chars: Option<usize>,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum KeysAction {
    /// List keys (masked)
    List,
    /// Add comma-separated keys
    Add { keys: String },
    /// Remove keys by number as shown in `keys list`
    Remove {
        #[arg(required = true)]
        numbers: Vec<usize>,
    },
    /// Move a key to the front of the list
    Primary { number: usize },
}

#[derive(Subcommand)]
enum ProjectsAction {
    /// List projects, newest first
    List {
        /// Maximum number of projects to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Delete projects by name
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Delete every project
    Clean {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "warn,gemtranslate=debug"
    } else {
        "warn,gemtranslate=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// First Ctrl+C stops scheduling new work; a second one exits immediately.
fn install_ctrlc_handler(cancelled: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancelled.swap(true, Ordering::SeqCst) {
            eprintln!("\nForce quit");
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
        eprintln!("\nCancelling, waiting for in-flight requests (Ctrl+C again to force quit)");
    });
    if let Err(e) = result {
        warn!("Could not install Ctrl+C handler: {}", e);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let cancelled = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(cancelled.clone());

    match run(cli.command, cancelled.clone()).await {
        Ok(code) => code,
        Err(_) if cancelled.load(Ordering::SeqCst) => {
            eprintln!("{}", style("Cancelled").yellow());
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Option<Command>, cancelled: Arc<AtomicBool>) -> Result<ExitCode> {
    match command {
        None => run_interactive(cancelled).await,
        Some(Command::Translate(args)) => run_translate(args, cancelled).await,
        Some(Command::Keys { action }) => run_keys(action).map(|_| ExitCode::SUCCESS),
        Some(Command::Projects { action }) => run_projects(action).map(|_| ExitCode::SUCCESS),
        Some(Command::Config { action }) => run_config(action).map(|_| ExitCode::SUCCESS),
    }
}

async fn run_interactive(cancelled: Arc<AtomicBool>) -> Result<ExitCode> {
    let wizard = run_interactive_wizard()?;
    let ctx = TranslationContext::from_config(&wizard.config, cancelled.clone())
        .context("Configuration validation failed")?;

    let report = translate_batch(wizard.inputs, &ctx, &wizard.options).await;
    Ok(finish(&report, &cancelled))
}

async fn run_translate(args: TranslateArgs, cancelled: Arc<AtomicBool>) -> Result<ExitCode> {
    let mut config = Config::load().context("Failed to load configuration")?;

    if let Some(lang) = args.to {
        config.target_lang = lang;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.keep_name {
        config.keep_original_filename = true;
    }
    if let Some(model) = args.model {
        config.model.name = model;
    }
    if let Some(chars) = args.chunk_chars {
        config.max_chunk_chars = chars;
    }

    config.validate().context("Configuration validation failed")?;

    let inputs = collect_inputs(&args.paths, args.recursive)?;
    if inputs.is_empty() {
        anyhow::bail!(
            "No supported files found (supported: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }

    info!("Files:    {}", inputs.len());
    info!("Language: {}", config.target_lang);
    info!("Output:   {}", config.output_dir.display());

    let ctx = TranslationContext::from_config(&config, cancelled.clone())?;
    let mut options = TranslateOptions::from_config(&config);
    options.show_progress = !args.no_progress;

    let report = translate_batch(inputs, &ctx, &options).await;
    Ok(finish(&report, &cancelled))
}

fn finish(report: &BatchReport, cancelled: &AtomicBool) -> ExitCode {
    print_summary(report);

    if cancelled.load(Ordering::SeqCst) {
        ExitCode::from(EXIT_CANCELLED)
    } else if report.has_failures() {
        ExitCode::from(EXIT_PARTIAL)
    } else {
        ExitCode::SUCCESS
    }
}

/// Convert 1-based numbers from the command line to indices.
fn to_indices(numbers: &[usize]) -> Result<Vec<usize>> {
    numbers
        .iter()
        .map(|&n| {
            n.checked_sub(1)
                .ok_or_else(|| anyhow::anyhow!("Key numbers start at 1"))
        })
        .collect()
}

fn run_keys(action: KeysAction) -> Result<()> {
    match action {
        KeysAction::List => {
            let config = Config::load().context("Failed to load configuration")?;
            if config.api_keys.is_empty() {
                println!("No API keys configured.");
                return Ok(());
            }
            for (i, key) in config.api_keys.iter().enumerate() {
                let marker = if i == 0 { " (primary)" } else { "" };
                println!("  {}. {}{}", i + 1, mask_key(key), marker);
            }
            if std::env::var_os("GEMINI_API_KEYS").is_some()
                || std::env::var_os("GEMINI_API_KEY").is_some()
            {
                println!("\n  Keys come from the environment and override the config file.");
            }
        }
        KeysAction::Add { keys } => {
            let mut config = Config::load_file().context("Failed to read config file")?;
            let added = config.add_api_keys(&keys);
            let path = config.save()?;
            println!(
                "{} Added {} key(s), {} total, saved to {}",
                style("✓").green(),
                added,
                config.api_keys.len(),
                path.display()
            );
        }
        KeysAction::Remove { numbers } => {
            let mut config = Config::load_file().context("Failed to read config file")?;
            let removed = config.remove_api_keys(&to_indices(&numbers)?);
            if removed.is_empty() {
                anyhow::bail!("No matching keys (have {})", config.api_keys.len());
            }
            config.save()?;
            for key in &removed {
                println!("{} Removed {}", style("✓").green(), mask_key(key));
            }
        }
        KeysAction::Primary { number } => {
            let mut config = Config::load_file().context("Failed to read config file")?;
            let index = to_indices(&[number])?[0];
            config.set_primary_key(index)?;
            config.save()?;
            println!(
                "{} Primary key is now {}",
                style("✓").green(),
                mask_key(&config.api_keys[0])
            );
        }
    }
    Ok(())
}

fn run_projects(action: ProjectsAction) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let manager = ProjectManager::new(config.projects_dir);

    match action {
        ProjectsAction::List { limit } => {
            let projects = manager.list()?;
            if projects.is_empty() {
                println!("No projects in {}", manager.root().display());
                return Ok(());
            }
            println!(
                "{} project(s) in {}:",
                projects.len(),
                manager.root().display()
            );
            for project in projects.iter().take(limit) {
                println!(
                    "  {}  {}  ({} chunk(s), {} translated)",
                    project.modified.format("%Y-%m-%d %H:%M"),
                    style(&project.name).cyan(),
                    project.chunk_files,
                    project.translated_files
                );
            }
            if projects.len() > limit {
                println!("  ... and {} more", projects.len() - limit);
            }
        }
        ProjectsAction::Delete { names } => {
            for name in &names {
                manager
                    .delete(name)
                    .with_context(|| format!("Failed to delete project {}", name))?;
                println!("{} Deleted {}", style("✓").green(), name);
            }
        }
        ProjectsAction::Clean { yes } => {
            if !yes
                && !Confirm::new()
                    .with_prompt(format!(
                        "Delete every project in {}?",
                        manager.root().display()
                    ))
                    .default(false)
                    .interact()?
            {
                return Ok(());
            }
            let removed = manager.delete_all()?;
            println!("{} Deleted {} project(s)", style("✓").green(), removed);
        }
    }
    Ok(())
}

fn run_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = Config::load().context("Failed to load configuration")?;
            config.api_keys = config.api_keys.iter().map(|k| mask_key(k)).collect();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => match Config::config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("No config directory on this platform"),
        },
    }
    Ok(())
}
