// Taffy CLI - Command Line Interface
// Usage: taffy [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use taffy_core::evaluator::NodeEvaluator;
use taffy_core::node::Node;
use taffy_core::runtime::{Runtime, RuntimeConfig};

/// Taffy - a class-based, tree-walking interpreter
#[derive(Parser)]
#[command(name = "taffy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A class-based, tree-walking interpreted language", long_about = None)]
struct Cli {
    /// Source file to run (.ty)
    file: Option<PathBuf>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Registrations between garbage collections
    #[arg(long = "gc-threshold")]
    gc_threshold: Option<usize>,

    /// Disable the garbage collector
    #[arg(long = "no-gc")]
    no_gc: bool,

    /// Collect at every safe point
    #[arg(long = "always-gc", conflicts_with = "no_gc")]
    always_gc: bool,

    /// Objects allowed to survive a collection before evaluation aborts
    #[arg(long = "memory-limit")]
    memory_limit: Option<usize>,

    /// Extra source root searched for imports (repeatable)
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Import search path (repeatable)
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Worker threads available to evaluation
    #[arg(long = "max-future-threads")]
    max_future_threads: Option<usize>,

    /// JSON configuration file; flags override it
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "taffy_core::runtime=trace"
    #[arg(long = "log")]
    log: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let result = build_config(&cli).and_then(|config| run(cli, config));
    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

/// `--log` wins over `TAFFY_LOG`; warnings only by default
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env("TAFFY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig, String> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).map_err(|e| format!("{} {}", "error:".red().bold(), e))?,
        None => RuntimeConfig::default(),
    };

    if let Some(threshold) = cli.gc_threshold {
        config.gc.threshold = threshold;
    }
    if cli.no_gc {
        config.gc.enabled = false;
    }
    if cli.always_gc {
        config.gc.always = true;
    }
    if let Some(limit) = cli.memory_limit {
        config.gc.memory_limit = Some(limit);
    }
    if let Some(threads) = cli.max_future_threads {
        config.max_future_threads = threads;
    }
    config.plugin_dirs.extend(cli.plugin_dirs.iter().cloned());
    if !cli.include.is_empty() {
        // Explicit include paths come before the default working directory
        let mut paths = cli.include.clone();
        paths.append(&mut config.import_paths);
        config.import_paths = paths;
    }
    if let Some(dir) = cli.file.as_deref().and_then(Path::parent) {
        if !dir.as_os_str().is_empty() {
            config.import_paths.push(dir.to_path_buf());
        }
    }

    config
        .validate()
        .map_err(|e| format!("{} {}", "error:".red().bold(), e))?;
    Ok(config)
}

/// Host the evaluator on a blocking task; ctrl-c aborts every evaluator
fn run(cli: Cli, config: RuntimeConfig) -> Result<(), String> {
    let tokio = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.max_future_threads)
        .build()
        .map_err(|e| e.to_string())?;

    tokio.block_on(async move {
        let runtime = Runtime::new(config).map_err(|e| e.format())?;

        let watcher = runtime.clone();
        let ctrl_c = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting evaluation");
                watcher.abort_all();
            }
        });

        let worker = runtime.clone();
        let result = if let Some(code) = cli.exec {
            tokio::task::spawn_blocking(move || handle_exec(&worker, &code)).await
        } else if let Some(path) = cli.file {
            tokio::task::spawn_blocking(move || handle_run(&worker, &path)).await
        } else {
            tokio::task::spawn_blocking(move || repl(&worker)).await
        };

        ctrl_c.abort();
        runtime.shutdown();
        result.map_err(|e| e.to_string())?
    })
}

fn handle_run(runtime: &Arc<Runtime>, path: &Path) -> Result<(), String> {
    debug!(file = %path.display(), "running file");
    let mut evaluator = runtime.create_evaluator();
    evaluator.evaluate_file(path).map(|_| ()).map_err(|e| e.format())
}

fn handle_exec(runtime: &Arc<Runtime>, code: &str) -> Result<(), String> {
    let mut evaluator = runtime.create_evaluator();
    evaluator
        .evaluate_source(code, "<exec>")
        .map(|_| ())
        .map_err(|e| e.format())
}

fn repl(runtime: &Arc<Runtime>) -> Result<(), String> {
    use reedline::{DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal};

    // Unbalanced brackets continue onto the next line
    fn is_incomplete(code: &str) -> bool {
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;
        for c in code.chars() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth -= 1,
                _ => {}
            }
        }
        depth > 0 || in_string
    }

    println!();
    println!("  {}  {}", "Taffy".cyan().bold(), format!("v{}", env!("CARGO_PKG_VERSION")).bright_black());
    println!("  {}", "Type .help for commands, .exit to quit".bright_black());
    println!();

    let history_path = dirs_home().join(".taffy_history");
    let history = Box::new(
        FileBackedHistory::with_file(1000, history_path)
            .map_err(|e| e.to_string())?
    );
    let mut line_editor = Reedline::create().with_history(history);
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("taffy".to_string()),
        DefaultPromptSegment::Empty,
    );

    // One evaluator for the whole session, so bindings persist between lines
    let mut evaluator = runtime.create_evaluator();
    let mut accumulated_input = String::new();

    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                let input = line.trim();
                if accumulated_input.is_empty() && input.is_empty() {
                    continue;
                }

                if accumulated_input.is_empty() && input.starts_with('.') {
                    match input {
                        ".exit" | ".quit" => break,
                        ".help" => {
                            print_repl_help();
                            continue;
                        }
                        ".gc" => {
                            let stats = runtime.gc().stats();
                            println!("  {} tracked objects", stats.tracked_count);
                            continue;
                        }
                        _ => {
                            println!("{} Unknown command: {}", "!".red(), input);
                            println!("  Type {} for available commands", ".help".cyan());
                            continue;
                        }
                    }
                }

                if !accumulated_input.is_empty() {
                    accumulated_input.push('\n');
                }
                accumulated_input.push_str(&line);
                if is_incomplete(&accumulated_input) && !input.is_empty() {
                    continue;
                }

                let code = std::mem::take(&mut accumulated_input);
                match evaluator.evaluate_repl_line(code.trim()) {
                    Ok(value) => print_repl_result(&mut evaluator, &value),
                    Err(e) => eprintln!("{}", e.format()),
                }
            }
            Ok(Signal::CtrlC) => {
                if !accumulated_input.is_empty() {
                    accumulated_input.clear();
                    println!("{}", "^C (input cleared)".bright_black());
                } else {
                    println!("{}", "^C".bright_black());
                }
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "^D".bright_black());
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn print_repl_help() {
    println!();
    println!("  {}", "REPL Commands:".cyan().bold());
    println!("    {}    Exit the REPL", ".exit".yellow());
    println!("    {}      Show collector statistics", ".gc".yellow());
    println!("    {}    Show this help", ".help".yellow());
    println!();
}

/// Show the value of a line unless it is nil
fn print_repl_result(evaluator: &mut NodeEvaluator, value: &Node) {
    if evaluator.is_nil(value) {
        return;
    }
    match evaluator.display_string(value) {
        Ok(text) => println!("{}", text.green()),
        Err(unwind) => eprintln!("{}", evaluator.unwind_to_error(unwind, "<repl>").format()),
    }
}
