//! modlink CLI: boot a module runtime and inspect module graphs.

use std::cmp::Ordering;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use modlink::bootstrap::Runtime;
use modlink::config::{FallOpenMode, RuntimeConfig};
use modlink::context::Context;
use modlink::identity::ModuleIdentity;
use modlink::paths::LoaderPaths;
use modlink::provenance::Dependency;
use modlink::resolver::lifecycle::ExtensionTable;
use modlink::version::VersionKey;

#[derive(Parser)]
#[command(name = "modlink", version, about = "Versioned module-loading runtime")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/modlink/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Module search root, highest priority first. Repeatable.
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Root module identity (e.g. `app-v1`).
    #[arg(long, global = true)]
    module: Option<String>,

    /// Entry symbol resolved by `run`.
    #[arg(long, global = true)]
    entry: Option<String>,

    /// Fall-open mode: disabled, diagnose or enabled.
    #[arg(long, global = true)]
    fall_open: Option<FallOpenMode>,

    /// Do not register the root module's dependencies at boot.
    #[arg(long, global = true)]
    no_preload: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the runtime and resolve the entry symbol.
    Run {
        /// Write the entry artifact's bytes to stdout.
        #[arg(long)]
        dump: bool,
    },

    /// Resolve a symbol as the root module.
    Resolve {
        /// Symbol name, or a direct reference `module:symbol`.
        symbol: String,
    },

    /// Show a module's declared dependencies and where they are located.
    Deps {
        /// Module identity (e.g. `core-v1`).
        module: String,

        #[arg(long)]
        json: bool,
    },

    /// List plugin bindings for an interface.
    Plugins {
        /// Interface name.
        interface: String,

        #[arg(long)]
        json: bool,

        /// Also resolve each implementation.
        #[arg(long)]
        load: bool,
    },

    /// Compare two version strings.
    Compare { a: String, b: String },

    /// Boot the runtime and print the context tree.
    Tree,
}

#[derive(Serialize)]
struct DependencyReport {
    module: ModuleIdentity,
    minor: Option<String>,
    location: Option<PathBuf>,
    error: Option<String>,
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let paths = LoaderPaths::resolve().ok();

    let config_file = cli
        .config
        .clone()
        .or_else(|| paths.as_ref().map(LoaderPaths::config_file).filter(|p| p.is_file()));
    let config = match config_file {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config file");
            RuntimeConfig::load(&path)?
        }
        None => RuntimeConfig::default(),
    };
    let mut config = config.with_env()?;

    if !cli.roots.is_empty() {
        config.search_roots = cli.roots.clone();
    }
    if let Some(module) = &cli.module {
        config.root_module = Some(module.clone());
    }
    if let Some(entry) = &cli.entry {
        config.entry_symbol = Some(entry.clone());
    }
    if let Some(mode) = cli.fall_open {
        config.fall_open = mode;
    }
    if cli.no_preload {
        config.preload_root_dependencies = false;
    }
    if config.search_roots.is_empty() {
        if let Some(paths) = &paths {
            config.search_roots.push(paths.modules_dir());
        }
    }
    Ok(config)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run { dump } => {
            let runtime = Runtime::boot(config, ExtensionTable::new())?;
            let artifact = runtime.entry_point()?;
            if dump {
                std::io::stdout()
                    .write_all(artifact.bytes())
                    .into_diagnostic()?;
            } else {
                println!("{artifact}");
            }
            runtime.shutdown();
        }

        Commands::Resolve { symbol } => {
            let runtime = Runtime::boot(config, ExtensionTable::new())?;
            let artifact = runtime.entry_module().resolve(&symbol)?;
            println!("{artifact}");
            runtime.shutdown();
        }

        Commands::Deps { module, json } => {
            let identity = ModuleIdentity::parse(&module)?;
            let roots = config.search_roots.clone();
            let context = Context::new_root(
                "inspect",
                roots,
                Arc::new(config),
                Arc::new(ExtensionTable::new()),
            );
            let record = context
                .registry()
                .locate(&Dependency::primary(identity))?;

            let reports: Vec<DependencyReport> = record
                .dependencies()?
                .iter()
                .map(|dependency| {
                    let located = context.registry().locate(dependency);
                    DependencyReport {
                        module: dependency.identity().clone(),
                        minor: dependency.identity().minor().map(str::to_string),
                        location: located.as_ref().ok().map(|r| r.layout().directory.clone()),
                        error: located.err().map(|e| e.to_string()),
                    }
                })
                .collect();

            if json {
                let json = serde_json::to_string_pretty(&reports).into_diagnostic()?;
                println!("{json}");
            } else {
                println!("{} ({})", record.identity(), record.layout().directory.display());
                if reports.is_empty() {
                    println!("  no dependencies declared");
                }
                for report in &reports {
                    match (&report.location, &report.error) {
                        (Some(location), _) => {
                            println!("  {:<24} {}", report.module.to_string(), location.display())
                        }
                        (None, Some(error)) => println!("  {:<24} MISSING: {error}", report.module.to_string()),
                        (None, None) => println!("  {}", report.module),
                    }
                }
            }
        }

        Commands::Plugins {
            interface,
            json,
            load,
        } => {
            let runtime = Runtime::boot(config, ExtensionTable::new())?;
            let declarations = runtime.root().plugins(&interface)?;

            if json {
                let json = serde_json::to_string_pretty(&declarations).into_diagnostic()?;
                println!("{json}");
            } else if declarations.is_empty() {
                println!("No plugins registered for {interface}.");
            } else {
                println!("Plugins for {interface} ({}):", declarations.len());
                for declaration in &declarations {
                    println!(
                        "  {} (declared by {})",
                        declaration.reference(),
                        declaration.declared_by
                    );
                }
            }

            if load {
                for declaration in &declarations {
                    let artifact = declaration.load(runtime.root())?;
                    println!("  loaded {artifact}");
                }
            }
            runtime.shutdown();
        }

        Commands::Compare { a, b } => {
            let (ka, kb) = (VersionKey::new(a.as_str()), VersionKey::new(b.as_str()));
            let symbol = match ka.cmp(&kb) {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            println!("{a} {symbol} {b}");
        }

        Commands::Tree => {
            let runtime = Runtime::boot(config, ExtensionTable::new())?;
            print!("{}", runtime.root().describe());
            runtime.shutdown();
        }
    }

    Ok(())
}
