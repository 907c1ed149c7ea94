//! tk - manage the 2Keys add-on registry and the software add-ons install.

use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tk_core::{AddonType, Config, Paths};

mod commands;
mod display;

#[derive(Parser)]
#[command(name = "tk")]
#[command(about = "tk - 2Keys add-on and software registry")]
#[command(version)]
struct Cli {
    /// Registry root directory
    #[arg(long, env = "TWOKEYS_ROOT", default_value = "/opt/twokeys")]
    root: PathBuf,

    /// npm-compatible program used to fetch add-ons
    #[arg(long, env = "TWOKEYS_PACKAGE_MANAGER", default_value = "npm")]
    package_manager: String,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry layout and database
    Init,

    /// Fetch an add-on with the package manager and register it
    Install {
        /// Package name, or a directory with --local
        name: String,

        /// Install from a directory on disk
        #[arg(long)]
        local: bool,

        /// Replace an existing registry entry
        #[arg(long, short)]
        force: bool,

        /// Version to install
        #[arg(long = "version", value_name = "VERSION")]
        version: Option<String>,
    },

    /// Register an add-on already present in node_modules
    Add {
        name: String,

        /// Replace an existing registry entry
        #[arg(long, short)]
        force: bool,
    },

    /// Remove an add-on
    Uninstall { name: String },

    /// Install another version of an add-on
    Update { name: String, version: String },

    /// Rebuild the package table from the root package.json
    Reindex,

    /// List registered add-ons
    List {
        /// Only add-ons providing this type
        #[arg(long = "type", value_name = "TYPE")]
        addon_type: Option<AddonType>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a registered add-on
    Info {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage software installed by add-ons
    Software {
        #[command(subcommand)]
        action: SoftwareAction,
    },
}

#[derive(Subcommand, Clone)]
pub enum SoftwareAction {
    /// List software and executables
    List {
        /// Only software with this name
        #[arg(long)]
        name: Option<String>,

        /// Only software owned by this add-on
        #[arg(long)]
        owner: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete software and its files
    Uninstall { owner: String, name: String },

    /// Download software again, even if it opts out of automatic installs
    Reinstall { owner: String, name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config(cli: &Cli) -> Config {
    Config {
        package_manager: cli.package_manager.clone(),
        ..Config::default()
    }
}

async fn run(cli: Cli) -> Result<(), tk_core::Error> {
    let paths = Paths::new(&cli.root);
    let config = config(&cli);

    match cli.command {
        Commands::Init => commands::package::run_init(&paths).await,

        Commands::Install {
            name,
            local,
            force,
            version,
        } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_install(&registry, &name, local, force, version).await
        }

        Commands::Add { name, force } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_add(&registry, &name, force).await
        }

        Commands::Uninstall { name } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_uninstall(&registry, &name).await
        }

        Commands::Update { name, version } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_update(&registry, &name, &version).await
        }

        Commands::Reindex => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_reindex(&registry).await
        }

        Commands::List { addon_type, json } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_list(&registry, addon_type, json)
        }

        Commands::Info { name, json } => {
            let registry = commands::package::open(&paths, &config)?;
            commands::package::run_info(&registry, &name, json)
        }

        Commands::Software { action } => commands::software::run(paths, &config, action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_defaults_to_opt_twokeys() {
        let cli = Cli::try_parse_from(["tk", "reindex"]).unwrap();
        assert!(matches!(cli.command, Commands::Reindex));
        if std::env::var_os("TWOKEYS_ROOT").is_none() {
            assert_eq!(cli.root, PathBuf::from("/opt/twokeys"));
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn install_flags_parse() {
        let cli = Cli::try_parse_from([
            "tk",
            "--root",
            "/tmp/reg",
            "install",
            "executor-ahk",
            "--force",
            "--version",
            "1.2.0",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/tmp/reg"));
        match cli.command {
            Commands::Install {
                name,
                local,
                force,
                version,
            } => {
                assert_eq!(name, "executor-ahk");
                assert!(!local);
                assert!(force);
                assert_eq!(version.as_deref(), Some("1.2.0"));
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn list_type_filter_parses_addon_type() {
        let cli = Cli::try_parse_from(["tk", "list", "--type", "detector", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                addon_type: Some(AddonType::Detector),
                json: true,
            }
        ));

        assert!(Cli::try_parse_from(["tk", "list", "--type", "widget"]).is_err());
    }

    #[test]
    fn software_subcommands_parse() {
        let cli = Cli::try_parse_from(["tk", "software", "reinstall", "executor-ahk", "ahk"]).unwrap();
        match cli.command {
            Commands::Software {
                action: SoftwareAction::Reinstall { owner, name },
            } => {
                assert_eq!(owner, "executor-ahk");
                assert_eq!(name, "ahk");
            }
            _ => panic!("Expected Software Reinstall command"),
        }

        let cli =
            Cli::try_parse_from(["tk", "software", "list", "--owner", "executor-ahk"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Software {
                action: SoftwareAction::List {
                    name: None,
                    json: false,
                    ..
                },
            }
        ));
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["tk", "software", "list", "-v"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn package_manager_override_reaches_config() {
        let cli = Cli::try_parse_from(["tk", "--package-manager", "pnpm", "reindex"]).unwrap();
        assert_eq!(config(&cli).package_manager, "pnpm");
    }
}
