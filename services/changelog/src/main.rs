//! `changelog-manager`: maintain the changelog registry from the command line.

use std::net::SocketAddr;

use camino::{Utf8Path, Utf8PathBuf};
use changelog::{CommitInput, NewVersion, RegistryConfig, RegistryService};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::{WrapErr, eyre};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Manage the changelog registry")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Registry root, overriding the configuration
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a new version
    AddVersion {
        /// Name of the version, e.g. "1.22.0"
        #[arg(long)]
        name: String,
        /// Download path of the main artifact
        #[arg(long)]
        path: Option<Utf8PathBuf>,
        /// Mark the version as unmaintained
        #[arg(long)]
        unmaintained: bool,
    },

    /// Add a changelog entry with its artifact
    AddChangelog {
        /// Version to add the changelog to; created if missing
        #[arg(long)]
        version: String,
        /// Artifact file for the new build
        #[arg(long)]
        file: Utf8PathBuf,
        /// Commit in "hash:message" form, may be repeated
        #[arg(long)]
        commit: Vec<String>,
        /// Commit message with a generated hash, may be repeated
        #[arg(long)]
        message: Vec<String>,
    },

    /// Remove a changelog entry by build number
    RemoveChangelog {
        #[arg(long)]
        version: String,
        #[arg(long)]
        build: u64,
    },

    /// Remove a version and all of its artifacts
    RemoveVersion {
        #[arg(long)]
        version: String,
    },

    /// Change the maintained status of a version
    SetStatus {
        #[arg(long)]
        version: String,
        #[arg(long, value_enum)]
        status: Status,
    },

    /// List all versions and their status
    ListVersions,

    /// Verify that the registry document parses
    Check,

    /// Serve the HTTP API
    Serve {
        /// Listen address, overriding the configuration
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Status {
    Maintained,
    Unmaintained,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Maintained => "maintained",
            Status::Unmaintained => "unmaintained",
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RegistryConfig::default(),
    };
    if let Some(root) = cli.root {
        config.root = root;
    }

    run(cli.command, config).await
}

async fn run(command: Command, mut config: RegistryConfig) -> eyre::Result<()> {
    let service = config.build();

    match command {
        Command::AddVersion {
            name,
            path,
            unmaintained,
        } => {
            service
                .create_version(NewVersion {
                    name: name.clone(),
                    maintained: !unmaintained,
                    download_path: path,
                })
                .await?;
            println!("Version '{name}' added successfully.");
        }
        Command::AddChangelog {
            version,
            file,
            commit,
            message,
        } => add_changelog(&service, &version, &file, commit, message).await?,
        Command::RemoveChangelog { version, build } => {
            let removed = service.remove_changelog(&version, build).await?;
            if let Some(warning) = removed.warning {
                eprintln!("Warning: {warning}");
            }
            println!("Changelog build #{build} removed from version '{version}' successfully.");
        }
        Command::RemoveVersion { version } => {
            let removed = service.remove_version(&version).await?;
            if let Some(warning) = removed.warning {
                eprintln!("Warning: {warning}");
            }
            println!(
                "Version '{version}' removed with {} builds.",
                removed.project.build_count()
            );
        }
        Command::SetStatus { version, status } => {
            service
                .set_maintained(&version, status == Status::Maintained)
                .await?;
            println!(
                "Status of version '{version}' set to '{}' successfully.",
                status.as_str()
            );
        }
        Command::ListVersions => list_versions(&service).await?,
        Command::Check => {
            let registry = service.store().load_strict().await?;
            println!(
                "{}: {} versions, {} builds",
                service.store().path(),
                registry.len(),
                registry.iter().map(|p| p.build_count()).sum::<usize>()
            );
        }
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            serve(service, &config).await?;
        }
    }

    Ok(())
}

async fn add_changelog(
    service: &RegistryService,
    version: &str,
    file: &Utf8Path,
    commits: Vec<String>,
    messages: Vec<String>,
) -> eyre::Result<()> {
    let mut inputs = Vec::with_capacity(commits.len() + messages.len());
    for commit in &commits {
        match CommitInput::parse(commit) {
            Ok(input) => inputs.push(input),
            Err(error) => eprintln!("Warning: {error}. Skipping."),
        }
    }
    inputs.extend(messages.into_iter().map(CommitInput::message));

    let filename = file
        .file_name()
        .ok_or_else(|| eyre!("{file} does not name a file"))?;
    let mut reader = tokio::fs::File::open(file)
        .await
        .wrap_err_with(|| format!("opening {file}"))?;

    let changelog = service
        .add_changelog(version, inputs, filename, &mut reader)
        .await?;

    println!(
        "Changelog build #{} added to version '{version}' successfully.",
        changelog.build_number
    );
    Ok(())
}

async fn list_versions(service: &RegistryService) -> eyre::Result<()> {
    let registry = service.list_projects().await?;
    if registry.is_empty() {
        println!("No versions found in {}.", service.store().path());
        return Ok(());
    }

    println!("Available Versions:");
    for project in &registry {
        let status = if project.maintained {
            "[Maintained]"
        } else {
            "[Unmaintained]"
        };
        println!(
            "Version: {} {status} ({} builds)",
            project.version_name,
            project.build_count()
        );
    }
    Ok(())
}

async fn serve(service: RegistryService, config: &RegistryConfig) -> eyre::Result<()> {
    let app = changelog::api::router(service, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.listen))?;

    tracing::info!(listen = %config.listen, root = %config.root, "Serving changelog registry");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "Unable to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

fn load_config(path: &Utf8Path) -> eyre::Result<RegistryConfig> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?;
    parse_config(&text).wrap_err_with(|| format!("parsing {path}"))
}

fn parse_config(text: &str) -> eyre::Result<RegistryConfig> {
    Ok(toml_edit::de::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_full_config() {
        let config = parse_config(
            r#"
root = "/srv/downloads"
registry = "config/registry.json"
lock-timeout = 5
max-upload-bytes = 1048576
listen = "0.0.0.0:8080"
"#,
        )
        .unwrap();

        assert_eq!(config.root.as_str(), "/srv/downloads");
        assert_eq!(
            config.registry_path().as_str(),
            "/srv/downloads/config/registry.json"
        );
        assert_eq!(config.lock_timeout, 5);
        assert_eq!(config.max_upload_bytes, 1_048_576);
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(parse_config("").unwrap(), RegistryConfig::default());
    }

    #[test]
    fn parse_config_rejects_bad_values() {
        assert!(parse_config("lock-timeout = \"soon\"").is_err());
        assert!(parse_config("lock-timeout = -1").is_err());
        assert!(parse_config("listen = \"nowhere\"").is_err());
        assert!(parse_config("color = true").is_err());
    }

    #[test]
    fn commits_are_repeatable() {
        let cli = Cli::try_parse_from([
            "changelog-manager",
            "add-changelog",
            "--version",
            "Foo",
            "--file",
            "Foo.jar",
            "--commit",
            "abc123:fix",
            "--commit",
            "def456:feature",
            "--message",
            "generated",
        ])
        .unwrap();

        let Command::AddChangelog {
            commit, message, ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(commit, ["abc123:fix", "def456:feature"]);
        assert_eq!(message, ["generated"]);
    }
}
