use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    IngestConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_QUERY_PARAMS,
};
use crate::logging::{init_tracing, LogFormat};
use crate::server::{start_server, ServeConfig};

const DEFAULT_PORT: u16 = 3000;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "nano-upload")]
#[command(about = "Small upload server with an incremental request parser")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long = "upload-dir", default_value = "uploads")]
    #[arg(help = "Directory uploaded files are stored in")]
    pub upload_dir: PathBuf,

    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    #[arg(help = "Port to listen on")]
    pub port: u16,

    #[arg(long = "buffer-size", default_value_t = DEFAULT_BUFFER_CAPACITY)]
    #[arg(help = "Per-connection read buffer size in bytes")]
    pub buffer_size: usize,

    #[arg(long = "max-query-params", default_value_t = DEFAULT_MAX_QUERY_PARAMS)]
    #[arg(help = "Query parameters kept per request")]
    pub max_query_params: usize,

    #[arg(long = "read-timeout-secs", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    #[arg(help = "Seconds to wait for more data from a silent client (0 waits forever)")]
    pub read_timeout_secs: u64,

    #[arg(long = "log-level", default_value = "info")]
    #[arg(help = "Log level (debug, info, warn, error)")]
    pub log_level: String,

    #[arg(long = "log-format", default_value = "console")]
    #[arg(help = "Log format (json, console)")]
    pub log_format: String,

    #[arg(long = "log-requests", default_value_t = true)]
    #[arg(help = "Log HTTP requests")]
    pub log_requests: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Start the upload server")]
    Serve {
        #[arg(help = "Directory uploaded files are stored in")]
        directory: Option<PathBuf>,

        #[arg(short = 'p', long = "port")]
        #[arg(help = "Port to listen on")]
        port: Option<u16>,

        #[arg(long = "buffer-size")]
        #[arg(help = "Per-connection read buffer size in bytes")]
        buffer_size: Option<usize>,

        #[arg(long = "max-query-params")]
        #[arg(help = "Query parameters kept per request")]
        max_query_params: Option<usize>,

        #[arg(long = "read-timeout-secs")]
        #[arg(help = "Seconds to wait for more data from a silent client (0 waits forever)")]
        read_timeout_secs: Option<u64>,

        #[arg(long = "log-level")]
        #[arg(help = "Log level (debug, info, warn, error)")]
        log_level: Option<String>,

        #[arg(long = "log-format")]
        #[arg(help = "Log format (json, console)")]
        log_format: Option<String>,

        #[arg(long = "log-requests")]
        #[arg(help = "Log HTTP requests")]
        log_requests: Option<bool>,
    },
    #[command(about = "Show version information")]
    Version,
    #[command(about = "Generate completion script")]
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Some(Commands::Serve {
                ref directory,
                port,
                buffer_size,
                max_query_params,
                read_timeout_secs,
                ref log_level,
                ref log_format,
                log_requests,
            }) => {
                let level = log_level.as_deref().unwrap_or(&self.log_level);
                let format = LogFormat::parse(log_format.as_deref().unwrap_or(&self.log_format))?;
                init_tracing(level, format)?;

                // Use subcommand values or fall back to global defaults
                let config = ServeConfig {
                    upload_dir: directory.clone().unwrap_or_else(|| self.upload_dir.clone()),
                    port: port.unwrap_or(self.port),
                    log_requests: log_requests.unwrap_or(self.log_requests),
                    ingest: IngestConfig {
                        buffer_capacity: buffer_size.unwrap_or(self.buffer_size),
                        max_query_params: max_query_params.unwrap_or(self.max_query_params),
                        idle_timeout: idle_timeout(
                            read_timeout_secs.unwrap_or(self.read_timeout_secs),
                        ),
                    },
                };

                start_server(config).await
            }
            Some(Commands::Version) => {
                println!("{}", full_version());
                println!("Small upload server with an incremental request parser");
                Ok(())
            }
            Some(Commands::Completion { shell }) => {
                generate_completion(shell);
                Ok(())
            }
            None => {
                // Show help when no subcommand is provided
                let mut cmd = Self::command();
                cmd.print_help()?;
                Ok(())
            }
        }
    }
}

fn idle_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn full_version() -> String {
    format!("nano-upload v{}", VERSION)
}

fn generate_completion(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "nano-upload", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::parse_from([
            "nano-upload",
            "--port",
            "8080",
            "serve",
            "/tmp/in",
            "--buffer-size",
            "8192",
        ]);
        assert_eq!(cli.port, 8080);
        match cli.command {
            Some(Commands::Serve {
                directory,
                buffer_size,
                port,
                ..
            }) => {
                assert_eq!(directory, Some(PathBuf::from("/tmp/in")));
                assert_eq!(buffer_size, Some(8192));
                assert_eq!(port, None);
            }
            _ => panic!("expected serve subcommand"),
        }
    }

    #[test]
    fn test_single_slot_has_no_connection_flag() {
        assert!(Cli::try_parse_from(["nano-upload", "--max-connections", "4"]).is_err());
        assert!(
            Cli::try_parse_from(["nano-upload", "serve", "--max-connections", "4"]).is_err()
        );
    }

    #[test]
    fn test_read_timeout_is_per_read() {
        let cli = Cli::parse_from(["nano-upload"]);
        assert_eq!(cli.read_timeout_secs, 30);
        assert_eq!(idle_timeout(30), Some(Duration::from_secs(30)));
        assert_eq!(idle_timeout(0), None);
    }
}
