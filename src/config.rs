//! Configuration: CLI flags via `clap`, layered over an
//! optional `key=value` config file, layered over built-in defaults.
//! Precedence is CLI > file > default.

use crate::error::ConfigError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 4242;
const DEFAULT_CHARSET: &str = "utf-8";

/// Command-line flags. Every field is optional so a missing flag can fall
/// through to the config file and then the built-in default.
#[derive(Debug, clap::Parser)]
#[command(name = "textboard", about = "Line-oriented topic message board server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory of the message database.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Charset used to decode/encode client connections.
    #[arg(long)]
    pub charset: Option<String>,

    /// Optional `key=value` config file; CLI flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Fully resolved, validated configuration ready to hand to [`crate::run`].
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_root: PathBuf,
    pub charset_label: String,
}

impl Config {
    /// Resolve `cli` (and, if present, its `--config` file) into a
    /// validated [`Config`]. This is the only place configuration
    /// validation happens; every error here is fatal at startup.
    pub fn resolve(cli: Cli) -> Result<Config, ConfigError> {
        let file_values = match &cli.config {
            Some(path) => parse_config_file(path)?,
            None => FileValues::default(),
        };

        let port = cli
            .port
            .or(file_values.port)
            .unwrap_or(DEFAULT_PORT);

        let db_root = cli
            .db
            .or(file_values.database_directory)
            .unwrap_or_else(|| PathBuf::from("."));

        let charset_label = cli
            .charset
            .or(file_values.charset)
            .unwrap_or_else(|| DEFAULT_CHARSET.to_owned());

        validate_db_root(&db_root)?;
        // `Charset::resolve` is the authoritative check for the label, but
        // call it here too so an unknown charset fails before the index or
        // listener is ever constructed, not on the first accepted client.
        crate::charset::Charset::resolve(&charset_label)?;

        Ok(Config {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            db_root,
            charset_label,
        })
    }
}

#[derive(Debug, Default)]
struct FileValues {
    port: Option<u16>,
    database_directory: Option<PathBuf>,
    charset: Option<String>,
}

/// Parse a `key=value` config file, one entry per line. Blank lines and
/// lines starting with `#` are ignored, matching the ignore-blank/
/// ignore-comment convention used for this project's other line-oriented
/// input files.
fn parse_config_file(path: &Path) -> Result<FileValues, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadConfigFile {
        path: path.to_owned(),
        source,
    })?;

    let mut values = FileValues::default();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine {
                path: path.to_owned(),
                line_no: idx + 1,
                line: raw_line.to_owned(),
            });
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "port" => {
                let port: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.to_owned()))?;
                values.port = Some(port);
            }
            "database_directory" => values.database_directory = Some(PathBuf::from(value)),
            "charset" => values.charset = Some(value.to_owned()),
            _ => {
                return Err(ConfigError::MalformedLine {
                    path: path.to_owned(),
                    line_no: idx + 1,
                    line: raw_line.to_owned(),
                });
            }
        }
    }
    Ok(values)
}

fn validate_db_root(db_root: &Path) -> Result<(), ConfigError> {
    if db_root.exists() && !db_root.is_dir() {
        return Err(ConfigError::NotADirectory(db_root.to_owned()));
    }
    if let Some(parent) = db_root.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            return Err(ConfigError::CreateDir {
                path: db_root.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "parent directory does not exist"),
            });
        }
    }
    Ok(())
}
