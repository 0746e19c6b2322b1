//! Run configuration.
//!
//! Precedence: command-line flags, then environment variables (a `.env` file
//! is loaded first), then built-in defaults. Missing database credentials are
//! asked for on the terminal, except in dry-run mode.

use crate::normalize::normalize_column_name;
use crate::schema::TableNames;
use anyhow::{bail, Context, Result};
use clap::Parser;
use sqlx::postgres::PgConnectOptions;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DB_NAME: &str = "TEMPERAS";
pub const DEFAULT_TABLE_SUFFIX: &str = "temperas_vinilos";
pub const DEFAULT_LOG_FILE: &str = "etl_process.log";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "temperas-etl",
    about = "Loads the Temperas y Vinilos production log into PostgreSQL and builds the business tables"
)]
pub struct Args {
    /// Workbook to load; discovered under --search-root when omitted
    #[arg(long, env = "EXCEL_FILE")]
    pub excel_file: Option<PathBuf>,

    /// Directory searched recursively for the workbook
    #[arg(long, env = "SEARCH_ROOT", default_value = ".")]
    pub search_root: PathBuf,

    /// Full connection URL; overrides the individual --db-* settings
    #[arg(long, env = "DB_URL")]
    pub db_url: Option<String>,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    #[arg(long, env = "DB_NAME", default_value = DEFAULT_DB_NAME)]
    pub db_name: String,

    /// Suffix of the raw and clean tables (datos_crudos_<suffix>, datos_limpios_<suffix>)
    #[arg(long, env = "TABLE_SUFFIX", default_value = DEFAULT_TABLE_SUFFIX)]
    pub table_suffix: String,

    /// Append logs to this file as well as the console
    #[arg(long, env = "LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Continue with row 0 as header when no row matches enough keywords
    #[arg(long, default_value = "false")]
    pub accept_fallback_header: bool,

    /// Read and map the workbook without touching the database
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Write a JSON run report to this path
    #[arg(long, env = "REPORT_FILE")]
    pub report: Option<PathBuf>,
}

/// Where to connect
#[derive(Clone)]
pub enum DatabaseTarget {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: String,
        password: String,
        name: String,
    },
}

impl DatabaseTarget {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match self {
            DatabaseTarget::Url(url) => {
                PgConnectOptions::from_str(url).context("Invalid database URL")
            }
            DatabaseTarget::Parts {
                host,
                port,
                user,
                password,
                name,
            } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(name)),
        }
    }

    /// Connection description without credentials, for logs
    pub fn describe(&self) -> String {
        match self {
            DatabaseTarget::Url(url) => match url.rsplit_once('@') {
                Some((_, rest)) => format!("postgres://***@{rest}"),
                None => url.clone(),
            },
            DatabaseTarget::Parts {
                host, port, user, name, ..
            } => format!("postgres://{user}@{host}:{port}/{name}"),
        }
    }
}

impl std::fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub excel_file: Option<PathBuf>,
    pub search_root: PathBuf,
    /// `None` in dry-run mode
    pub database: Option<DatabaseTarget>,
    pub tables: TableNames,
    pub log_file: Option<PathBuf>,
    pub accept_fallback_header: bool,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
}

impl Config {
    /// Resolve the final configuration, asking `prompt` for missing credentials
    pub fn resolve<P>(args: Args, mut prompt: P) -> Result<Self>
    where
        P: FnMut(&str, bool) -> Result<String>,
    {
        let database = if args.dry_run {
            None
        } else if let Some(url) = args.db_url {
            Some(DatabaseTarget::Url(url))
        } else {
            let user = match args.db_user {
                Some(user) => user,
                None => prompt("PostgreSQL user: ", false)?,
            };
            if user.trim().is_empty() {
                bail!("A database user is required");
            }
            let password = match args.db_password {
                Some(password) => password,
                None => prompt("PostgreSQL password: ", true)?,
            };
            Some(DatabaseTarget::Parts {
                host: args.db_host,
                port: args.db_port,
                user,
                password,
                name: args.db_name,
            })
        };

        let log_file = if args.log_file.as_os_str().is_empty() {
            None
        } else {
            Some(args.log_file)
        };

        Ok(Self {
            excel_file: args.excel_file,
            search_root: args.search_root,
            database,
            tables: TableNames::with_suffix(&normalize_column_name(Some(&args.table_suffix))),
            log_file,
            accept_fallback_header: args.accept_fallback_header,
            dry_run: args.dry_run,
            report: args.report,
        })
    }
}

/// Read one line from the terminal after printing `label`; `secret` input
/// is not echoed
pub fn terminal_prompt(label: &str, secret: bool) -> Result<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("{} is required but stdin is not a terminal", prompt_name(label));
    }
    if secret {
        return rpassword::prompt_password(label)
            .with_context(|| format!("Failed to read {}", prompt_name(label)));
    }
    eprint!("{label}");
    io::stderr().flush()?;

    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("Failed to read from terminal")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_name(label: &str) -> &str {
    label.trim_end_matches(": ")
}

/// "s", "si", "sí", "y" or "yes", any case
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "s" | "si" | "sí" | "y" | "yes"
    )
}
