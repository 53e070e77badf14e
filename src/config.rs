use crate::{errors::ConfigError, services::path_namer::TimePrecision};
use clap::{Parser, Subcommand};
use std::{env, fmt, str::FromStr};

/// Settings shared by every mode.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub time_precision: TimePrecision,
    pub output_bucket: Option<String>,
    pub max_width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Batch(BatchConfig),
    Serve(ServeConfig),
    Migrate,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub input: InputLocation,
    pub task_index: usize,
    pub task_count: usize,
    pub preserve_subpath: bool,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub upload_bucket: String,
}

impl ServeConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Batch input given as `bucket[/prefix]`, optionally with a `scheme://` in
/// front (`gs://photos/2025`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLocation {
    pub bucket: String,
    /// Folder under the bucket, without leading or trailing slashes.
    pub prefix: String,
}

impl InputLocation {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            name: "input",
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let without_scheme = match raw.split_once("://") {
            Some((_, rest)) => rest,
            None => raw,
        };
        let (bucket, prefix) = match without_scheme.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (without_scheme, ""),
        };
        if bucket.trim().is_empty() {
            return Err(invalid("expected bucket[/prefix]"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Prefix handed to the store: the folder itself, so `photos` does not
    /// also match `photos2/`.
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

impl fmt::Display for InputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{}", self.bucket)
        } else {
            write!(f, "{}/{}", self.bucket, self.prefix)
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Thumbnail images held in an object store")]
pub struct Cli {
    /// Directory where object payloads are stored (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides THUMBNAILER_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Time bucket precision, `hour` or `minute` (overrides TIME_BUCKET_PRECISION)
    #[arg(long, global = true)]
    pub time_precision: Option<TimePrecision>,

    /// Bucket that receives thumbnails; defaults to the source bucket (overrides OUTPUT_BUCKET)
    #[arg(long, global = true)]
    pub output_bucket: Option<String>,

    /// Thumbnail bounding box width (overrides THUMBNAIL_MAX_WIDTH)
    #[arg(long, global = true)]
    pub max_width: Option<u32>,

    /// Thumbnail bounding box height (overrides THUMBNAIL_MAX_HEIGHT)
    #[arg(long, global = true)]
    pub max_height: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Thumbnail this worker's shard of the images under a prefix
    Batch(BatchArgs),
    /// Serve the notification and upload endpoints
    Serve(ServeArgs),
    /// Create the metadata schema and exit
    Migrate,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// Input as bucket[/prefix] (overrides INPUT_FOLDER)
    #[arg(long)]
    pub input: Option<String>,

    /// This worker's index (overrides CLOUD_RUN_TASK_INDEX)
    #[arg(long)]
    pub task_index: Option<usize>,

    /// Total number of workers (overrides CLOUD_RUN_TASK_COUNT)
    #[arg(long)]
    pub task_count: Option<usize>,

    /// Keep the path relative to the input prefix in output names (or PRESERVE_SUBPATH=true)
    #[arg(long)]
    pub preserve_subpath: bool,

    /// Items of the shard processed at once (overrides BATCH_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket receiving direct uploads (overrides UPLOAD_BUCKET)
    #[arg(long)]
    pub upload_bucket: Option<String>,
}

impl AppConfig {
    /// Parse CLI args, then fill the gaps from the process environment.
    pub fn from_env_and_args() -> Result<(Self, Mode), ConfigError> {
        Self::from_cli(Cli::parse(), |name| env::var(name).ok())
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn from_cli(
        cli: Cli,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Mode), ConfigError> {
        let cfg = Self {
            storage_dir: cli
                .storage_dir
                .or_else(|| env("THUMBNAILER_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: cli
                .database_url
                .or_else(|| env("THUMBNAILER_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/objects.db".into()),
            time_precision: match cli.time_precision {
                Some(p) => p,
                None => env_value(&env, "TIME_BUCKET_PRECISION")?.unwrap_or_default(),
            },
            output_bucket: cli
                .output_bucket
                .or_else(|| env("OUTPUT_BUCKET"))
                .filter(|b| !b.is_empty()),
            max_width: match cli.max_width {
                Some(w) => w,
                None => env_value(&env, "THUMBNAIL_MAX_WIDTH")?.unwrap_or(100),
            },
            max_height: match cli.max_height {
                Some(h) => h,
                None => env_value(&env, "THUMBNAIL_MAX_HEIGHT")?.unwrap_or(100),
            },
        };

        let mode = match cli.command {
            Command::Batch(args) => {
                let raw_input = args
                    .input
                    .or_else(|| env("INPUT_FOLDER"))
                    .ok_or(ConfigError::Missing("INPUT_FOLDER (or --input)"))?;
                let preserve_subpath = args.preserve_subpath
                    || env("PRESERVE_SUBPATH")
                        .map(|v| parse_flag("PRESERVE_SUBPATH", &v))
                        .transpose()?
                        .unwrap_or(false);

                Mode::Batch(BatchConfig {
                    input: InputLocation::parse(&raw_input)?,
                    task_index: match args.task_index {
                        Some(i) => i,
                        None => env_value(&env, "CLOUD_RUN_TASK_INDEX")?.unwrap_or(0),
                    },
                    task_count: match args.task_count {
                        Some(c) => c,
                        None => env_value(&env, "CLOUD_RUN_TASK_COUNT")?.unwrap_or(1),
                    },
                    preserve_subpath,
                    concurrency: match args.concurrency {
                        Some(c) => c,
                        None => env_value(&env, "BATCH_CONCURRENCY")?.unwrap_or(1),
                    }
                    .max(1),
                })
            }
            Command::Serve(args) => Mode::Serve(ServeConfig {
                host: args
                    .host
                    .or_else(|| env("HOST"))
                    .unwrap_or_else(|| "0.0.0.0".into()),
                port: match args.port {
                    Some(p) => p,
                    None => env_value(&env, "PORT")?.unwrap_or(8080),
                },
                upload_bucket: args
                    .upload_bucket
                    .or_else(|| env("UPLOAD_BUCKET"))
                    .filter(|b| !b.is_empty())
                    .ok_or(ConfigError::Missing("UPLOAD_BUCKET (or --upload-bucket)"))?,
            }),
            Command::Migrate => Mode::Migrate,
        };

        Ok((cfg, mode))
    }
}

fn env_value<T>(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env(name).map(|value| parse_value(name, &value)).transpose()
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
