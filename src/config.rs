use clap::Parser;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    /// Per-query execution timeout in seconds.
    pub execution_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "openai" or "anthropic"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Decoding temperature for the optional narrative-analysis call.
    /// SQL generation always runs at temperature 0.
    pub analysis_temperature: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    /// Attempt cap for the generate-validate-execute loop.
    pub max_attempts: usize,
    /// Row cap appended to queries that carry no LIMIT of their own.
    pub row_limit: usize,
    /// When true, every FROM/JOIN target must resolve against the allow-list.
    pub strict_tables: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaStoreConfig {
    /// Directory of JSON schema group files (marts, dimensions, facts, staging).
    pub store_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub query: QueryConfig,
    pub schema_store: SchemaStoreConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory containing the schema metadata store
    #[arg(long)]
    pub schema_dir: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-mart/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(schema_dir) = &args.schema_dir {
            config.schema_store.store_dir = schema_dir.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "warehouse.duckdb".to_string(),
                pool_size: 5,
                execution_timeout_secs: 30,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "openai".to_string(),
                model: "gpt-4o".to_string(),
                api_key: None,
                api_url: None,
                analysis_temperature: 0.7,
            },
            query: QueryConfig {
                max_attempts: 3,
                row_limit: 1000,
                strict_tables: true,
            },
            schema_store: SchemaStoreConfig {
                store_dir: "schema".to_string(),
            },
        }
    }
}
