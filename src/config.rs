use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::llm::ModelId;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection string of the central metadata database.
    pub connection_string: String,
    /// `disable`, `allow`, `prefer`, `require`, `verify-ca` or `verify-full`.
    pub ssl_mode: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantPoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasonerConfig {
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub default_model: ModelId,
    pub openai: OpenAiConfig,
    pub reasoner: ReasonerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    pub fallback_to_inactive: bool,
    pub validate_live_tables: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tenant_pool: TenantPoolConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub schema: SchemaConfig,
}

#[derive(Parser, Debug, Default)]
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

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder()
            .set_default("database.connection_string", "postgres://localhost:5432/nl2sql")?
            .set_default("database.ssl_mode", "require")?
            .set_default("database.min_connections", 2)?
            .set_default("database.max_connections", 10)?
            .set_default("database.idle_timeout_secs", 30)?
            .set_default("database.connect_timeout_secs", 10)?
            .set_default("tenant_pool.min_connections", 0)?
            .set_default("tenant_pool.max_connections", 5)?
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 3000)?
            .set_default("web.request_timeout_secs", 300)?
            .set_default("llm.default_model", "openai")?
            .set_default(
                "llm.openai.api_url",
                "https://api.openai.com/v1/chat/completions",
            )?
            .set_default("llm.openai.model", "gpt-4o")?
            .set_default("llm.openai.timeout_secs", 60)?
            .set_default(
                "llm.reasoner.api_url",
                "http://127.0.0.1:8000/v1/chat/completions",
            )?
            .set_default("llm.reasoner.model", "reasoner")?
            .set_default("llm.reasoner.timeout_secs", 120)?
            .set_default("schema.fallback_to_inactive", true)?
            .set_default("schema.validate_live_tables", true)?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl2sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NL2SQL__DATABASE__CONNECTION_STRING and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("NL2SQL")
                .prefix_separator("__")
                .separator("__"),
        );

        // Conventional variables win over the built-in defaults only
        if std::env::var("NL2SQL__DATABASE__CONNECTION_STRING").is_err() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                config_builder = config_builder.set_override("database.connection_string", url)?;
            }
        }
        if std::env::var("NL2SQL__LLM__OPENAI__API_KEY").is_err() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                config_builder = config_builder.set_override("llm.openai.api_key", key)?;
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

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let args = CliArgs {
            config: Some(PathBuf::from("/nonexistent/nl2sql.toml")),
            ..Default::default()
        };
        // A missing explicit file is an error, not a silent fallback
        assert!(AppConfig::new(&args).is_err());
    }

    #[test]
    fn cli_overrides_host_and_port() {
        let args = CliArgs {
            host: Some("0.0.0.0".to_string()),
            port: Some(8088),
            ..Default::default()
        };
        let config = AppConfig::new(&args).unwrap();
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 8088);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.tenant_pool.max_connections, 5);
        assert_eq!(config.llm.reasoner.timeout_secs, 120);
        assert!(config.schema.fallback_to_inactive);
    }
}
