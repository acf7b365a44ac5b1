use clap::Parser;
use gateway::config::{Config, LogLevel};
use secrecy::SecretString;

/// Command-line configuration for the gateway process (§4.I). Every field
/// reads its default from an environment variable; an explicit flag takes
/// priority over the environment.
#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Anthropic-to-OpenAI translating API gateway")]
pub struct Args {
    #[arg(long, env = "LISTEN_PORT", default_value_t = 8080)]
    pub listen_port: u16,

    #[arg(long, env = "UPSTREAM_BASE_URL")]
    pub upstream_base_url: String,

    #[arg(long, env = "UPSTREAM_API_PATH", default_value = "/v1/chat/completions")]
    pub upstream_api_path: String,

    #[arg(long, env = "UPSTREAM_API_KEY", hide_env_values = true)]
    pub upstream_api_key: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn into_config(self) -> anyhow::Result<Config> {
        let log_level: LogLevel = self
            .log_level
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(Config {
            listen_port: self.listen_port,
            upstream_base_url: self.upstream_base_url,
            upstream_api_path: self.upstream_api_path,
            upstream_api_key: SecretString::from(self.upstream_api_key),
            log_level,
        })
    }
}
