use secrecy::SecretString;

/// Process-wide configuration (§4.I). The CLI crate is responsible for
/// parsing this from environment variables and flags (§6.5); the gateway
/// library only consumes the resulting struct, so it stays ignorant of
/// `clap` or any other argument-parsing concern.
#[derive(Clone)]
pub struct Config {
    pub listen_port: u16,
    pub upstream_base_url: String,
    pub upstream_api_path: String,
    pub upstream_api_key: SecretString,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Minimal,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "minimal" => Ok(Self::Minimal),
            other => Err(format!("unrecognized LOG_LEVEL: {other}")),
        }
    }
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Minimal => log::LevelFilter::Warn,
        }
    }

    /// The `EnvFilter` string the CLI's logger initializer consumes.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Minimal => "warn",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            upstream_base_url: String::new(),
            upstream_api_path: "/v1/chat/completions".to_string(),
            upstream_api_key: SecretString::from(String::new()),
            log_level: LogLevel::Info,
        }
    }
}
