//! Configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::WebhookSettings;
use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// How the bot receives messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Long-poll Telegram's `getUpdates`.
    Polling,
    /// Serve a webhook Telegram posts updates to.
    Webhook,
    /// Local stdin/stdout REPL.
    Cli,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "polling" | "poll" => Ok(Mode::Polling),
            "webhook" => Ok(Mode::Webhook),
            "cli" => Ok(Mode::Cli),
            other => Err(ConfigError::InvalidValue {
                key: "VOVA_MODE".into(),
                message: format!("expected polling, webhook or cli, got '{other}'"),
            }),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub mode: Mode,
    /// Required unless running in CLI mode.
    pub telegram_token: Option<SecretString>,
    pub llm: LlmConfig,
    /// Set in webhook mode.
    pub webhook: Option<WebhookSettings>,
    pub memory_file: PathBuf,
    pub profile_file: PathBuf,
    /// Telegram usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
    /// Transcribe voice notes.
    pub voice: bool,
    /// Directory for rolling log files, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Create configuration from environment variables.
    ///
    /// Required:
    /// - `OPENAI_API_KEY`
    /// - `TELEGRAM_TOKEN` (not in CLI mode)
    /// - `WEBHOOK_URL` (webhook mode only)
    ///
    /// Optional:
    /// - `VOVA_MODE` - polling, webhook or cli (default: polling)
    /// - `OPENAI_API_URL` (default: https://api.openai.com)
    /// - `VOVA_MODEL` (default: gpt-4)
    /// - `VOVA_TEMPERATURE` (default: 0.8)
    /// - `VOVA_MAX_TOKENS`
    /// - `VOVA_LLM_TIMEOUT_SECS` (default: 60)
    /// - `WEBHOOK_PATH` (default: /webhook)
    /// - `VOVA_PORT` (default: 10000)
    /// - `VOVA_MEMORY_FILE` (default: analysis_memory.json)
    /// - `VOVA_PROFILE_FILE` (default: user_profiles.json)
    /// - `TELEGRAM_ALLOWED_USERS` - comma-separated (default: *)
    /// - `VOVA_VOICE` - transcribe voice notes (default: true)
    /// - `VOVA_LOG_DIR`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match get("VOVA_MODE") {
            Some(value) => value.parse()?,
            None => Mode::Polling,
        };

        let telegram_token = get("TELEGRAM_TOKEN").map(SecretString::from);
        if telegram_token.is_none() && mode != Mode::Cli {
            return Err(ConfigError::MissingRequired {
                key: "TELEGRAM_TOKEN".into(),
                hint: "Get a token from @BotFather, or set VOVA_MODE=cli to run locally".into(),
            });
        }

        let api_key = get("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))?;

        let llm = LlmConfig {
            api_url: get("OPENAI_API_URL").unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            model: get("VOVA_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
            temperature: parse_or(get("VOVA_TEMPERATURE"), "VOVA_TEMPERATURE", 0.8)?,
            max_tokens: get("VOVA_MAX_TOKENS")
                .map(|v| parse_value(&v, "VOVA_MAX_TOKENS"))
                .transpose()?,
            timeout: Duration::from_secs(parse_or(
                get("VOVA_LLM_TIMEOUT_SECS"),
                "VOVA_LLM_TIMEOUT_SECS",
                60,
            )?),
        };
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "VOVA_TEMPERATURE".into(),
                message: format!("{} is outside 0.0..=2.0", llm.temperature),
            });
        }

        let webhook = if mode == Mode::Webhook {
            let public_url = get("WEBHOOK_URL").ok_or_else(|| ConfigError::MissingRequired {
                key: "WEBHOOK_URL".into(),
                hint: "Public https URL Telegram can reach, e.g. https://vova.example.com".into(),
            })?;
            let mut path = get("WEBHOOK_PATH").unwrap_or_else(|| "/webhook".to_string());
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
            Some(WebhookSettings {
                public_url,
                path,
                port: parse_or(get("VOVA_PORT"), "VOVA_PORT", 10000)?,
            })
        } else {
            None
        };

        let allowed_users = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().trim_start_matches('@').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            mode,
            telegram_token,
            llm,
            webhook,
            memory_file: get("VOVA_MEMORY_FILE")
                .unwrap_or_else(|| "analysis_memory.json".to_string())
                .into(),
            profile_file: get("VOVA_PROFILE_FILE")
                .unwrap_or_else(|| "user_profiles.json".to_string())
                .into(),
            allowed_users,
            voice: get("VOVA_VOICE")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
                .unwrap_or(true),
            log_dir: get("VOVA_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_value<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |v| parse_value(&v, key))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| map.get(key).cloned())
    }

    const BASE: &[(&str, &str)] = &[("TELEGRAM_TOKEN", "123:ABC"), ("OPENAI_API_KEY", "sk-test")];

    #[test]
    fn defaults() {
        let cfg = config(BASE).unwrap();
        assert_eq!(cfg.mode, Mode::Polling);
        assert_eq!(cfg.llm.api_url, "https://api.openai.com");
        assert_eq!(cfg.llm.model, "gpt-4");
        assert_eq!(cfg.llm.temperature, 0.8);
        assert_eq!(cfg.llm.max_tokens, None);
        assert_eq!(cfg.llm.timeout, Duration::from_secs(60));
        assert_eq!(cfg.llm.api_key.expose_secret(), "sk-test");
        assert!(cfg.webhook.is_none());
        assert_eq!(cfg.memory_file, PathBuf::from("analysis_memory.json"));
        assert_eq!(cfg.profile_file, PathBuf::from("user_profiles.json"));
        assert_eq!(cfg.allowed_users, vec!["*"]);
        assert!(cfg.voice);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn telegram_token_required_outside_cli() {
        let err = config(&[("OPENAI_API_KEY", "sk")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "TELEGRAM_TOKEN"));

        let cfg = config(&[("OPENAI_API_KEY", "sk"), ("VOVA_MODE", "cli")]).unwrap();
        assert_eq!(cfg.mode, Mode::Cli);
        assert!(cfg.telegram_token.is_none());
    }

    #[test]
    fn api_key_required() {
        let err = config(&[("TELEGRAM_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "OPENAI_API_KEY"));
        let err = config(&[("TELEGRAM_TOKEN", "t"), ("OPENAI_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn webhook_mode_settings() {
        let mut vars = BASE.to_vec();
        vars.push(("VOVA_MODE", "Webhook"));
        assert!(matches!(
            config(&vars).unwrap_err(),
            ConfigError::MissingRequired { ref key, .. } if key == "WEBHOOK_URL"
        ));

        vars.push(("WEBHOOK_URL", "https://vova.example.com"));
        vars.push(("WEBHOOK_PATH", "hook"));
        let cfg = config(&vars).unwrap();
        let webhook = cfg.webhook.unwrap();
        assert_eq!(webhook.path, "/hook");
        assert_eq!(webhook.port, 10000);
        assert_eq!(webhook.webhook_url(), "https://vova.example.com/hook");
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut vars = BASE.to_vec();
        vars.push(("VOVA_TEMPERATURE", "hot"));
        assert!(matches!(
            config(&vars).unwrap_err(),
            ConfigError::InvalidValue { ref key, .. } if key == "VOVA_TEMPERATURE"
        ));

        let mut vars = BASE.to_vec();
        vars.push(("VOVA_TEMPERATURE", "3.5"));
        assert!(config(&vars).is_err());

        let mut vars = BASE.to_vec();
        vars.push(("VOVA_MODE", "carrier-pigeon"));
        assert!(matches!(config(&vars).unwrap_err(), ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn optional_overrides() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("VOVA_MAX_TOKENS", "800"),
            ("VOVA_LLM_TIMEOUT_SECS", "15"),
            ("TELEGRAM_ALLOWED_USERS", "@masha, 42 ,"),
            ("VOVA_VOICE", "off"),
            ("VOVA_LOG_DIR", "/var/log/vova"),
        ]);
        let cfg = config(&vars).unwrap();
        assert_eq!(cfg.llm.max_tokens, Some(800));
        assert_eq!(cfg.llm.timeout, Duration::from_secs(15));
        assert_eq!(cfg.allowed_users, vec!["masha", "42"]);
        assert!(!cfg.voice);
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/var/log/vova")));
    }
}
