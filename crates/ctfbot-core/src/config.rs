use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    domain::ModelChoice,
    errors::Error,
    presence::{self, StatusDescriptor},
    tools::ToolSpec,
    Result,
};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_FILETYPE_MODEL: &str = "open-r1/olympiccoder-7b:free";

/// Typed configuration, loaded once at start-up.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub discord_token: String,
    pub openrouter_api_key: Option<String>,

    // Completion API
    pub openrouter_base_url: String,
    pub http_referer: String,
    pub app_title: String,
    pub filetype_model: String,
    pub ask_models: Vec<ModelChoice>,
    pub ai_timeout: Option<Duration>,

    // Analyzers
    pub work_dir: PathBuf,
    pub strings: ToolSpec,
    pub floss: ToolSpec,
    pub exiftool: ToolSpec,
    pub tool_timeout: Option<Duration>,
    pub download_timeout: Option<Duration>,

    // Cosmetics
    pub assets_dir: PathBuf,
    pub presence_interval: Duration,
    pub statuses: Vec<StatusDescriptor>,
}

/// On-disk shape of `config.json`. Every key is optional here; required ones
/// are checked after environment overrides are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    discord_token: Option<String>,
    openrouter_api_key: Option<String>,
    openrouter_base_url: Option<String>,
    http_referer: Option<String>,
    app_title: Option<String>,
    filetype_model: Option<String>,
    ask_models: Option<Vec<ModelChoice>>,
    ai_timeout_secs: Option<u64>,
    work_dir: Option<PathBuf>,
    strings_path: Option<PathBuf>,
    floss_path: Option<PathBuf>,
    exiftool_path: Option<PathBuf>,
    tool_timeout_secs: Option<u64>,
    download_timeout_secs: Option<u64>,
    assets_dir: Option<PathBuf>,
    presence_interval_secs: Option<u64>,
    statuses: Option<Vec<StatusDescriptor>>,
}

impl Config {
    /// Load `config.json` (or `$CTFBOT_CONFIG`), then apply environment overrides.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let path = env_str("CTFBOT_CONFIG")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let raw = match fs::read_to_string(&path) {
            Ok(text) => parse_raw(&text)?,
            // A missing file is fine when the token comes from the environment.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && env_str("DISCORD_TOKEN").is_some() => {
                RawConfig::default()
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        Self::from_raw(raw, env_str("DISCORD_TOKEN"), env_str("OPENROUTER_API_KEY"))
    }

    /// Parse a config document without consulting the environment.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::from_raw(parse_raw(text)?, None, None)
    }

    fn from_raw(
        raw: RawConfig,
        token_override: Option<String>,
        key_override: Option<String>,
    ) -> Result<Self> {
        let discord_token = token_override
            .and_then(non_empty)
            .or(raw.discord_token.and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("discord_token is required (config.json or DISCORD_TOKEN)".to_string())
            })?;
        let openrouter_api_key = key_override
            .and_then(non_empty)
            .or(raw.openrouter_api_key.and_then(non_empty));

        let ask_models = raw.ask_models.unwrap_or_else(default_ask_models);
        if ask_models.is_empty() {
            return Err(Error::Config("ask_models must not be empty".to_string()));
        }

        let presence_interval = Duration::from_secs(
            raw.presence_interval_secs
                .unwrap_or(presence::DEFAULT_INTERVAL.as_secs()),
        );
        if presence_interval.is_zero() {
            return Err(Error::Config(
                "presence_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            discord_token,
            openrouter_api_key,
            openrouter_base_url: raw
                .openrouter_base_url
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            http_referer: raw
                .http_referer
                .unwrap_or_else(|| "https://discord.gg/U9dUVNe6ph".to_string()),
            app_title: raw.app_title.unwrap_or_else(|| "ctfbot".to_string()),
            filetype_model: raw
                .filetype_model
                .unwrap_or_else(|| DEFAULT_FILETYPE_MODEL.to_string()),
            ask_models,
            ai_timeout: raw.ai_timeout_secs.map(Duration::from_secs),
            work_dir: raw
                .work_dir
                .unwrap_or_else(|| env::temp_dir().join("ctfbot")),
            strings: ToolSpec::new(
                "strings",
                raw.strings_path.unwrap_or_else(|| PathBuf::from("strings")),
            ),
            floss: ToolSpec::new(
                "floss",
                raw.floss_path
                    .unwrap_or_else(|| PathBuf::from("./tools/floss")),
            ),
            exiftool: ToolSpec::new(
                "exiftool",
                raw.exiftool_path
                    .unwrap_or_else(|| PathBuf::from("exiftool")),
            ),
            tool_timeout: raw.tool_timeout_secs.map(Duration::from_secs),
            download_timeout: raw.download_timeout_secs.map(Duration::from_secs),
            assets_dir: raw.assets_dir.unwrap_or_else(|| PathBuf::from("assets")),
            presence_interval,
            statuses: raw.statuses.unwrap_or_else(presence::default_table),
        })
    }
}

/// Thumbnail shown next to an `ask` answer, if one ships with the bot.
pub fn model_logo_path(assets_dir: &Path, model: &ModelChoice) -> PathBuf {
    assets_dir
        .join("ai_logos")
        .join(format!("{}.png", model.name))
}

fn parse_raw(text: &str) -> Result<RawConfig> {
    Ok(serde_json::from_str(text)?)
}

pub fn default_ask_models() -> Vec<ModelChoice> {
    [
        ("OlympicCoder 32b", "open-r1/olympiccoder-7b:free"),
        ("DeepSeek R1 Zero 671b", "deepseek/deepseek-r1-zero:free"),
        ("DeepSeek V3 685b", "deepseek/deepseek-chat-v3-0324:free"),
        (
            "Gemini 2.5 Pro Experimental",
            "google/gemini-2.5-pro-exp-03-25:free",
        ),
    ]
    .into_iter()
    .map(|(name, id)| ModelChoice {
        name: name.to_string(),
        id: id.to_string(),
    })
    .collect()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::from_json_str(r#"{"discord_token": "abc"}"#).unwrap();
        assert_eq!(cfg.discord_token, "abc");
        assert_eq!(cfg.openrouter_api_key, None);
        assert_eq!(cfg.openrouter_base_url, DEFAULT_OPENROUTER_BASE_URL);
        assert_eq!(cfg.strings.program, PathBuf::from("strings"));
        assert_eq!(cfg.floss.program, PathBuf::from("./tools/floss"));
        assert_eq!(cfg.tool_timeout, None);
        assert_eq!(cfg.download_timeout, None);
        assert_eq!(cfg.presence_interval, Duration::from_secs(10));
        assert_eq!(cfg.ask_models.len(), 4);
        assert_eq!(cfg.statuses.len(), 17);
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let err = Config::from_json_str(r#"{"openrouter_api_key": "k"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_json_str(r#"{"discord_token": "   "}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_and_custom_tables_are_read() {
        let cfg = Config::from_json_str(
            r#"{
                "discord_token": "abc",
                "openrouter_api_key": "sk-or",
                "work_dir": "/var/tmp/ctf",
                "floss_path": "/opt/floss/floss",
                "tool_timeout_secs": 30,
                "download_timeout_secs": 15,
                "ask_models": [{"name": "Tiny", "id": "tiny/model:free"}],
                "statuses": [{"type": "custom", "state": "hi"}]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.openrouter_api_key.as_deref(), Some("sk-or"));
        assert_eq!(cfg.work_dir, PathBuf::from("/var/tmp/ctf"));
        assert_eq!(cfg.floss.program, PathBuf::from("/opt/floss/floss"));
        assert_eq!(cfg.tool_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.download_timeout, Some(Duration::from_secs(15)));
        assert_eq!(cfg.ask_models[0].id, "tiny/model:free");
        assert_eq!(
            cfg.statuses,
            vec![StatusDescriptor::Custom {
                state: "hi".to_string()
            }]
        );
        assert_eq!(
            model_logo_path(&cfg.assets_dir, &cfg.ask_models[0]),
            PathBuf::from("assets/ai_logos/Tiny.png")
        );
    }

    #[test]
    fn zero_interval_and_empty_models_are_rejected() {
        assert!(Config::from_json_str(r#"{"discord_token": "a", "presence_interval_secs": 0}"#).is_err());
        assert!(Config::from_json_str(r#"{"discord_token": "a", "ask_models": []}"#).is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            Config::from_json_str("{not json").unwrap_err(),
            Error::Json(_)
        ));
    }
}
