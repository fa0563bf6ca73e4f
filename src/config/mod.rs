mod basic;
mod llm;

pub use basic::BasicConfig;
pub use llm::{LlmConfig, OllamaConfig, OpenAiConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// LLM provider settings (see `llm` table in config.toml).
    #[serde(default)]
    pub llm: LlmConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults, an optional config TOML file,
    /// and `PYTHIA_`-prefixed environment variables (`__` separates nesting,
    /// e.g. `PYTHIA_BASIC__LISTEN_PORT=8080`).
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        figment.merge(Env::prefixed("PYTHIA_").split("__"))
    }

    /// Loads configuration, then applies the conventional environment
    /// overrides (`DATABASE_URL`, `OPENAI_API_KEY` / `LLM_API_KEY`).
    pub fn load() -> Self {
        let mut cfg: Self = Self::figment()
            .extract()
            .unwrap_or_else(|err| panic!("failed to extract configuration: {err}"));

        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.is_empty()
        {
            cfg.basic.database_url = url;
        }

        if cfg.llm.openai.api_key.is_empty()
            && let Some(key) = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("LLM_API_KEY"))
                .ok()
                .filter(|k| !k.is_empty())
        {
            cfg.llm.openai.api_key = key;
        }

        cfg
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::load);
