//! Runtime settings read from the environment
//!
//! Binaries call `dotenv::dotenv().ok()` first, so values may come from a
//! local `.env` file as well.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CURRENCY: &str = "INR";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const DEFAULT_MEMORY_MERGE_CAP: u32 = 4;
pub const DEFAULT_MEMORY_RECALL_LIMIT: usize = 3;

/// Which chat backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProvider {
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub chat_provider: ChatProvider,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub fallback_models: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub summary_model: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub default_currency: String,
    pub max_tool_rounds: usize,
    pub tool_timeout: Duration,
    pub model_timeout: Duration,
    pub memory_merge_cap: u32,
    pub memory_recall_limit: usize,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let chat_provider = match get("CHAT_PROVIDER").as_deref() {
            None => {
                if get("OPENAI_API_KEY").is_none() && get("GEMINI_API_KEY").is_some() {
                    ChatProvider::Gemini
                } else {
                    ChatProvider::OpenAi
                }
            }
            Some(p) if p.eq_ignore_ascii_case("openai") => ChatProvider::OpenAi,
            Some(p) if p.eq_ignore_ascii_case("gemini") => ChatProvider::Gemini,
            Some(other) => {
                return Err(OrchestrationError::ConfigError(format!(
                    "CHAT_PROVIDER must be 'openai' or 'gemini', got '{}'",
                    other
                )))
            }
        };

        let chat_model = match chat_provider {
            ChatProvider::OpenAi => get("CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            ChatProvider::Gemini => get("CHAT_MODEL")
                .or_else(|| get("GEMINI_MODEL"))
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
        };

        let fallback_models = get("CHAT_FALLBACK_MODELS")
            .map(|list| {
                list.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            chat_provider,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            chat_model,
            fallback_models,
            gemini_api_key: get("GEMINI_API_KEY"),
            summary_model: get("SUMMARY_MODEL"),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", get("EMBEDDING_DIMENSION"), 1536)?,
            default_currency: get("DEFAULT_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            max_tool_rounds: parse_or(
                "MAX_TOOL_ROUNDS",
                get("MAX_TOOL_ROUNDS"),
                DEFAULT_MAX_TOOL_ROUNDS,
            )?,
            tool_timeout: Duration::from_secs(parse_or(
                "TOOL_TIMEOUT_SECS",
                get("TOOL_TIMEOUT_SECS"),
                20,
            )?),
            model_timeout: Duration::from_secs(parse_or(
                "MODEL_TIMEOUT_SECS",
                get("MODEL_TIMEOUT_SECS"),
                60,
            )?),
            memory_merge_cap: parse_or(
                "MEMORY_MERGE_CAP",
                get("MEMORY_MERGE_CAP"),
                DEFAULT_MEMORY_MERGE_CAP,
            )?,
            memory_recall_limit: parse_or(
                "MEMORY_RECALL_LIMIT",
                get("MEMORY_RECALL_LIMIT"),
                DEFAULT_MEMORY_RECALL_LIMIT,
            )?,
            port: parse_or("PORT", get("PORT").or_else(|| get("API_PORT")), 8080)?,
        })
    }

    /// Ordered model candidates: configured model first, duplicates removed.
    pub fn model_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let defaults: &[&str] = match self.chat_provider {
            ChatProvider::OpenAi => &[],
            ChatProvider::Gemini => &[
                "gemini-2.5-flash",
                "gemini-2.0-flash",
                "gemini-2.0-flash-001",
                "gemini-flash-latest",
                "gemini-1.5-flash",
                "gemini-1.5-flash-latest",
                "gemini-1.0-pro",
            ],
        };

        let ordered = std::iter::once(self.chat_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .chain(defaults.iter().map(|m| m.to_string()));

        for model in ordered {
            if !candidates.contains(&model) {
                candidates.push(model);
            }
        }
        candidates
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has invalid value '{}'", key, value))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.default_currency, "INR");
        assert_eq!(s.max_tool_rounds, 8);
        assert_eq!(s.memory_merge_cap, 4);
        assert_eq!(s.memory_recall_limit, 3);
        assert_eq!(s.port, 8080);
        assert_eq!(s.tool_timeout, Duration::from_secs(20));
        assert!(s.database_url.is_none());
    }

    #[test]
    fn test_malformed_number_is_config_error() {
        let err = settings(&[("MAX_TOOL_ROUNDS", "lots")]).unwrap_err();
        assert!(matches!(err, OrchestrationError::ConfigError(_)));
    }

    #[test]
    fn test_gemini_candidates_are_deduplicated() {
        let s = settings(&[
            ("CHAT_PROVIDER", "gemini"),
            ("GEMINI_MODEL", "gemini-2.0-flash"),
            ("CHAT_FALLBACK_MODELS", "custom-model, gemini-2.5-flash"),
        ])
        .unwrap();

        let candidates = s.model_candidates();
        assert_eq!(candidates[0], "gemini-2.0-flash");
        assert_eq!(candidates[1], "custom-model");
        assert_eq!(candidates[2], "gemini-2.5-flash");
        let flash = candidates.iter().filter(|m| *m == "gemini-2.0-flash").count();
        assert_eq!(flash, 1);
    }

    #[test]
    fn test_postgres_url_alias_and_api_port() {
        let s = settings(&[("POSTGRES_URL", "postgres://x"), ("API_PORT", "9000")]).unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://x"));
        assert_eq!(s.port, 9000);
    }
}
