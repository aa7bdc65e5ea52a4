//! Configuration loader and typed engine settings.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env
//! vars. The `[engine]` section deserializes into [`EngineSettings`] and is
//! validated at load time; in particular the fusion weights must sum to 1.0
//! so a misweighted deployment fails fast instead of silently skewing
//! scores.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_"));

        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The `[engine]` section, or defaults when absent. Always validated.
    pub fn engine_settings(&self) -> anyhow::Result<EngineSettings> {
        let settings = if self.figment.find_value("engine").is_ok() {
            self.get::<EngineSettings>("engine")?
        } else {
            EngineSettings::default()
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

/// How raw lexical rank scores are brought onto the `[0,1]` vector scale
/// before fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextNormalization {
    /// Divide each score by the largest rank score in the current batch,
    /// clamped to 1.0. The default.
    BatchMax,
    /// Pass scores through untouched, for backends that already emit
    /// `[0,1]` relevance values.
    Identity,
}

/// Weights and windowing for the fusion stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub vector_weight: f32,
    pub text_weight: f32,
    pub over_fetch_multiplier: usize,
    pub normalization: TextNormalization,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            text_weight: 0.3,
            over_fetch_multiplier: 5,
            normalization: TextNormalization::BatchMax,
        }
    }
}

impl FusionSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, w) in [("vector_weight", self.vector_weight), ("text_weight", self.text_weight)] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                anyhow::bail!("fusion.{} must be within [0, 1], got {}", name, w);
            }
        }
        if (self.vector_weight + self.text_weight - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "fusion weights must sum to 1.0, got {} + {}",
                self.vector_weight,
                self.text_weight
            );
        }
        if self.over_fetch_multiplier == 0 {
            anyhow::bail!("fusion.over_fetch_multiplier must be at least 1");
        }
        Ok(())
    }
}

/// Timeouts, retry policy and rerank pool sizing for the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Upper bound on one candidate source call, retries included.
    pub source_timeout_ms: u64,
    /// Additional attempts after the first failure, retryable errors only.
    pub retry_attempts: u32,
    /// Initial backoff between retries; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Maximum rerank batches in flight across all queries.
    pub rerank_max_in_flight: usize,
    pub rerank_batch_size: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            source_timeout_ms: 3_000,
            retry_attempts: 2,
            retry_backoff_ms: 100,
            rerank_max_in_flight: 2,
            rerank_batch_size: 16,
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_timeout_ms == 0 {
            anyhow::bail!("retrieval.source_timeout_ms must be non-zero");
        }
        if self.rerank_max_in_flight == 0 {
            anyhow::bail!("retrieval.rerank_max_in_flight must be at least 1");
        }
        if self.rerank_batch_size == 0 {
            anyhow::bail!("retrieval.rerank_batch_size must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub fusion: FusionSettings,
    pub retrieval: RetrievalSettings,
}

impl EngineSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.fusion.validate()?;
        self.retrieval.validate()?;
        Ok(())
    }
}
