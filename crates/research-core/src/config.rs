use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

pub const ENV_PREFIX: &str = "RESEARCH_ENGINE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub per_op: f64,
    pub per_day: f64,
    pub per_month: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            per_op: 2.0,
            per_day: 20.0,
            per_month: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub initial_s: u64,
    pub mid_s: u64,
    pub late_s: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            initial_s: 5,
            mid_s: 10,
            late_s: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub explore: f64,
    pub fallback_cap: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            explore: 0.10,
            fallback_cap: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredential {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_semaphore")]
    pub rate_limit_concurrency: usize,
}

fn default_semaphore() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_provider: String,
    pub default_model: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderCredential>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub router: RouterConfig,
    pub artifact_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_provider: "openai".to_string(),
            default_model: "gpt-4o".to_string(),
            providers: HashMap::new(),
            budget: BudgetConfig::default(),
            poll: PollConfig::default(),
            router: RouterConfig::default(),
            artifact_root: PathBuf::from(".research-engine"),
        }
    }
}

/// Recognized provider ids per the configuration surface; an explicit
/// `provider_choice` outside this set is still accepted if a credential is
/// configured for it, but `default_provider` is validated against it.
pub const RECOGNIZED_PROVIDERS: &[&str] = &["openai", "azure", "gemini", "grok", "anthropic"];

/// JSON layers merged lowest-precedence first: compiled defaults, a
/// project-level config file on the artifact root, process environment, and
/// runtime patches applied through the Facade's config endpoint.
#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    project: Value,
    env: Value,
    runtime: Value,
}

pub struct ConfigStore {
    project_path: PathBuf,
    layers: RwLock<ConfigLayers>,
}

impl ConfigStore {
    pub async fn new(project_path: impl Into<PathBuf>) -> Result<Self> {
        let project_path = project_path.into();
        let project = read_json_file(&project_path).await?.unwrap_or_else(empty_object);
        let env = env_layer();
        let store = ConfigStore {
            project_path,
            layers: RwLock::new(ConfigLayers {
                project,
                env,
                runtime: empty_object(),
            }),
        };
        Ok(store)
    }

    pub async fn get(&self) -> EngineConfig {
        let merged = self.merged_value().await;
        serde_json::from_value(merged).unwrap_or_else(|_| EngineConfig::default())
    }

    async fn merged_value(&self) -> Value {
        let layers = self.layers.read().await;
        let mut merged = default_layer();
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    /// Applies a runtime patch (e.g. from `PATCH /config`) and persists the
    /// non-secret portion to the project file. Credentials that came from
    /// the environment are never written back to disk.
    pub async fn patch_runtime(&self, patch: Value) -> Result<EngineConfig> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.runtime, &patch);
        }
        self.persist_project().await?;
        Ok(self.get().await)
    }

    async fn persist_project(&self) -> Result<()> {
        let layers = self.layers.read().await;
        let mut persisted = layers.project.clone();
        deep_merge(&mut persisted, &scrub_env_sourced(&layers.runtime, &layers.env));
        write_json_file(&self.project_path, &persisted).await
    }
}

fn default_layer() -> Value {
    serde_json::to_value(EngineConfig::default()).unwrap_or_else(|_| empty_object())
}

pub fn empty_object() -> Value {
    json!({})
}

async fn read_json_file(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value: Value = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading config file {}", path.display())),
    }
}

async fn write_json_file(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing config file {}", path.display()))
}

/// Drops from `runtime` any keys whose value is identical to what the
/// environment layer already supplies, so env-sourced secrets are never
/// duplicated onto disk.
fn scrub_env_sourced(runtime: &Value, env: &Value) -> Value {
    match (runtime, env) {
        (Value::Object(r), Value::Object(e)) => {
            let mut out = serde_json::Map::new();
            for (k, v) in r {
                match e.get(k) {
                    Some(ev) if ev == v => continue,
                    Some(ev) => out.insert(k.clone(), scrub_env_sourced(v, ev)),
                    None => out.insert(k.clone(), v.clone()),
                };
            }
            Value::Object(out)
        }
        _ => runtime.clone(),
    }
}

/// Reads `RESEARCH_ENGINE_*` variables plus per-provider API key variables
/// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...) into the env config layer.
fn env_layer() -> Value {
    let mut root = serde_json::Map::new();

    if let Ok(provider) = std::env::var(format!("{ENV_PREFIX}DEFAULT_PROVIDER")) {
        root.insert("default_provider".to_string(), json!(provider));
    }
    if let Ok(model) = std::env::var(format!("{ENV_PREFIX}DEFAULT_MODEL")) {
        root.insert("default_model".to_string(), json!(model));
    }

    let mut budget = serde_json::Map::new();
    for (key, field) in [
        ("PER_OP", "per_op"),
        ("PER_DAY", "per_day"),
        ("PER_MONTH", "per_month"),
    ] {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}BUDGET_{key}")) {
            if let Ok(parsed) = v.parse::<f64>() {
                budget.insert(field.to_string(), json!(parsed));
            }
        }
    }
    if !budget.is_empty() {
        root.insert("budget".to_string(), Value::Object(budget));
    }

    if let Ok(v) = std::env::var(format!("{ENV_PREFIX}ROUTER_EXPLORE")) {
        if let Ok(parsed) = v.parse::<f64>() {
            root.insert("router".to_string(), json!({ "explore": parsed }));
        }
    }

    let mut providers = serde_json::Map::new();
    for provider in RECOGNIZED_PROVIDERS {
        if let Some(api_key) = env_api_key_for(provider) {
            providers.insert((*provider).to_string(), json!({ "api_key": api_key }));
        }
    }
    if !providers.is_empty() {
        root.insert("providers".to_string(), Value::Object(providers));
    }

    Value::Object(root)
}

fn env_api_key_for(provider: &str) -> Option<String> {
    provider_env_candidates(provider)
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
}

pub fn provider_env_candidates(provider: &str) -> Vec<String> {
    match provider {
        "openai" => vec!["OPENAI_API_KEY".to_string()],
        "azure" => vec!["AZURE_OPENAI_API_KEY".to_string()],
        "gemini" => vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()],
        "grok" => vec!["GROK_API_KEY".to_string(), "XAI_API_KEY".to_string()],
        "anthropic" => vec!["ANTHROPIC_API_KEY".to_string()],
        other => vec![format!("{}_API_KEY", other.to_uppercase())],
    }
}

/// Recursive, null-safe JSON merge: `patch` wins on scalars and replaces
/// arrays wholesale; objects merge key by key.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                match base_map.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            if !patch_value.is_null() {
                *base_slot = patch_value.clone();
            }
        }
    }
}
