//! Process-wide configuration, loaded once per invocation.
//!
//! Precedence: environment variables > repo overlay (`.cass/config.json`
//! taking priority over `.cass/config.yaml`) > global `~/.cass-memory/config.json`
//! > built-in defaults. Modeled on `ironclaw::settings::Settings`, but
//! file-format-flexible: JSON globally, JSON-or-YAML per repo.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CassMemoryError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub extra_patterns: Vec<String>,
    #[serde(default)]
    pub audit_log: bool,
    #[serde(default)]
    pub audit_level: Option<String>,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self { enabled: true, extra_patterns: Vec::new(), audit_log: false, audit_level: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossAgentConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub consent_given: bool,
    #[serde(default)]
    pub consent_date: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub audit_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_half_life")]
    pub decay_half_life_days: f64,
    #[serde(default = "default_harmful_multiplier")]
    pub harmful_multiplier: f64,
    #[serde(default = "default_min_feedback_for_active")]
    pub min_feedback_for_active: u32,
    #[serde(default = "default_min_helpful_for_proven")]
    pub min_helpful_for_proven: f64,
    #[serde(default = "default_max_harmful_ratio_for_proven")]
    pub max_harmful_ratio_for_proven: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decay_half_life_days: default_half_life(),
            harmful_multiplier: default_harmful_multiplier(),
            min_feedback_for_active: default_min_feedback_for_active(),
            min_helpful_for_proven: default_min_helpful_for_proven(),
            max_harmful_ratio_for_proven: default_max_harmful_ratio_for_proven(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_half_life() -> f64 {
    90.0
}
fn default_harmful_multiplier() -> f64 {
    4.0
}
fn default_min_feedback_for_active() -> u32 {
    1
}
fn default_min_helpful_for_proven() -> f64 {
    10.0
}
fn default_max_harmful_ratio_for_proven() -> f64 {
    0.1
}
fn default_max_bullets() -> usize {
    10
}
fn default_max_history() -> usize {
    10
}
fn default_lookback_days() -> u32 {
    30
}
fn default_prune_harmful_threshold() -> f64 {
    3.0
}
fn default_maturity_promotion_threshold() -> f64 {
    3.0
}
fn default_maturity_proven_threshold() -> f64 {
    10.0
}
fn default_max_reflector_iterations() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub max_oracle_calls_per_reflect: Option<u32>,
    #[serde(default)]
    pub max_history_queries_per_reflect: Option<u32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { max_oracle_calls_per_reflect: None, max_history_queries_per_reflect: None }
    }
}

/// Process-wide configuration. Constructed once in `main`, threaded through
/// explicitly; no global mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cass_path: Option<String>,
    #[serde(skip)]
    pub home: PathBuf,
    #[serde(skip)]
    pub cwd: PathBuf,
    #[serde(default = "default_max_bullets")]
    pub max_bullets_in_context: usize,
    #[serde(default = "default_max_history")]
    pub max_history_in_context: usize,
    #[serde(default = "default_lookback_days")]
    pub session_lookback_days: u32,
    #[serde(default = "default_prune_harmful_threshold")]
    pub prune_harmful_threshold: f64,
    #[serde(default = "default_half_life")]
    pub decay_half_life_days: f64,
    #[serde(default = "default_maturity_promotion_threshold")]
    pub maturity_promotion_threshold: f64,
    #[serde(default = "default_maturity_proven_threshold")]
    pub maturity_proven_threshold: f64,
    #[serde(default = "default_harmful_multiplier")]
    pub harmful_multiplier: f64,
    #[serde(default = "default_max_reflector_iterations")]
    pub max_reflector_iterations: u32,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub sanitization: SanitizationConfig,
    #[serde(default)]
    pub cross_agent: CrossAgentConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            cass_path: None,
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_bullets_in_context: default_max_bullets(),
            max_history_in_context: default_max_history(),
            session_lookback_days: default_lookback_days(),
            prune_harmful_threshold: default_prune_harmful_threshold(),
            decay_half_life_days: default_half_life(),
            maturity_promotion_threshold: default_maturity_promotion_threshold(),
            maturity_proven_threshold: default_maturity_proven_threshold(),
            harmful_multiplier: default_harmful_multiplier(),
            max_reflector_iterations: default_max_reflector_iterations(),
            json_output: false,
            verbose: false,
            sanitization: SanitizationConfig::default(),
            cross_agent: CrossAgentConfig::default(),
            scoring: ScoringConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

impl Config {
    pub fn global_root(&self) -> PathBuf {
        self.home.join(".cass-memory")
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.global_root().join("config.json")
    }

    pub fn diary_dir(&self) -> PathBuf {
        self.global_root().join("diary")
    }

    pub fn reflections_dir(&self) -> PathBuf {
        self.global_root().join("reflections")
    }

    pub fn processed_log_path(&self) -> PathBuf {
        self.reflections_dir().join("processed.log")
    }

    pub fn global_playbook_path(&self) -> PathBuf {
        self.global_root().join("playbook.yaml")
    }

    pub fn global_outcomes_path(&self) -> PathBuf {
        self.global_root().join("outcomes.jsonl")
    }

    pub fn global_traumas_path(&self) -> PathBuf {
        self.global_root().join("traumas.jsonl")
    }

    pub fn global_trauma_audit_path(&self) -> PathBuf {
        self.global_root().join("trauma_audit.jsonl")
    }

    pub fn repo_traumas_path(&self) -> Option<PathBuf> {
        self.repo_overlay_dir().map(|dir| dir.join("traumas.jsonl"))
    }

    pub fn repo_trauma_audit_path(&self) -> Option<PathBuf> {
        self.repo_overlay_dir().map(|dir| dir.join("trauma_audit.jsonl"))
    }

    pub fn toxic_bullets_log_path(&self) -> PathBuf {
        self.global_root().join("toxic_bullets.log")
    }

    pub fn cass_binary_path(&self) -> String {
        std::env::var("CASS_PATH")
            .ok()
            .or_else(|| self.cass_path.clone())
            .unwrap_or_else(|| "cass".to_string())
    }

    pub fn oracle_disabled(&self) -> bool {
        std::env::var("CASS_MEMORY_LLM").map(|v| v == "none").unwrap_or(false)
    }

    /// Walk `start` upward looking for a `.git` directory; the repo overlay
    /// lives at `<repo>/.cass/`.
    pub fn discover_repo_root(start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(".git").exists() {
                return Some(d.to_path_buf());
            }
            dir = d.parent();
        }
        None
    }

    pub fn repo_overlay_dir(&self) -> Option<PathBuf> {
        Self::discover_repo_root(&self.cwd).map(|root| root.join(".cass"))
    }

    /// Load process-wide config: defaults <- global JSON <- repo overlay
    /// (JSON wins over YAML when both exist) <- environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(home) = std::env::var("HOME") {
            if !home.is_empty() {
                config.home = PathBuf::from(home);
            }
        }

        let global_path = config.global_config_path();
        if global_path.exists() {
            config.merge_json_file(&global_path, true)?;
        }

        if let Some(overlay_dir) = config.repo_overlay_dir() {
            let yaml_path = overlay_dir.join("config.yaml");
            let json_path = overlay_dir.join("config.json");
            // YAML first, JSON second, so JSON's values win when both exist.
            if yaml_path.exists() {
                config.merge_yaml_file(&yaml_path, false)?;
            }
            if json_path.exists() {
                config.merge_json_file(&json_path, false)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn merge_json_file(&mut self, path: &Path, trusted: bool) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| CassMemoryError::io(path, e))?;
        let patch: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| CassMemoryError::parse_json(path, e))?;
        self.merge_value(patch, trusted)
    }

    fn merge_yaml_file(&mut self, path: &Path, trusted: bool) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| CassMemoryError::io(path, e))?;
        let patch: serde_json::Value =
            serde_yaml::from_str(&text).map_err(|e| CassMemoryError::parse_yaml(path, e))?;
        self.merge_value(patch, trusted)
    }

    /// Merge a partial JSON document into the current config, invariant 4 /
    /// "security-sensitive config paths are never observable from the repo
    /// overlay": when `trusted` is false, `cass_path`, `api_key`, and the
    /// computed path helpers are never taken from the patch. The user's own
    /// global config file is `trusted` and may set them freely.
    fn merge_value(&mut self, patch: serde_json::Value, trusted: bool) -> Result<()> {
        let mut current = serde_json::to_value(&self)
            .map_err(|e| CassMemoryError::Config { reason: e.to_string() })?;
        if let (Some(current_obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                if !trusted && SECURITY_SENSITIVE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                current_obj.insert(key.clone(), value.clone());
            }
        }
        *self = serde_json::from_value(current)
            .map_err(|e| CassMemoryError::Config { reason: e.to_string() })?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CASS_PATH") {
            self.cass_path = Some(path);
        }
        if let Ok(v) = std::env::var("CASS_MEMORY_VERBOSE") {
            self.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

/// Keys that a repo-scoped config overlay may not set.
/// `cassPath` and `home`/`cwd` are excluded from this list deliberately —
/// `home`/`cwd` are `#[serde(skip)]` and never round-trip through JSON, so
/// only the genuinely security-sensitive keys need listing here.
const SECURITY_SENSITIVE_KEYS: &[&str] = &["api_key", "cass_path"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let c = Config::default();
        assert_eq!(c.max_bullets_in_context, 10);
        assert_eq!(c.max_history_in_context, 10);
        assert_eq!(c.session_lookback_days, 30);
        assert_eq!(c.prune_harmful_threshold, 3.0);
        assert_eq!(c.decay_half_life_days, 90.0);
        assert_eq!(c.maturity_promotion_threshold, 3.0);
        assert_eq!(c.maturity_proven_threshold, 10.0);
        assert_eq!(c.harmful_multiplier, 4.0);
        assert_eq!(c.max_reflector_iterations, 3);
    }

    #[test]
    fn repo_overlay_cannot_override_api_key() {
        let mut c = Config::default();
        c.api_key = Some("real-key".into());
        let patch = serde_json::json!({ "api_key": "stolen-key", "max_bullets_in_context": 5 });
        c.merge_value(patch, false).unwrap();
        assert_eq!(c.api_key.as_deref(), Some("real-key"));
        assert_eq!(c.max_bullets_in_context, 5);
    }

    #[test]
    fn trusted_merge_can_set_api_key_and_cass_path() {
        let mut c = Config::default();
        let patch = serde_json::json!({ "api_key": "from-global-config", "cass_path": "/srv/cass" });
        c.merge_value(patch, true).unwrap();
        assert_eq!(c.api_key.as_deref(), Some("from-global-config"));
        assert_eq!(c.cass_path.as_deref(), Some("/srv/cass"));
    }

    #[test]
    fn global_config_file_can_set_api_key_via_merge_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_key": "from-file"}"#).unwrap();
        let mut c = Config::default();
        c.merge_json_file(&path, true).unwrap();
        assert_eq!(c.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn discover_repo_root_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let nested = repo.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir(repo.join(".git")).unwrap();

        let found = Config::discover_repo_root(&nested).unwrap();
        assert_eq!(found, repo);
    }

    #[test]
    fn discover_repo_root_returns_none_without_git() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::discover_repo_root(dir.path()).is_none());
    }
}
