//! Loading engine configuration (settings, grader prompts, optional brief
//! bank) from TOML.
//!
//! Every field is defaulted so the server runs with no config file at all.
//! See `EngineConfig` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Requirement, TrapItem};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub settings: EngineSettings,
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub briefs: Vec<BriefCfg>,
}

/// Tunables for match timing and grading retries.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineSettings {
  /// Time limit used by fallback briefs when the generator supplies none.
  #[serde(default = "default_time_limit")]
  pub default_time_limit_secs: u32,
  /// How many times the grading call is attempted before degrading.
  #[serde(default = "default_grading_attempts")]
  pub grading_attempts: u32,
  /// Initial backoff between grading attempts; doubles each retry.
  #[serde(default = "default_grading_backoff")]
  pub grading_backoff_ms: u64,
  /// Slack past the nominal deadline before the server force-submits,
  /// absorbing client/server clock skew and in-flight manual submissions.
  #[serde(default = "default_grace")]
  pub auto_submit_grace_secs: u64,
  #[serde(default = "default_code_len")]
  pub match_code_len: usize,
}

fn default_time_limit() -> u32 { 90 }
fn default_grading_attempts() -> u32 { 3 }
fn default_grading_backoff() -> u64 { 250 }
fn default_grace() -> u64 { 3 }
fn default_code_len() -> usize { 6 }

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      default_time_limit_secs: default_time_limit(),
      grading_attempts: default_grading_attempts(),
      grading_backoff_ms: default_grading_backoff(),
      auto_submit_grace_secs: default_grace(),
      match_code_len: default_code_len(),
    }
  }
}

/// Brief entry accepted in TOML configuration. Mirrors `domain::Brief` minus
/// the source tag; incomplete entries are skipped at load with an error log.
#[derive(Clone, Debug, Deserialize)]
pub struct BriefCfg {
  #[serde(default)] pub scenario_id: Option<String>,
  pub title: String,
  pub scenario: String,
  pub requirements: Vec<Requirement>,
  pub palette: Vec<String>,
  pub reference_solution: Vec<String>,
  #[serde(default)] pub alternate_solutions: Vec<Vec<String>>,
  #[serde(default)] pub traps: Vec<TrapItem>,
  #[serde(default)] pub time_limit_secs: Option<u32>,
  #[serde(default)] pub max_score: Option<f32>,
}

/// Prompts used by the OpenAI-backed generator/grader. Defaults are sensible
/// for the speed-build game; override in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  pub brief_system: String,
  pub brief_user_template: String,
  pub grading_system: String,
  pub grading_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      brief_system: "You are a content generator for a head-to-head cloud architecture speed-build game. Respond ONLY with strict JSON.".into(),
      brief_user_template: "Generate one build brief for match type '{match_type}'. The palette must contain 10-20 item ids drawn from this catalog: {catalog_json}. Include 2-4 trap items that look plausible but are wrong for the scenario, each with a penalty weight and a one-sentence rationale. Return JSON with fields: title, scenario, requirements (id, category, description, tier one of must_have|should_have|nice_to_have, satisfied_by), palette, reference_solution, alternate_solutions, traps (item_id, penalty, rationale), time_limit_secs, max_score.".into(),
      grading_system: "You are a strict but fair architecture reviewer. Be concise. Output JSON only.".into(),
      grading_user_template: "Brief (JSON): {brief_json}\nSubmitted item ids: {items_json}\nTime remaining (secs): {time_remaining}\n\nReturn JSON: {\"grade\": \"A\"|\"B\"|\"C\"|\"D\"|\"F\", \"score\": number, \"breakdown\": [{\"label\": string, \"delta\": number}], \"requirements_met\": [string], \"requirements_missed\": [string], \"traps_used\": [{\"item_id\": string, \"penalty\": number, \"rationale\": string}], \"missing_items\": [string], \"extra_items\": [string], \"feedback\": string, \"key_learning\": string}\nScoring: 0 to the brief's max_score. Reward coverage of must_have requirements and speed; penalize traps and overengineering.".into(),
    }
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH.
/// On any parsing/IO error, returns None.
pub fn load_engine_config_from_env() -> Option<EngineConfig> {
  let path = std::env::var("ENGINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "stackduel_backend", %path, "Loaded engine config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "stackduel_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "stackduel_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
