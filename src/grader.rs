//! Grading and brief generation collaborators.
//!
//! The engine only ever sees the `Grader` trait, so matches can be driven by
//! the OpenAI-backed reviewer in production and by deterministic stubs in
//! tests. `HeuristicGrader` is the always-available local implementation.
//!
//! OpenAI calls request strict JSON objects and are instrumented with model
//! names, latencies, and response sizes (never contents or the API key).

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{
  Brief, BriefSource, CatalogItem, Grade, GradingResult, PriorityTier, Requirement,
  ScoreAdjustment, TrapItem, TrapUse,
};
use crate::util::{fill_template, trunc_for_log};

/// Injected grading capability. Must be pure with respect to its inputs so
/// the submission pipeline can retry safely.
#[async_trait]
pub trait Grader: Send + Sync {
  async fn grade(
    &self,
    brief: &Brief,
    item_ids: &[String],
    time_remaining_secs: u32,
  ) -> Result<GradingResult, String>;
}

// ---------------------------------------------------------------------------
// Deterministic local grader
// ---------------------------------------------------------------------------

const SPEED_BONUS_MAX: f32 = 10.0;
const EXACT_BLUEPRINT_BONUS: f32 = 10.0;
const OVERENGINEERING_PENALTY_PER_ITEM: f32 = 5.0;
const COST_PENALTY: f32 = 5.0;

fn tier_weight(tier: PriorityTier) -> f32 {
  match tier {
    PriorityTier::MustHave => 3.0,
    PriorityTier::ShouldHave => 2.0,
    PriorityTier::NiceToHave => 1.0,
  }
}

/// Scores a submission from the brief alone: requirement coverage weighted by
/// tier, an exact-blueprint bonus, a speed bonus, trap penalties, and an
/// overengineering penalty for surplus items.
pub struct HeuristicGrader {
  catalog: HashMap<String, CatalogItem>,
}

impl HeuristicGrader {
  pub fn new(catalog: HashMap<String, CatalogItem>) -> Self {
    Self { catalog }
  }

  fn requirement_met(req: &Requirement, chosen: &BTreeSet<&str>) -> bool {
    if req.satisfied_by.is_empty() {
      // No mapping supplied by the generator; any non-empty build counts.
      return !chosen.is_empty();
    }
    req.satisfied_by.iter().any(|id| chosen.contains(id.as_str()))
  }
}

#[async_trait]
impl Grader for HeuristicGrader {
  #[instrument(level = "info", skip(self, brief), fields(scenario = %brief.scenario_id, items = item_ids.len()))]
  async fn grade(
    &self,
    brief: &Brief,
    item_ids: &[String],
    time_remaining_secs: u32,
  ) -> Result<GradingResult, String> {
    let chosen: BTreeSet<&str> = item_ids.iter().map(|s| s.as_str()).collect();
    let reference: BTreeSet<&str> = brief.reference_solution.iter().map(|s| s.as_str()).collect();

    let mut breakdown = Vec::new();
    let mut notes = Vec::new();

    // Requirement coverage, weighted by tier, worth 70% of the maximum.
    let mut met = Vec::new();
    let mut missed = Vec::new();
    let mut met_weight = 0.0_f32;
    let mut total_weight = 0.0_f32;
    for req in &brief.requirements {
      let w = tier_weight(req.tier);
      total_weight += w;
      if Self::requirement_met(req, &chosen) {
        met_weight += w;
        met.push(req.id.clone());
      } else {
        missed.push(req.id.clone());
        notes.push(format!("Missed: {}", req.description));
      }
    }
    let coverage = if total_weight > 0.0 { met_weight / total_weight } else { 1.0 };
    let coverage_points = brief.max_score * 0.7 * coverage;
    breakdown.push(ScoreAdjustment { label: "requirement coverage".into(), delta: coverage_points });

    let mut score = coverage_points;

    // Exact blueprint (reference or any accepted alternate).
    let exact = chosen == reference
      || brief.alternate_solutions.iter().any(|alt| {
        let alt: BTreeSet<&str> = alt.iter().map(|s| s.as_str()).collect();
        alt == chosen
      });
    if exact {
      score += EXACT_BLUEPRINT_BONUS;
      breakdown.push(ScoreAdjustment { label: "exact blueprint".into(), delta: EXACT_BLUEPRINT_BONUS });
    }

    // Speed bonus scales with the fraction of the clock left.
    if brief.time_limit_secs > 0 && !chosen.is_empty() {
      let frac = (time_remaining_secs.min(brief.time_limit_secs) as f32)
        / (brief.time_limit_secs as f32);
      let bonus = (SPEED_BONUS_MAX * frac * 10.0).round() / 10.0;
      if bonus > 0.0 {
        score += bonus;
        breakdown.push(ScoreAdjustment { label: "speed bonus".into(), delta: bonus });
      }
    }

    // Trap penalties.
    let mut traps_used = Vec::new();
    for t in &brief.traps {
      if chosen.contains(t.item_id.as_str()) {
        score -= t.penalty;
        breakdown.push(ScoreAdjustment { label: format!("trap: {}", t.item_id), delta: -t.penalty });
        notes.push(format!("Trap used ({}): {}", t.item_id, t.rationale));
        traps_used.push(TrapUse {
          item_id: t.item_id.clone(),
          penalty: t.penalty,
          rationale: t.rationale.clone(),
        });
      }
    }

    // Overengineering: surplus non-trap items relative to the reference.
    let trap_ids: BTreeSet<&str> = brief.traps.iter().map(|t| t.item_id.as_str()).collect();
    let extra: Vec<String> = chosen
      .iter()
      .filter(|id| !reference.contains(**id))
      .map(|id| id.to_string())
      .collect();
    let surplus = extra.iter().filter(|id| !trap_ids.contains(id.as_str())).count();
    if surplus > 0 {
      let penalty = OVERENGINEERING_PENALTY_PER_ITEM * surplus as f32;
      score -= penalty;
      breakdown.push(ScoreAdjustment { label: "overengineering".into(), delta: -penalty });
      notes.push(format!("{} item(s) beyond what the scenario needs", surplus));
    }

    // Cost efficiency relative to the reference build.
    let cost_of = |set: &BTreeSet<&str>| -> f32 {
      set.iter().filter_map(|id| self.catalog.get(*id)).map(|i| i.monthly_cost).sum()
    };
    let chosen_cost = cost_of(&chosen);
    let reference_cost = cost_of(&reference);
    if reference_cost > 0.0 && chosen_cost > reference_cost * 1.5 {
      score -= COST_PENALTY;
      breakdown.push(ScoreAdjustment { label: "cost efficiency".into(), delta: -COST_PENALTY });
      notes.push(format!(
        "Build runs {:.0}/mo against a reference of {:.0}/mo",
        chosen_cost, reference_cost
      ));
    }

    let missing: Vec<String> = reference
      .iter()
      .filter(|id| !chosen.contains(**id))
      .map(|id| id.to_string())
      .collect();

    let key_learning = traps_used
      .first()
      .map(|t| t.rationale.clone())
      .or_else(|| {
        brief
          .requirements
          .iter()
          .find(|r| r.tier == PriorityTier::MustHave && missed.contains(&r.id))
          .map(|r| format!("Every build here needed: {}", r.description))
      })
      .unwrap_or_else(|| "Cover the must-haves first, then spend what's left on speed.".into());

    let feedback = if notes.is_empty() {
      "Clean build: requirements covered, nothing wasted.".to_string()
    } else {
      notes.join(" ")
    };

    let score = score.clamp(0.0, brief.max_score);
    Ok(GradingResult {
      grade: Grade::from_ratio(score / brief.max_score),
      score,
      max_score: brief.max_score,
      breakdown,
      requirements_met: met,
      requirements_missed: missed,
      traps_used,
      missing_items: missing,
      extra_items: extra,
      feedback,
      reference_solution: brief.reference_solution.clone(),
      key_learning,
      grading_unavailable: false,
    })
  }
}

// ---------------------------------------------------------------------------
// OpenAI-backed generator + grader
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAi {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
}

#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
  r#type: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
  content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
  prompt_tokens: Option<u64>,
  completion_tokens: Option<u64>,
  total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  usage: Option<ChatUsage>,
}

fn extract_openai_error(body: &str) -> Option<String> {
  serde_json::from_str::<serde_json::Value>(body)
    .ok()?
    .get("error")?
    .get("message")?
    .as_str()
    .map(|s| s.to_string())
}

/// Shape the generator returns for a brief; we attach id/source/defaults.
#[derive(Deserialize)]
struct BriefGen {
  title: String,
  scenario: String,
  requirements: Vec<Requirement>,
  palette: Vec<String>,
  reference_solution: Vec<String>,
  #[serde(default)]
  alternate_solutions: Vec<Vec<String>>,
  #[serde(default)]
  traps: Vec<TrapItem>,
  time_limit_secs: Option<u32>,
  max_score: Option<f32>,
}

/// Shape the reviewer returns for a grading; reference echo and clamping are
/// applied on our side.
#[derive(Deserialize)]
struct GradingGen {
  grade: String,
  score: f32,
  #[serde(default)]
  breakdown: Vec<ScoreAdjustment>,
  #[serde(default)]
  requirements_met: Vec<String>,
  #[serde(default)]
  requirements_missed: Vec<String>,
  #[serde(default)]
  traps_used: Vec<TrapUse>,
  #[serde(default)]
  missing_items: Vec<String>,
  #[serde(default)]
  extra_items: Vec<String>,
  #[serde(default)]
  feedback: String,
  #[serde(default)]
  key_learning: String,
}

fn parse_grade(s: &str) -> Grade {
  match s.trim().to_ascii_uppercase().as_str() {
    "A" => Grade::A,
    "B" => Grade::B,
    "C" => Grade::C,
    "D" => Grade::D,
    _ => Grade::F,
  }
}

impl OpenAi {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model })
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "stackduel-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, trunc_for_log(&msg, 300)));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    serde_json::from_str::<T>(&text)
      .map_err(|e| format!("JSON parse error: {} in {}", e, trunc_for_log(&text, 200)))
  }

  /// Generate a build brief for a match. The palette must stay inside the
  /// catalog and within 10-20 items, and the scoring bounds must be sane;
  /// anything else is rejected so we fall back to the local brief pool.
  #[instrument(level = "info", skip(self, prompts, catalog), fields(%match_type, model = %self.strong_model))]
  pub async fn generate_brief(
    &self,
    prompts: &Prompts,
    match_type: &str,
    catalog: &HashMap<String, CatalogItem>,
  ) -> Result<Brief, String> {
    let catalog_json = serde_json::to_string(&catalog.values().collect::<Vec<_>>())
      .map_err(|e| e.to_string())?;
    let user = fill_template(
      &prompts.brief_user_template,
      &[("match_type", match_type), ("catalog_json", &catalog_json)],
    );

    let start = std::time::Instant::now();
    let result = self
      .chat_json::<BriefGen>(&self.strong_model, &prompts.brief_system, &user, 0.9)
      .await;
    let elapsed = start.elapsed();

    let gen = match result {
      Ok(g) => {
        info!(?elapsed, "Brief generated");
        g
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during brief generation");
        return Err(format!("Brief generation failed: {e}"));
      }
    };

    if gen.palette.len() < 10 || gen.palette.len() > 20 {
      return Err(format!("Generated palette out of bounds: {} items", gen.palette.len()));
    }
    if let Some(bad) = gen.palette.iter().find(|id| !catalog.contains_key(*id)) {
      return Err(format!("Generated palette references unknown item '{bad}'"));
    }
    let max_score = gen.max_score.unwrap_or(100.0);
    if !max_score.is_finite() || max_score <= 0.0 {
      return Err(format!("Generated max_score out of bounds: {max_score}"));
    }
    let time_limit_secs = gen.time_limit_secs.unwrap_or(90);
    if time_limit_secs == 0 {
      return Err("Generated time limit is zero".into());
    }

    Ok(Brief {
      scenario_id: Uuid::new_v4().to_string(),
      source: BriefSource::Generated,
      title: gen.title,
      scenario: gen.scenario,
      requirements: gen.requirements,
      palette: gen.palette,
      reference_solution: gen.reference_solution,
      alternate_solutions: gen.alternate_solutions,
      traps: gen.traps,
      time_limit_secs,
      max_score,
    })
  }

  /// Grade a submission via the model. Prompts carry the full brief context.
  #[instrument(level = "info", skip(self, prompts, brief, item_ids),
               fields(scenario = %brief.scenario_id, items = item_ids.len(), model = %self.strong_model))]
  pub async fn grade_submission(
    &self,
    prompts: &Prompts,
    brief: &Brief,
    item_ids: &[String],
    time_remaining_secs: u32,
  ) -> Result<GradingResult, String> {
    let brief_json = serde_json::to_string(brief).map_err(|e| e.to_string())?;
    let items_json = serde_json::to_string(item_ids).map_err(|e| e.to_string())?;
    let time_remaining = time_remaining_secs.to_string();
    let user = fill_template(
      &prompts.grading_user_template,
      &[
        ("brief_json", &brief_json),
        ("items_json", &items_json),
        ("time_remaining", &time_remaining),
      ],
    );

    let g: GradingGen = self
      .chat_json(&self.strong_model, &prompts.grading_system, &user, 0.2)
      .await?;

    Ok(
      GradingResult {
        grade: parse_grade(&g.grade),
        score: g.score,
        max_score: brief.max_score,
        breakdown: g.breakdown,
        requirements_met: g.requirements_met,
        requirements_missed: g.requirements_missed,
        traps_used: g.traps_used,
        missing_items: g.missing_items,
        extra_items: g.extra_items,
        feedback: g.feedback,
        reference_solution: brief.reference_solution.clone(),
        key_learning: g.key_learning,
        grading_unavailable: false,
      }
      .clamped(),
    )
  }
}

/// Grader backed by OpenAI with its prompt set. Falls back nowhere on its own;
/// retry/degradation policy lives in the submission pipeline.
pub struct OpenAiGrader {
  pub openai: OpenAi,
  pub prompts: Prompts,
}

#[async_trait]
impl Grader for OpenAiGrader {
  async fn grade(
    &self,
    brief: &Brief,
    item_ids: &[String],
    time_remaining_secs: u32,
  ) -> Result<GradingResult, String> {
    self
      .openai
      .grade_submission(&self.prompts, brief, item_ids, time_remaining_secs)
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::seeds::{seed_briefs, seed_catalog};

  fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn reference_solution_at_full_speed_scores_a_grade() {
    let grader = HeuristicGrader::new(seed_catalog());
    let brief = &seed_briefs()[0];
    let r = grader
      .grade(brief, &brief.reference_solution, brief.time_limit_secs)
      .await
      .unwrap();
    // Full coverage (70) + exact blueprint (10) + full speed bonus (10).
    assert_eq!(r.grade, Grade::A);
    assert!(r.requirements_missed.is_empty());
    assert!(r.traps_used.is_empty());
    assert!(r.score <= brief.max_score);
  }

  #[tokio::test]
  async fn trap_items_are_penalized_and_reported() {
    let grader = HeuristicGrader::new(seed_catalog());
    let brief = &seed_briefs()[0];
    let mut items = brief.reference_solution.clone();
    items.push("blockchain-ledger".into());
    let clean = grader.grade(brief, &brief.reference_solution, 30).await.unwrap();
    let trapped = grader.grade(brief, &items, 30).await.unwrap();
    assert!(trapped.score < clean.score);
    assert_eq!(trapped.traps_used.len(), 1);
    assert_eq!(trapped.traps_used[0].item_id, "blockchain-ledger");
    assert_eq!(trapped.key_learning, brief.traps[0].rationale);
  }

  #[tokio::test]
  async fn faster_submission_of_same_items_scores_higher() {
    let grader = HeuristicGrader::new(seed_catalog());
    let brief = &seed_briefs()[0];
    let slow = grader.grade(brief, &brief.reference_solution, 5).await.unwrap();
    let fast = grader.grade(brief, &brief.reference_solution, 80).await.unwrap();
    assert!(fast.score > slow.score);
  }

  #[tokio::test]
  async fn alternate_solution_earns_exact_blueprint_bonus() {
    let grader = HeuristicGrader::new(seed_catalog());
    let brief = &seed_briefs()[0];
    let alt = brief.alternate_solutions[0].clone();
    let r = grader.grade(brief, &alt, 0).await.unwrap();
    assert!(r.breakdown.iter().any(|b| b.label == "exact blueprint"));
  }

  #[tokio::test]
  async fn score_is_clamped_to_bounds() {
    let grader = HeuristicGrader::new(seed_catalog());
    let brief = &seed_briefs()[0];
    // Every trap plus junk coverage drives the raw score negative.
    let r = grader
      .grade(brief, &ids(&["blockchain-ledger", "ml-recommender"]), 0)
      .await
      .unwrap();
    assert!(r.score >= 0.0);
    assert_eq!(r.grade, Grade::F);
  }
}
