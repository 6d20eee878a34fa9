//! Domain models: match lifecycle, briefs, submissions, and grading results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle of a match. Transitions are monotonic:
/// `Pending -> Active -> Completed`, or `Pending -> Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// Where did the brief come from?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefSource {
    LocalBank, // from user-provided TOML bank
    Generated, // generated via OpenAI
    Seed,      // built-in seeds (last resort)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    MustHave,
    ShouldHave,
    NiceToHave,
}

/// One weighted requirement of the brief's scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub category: String,
    pub description: String,
    pub tier: PriorityTier,
    /// Item ids that count toward satisfying this requirement.
    #[serde(default)]
    pub satisfied_by: Vec<String>,
}

/// A plausible-but-penalized palette item, used to test discernment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrapItem {
    pub item_id: String,
    pub penalty: f32,
    pub rationale: String,
}

/// Entry of the full item catalog (the palette is a strict subset of it).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub monthly_cost: f32,
}

/// The generated scenario a match is played against. Immutable once attached.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Brief {
    pub scenario_id: String,
    pub source: BriefSource,
    pub title: String,
    pub scenario: String,
    pub requirements: Vec<Requirement>,
    /// Selectable item ids (10-20), a strict subset of the catalog.
    pub palette: Vec<String>,
    pub reference_solution: Vec<String>,
    #[serde(default)]
    pub alternate_solutions: Vec<Vec<String>>,
    #[serde(default)]
    pub traps: Vec<TrapItem>,
    pub time_limit_secs: u32,
    pub max_score: f32,
}

/// Per-participant build state. Until `submitted` flips, `item_ids` is the
/// participant's private draft selection; afterwards it is the final,
/// irrevocable item set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Submission {
    pub item_ids: Vec<String>,
    pub time_remaining_secs: u32,
    pub submitted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_ratio(ratio: f32) -> Self {
        match ratio {
            r if r >= 0.9 => Grade::A,
            r if r >= 0.75 => Grade::B,
            r if r >= 0.6 => Grade::C,
            r if r >= 0.45 => Grade::D,
            _ => Grade::F,
        }
    }
}

/// One named bonus or penalty in the grading breakdown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub label: String,
    pub delta: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrapUse {
    pub item_id: String,
    pub penalty: f32,
    pub rationale: String,
}

/// Scored outcome of one participant's submission against the brief.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradingResult {
    pub grade: Grade,
    pub score: f32,
    pub max_score: f32,
    pub breakdown: Vec<ScoreAdjustment>,
    pub requirements_met: Vec<String>,
    pub requirements_missed: Vec<String>,
    pub traps_used: Vec<TrapUse>,
    pub missing_items: Vec<String>,
    pub extra_items: Vec<String>,
    pub feedback: String,
    pub reference_solution: Vec<String>,
    pub key_learning: String,
    /// True when the grader exhausted its retries and this is the substituted
    /// zero-score result.
    #[serde(default)]
    pub grading_unavailable: bool,
}

impl GradingResult {
    /// Clamp the numeric score into `[0, max_score]`.
    pub fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, self.max_score);
        self
    }

    /// Zero-score stand-in used when grading is unavailable or a deadline
    /// expired with nothing selected.
    pub fn zero(brief: &Brief, feedback: &str, grading_unavailable: bool) -> Self {
        Self {
            grade: Grade::F,
            score: 0.0,
            max_score: brief.max_score,
            breakdown: vec![],
            requirements_met: vec![],
            requirements_missed: brief.requirements.iter().map(|r| r.id.clone()).collect(),
            traps_used: vec![],
            missing_items: brief.reference_solution.clone(),
            extra_items: vec![],
            feedback: feedback.to_string(),
            reference_solution: brief.reference_solution.clone(),
            key_learning: String::new(),
            grading_unavailable,
        }
    }
}

/// Authoritative match record. All mutation happens behind the per-match lock
/// owned by `state::MatchHandle`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Match {
    pub code: String,
    pub match_type: String,
    pub initiator_id: String,
    pub opponent_id: String,
    pub status: MatchStatus,
    pub brief: Option<Brief>,
    /// Keyed by participant id. Holds drafts before submission and the final
    /// set afterwards.
    pub submissions: HashMap<String, Submission>,
    /// Keyed by participant id; present once grading committed.
    pub results: HashMap<String, GradingResult>,
    pub winner_id: Option<String>,
    pub created_at_secs: u64,
    pub accepted_at_secs: Option<u64>,
    /// Brief generation currently in flight (first `start` caller won the race).
    #[serde(skip)]
    pub brief_generating: bool,
}

impl Match {
    pub fn is_participant(&self, id: &str) -> bool {
        self.initiator_id == id || self.opponent_id == id
    }

    /// The other side of the table, if `id` belongs to the match at all.
    pub fn other_participant(&self, id: &str) -> Option<&str> {
        if self.initiator_id == id {
            Some(&self.opponent_id)
        } else if self.opponent_id == id {
            Some(&self.initiator_id)
        } else {
            None
        }
    }

    pub fn has_submitted(&self, id: &str) -> bool {
        self.submissions.get(id).map(|s| s.submitted).unwrap_or(false)
    }

    pub fn both_graded(&self) -> bool {
        self.results.contains_key(&self.initiator_id)
            && self.results.contains_key(&self.opponent_id)
    }
}
