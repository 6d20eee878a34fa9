//! Application state: the match store, per-match handles, brief sourcing, and
//! the optional OpenAI collaborator.
//!
//! This module owns:
//!   - the match map (code -> handle), each handle carrying the per-match
//!     write lock, the push event channel, and presence refcounts
//!   - the item catalog and the brief pool (TOML bank + built-in seeds)
//!   - the injected `Grader`
//!
//! Brief sourcing mirrors the grading fallback chain: generate via OpenAI when
//! available, otherwise rotate through the local pool, otherwise hard-fallback.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::{load_engine_config_from_env, BriefCfg, EngineSettings, Prompts};
use crate::domain::{Brief, BriefSource, CatalogItem, Match};
use crate::grader::{Grader, HeuristicGrader, OpenAi, OpenAiGrader};
use crate::seeds::{fallback_brief, seed_briefs, seed_catalog};
use uuid::Uuid;

/// Per-match synchronization handle.
///
/// `record` enforces the single-writer rule: every mutating operation on the
/// match takes this lock. `events` is the best-effort push side of the sync
/// channel; the poll path reads `record` snapshots and never depends on it.
pub struct MatchHandle {
    pub record: Mutex<Match>,
    events: broadcast::Sender<String>,
    /// Wakes `start` callers that lost the brief-generation race.
    pub brief_ready: Notify,
    /// participant id -> open-socket refcount. Informational only; never
    /// gates a gameplay transition.
    presence: Mutex<HashMap<String, usize>>,
}

impl MatchHandle {
    fn new(record: Match) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            record: Mutex::new(record),
            events,
            brief_ready: Notify::new(),
            presence: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Best-effort push. A send error just means nobody is listening.
    pub fn push(&self, payload: String) {
        let _ = self.events.send(payload);
    }

    /// Returns true when this is the participant's first open socket.
    pub async fn register_presence(&self, participant_id: &str) -> bool {
        let mut p = self.presence.lock().await;
        let count = p.entry(participant_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns true when the participant's last socket closed.
    pub async fn unregister_presence(&self, participant_id: &str) -> bool {
        let mut p = self.presence.lock().await;
        match p.get_mut(participant_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                p.remove(participant_id);
                true
            }
            None => false,
        }
    }

    pub async fn online_participants(&self) -> Vec<String> {
        self.presence.lock().await.keys().cloned().collect()
    }
}

pub struct AppState {
    matches: RwLock<HashMap<String, Arc<MatchHandle>>>,
    pub catalog: HashMap<String, CatalogItem>,
    pub settings: EngineSettings,
    pub prompts: Prompts,
    pub openai: Option<OpenAi>,
    pub grader: Arc<dyn Grader>,
    /// TOML bank + built-in seeds, served round-robin when generation is off.
    brief_pool: Vec<Brief>,
    brief_cursor: Mutex<usize>,
}

impl AppState {
    /// Build state from env: load config, assemble the brief pool, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_engine_config_from_env().unwrap_or_default();
        let settings = cfg.settings.clone();
        let prompts = cfg.prompts.clone();
        let catalog = seed_catalog();

        let mut brief_pool = Vec::new();
        for bc in &cfg.briefs {
            match brief_from_cfg(bc, &catalog, &settings) {
                Some(b) => brief_pool.push(b),
                None => {
                    error!(target: "match_engine", title = %bc.title, "Skipping bank brief: invalid palette or scoring bounds.");
                }
            }
        }
        let bank = brief_pool.len();
        brief_pool.extend(seed_briefs());
        info!(target: "match_engine", local_bank = bank, seed = brief_pool.len() - bank, "Startup brief inventory");

        let openai = OpenAi::from_env();
        let grader: Arc<dyn Grader> = match &openai {
            Some(oa) => {
                info!(target: "stackduel_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
                Arc::new(OpenAiGrader { openai: oa.clone(), prompts: prompts.clone() })
            }
            None => {
                info!(target: "stackduel_backend", "OpenAI disabled (no OPENAI_API_KEY). Using heuristic grader and local briefs.");
                Arc::new(HeuristicGrader::new(catalog.clone()))
            }
        };

        Self {
            matches: RwLock::new(HashMap::new()),
            catalog,
            settings,
            prompts,
            openai,
            grader,
            brief_pool,
            brief_cursor: Mutex::new(0),
        }
    }

    /// State with an injected grader and no OpenAI, for deterministic tests.
    #[cfg(test)]
    pub fn with_grader(grader: Arc<dyn Grader>) -> Self {
        let catalog = seed_catalog();
        Self {
            matches: RwLock::new(HashMap::new()),
            catalog,
            settings: EngineSettings::default(),
            prompts: Prompts::default(),
            openai: None,
            grader,
            brief_pool: seed_briefs(),
            brief_cursor: Mutex::new(0),
        }
    }

    pub async fn insert_match(&self, record: Match) -> Arc<MatchHandle> {
        let code = record.code.clone();
        let handle = MatchHandle::new(record);
        self.matches.write().await.insert(code, handle.clone());
        handle
    }

    pub async fn handle(&self, code: &str) -> Option<Arc<MatchHandle>> {
        self.matches.read().await.get(code).cloned()
    }

    pub async fn code_taken(&self, code: &str) -> bool {
        self.matches.read().await.contains_key(code)
    }

    /// Produce the next brief for a starting match.
    /// OpenAI when available; otherwise rotate the local pool; a hard fallback
    /// guarantees this never fails.
    #[instrument(level = "info", skip(self), fields(%match_type))]
    pub async fn next_brief(&self, match_type: &str) -> Brief {
        if let Some(oa) = &self.openai {
            match oa.generate_brief(&self.prompts, match_type, &self.catalog).await {
                Ok(b) => {
                    info!(target: "match_engine", scenario = %b.scenario_id, source = "openai_generated", "Generated fresh brief");
                    return b;
                }
                Err(e) => {
                    error!(target: "match_engine", error = %e, "OpenAI brief generation failed; using local pool");
                }
            }
        }

        if !self.brief_pool.is_empty() {
            let mut cursor = self.brief_cursor.lock().await;
            let mut b = self.brief_pool[*cursor % self.brief_pool.len()].clone();
            *cursor = cursor.wrapping_add(1);
            // Fresh scenario id per match so rematches never alias briefs.
            b.scenario_id = format!("{}-{}", b.scenario_id, Uuid::new_v4());
            warn!(target: "match_engine", scenario = %b.scenario_id, source = "local_pool", "Serving pooled brief");
            return b;
        }

        let b = fallback_brief(match_type, self.settings.default_time_limit_secs);
        warn!(target: "match_engine", scenario = %b.scenario_id, source = "hard_fallback", "Serving hard fallback brief");
        b
    }
}

fn brief_from_cfg(
    bc: &BriefCfg,
    catalog: &HashMap<String, CatalogItem>,
    settings: &EngineSettings,
) -> Option<Brief> {
    let in_bounds = (10..=20).contains(&bc.palette.len());
    let known = bc.palette.iter().all(|id| catalog.contains_key(id));
    if !in_bounds || !known {
        return None;
    }
    let max_score = bc.max_score.unwrap_or(100.0);
    let time_limit_secs = bc.time_limit_secs.unwrap_or(settings.default_time_limit_secs);
    if !max_score.is_finite() || max_score <= 0.0 || time_limit_secs == 0 {
        return None;
    }
    Some(Brief {
        scenario_id: bc.scenario_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
        source: BriefSource::LocalBank,
        title: bc.title.clone(),
        scenario: bc.scenario.clone(),
        requirements: bc.requirements.clone(),
        palette: bc.palette.clone(),
        reference_solution: bc.reference_solution.clone(),
        alternate_solutions: bc.alternate_solutions.clone(),
        traps: bc.traps.clone(),
        time_limit_secs,
        max_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::HeuristicGrader;
    use crate::util::now_secs;
    use tokio::time::{timeout, Duration};

    fn pending_match(code: &str) -> Match {
        Match {
            code: code.into(),
            match_type: "speed_build".into(),
            initiator_id: "alice".into(),
            opponent_id: "bob".into(),
            status: crate::domain::MatchStatus::Pending,
            brief: None,
            submissions: HashMap::new(),
            results: HashMap::new(),
            winner_id: None,
            created_at_secs: now_secs(),
            accepted_at_secs: None,
            brief_generating: false,
        }
    }

    fn test_state() -> AppState {
        AppState::with_grader(Arc::new(HeuristicGrader::new(seed_catalog())))
    }

    #[test]
    fn bank_briefs_with_bad_scoring_bounds_are_rejected() {
        let catalog = seed_catalog();
        let settings = EngineSettings::default();
        let cfg = BriefCfg {
            scenario_id: None,
            title: "Bank brief".into(),
            scenario: "Build something".into(),
            requirements: Vec::new(),
            palette: catalog.keys().take(12).cloned().collect(),
            reference_solution: Vec::new(),
            alternate_solutions: Vec::new(),
            traps: Vec::new(),
            time_limit_secs: None,
            max_score: None,
        };
        assert!(brief_from_cfg(&cfg, &catalog, &settings).is_some());

        let negative = BriefCfg { max_score: Some(-5.0), ..cfg.clone() };
        assert!(brief_from_cfg(&negative, &catalog, &settings).is_none());

        let zero_time = BriefCfg { time_limit_secs: Some(0), ..cfg.clone() };
        assert!(brief_from_cfg(&zero_time, &catalog, &settings).is_none());

        let nan = BriefCfg { max_score: Some(f32::NAN), ..cfg };
        assert!(brief_from_cfg(&nan, &catalog, &settings).is_none());
    }

    #[tokio::test]
    async fn push_reaches_all_subscribers() {
        let state = test_state();
        let handle = state.insert_match(pending_match("ABCD22")).await;
        let mut r1 = handle.subscribe();
        let mut r2 = handle.subscribe();

        handle.push("hello".into());

        let m1 = timeout(Duration::from_millis(50), r1.recv()).await.unwrap().unwrap();
        let m2 = timeout(Duration::from_millis(50), r2.recv()).await.unwrap().unwrap();
        assert_eq!(m1, "hello");
        assert_eq!(m2, "hello");
    }

    #[tokio::test]
    async fn push_without_subscribers_is_a_noop() {
        let state = test_state();
        let handle = state.insert_match(pending_match("ABCD23")).await;
        handle.push("nobody listening".into());
    }

    #[tokio::test]
    async fn presence_refcounts_multiple_sockets() {
        let state = test_state();
        let handle = state.insert_match(pending_match("ABCD24")).await;

        assert!(handle.register_presence("alice").await);
        assert!(!handle.register_presence("alice").await); // second tab
        assert!(!handle.unregister_presence("alice").await);
        assert!(handle.unregister_presence("alice").await);
        assert!(handle.online_participants().await.is_empty());
    }

    #[tokio::test]
    async fn brief_pool_rotates_and_never_runs_dry() {
        let state = test_state();
        let first = state.next_brief("speed_build").await;
        let second = state.next_brief("speed_build").await;
        let third = state.next_brief("speed_build").await;
        assert_ne!(first.scenario_id, second.scenario_id);
        // Pool wrapped around; still serves a valid brief.
        assert!(!third.palette.is_empty());
    }
}
