//! Core match engine shared by the HTTP and WebSocket surfaces.
//!
//! This module is the authority on:
//!   - the match lifecycle (`pending -> active -> completed` / `cancelled`)
//!   - the submission pipeline (validate, clamp, grade with retries, commit)
//!   - deadline handling (server-side auto-submission of the last selection)
//!   - the rematch factory
//!
//! Every mutation of one match happens under that match's `record` lock; the
//! grading call is awaited with the lock released and the result committed in
//! a second, short critical section.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, instrument, warn};

use crate::domain::{Brief, GradingResult, Match, MatchStatus, Submission};
use crate::error::EngineError;
use crate::outcome::{aggregate, decide_winner};
use crate::protocol::{to_view, MatchEventKind, MatchView, ServerWsMessage, SubmitOut};
use crate::state::{AppState, MatchHandle};
use crate::util::{gen_match_code, now_secs};

type Result<T> = std::result::Result<T, EngineError>;

/// How long a losing `start` caller waits for the winner's generation before
/// re-checking the record.
const BRIEF_WAIT: Duration = Duration::from_secs(20);

fn push_event(handle: &MatchHandle, code: &str, event: MatchEventKind, actor: &str) {
    let msg = ServerWsMessage::MatchEvent {
        match_code: code.to_string(),
        event,
        actor_id: actor.to_string(),
    };
    if let Ok(payload) = serde_json::to_string(&msg) {
        handle.push(payload);
    }
}

/// Collapse duplicates and fix an order; submissions are sets.
fn canonical_items(item_ids: &[String]) -> Vec<String> {
    item_ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

async fn get_handle(state: &AppState, code: &str) -> Result<Arc<MatchHandle>> {
    state.handle(code).await.ok_or_else(|| EngineError::NotFound(code.to_string()))
}

// ---------------------------------------------------------------------------
// Lifecycle operations
// ---------------------------------------------------------------------------

/// Create a `pending` match: `initiator` invites `opponent`.
#[instrument(level = "info", skip(state), fields(%initiator_id, %opponent_id))]
pub async fn create_match(
    state: &Arc<AppState>,
    initiator_id: &str,
    opponent_id: &str,
    match_type: &str,
) -> Result<MatchView> {
    if initiator_id == opponent_id {
        return Err(EngineError::SelfChallenge);
    }

    // Re-roll until the code is free; the space is large enough that this
    // terminates immediately in practice.
    let code = loop {
        let candidate = gen_match_code(state.settings.match_code_len);
        if !state.code_taken(&candidate).await {
            break candidate;
        }
    };

    let record = Match {
        code: code.clone(),
        match_type: match_type.to_string(),
        initiator_id: initiator_id.to_string(),
        opponent_id: opponent_id.to_string(),
        status: MatchStatus::Pending,
        brief: None,
        submissions: Default::default(),
        results: Default::default(),
        winner_id: None,
        created_at_secs: now_secs(),
        accepted_at_secs: None,
        brief_generating: false,
    };
    let handle = state.insert_match(record).await;
    let m = handle.record.lock().await;
    info!(target: "match_engine", %code, "Match created");
    Ok(to_view(&m, initiator_id))
}

/// Invitee accepts: `pending -> active`.
#[instrument(level = "info", skip(state), fields(%code, %participant_id))]
pub async fn accept(state: &Arc<AppState>, code: &str, participant_id: &str) -> Result<MatchView> {
    let handle = get_handle(state, code).await?;
    let mut m = handle.record.lock().await;

    if !m.is_participant(participant_id) {
        return Err(EngineError::Forbidden("not a participant of this match".into()));
    }
    if participant_id != m.opponent_id {
        return Err(EngineError::Forbidden("only the invited participant can accept".into()));
    }
    if m.status != MatchStatus::Pending {
        return Err(EngineError::AlreadyResolved(format!("match is {:?}", m.status)));
    }

    m.status = MatchStatus::Active;
    m.accepted_at_secs = Some(now_secs());
    info!(target: "match_engine", %code, "Match accepted");
    push_event(&handle, code, MatchEventKind::Accepted, participant_id);
    Ok(to_view(&m, participant_id))
}

/// Invitee declines: `pending -> cancelled`.
#[instrument(level = "info", skip(state), fields(%code, %participant_id))]
pub async fn decline(state: &Arc<AppState>, code: &str, participant_id: &str) -> Result<MatchView> {
    let handle = get_handle(state, code).await?;
    let mut m = handle.record.lock().await;

    if !m.is_participant(participant_id) {
        return Err(EngineError::Forbidden("not a participant of this match".into()));
    }
    if participant_id != m.opponent_id {
        return Err(EngineError::Forbidden("only the invited participant can decline".into()));
    }
    if m.status != MatchStatus::Pending {
        return Err(EngineError::AlreadyResolved(format!("match is {:?}", m.status)));
    }

    m.status = MatchStatus::Cancelled;
    info!(target: "match_engine", %code, "Match declined");
    push_event(&handle, code, MatchEventKind::Declined, participant_id);
    Ok(to_view(&m, participant_id))
}

/// Attach the brief to an `active` match and start both countdowns.
///
/// Idempotent under races: the first caller triggers generation, concurrent
/// callers wait and receive the one attached brief.
#[instrument(level = "info", skip(state), fields(%code, %participant_id))]
pub async fn start_match(
    state: &Arc<AppState>,
    code: &str,
    participant_id: &str,
) -> Result<MatchView> {
    let handle = get_handle(state, code).await?;

    loop {
        let mut m = handle.record.lock().await;
        if !m.is_participant(participant_id) {
            return Err(EngineError::Forbidden("not a participant of this match".into()));
        }
        if m.brief.is_some() {
            return Ok(to_view(&m, participant_id));
        }
        match m.status {
            MatchStatus::Active => {}
            MatchStatus::Pending => {
                return Err(EngineError::InvalidTransition(
                    "match must be accepted before it can start".into(),
                ));
            }
            _ => return Err(EngineError::AlreadyResolved(format!("match is {:?}", m.status))),
        }

        if m.brief_generating {
            // Lost the generation race: wait for the winner, then re-check.
            // The notified future is created before the lock drops so a
            // notify between the two cannot be missed.
            let notified = handle.brief_ready.notified();
            drop(m);
            let _ = timeout(BRIEF_WAIT, notified).await;
            continue;
        }

        m.brief_generating = true;
        let match_type = m.match_type.clone();
        drop(m);

        // Generation is the slow part; never hold the record lock across it.
        let brief = state.next_brief(&match_type).await;

        let mut m = handle.record.lock().await;
        m.brief_generating = false;
        if m.brief.is_none() && m.status == MatchStatus::Active {
            let deadline = brief.time_limit_secs as u64 + state.settings.auto_submit_grace_secs;
            m.brief = Some(brief);
            info!(target: "match_engine", %code, deadline_secs = deadline, "Brief attached, countdowns started");
            for pid in [m.initiator_id.clone(), m.opponent_id.clone()] {
                spawn_deadline(state.clone(), code.to_string(), pid, deadline);
            }
        }
        handle.brief_ready.notify_waiters();
        return Ok(to_view(&m, participant_id));
    }
}

/// Record a participant's in-progress draft selection. Drafts feed deadline
/// auto-submission and are never revealed to the opponent.
#[instrument(level = "debug", skip(state, item_ids), fields(%code, %participant_id, items = item_ids.len()))]
pub async fn update_selection(
    state: &Arc<AppState>,
    code: &str,
    participant_id: &str,
    item_ids: &[String],
) -> Result<()> {
    let handle = get_handle(state, code).await?;
    let mut m = handle.record.lock().await;

    if !m.is_participant(participant_id) {
        return Err(EngineError::Forbidden("not a participant of this match".into()));
    }
    match m.status {
        MatchStatus::Active => {}
        MatchStatus::Pending => {
            return Err(EngineError::InvalidTransition("match has not started".into()));
        }
        _ => return Err(EngineError::AlreadyResolved(format!("match is {:?}", m.status))),
    }
    if m.has_submitted(participant_id) {
        return Err(EngineError::AlreadyResolved("submission already locked in".into()));
    }

    let entry = m.submissions.entry(participant_id.to_string()).or_default();
    entry.item_ids = canonical_items(item_ids);
    Ok(())
}

/// Read projection for one participant. This is the poll path of the sync
/// channel and always reflects committed state.
#[instrument(level = "debug", skip(state), fields(%code, %participant_id))]
pub async fn view(state: &Arc<AppState>, code: &str, participant_id: &str) -> Result<MatchView> {
    let handle = get_handle(state, code).await?;
    let m = handle.record.lock().await;
    if !m.is_participant(participant_id) {
        return Err(EngineError::Forbidden("not a participant of this match".into()));
    }
    Ok(to_view(&m, participant_id))
}

// ---------------------------------------------------------------------------
// Submission pipeline
// ---------------------------------------------------------------------------

/// Manual submission: validate, commit the irrevocable item set, grade with
/// the lock released, commit the result, and complete the match if this was
/// the second grading.
#[instrument(level = "info", skip(state, item_ids), fields(%code, %participant_id, items = item_ids.len()))]
pub async fn submit(
    state: &Arc<AppState>,
    code: &str,
    participant_id: &str,
    item_ids: &[String],
    time_remaining_secs: u32,
) -> Result<SubmitOut> {
    let items = canonical_items(item_ids);
    let handle = get_handle(state, code).await?;

    let (brief, clamped) = {
        let mut m = handle.record.lock().await;

        if !m.is_participant(participant_id) {
            return Err(EngineError::Forbidden("not a participant of this match".into()));
        }
        match m.status {
            MatchStatus::Active => {}
            MatchStatus::Pending => {
                return Err(EngineError::InvalidTransition("match has not started".into()));
            }
            _ => return Err(EngineError::AlreadyResolved(format!("match is {:?}", m.status))),
        }
        let brief = match &m.brief {
            Some(b) => b.clone(),
            None => {
                return Err(EngineError::InvalidTransition("no brief attached yet".into()));
            }
        };

        if m.has_submitted(participant_id) {
            // Identical retry after a transient failure is idempotent; a
            // different item set on a locked-in submission is not.
            let existing = &m.submissions[participant_id];
            if existing.item_ids == items {
                return Ok(SubmitOut {
                    status: m.status,
                    your_result: m.results.get(participant_id).cloned(),
                    outcome: aggregate(&m),
                });
            }
            return Err(EngineError::AlreadyResolved(
                "a different submission was already accepted".into(),
            ));
        }

        if items.is_empty() {
            return Err(EngineError::EmptySubmission);
        }

        // Client clocks are advisory; the authoritative figure is clamped here.
        let clamped = time_remaining_secs.min(brief.time_limit_secs);
        m.submissions.insert(
            participant_id.to_string(),
            Submission { item_ids: items.clone(), time_remaining_secs: clamped, submitted: true },
        );
        info!(target: "match_engine", %code, time_remaining = clamped, "Submission accepted");
        push_event(&handle, code, MatchEventKind::Submitted, participant_id);
        (brief, clamped)
    };

    let result = grade_with_retries(state, &brief, &items, clamped).await;
    commit_result(&handle, code, participant_id, result).await
}

/// Invoke the grader with bounded retries and exponential backoff. On
/// exhaustion, substitute a degraded zero-score result so the match can
/// always complete.
async fn grade_with_retries(
    state: &AppState,
    brief: &Brief,
    items: &[String],
    time_remaining_secs: u32,
) -> GradingResult {
    let attempts = state.settings.grading_attempts.max(1);
    let mut backoff = Duration::from_millis(state.settings.grading_backoff_ms);

    for attempt in 1..=attempts {
        match state.grader.grade(brief, items, time_remaining_secs).await {
            Ok(result) => return result.clamped(),
            Err(e) => {
                error!(target: "match_engine", attempt, error = %e, "Grading attempt failed");
                if attempt < attempts {
                    sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    let reason = EngineError::GradingUnavailable;
    warn!(target: "match_engine", error = reason.code(), "Recording zero-score result");
    GradingResult::zero(
        brief,
        &format!("{reason}; this submission was recorded with a zero score."),
        true,
    )
}

/// Commit a grading result and, if it is the second one, perform the single
/// `completed` transition and winner computation.
async fn commit_result(
    handle: &MatchHandle,
    code: &str,
    participant_id: &str,
    result: GradingResult,
) -> Result<SubmitOut> {
    let mut m = handle.record.lock().await;
    m.results.insert(participant_id.to_string(), result);

    // Guarded transition: both commits race here, only the later one sees
    // both results while the match is still active.
    if m.both_graded() && m.status == MatchStatus::Active {
        let a_score = m.results[&m.initiator_id].score;
        let b_score = m.results[&m.opponent_id].score;
        m.winner_id = decide_winner(&m.initiator_id, a_score, &m.opponent_id, b_score);
        m.status = MatchStatus::Completed;
        info!(target: "match_engine", %code, winner = ?m.winner_id, "Match completed");
        push_event(handle, code, MatchEventKind::Completed, participant_id);
    }

    Ok(SubmitOut {
        status: m.status,
        your_result: m.results.get(participant_id).cloned(),
        outcome: aggregate(&m),
    })
}

// ---------------------------------------------------------------------------
// Deadline handling
// ---------------------------------------------------------------------------

fn spawn_deadline(state: Arc<AppState>, code: String, participant_id: String, secs: u64) {
    tokio::spawn(async move {
        sleep(Duration::from_secs(secs)).await;
        if let Err(e) = auto_submit(&state, &code, &participant_id).await {
            error!(target: "match_engine", %code, %participant_id, error = %e, "Auto-submit failed");
        }
    });
}

/// Deadline expiry: submit whatever the participant had selected. The one
/// case an empty submission is accepted, scored zero without grading.
#[instrument(level = "info", skip(state), fields(%code, %participant_id))]
async fn auto_submit(state: &Arc<AppState>, code: &str, participant_id: &str) -> Result<()> {
    let handle = get_handle(state, code).await?;

    let (brief, items) = {
        let mut m = handle.record.lock().await;
        if m.status != MatchStatus::Active || m.has_submitted(participant_id) {
            // Manual submission won, or the match moved on. Nothing to do.
            return Ok(());
        }
        let brief = match &m.brief {
            Some(b) => b.clone(),
            None => return Ok(()),
        };

        let items = m
            .submissions
            .get(participant_id)
            .map(|s| s.item_ids.clone())
            .unwrap_or_default();
        m.submissions.insert(
            participant_id.to_string(),
            Submission { item_ids: items.clone(), time_remaining_secs: 0, submitted: true },
        );
        info!(target: "match_engine", %code, items = items.len(), "Deadline expired, auto-submitting last selection");
        push_event(&handle, code, MatchEventKind::Submitted, participant_id);
        (brief, items)
    };

    let result = if items.is_empty() {
        GradingResult::zero(&brief, "Time expired with no items selected.", false)
    } else {
        grade_with_retries(state, &brief, &items, 0).await
    };
    commit_result(&handle, code, participant_id, result).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rematch factory
// ---------------------------------------------------------------------------

/// Spawn a fresh `pending` match between the same two participants. The
/// requester becomes the initiator of the new match; no state is shared with
/// the source.
#[instrument(level = "info", skip(state), fields(%code, %participant_id))]
pub async fn create_rematch(
    state: &Arc<AppState>,
    code: &str,
    participant_id: &str,
) -> Result<MatchView> {
    let handle = get_handle(state, code).await?;
    let (opponent, match_type) = {
        let m = handle.record.lock().await;
        if !m.is_participant(participant_id) {
            return Err(EngineError::Forbidden("not a participant of this match".into()));
        }
        if m.status != MatchStatus::Completed {
            return Err(EngineError::InvalidTransition(
                "rematch requires a completed match".into(),
            ));
        }
        let opponent = m
            .other_participant(participant_id)
            .unwrap_or_default()
            .to_string();
        (opponent, m.match_type.clone())
    };

    create_match(state, participant_id, &opponent, &match_type).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Grade;
    use crate::grader::{Grader, HeuristicGrader};
    use crate::seeds::seed_catalog;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Returns pre-scripted scores in order, one per grading call.
    struct ScriptedGrader {
        scores: Mutex<VecDeque<f32>>,
    }

    impl ScriptedGrader {
        fn new(scores: &[f32]) -> Arc<Self> {
            Arc::new(Self { scores: Mutex::new(scores.iter().copied().collect()) })
        }
    }

    #[async_trait]
    impl Grader for ScriptedGrader {
        async fn grade(
            &self,
            brief: &Brief,
            _item_ids: &[String],
            _time_remaining_secs: u32,
        ) -> std::result::Result<GradingResult, String> {
            let score = self
                .scores
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| "script exhausted".to_string())?;
            let mut r = GradingResult::zero(brief, "scripted", false);
            r.score = score;
            r.grade = Grade::from_ratio(score / brief.max_score);
            Ok(r)
        }
    }

    struct FailingGrader;

    #[async_trait]
    impl Grader for FailingGrader {
        async fn grade(
            &self,
            _brief: &Brief,
            _item_ids: &[String],
            _time_remaining_secs: u32,
        ) -> std::result::Result<GradingResult, String> {
            Err("grader offline".into())
        }
    }

    fn items(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    async fn heuristic_state() -> Arc<AppState> {
        Arc::new(AppState::with_grader(Arc::new(HeuristicGrader::new(seed_catalog()))))
    }

    /// create + accept + start; returns (state, code).
    async fn active_match(grader: Arc<dyn Grader>) -> (Arc<AppState>, String) {
        let state = Arc::new(AppState::with_grader(grader));
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();
        accept(&state, &v.code, "bob").await.unwrap();
        start_match(&state, &v.code, "alice").await.unwrap();
        (state, v.code)
    }

    #[tokio::test]
    async fn self_challenge_is_rejected() {
        let state = heuristic_state().await;
        let err = create_match(&state, "alice", "alice", "speed_build").await.unwrap_err();
        assert!(matches!(err, EngineError::SelfChallenge));
    }

    #[tokio::test]
    async fn only_the_invitee_can_accept_or_decline() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();

        assert!(matches!(
            accept(&state, &v.code, "alice").await.unwrap_err(),
            EngineError::Forbidden(_)
        ));
        assert!(matches!(
            decline(&state, &v.code, "mallory").await.unwrap_err(),
            EngineError::Forbidden(_)
        ));

        let accepted = accept(&state, &v.code, "bob").await.unwrap();
        assert_eq!(accepted.status, MatchStatus::Active);
    }

    #[tokio::test]
    async fn decline_cancels_and_further_actions_conflict() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();
        let declined = decline(&state, &v.code, "bob").await.unwrap();
        assert_eq!(declined.status, MatchStatus::Cancelled);

        assert!(matches!(
            accept(&state, &v.code, "bob").await.unwrap_err(),
            EngineError::AlreadyResolved(_)
        ));
        assert!(matches!(
            start_match(&state, &v.code, "alice").await.unwrap_err(),
            EngineError::AlreadyResolved(_)
        ));
    }

    #[tokio::test]
    async fn pending_match_never_self_activates() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();

        // No acceptance: starting and submitting are both illegal moves.
        assert!(matches!(
            start_match(&state, &v.code, "alice").await.unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
        assert!(matches!(
            submit(&state, &v.code, "alice", &items(&["web-lb"]), 50).await.unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
        let view = view(&state, &v.code, "alice").await.unwrap();
        assert_eq!(view.status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_start_attaches_exactly_one_brief() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();
        accept(&state, &v.code, "bob").await.unwrap();

        let (a, b) = tokio::join!(
            start_match(&state, &v.code, "alice"),
            start_match(&state, &v.code, "bob"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        let (ba, bb) = (a.brief.unwrap(), b.brief.unwrap());
        assert_eq!(ba.scenario_id, bb.scenario_id);
    }

    #[tokio::test]
    async fn full_scenario_completes_with_higher_score_winning() {
        // alice scores 80, bob scores 60.
        let (state, code) = active_match(ScriptedGrader::new(&[80.0, 60.0])).await;

        let a = submit(&state, &code, "alice", &items(&["web-lb", "ec2-web", "postgres", "redis-cache"]), 60)
            .await
            .unwrap();
        assert_eq!(a.status, MatchStatus::Active);
        assert!(a.outcome.is_none());

        let b = submit(&state, &code, "bob", &items(&["web-lb", "mysql", "memcached", "kafka"]), 10)
            .await
            .unwrap();
        assert_eq!(b.status, MatchStatus::Completed);
        let outcome = b.outcome.unwrap();
        assert_eq!(outcome.winner_id, Some("alice".into()));
        assert!(!outcome.is_draw);
        assert_eq!(outcome.sides.len(), 2);

        let view = view(&state, &code, "alice").await.unwrap();
        assert_eq!(view.winner_id, Some("alice".into()));
        assert!(view.your_result.is_some());
    }

    #[tokio::test]
    async fn equal_scores_produce_a_draw() {
        let (state, code) = active_match(ScriptedGrader::new(&[70.0, 70.0])).await;
        submit(&state, &code, "alice", &items(&["web-lb"]), 30).await.unwrap();
        let out = submit(&state, &code, "bob", &items(&["postgres"]), 30).await.unwrap();
        assert_eq!(out.status, MatchStatus::Completed);
        let outcome = out.outcome.unwrap();
        assert_eq!(outcome.winner_id, None);
        assert!(outcome.is_draw);
    }

    #[tokio::test]
    async fn duplicate_submission_is_idempotent_never_double_scored() {
        let (state, code) = active_match(ScriptedGrader::new(&[55.0])).await;
        let chosen = items(&["web-lb", "postgres"]);

        let first = submit(&state, &code, "alice", &chosen, 40).await.unwrap();
        // Same items again (e.g. client retry): same committed result, no
        // second grading call (the script only holds one score).
        let retry = submit(&state, &code, "alice", &chosen, 12).await.unwrap();
        assert_eq!(
            first.your_result.as_ref().unwrap().score,
            retry.your_result.as_ref().unwrap().score
        );

        // A different set after lock-in is a conflict.
        assert!(matches!(
            submit(&state, &code, "alice", &items(&["kafka"]), 5).await.unwrap_err(),
            EngineError::AlreadyResolved(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_items_in_one_submission_collapse() {
        let (state, code) = active_match(ScriptedGrader::new(&[50.0, 50.0])).await;
        submit(&state, &code, "alice", &items(&["web-lb", "web-lb", "postgres"]), 30)
            .await
            .unwrap();
        let v = view(&state, &code, "alice").await.unwrap();
        assert_eq!(v.your_submission.unwrap().item_ids, items(&["postgres", "web-lb"]));
    }

    #[tokio::test]
    async fn empty_manual_submission_is_rejected() {
        let (state, code) = active_match(Arc::new(HeuristicGrader::new(seed_catalog()))).await;
        assert!(matches!(
            submit(&state, &code, "alice", &[], 30).await.unwrap_err(),
            EngineError::EmptySubmission
        ));
    }

    #[tokio::test]
    async fn time_remaining_is_clamped_to_the_brief_limit() {
        let (state, code) = active_match(ScriptedGrader::new(&[50.0])).await;
        let limit = view(&state, &code, "alice").await.unwrap().brief.unwrap().time_limit_secs;

        submit(&state, &code, "alice", &items(&["web-lb"]), limit + 5000).await.unwrap();
        let v = view(&state, &code, "alice").await.unwrap();
        assert_eq!(v.your_submission.unwrap().time_remaining_secs, limit);
    }

    #[tokio::test(start_paused = true)]
    async fn grading_failure_degrades_to_zero_and_match_still_completes() {
        let (state, code) = active_match(Arc::new(FailingGrader)).await;

        let a = submit(&state, &code, "alice", &items(&["web-lb"]), 30).await.unwrap();
        let ra = a.your_result.unwrap();
        assert!(ra.grading_unavailable);
        assert_eq!(ra.score, 0.0);
        assert!(ra.feedback.contains(&EngineError::GradingUnavailable.to_string()));

        let b = submit(&state, &code, "bob", &items(&["postgres"]), 30).await.unwrap();
        assert_eq!(b.status, MatchStatus::Completed);
        assert_eq!(b.outcome.unwrap().winner_id, None); // 0-0 draw
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_auto_submits_last_selection_exactly_once() {
        let (state, code) = active_match(ScriptedGrader::new(&[42.0])).await;
        let limit = view(&state, &code, "alice").await.unwrap().brief.unwrap().time_limit_secs;

        // Alice was building; bob never touched the board.
        update_selection(&state, &code, "alice", &items(&["web-lb", "postgres"])).await.unwrap();

        // Run past limit + grace so both deadline tasks fire.
        sleep(Duration::from_secs(limit as u64 + 30)).await;

        let va = view(&state, &code, "alice").await.unwrap();
        assert_eq!(va.status, MatchStatus::Completed);
        let sa = va.your_submission.unwrap();
        assert!(sa.submitted);
        assert_eq!(sa.item_ids, items(&["postgres", "web-lb"]));
        assert_eq!(sa.time_remaining_secs, 0);

        // Bob's empty auto-submission is accepted and scored zero.
        let vb = view(&state, &code, "bob").await.unwrap();
        let rb = vb.your_result.unwrap();
        assert_eq!(rb.score, 0.0);
        assert!(!rb.grading_unavailable);

        // Exactly one scripted grading happened (alice's); a second call
        // would have errored into a degraded result instead of 42.
        assert_eq!(va.your_result.unwrap().score, 42.0);
        assert_eq!(va.outcome.unwrap().winner_id, Some("alice".into()));
    }

    #[tokio::test]
    async fn manual_submission_beats_the_deadline_task() {
        let (state, code) = active_match(ScriptedGrader::new(&[60.0, 50.0])).await;
        submit(&state, &code, "alice", &items(&["web-lb"]), 80).await.unwrap();
        submit(&state, &code, "bob", &items(&["postgres"]), 70).await.unwrap();

        // Deadline tasks will eventually fire and must be no-ops.
        let va = view(&state, &code, "alice").await.unwrap();
        assert_eq!(va.status, MatchStatus::Completed);
        assert_eq!(va.your_submission.unwrap().time_remaining_secs, 80);
    }

    #[tokio::test]
    async fn views_never_reveal_the_opponents_items() {
        let (state, code) = active_match(ScriptedGrader::new(&[50.0])).await;
        update_selection(&state, &code, "alice", &items(&["web-lb", "postgres"])).await.unwrap();

        // Draft invisible to bob.
        let vb = view(&state, &code, "bob").await.unwrap();
        assert!(!vb.opponent_submitted);
        assert!(vb.your_submission.is_none());

        submit(&state, &code, "alice", &items(&["web-lb", "postgres"]), 20).await.unwrap();

        // After lock-in: bob sees the flag, still not the items.
        let vb = view(&state, &code, "bob").await.unwrap();
        assert!(vb.opponent_submitted);
        assert!(vb.your_submission.is_none());
        assert!(vb.outcome.is_none());
    }

    #[tokio::test]
    async fn views_are_scoped_to_participants() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();
        assert!(matches!(
            view(&state, &v.code, "mallory").await.unwrap_err(),
            EngineError::Forbidden(_)
        ));
        assert!(matches!(
            view(&state, "ZZZZZZ", "alice").await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn rematch_spawns_fresh_pending_matches() {
        let (state, code) = active_match(ScriptedGrader::new(&[80.0, 60.0])).await;
        submit(&state, &code, "alice", &items(&["web-lb"]), 30).await.unwrap();
        submit(&state, &code, "bob", &items(&["postgres"]), 30).await.unwrap();

        let r1 = create_rematch(&state, &code, "bob").await.unwrap();
        assert_ne!(r1.code, code);
        assert_eq!(r1.status, MatchStatus::Pending);
        assert_eq!(r1.initiator_id, "bob");
        assert_eq!(r1.opponent_id, "alice");
        assert!(r1.brief.is_none());

        // Safe to invoke again: another independent match.
        let r2 = create_rematch(&state, &code, "alice").await.unwrap();
        assert_ne!(r2.code, r1.code);

        // Source match untouched.
        let source = view(&state, &code, "alice").await.unwrap();
        assert_eq!(source.status, MatchStatus::Completed);
        assert_eq!(source.winner_id, Some("alice".into()));
    }

    #[tokio::test]
    async fn rematch_requires_completion() {
        let state = heuristic_state().await;
        let v = create_match(&state, "alice", "bob", "speed_build").await.unwrap();
        assert!(matches!(
            create_rematch(&state, &v.code, "alice").await.unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
    }

    #[tokio::test]
    async fn selection_updates_lock_out_after_submission() {
        let (state, code) = active_match(ScriptedGrader::new(&[50.0])).await;
        submit(&state, &code, "alice", &items(&["web-lb"]), 20).await.unwrap();
        assert!(matches!(
            update_selection(&state, &code, "alice", &items(&["kafka"])).await.unwrap_err(),
            EngineError::AlreadyResolved(_)
        ));
    }
}
