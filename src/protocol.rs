//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{
    Brief, BriefSource, GradingResult, Match, MatchStatus, PriorityTier, Submission,
};
use crate::outcome::{aggregate, MatchOutcome};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Attach this socket to a match's push channel.
    Subscribe {
        #[serde(rename = "matchCode")]
        match_code: String,
        #[serde(rename = "participantId")]
        participant_id: String,
    },
    /// Sync the in-progress draft selection so deadline auto-submission can
    /// use the last-known set. Never shown to the opponent.
    SelectionUpdate {
        #[serde(rename = "matchCode")]
        match_code: String,
        #[serde(rename = "participantId")]
        participant_id: String,
        #[serde(rename = "itemIds")]
        item_ids: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchEventKind {
    Accepted,
    Declined,
    Submitted,
    Completed,
}

/// Messages the server sends back over WebSocket.
/// Push events carry no ordering or delivery guarantee; the HTTP view is the
/// reconciliation path.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Subscribed {
        #[serde(rename = "matchCode")]
        match_code: String,
    },
    MatchEvent {
        #[serde(rename = "matchCode")]
        match_code: String,
        event: MatchEventKind,
        #[serde(rename = "actorId")]
        actor_id: String,
    },
    /// Informational only; never gates a gameplay transition.
    Presence {
        #[serde(rename = "matchCode")]
        match_code: String,
        #[serde(rename = "participantId")]
        participant_id: String,
        online: bool,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateMatchIn {
    #[serde(rename = "initiatorId")]
    pub initiator_id: String,
    #[serde(rename = "opponentId")]
    pub opponent_id: String,
    #[serde(rename = "matchType", default)]
    pub match_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantIn {
    #[serde(rename = "participantId")]
    pub participant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ViewQuery {
    #[serde(rename = "participantId")]
    pub participant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectionIn {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    #[serde(rename = "itemIds")]
    pub item_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    #[serde(rename = "itemIds")]
    pub item_ids: Vec<String>,
    /// Client-reported seconds left; clamped server-side.
    #[serde(rename = "timeRemaining")]
    pub time_remaining_secs: u32,
}

#[derive(Debug, Serialize)]
pub struct SubmitOut {
    pub status: MatchStatus,
    /// None while a retried submission is still being scored.
    #[serde(rename = "yourResult")]
    pub your_result: Option<GradingResult>,
    /// Present once both sides are in.
    pub outcome: Option<MatchOutcome>,
}

#[derive(Debug, Serialize)]
pub struct RematchOut {
    #[serde(rename = "matchCode")]
    pub match_code: String,
}

//
// Read projection
//

#[derive(Debug, Serialize)]
pub struct RequirementView {
    pub id: String,
    pub category: String,
    pub description: String,
    pub tier: PriorityTier,
}

/// The brief as shown to a playing participant: no reference solution, no
/// trap markers, no requirement-to-item mapping. Graded results echo the
/// reference back once it no longer gives anything away.
#[derive(Debug, Serialize)]
pub struct BriefView {
    #[serde(rename = "scenarioId")]
    pub scenario_id: String,
    pub source: BriefSource,
    pub title: String,
    pub scenario: String,
    pub requirements: Vec<RequirementView>,
    pub palette: Vec<String>,
    #[serde(rename = "timeLimitSecs")]
    pub time_limit_secs: u32,
    #[serde(rename = "maxScore")]
    pub max_score: f32,
}

/// Read projection of a match for one requesting participant.
/// Reveals the opponent's `submitted` flag but never their item set or draft.
#[derive(Debug, Serialize)]
pub struct MatchView {
    pub code: String,
    #[serde(rename = "matchType")]
    pub match_type: String,
    pub status: MatchStatus,
    #[serde(rename = "initiatorId")]
    pub initiator_id: String,
    #[serde(rename = "opponentId")]
    pub opponent_id: String,
    pub brief: Option<BriefView>,
    #[serde(rename = "yourSubmission")]
    pub your_submission: Option<Submission>,
    #[serde(rename = "youSubmitted")]
    pub you_submitted: bool,
    #[serde(rename = "opponentSubmitted")]
    pub opponent_submitted: bool,
    #[serde(rename = "yourResult")]
    pub your_result: Option<GradingResult>,
    pub outcome: Option<MatchOutcome>,
    #[serde(rename = "winnerId")]
    pub winner_id: Option<String>,
    #[serde(rename = "createdAtSecs")]
    pub created_at_secs: u64,
    #[serde(rename = "acceptedAtSecs")]
    pub accepted_at_secs: Option<u64>,
}

fn brief_view(b: &Brief) -> BriefView {
    BriefView {
        scenario_id: b.scenario_id.clone(),
        source: b.source,
        title: b.title.clone(),
        scenario: b.scenario.clone(),
        requirements: b
            .requirements
            .iter()
            .map(|r| RequirementView {
                id: r.id.clone(),
                category: r.category.clone(),
                description: r.description.clone(),
                tier: r.tier,
            })
            .collect(),
        palette: b.palette.clone(),
        time_limit_secs: b.time_limit_secs,
        max_score: b.max_score,
    }
}

/// Convert the authoritative `Match` into the projection for `requester`.
/// The caller has already verified that `requester` belongs to the match.
pub fn to_view(m: &Match, requester: &str) -> MatchView {
    let opponent = m.other_participant(requester).unwrap_or_default().to_string();
    // Own result may land before the opponent's; showing it early is fine,
    // it only describes the requester's own build.
    let your_result = m.results.get(requester).cloned();

    MatchView {
        code: m.code.clone(),
        match_type: m.match_type.clone(),
        status: m.status,
        initiator_id: m.initiator_id.clone(),
        opponent_id: m.opponent_id.clone(),
        brief: m.brief.as_ref().map(brief_view),
        your_submission: m.submissions.get(requester).cloned(),
        you_submitted: m.has_submitted(requester),
        opponent_submitted: m.has_submitted(&opponent),
        your_result,
        outcome: if m.status == MatchStatus::Completed { aggregate(m) } else { None },
        winner_id: m.winner_id.clone(),
        created_at_secs: m.created_at_secs,
        accepted_at_secs: m.accepted_at_secs,
    }
}
