//! Scoring aggregator: the winner rule and the symmetric side-by-side outcome.
//!
//! No reweighting happens here. The final number per participant is exactly
//! the grading result's score; this layer only compares the two and packages
//! both results for display.

use serde::{Deserialize, Serialize};

use crate::domain::{GradingResult, Match};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub participant_id: String,
    pub result: GradingResult,
}

/// Match-level outcome once both submissions are graded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// None on a draw.
    pub winner_id: Option<String>,
    pub is_draw: bool,
    /// Initiator first, invitee second.
    pub sides: Vec<ParticipantResult>,
}

/// Strictly higher score wins; equal scores produce no winner.
pub fn decide_winner(a_id: &str, a_score: f32, b_id: &str, b_score: f32) -> Option<String> {
    if a_score > b_score {
        Some(a_id.to_string())
    } else if b_score > a_score {
        Some(b_id.to_string())
    } else {
        None
    }
}

/// Build the outcome from a completed match's stored results.
/// Returns None until both grading results exist.
pub fn aggregate(m: &Match) -> Option<MatchOutcome> {
    let a = m.results.get(&m.initiator_id)?;
    let b = m.results.get(&m.opponent_id)?;
    Some(MatchOutcome {
        winner_id: m.winner_id.clone(),
        is_draw: m.winner_id.is_none(),
        sides: vec![
            ParticipantResult { participant_id: m.initiator_id.clone(), result: a.clone() },
            ParticipantResult { participant_id: m.opponent_id.clone(), result: b.clone() },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_higher_score_wins() {
        assert_eq!(decide_winner("alice", 80.0, "bob", 70.0), Some("alice".into()));
        assert_eq!(decide_winner("alice", 70.0, "bob", 70.5), Some("bob".into()));
    }

    #[test]
    fn equal_scores_are_a_draw() {
        assert_eq!(decide_winner("alice", 70.0, "bob", 70.0), None);
        assert_eq!(decide_winner("alice", 0.0, "bob", 0.0), None);
    }
}
