//! Reviewer selection rules.
//!
//! Pure functions over member lists the store already fetched. Randomness is
//! injected so callers (and tests) control ordering.

use crate::error::AppError;
use crate::models::{TeamMember, MAX_REVIEWERS};
use rand::seq::SliceRandom;
use rand::Rng;

/// Pick up to [`MAX_REVIEWERS`] distinct active members other than the author.
///
/// Returns an empty list when nobody qualifies; a single eligible member is
/// assigned alone.
pub fn select_initial_reviewers<R: Rng + ?Sized>(
    members: &[TeamMember],
    author_id: &str,
    rng: &mut R,
) -> Vec<String> {
    let mut candidates: Vec<&str> = Vec::with_capacity(members.len());
    for member in members {
        let id = member.user_id.as_str();
        if member.is_active && id != author_id && !candidates.contains(&id) {
            candidates.push(id);
        }
    }

    candidates
        .choose_multiple(rng, MAX_REVIEWERS)
        .map(|id| id.to_string())
        .collect()
}

/// First candidate, in the given order, that is active, not the author, not
/// the reviewer being removed and not already assigned.
pub fn select_replacement(
    candidates: &[TeamMember],
    current_assignees: &[String],
    old_user_id: &str,
    author_id: &str,
    pull_request_id: &str,
) -> Result<String, AppError> {
    candidates
        .iter()
        .find(|c| {
            c.is_active
                && c.user_id != author_id
                && c.user_id != old_user_id
                && !current_assignees.iter().any(|a| a == &c.user_id)
        })
        .map(|c| c.user_id.clone())
        .ok_or_else(|| AppError::NoCandidate {
            pull_request_id: pull_request_id.to_string(),
        })
}

/// Shuffle candidates so replacements spread across the team.
pub fn shuffle_candidates<R: Rng + ?Sized>(candidates: &mut [TeamMember], rng: &mut R) {
    candidates.shuffle(rng);
}
