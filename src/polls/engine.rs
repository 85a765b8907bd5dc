//! Vote Engine
//!
//! Pure state transitions: one [`Action`] applied to a [`Document`]. Tallies
//! are maintained incrementally, so every branch adjusts exactly the tallies
//! its transition touches.

use super::action::Action;
use super::document::{Document, Subject, MAX_VOTES_PER_USER};
use std::collections::BTreeMap;
use thiserror::Error;

/// What an accepted action changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    SubjectCreated,
    OptionCreated,
    /// The option was appended to the user's sequence.
    VoteAdded,
    /// The option was already selected and has been toggled off.
    VoteRemoved,
    /// The user already held the maximum; the oldest selection was evicted.
    VoteReplaced { evicted: String },
}

/// Why an action left the document untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("subject '{0}' does not exist")]
    UnknownSubject(String),

    #[error("option '{option}' does not exist in subject '{subject}'")]
    UnknownOption { subject: String, option: String },

    #[error("subject '{0}' already exists")]
    SubjectExists(String),

    #[error("option '{option}' already exists in subject '{subject}'")]
    OptionExists { subject: String, option: String },
}

impl Rejection {
    /// Stable code used in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnknownSubject(_) => "unknown_subject",
            Rejection::UnknownOption { .. } => "unknown_option",
            Rejection::SubjectExists(_) => "subject_exists",
            Rejection::OptionExists { .. } => "option_exists",
        }
    }
}

/// Apply an action, returning the resulting document and whether it changed.
///
/// A rejected action returns the input document unmodified.
pub fn apply(mut document: Document, action: &Action) -> (Document, bool) {
    let changed = evaluate(&mut document, action).is_ok();
    (document, changed)
}

/// Apply an action in place, reporting what changed or why nothing did.
///
/// On `Err` the document is guaranteed untouched.
pub fn evaluate(document: &mut Document, action: &Action) -> Result<Change, Rejection> {
    match action {
        Action::Vote {
            subject,
            option,
            username,
        } => cast_vote(document, subject, option, username),
        Action::NewOption { subject, option } => add_option(document, subject, option),
        Action::NewSubject { subject } => add_subject(document, subject),
    }
}

fn cast_vote(
    document: &mut Document,
    subject: &str,
    option: &str,
    username: &str,
) -> Result<Change, Rejection> {
    let entry = document
        .subjects
        .get_mut(subject)
        .ok_or_else(|| Rejection::UnknownSubject(subject.to_string()))?;
    if !entry.options.contains_key(option) {
        return Err(Rejection::UnknownOption {
            subject: subject.to_string(),
            option: option.to_string(),
        });
    }

    // An emptied sequence stays in place as `[]`.
    let selected = entry.votes.entry(username.to_string()).or_default();
    let tallies = &mut entry.options;

    let change = if let Some(position) = selected.iter().position(|o| o == option) {
        selected.remove(position);
        decrement(tallies, option);
        Change::VoteRemoved
    } else if selected.len() < MAX_VOTES_PER_USER {
        selected.push(option.to_string());
        increment(tallies, option);
        Change::VoteAdded
    } else {
        // FIFO: always index 0, never the least recently re-voted
        let evicted = selected.remove(0);
        decrement(tallies, &evicted);
        selected.push(option.to_string());
        increment(tallies, option);
        Change::VoteReplaced { evicted }
    };
    Ok(change)
}

fn add_option(document: &mut Document, subject: &str, option: &str) -> Result<Change, Rejection> {
    let entry = document
        .subjects
        .get_mut(subject)
        .ok_or_else(|| Rejection::UnknownSubject(subject.to_string()))?;
    if entry.options.contains_key(option) {
        return Err(Rejection::OptionExists {
            subject: subject.to_string(),
            option: option.to_string(),
        });
    }
    entry.options.insert(option.to_string(), 0);
    Ok(Change::OptionCreated)
}

fn add_subject(document: &mut Document, subject: &str) -> Result<Change, Rejection> {
    if document.subjects.contains_key(subject) {
        return Err(Rejection::SubjectExists(subject.to_string()));
    }
    document
        .subjects
        .insert(subject.to_string(), Subject::new());
    Ok(Change::SubjectCreated)
}

fn increment(tallies: &mut BTreeMap<String, u64>, option: &str) {
    if let Some(tally) = tallies.get_mut(option) {
        *tally += 1;
    }
}

fn decrement(tallies: &mut BTreeMap<String, u64>, option: &str) {
    if let Some(tally) = tallies.get_mut(option) {
        *tally = tally.saturating_sub(1);
    }
}
