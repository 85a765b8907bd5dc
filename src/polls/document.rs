//! Poll document model
//!
//! The entire poll state is a single [`Document`]: named subjects, each with
//! option tallies and every user's ordered vote sequence. The JSON shape of
//! these types is both the wire format and the persisted format.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Maximum number of options one user may hold within a single subject.
pub const MAX_VOTES_PER_USER: usize = 2;

/// The full poll state, persisted and broadcast as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub subjects: BTreeMap<String, Subject>,
}

/// A named poll topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Option name to live tally.
    #[serde(default)]
    pub options: BTreeMap<String, u64>,
    /// Username to selected options, oldest first.
    #[serde(default)]
    pub votes: BTreeMap<String, Vec<String>>,
}

/// A broken document invariant, reported by [`Document::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("subject '{subject}': option '{option}' has tally {tally} but {counted} votes")]
    TallyMismatch {
        subject: String,
        option: String,
        tally: u64,
        counted: u64,
    },

    #[error("subject '{subject}': user '{username}' holds {count} votes")]
    TooManyVotes {
        subject: String,
        username: String,
        count: usize,
    },

    #[error("subject '{subject}': user '{username}' voted for '{option}' twice")]
    DuplicateVote {
        subject: String,
        username: String,
        option: String,
    },

    #[error("subject '{subject}': user '{username}' voted for unknown option '{option}'")]
    UnknownOption {
        subject: String,
        username: String,
        option: String,
    },
}

impl Document {
    /// Create an empty document (`{"subjects": {}}`).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self, name: &str) -> Option<&Subject> {
        self.subjects.get(name)
    }

    /// Check every structural invariant, returning the first violation found.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for (name, subject) in &self.subjects {
            subject.validate(name)?;
        }
        Ok(())
    }
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tally for an option, `None` if the option does not exist.
    pub fn tally(&self, option: &str) -> Option<u64> {
        self.options.get(option).copied()
    }

    /// The options a user currently has selected, oldest first.
    pub fn votes_of(&self, username: &str) -> &[String] {
        self.votes.get(username).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of users whose vote sequence contains `option`.
    pub fn count_votes(&self, option: &str) -> u64 {
        self.votes
            .values()
            .filter(|selected| selected.iter().any(|o| o == option))
            .count() as u64
    }

    fn validate(&self, name: &str) -> Result<(), InvariantViolation> {
        for (username, selected) in &self.votes {
            if selected.len() > MAX_VOTES_PER_USER {
                return Err(InvariantViolation::TooManyVotes {
                    subject: name.to_string(),
                    username: username.clone(),
                    count: selected.len(),
                });
            }
            let mut seen = BTreeSet::new();
            for option in selected {
                if !seen.insert(option.as_str()) {
                    return Err(InvariantViolation::DuplicateVote {
                        subject: name.to_string(),
                        username: username.clone(),
                        option: option.clone(),
                    });
                }
                if !self.options.contains_key(option) {
                    return Err(InvariantViolation::UnknownOption {
                        subject: name.to_string(),
                        username: username.clone(),
                        option: option.clone(),
                    });
                }
            }
        }

        for (option, &tally) in &self.options {
            let counted = self.count_votes(option);
            if tally != counted {
                return Err(InvariantViolation::TallyMismatch {
                    subject: name.to_string(),
                    option: option.clone(),
                    tally,
                    counted,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn colors_document() -> Document {
        serde_json::from_value(json!({
            "subjects": {
                "colors": {
                    "options": {"red": 1, "blue": 2, "green": 0},
                    "votes": {"alice": ["red", "blue"], "bob": ["blue"]}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_empty_document_shape() {
        let doc = Document::new();
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"subjects": {}}));
    }

    #[test]
    fn test_document_round_trips_wire_shape() {
        let doc = colors_document();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["subjects"]["colors"]["options"]["blue"], 2);
        assert_eq!(value["subjects"]["colors"]["votes"]["alice"], json!(["red", "blue"]));
    }

    #[test]
    fn test_missing_subjects_field_is_rejected() {
        let result = serde_json::from_str::<Document>(r#"{"polls": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_tally_is_rejected() {
        let raw = r#"{"subjects": {"s": {"options": {"a": -1}, "votes": {}}}}"#;
        assert!(serde_json::from_str::<Document>(raw).is_err());
    }

    #[test]
    fn test_subject_fields_default_when_absent() {
        let doc: Document = serde_json::from_str(r#"{"subjects": {"s": {}}}"#).unwrap();
        let subject = doc.subject("s").unwrap();
        assert!(subject.options.is_empty());
        assert!(subject.votes.is_empty());
    }

    #[test]
    fn test_votes_of_unknown_user_is_empty() {
        let doc = colors_document();
        let subject = doc.subject("colors").unwrap();
        assert!(subject.votes_of("carol").is_empty());
        assert_eq!(subject.votes_of("alice"), ["red", "blue"]);
    }

    #[test]
    fn test_validate_accepts_consistent_document() {
        assert_eq!(colors_document().validate(), Ok(()));
        assert_eq!(Document::new().validate(), Ok(()));
    }

    #[test]
    fn test_validate_detects_tally_mismatch() {
        let mut doc = colors_document();
        doc.subjects.get_mut("colors").unwrap().options.insert("red".into(), 5);
        assert!(matches!(
            doc.validate(),
            Err(InvariantViolation::TallyMismatch { tally: 5, counted: 1, .. })
        ));
    }

    #[test]
    fn test_validate_detects_too_many_votes() {
        let mut doc = colors_document();
        let subject = doc.subjects.get_mut("colors").unwrap();
        subject.votes.insert(
            "alice".into(),
            vec!["red".into(), "blue".into(), "green".into()],
        );
        assert!(matches!(
            doc.validate(),
            Err(InvariantViolation::TooManyVotes { count: 3, .. })
        ));
    }

    #[test]
    fn test_validate_detects_duplicate_vote() {
        let mut doc = colors_document();
        let subject = doc.subjects.get_mut("colors").unwrap();
        subject.votes.insert("bob".into(), vec!["blue".into(), "blue".into()]);
        assert!(matches!(
            doc.validate(),
            Err(InvariantViolation::DuplicateVote { .. })
        ));
    }

    #[test]
    fn test_validate_detects_vote_for_unknown_option() {
        let mut doc = colors_document();
        let subject = doc.subjects.get_mut("colors").unwrap();
        subject.votes.insert("bob".into(), vec!["purple".into()]);
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("purple"));
    }
}
