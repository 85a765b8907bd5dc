//! Property tests for the Vote Engine invariants over random action
//! sequences.

use pollcast::polls::{apply, Action, Document, MAX_VOTES_PER_USER};
use proptest::prelude::*;

fn subject_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["s1", "s2", "missing"]).prop_map(str::to_string)
}

fn option_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string)
}

fn username() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alice", "bob", "carol"]).prop_map(str::to_string)
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (subject_name(), option_name(), username())
            .prop_map(|(s, o, u)| Action::vote(s, o, u)),
        2 => (subject_name(), option_name()).prop_map(|(s, o)| Action::new_option(s, o)),
        1 => subject_name().prop_map(|s| Action::new_subject(s)),
    ]
}

/// Apply a sequence from empty, skipping nothing.
fn run(actions: &[Action]) -> Document {
    actions
        .iter()
        .fold(Document::new(), |doc, action| apply(doc, action).0)
}

proptest! {
    #[test]
    fn prop_invariants_hold_after_every_action(actions in prop::collection::vec(action(), 0..80)) {
        let mut doc = Document::new();
        for action in &actions {
            let before = doc.clone();
            let (after, changed) = apply(doc, action);
            if !changed {
                prop_assert_eq!(&after, &before);
            }
            prop_assert_eq!(after.validate(), Ok(()));
            for subject in after.subjects.values() {
                for selected in subject.votes.values() {
                    prop_assert!(selected.len() <= MAX_VOTES_PER_USER);
                }
            }
            doc = after;
        }
    }

    #[test]
    fn prop_vote_twice_restores_tallies(
        prefix in prop::collection::vec(action(), 0..60),
        subject in subject_name(),
        option in option_name(),
        user in username(),
    ) {
        let doc = run(&prefix);
        let selected_before = doc
            .subject(&subject)
            .map(|s| s.votes_of(&user).to_vec())
            .unwrap_or_default();
        prop_assume!(selected_before.len() < MAX_VOTES_PER_USER);
        prop_assume!(!selected_before.contains(&option));

        let vote = Action::vote(subject.clone(), option.clone(), user.clone());
        let (once, _) = apply(doc.clone(), &vote);
        let (twice, _) = apply(once, &vote);

        match (doc.subject(&subject), twice.subject(&subject)) {
            (Some(before), Some(after)) => {
                prop_assert_eq!(&before.options, &after.options);
                prop_assert_eq!(before.votes_of(&user), after.votes_of(&user));
            }
            (None, None) => {}
            _ => prop_assert!(false, "subject presence changed"),
        }
        prop_assert_eq!(twice.validate(), Ok(()));
    }

    #[test]
    fn prop_tally_sum_equals_total_selections(actions in prop::collection::vec(action(), 0..80)) {
        let doc = run(&actions);
        for subject in doc.subjects.values() {
            let tallies: u64 = subject.options.values().sum();
            let selections: usize = subject.votes.values().map(Vec::len).sum();
            prop_assert_eq!(tallies, selections as u64);
        }
    }
}

#[test]
fn test_three_votes_evict_first() {
    let doc = run(&[
        Action::new_subject("s"),
        Action::new_option("s", "A"),
        Action::new_option("s", "B"),
        Action::new_option("s", "C"),
        Action::vote("s", "A", "u"),
        Action::vote("s", "B", "u"),
        Action::vote("s", "C", "u"),
    ]);
    let subject = doc.subject("s").unwrap();
    assert_eq!(subject.votes_of("u"), ["B", "C"]);
    assert_eq!(subject.tally("A"), Some(0));
    assert_eq!(subject.tally("B"), Some(1));
    assert_eq!(subject.tally("C"), Some(1));
}
