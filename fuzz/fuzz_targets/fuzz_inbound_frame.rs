#![no_main]

use libfuzzer_sys::fuzz_target;
use pollcast::polls::{apply, Action, Document};

/// Feeds arbitrary channel frames through the decoder and the Vote Engine,
/// starting from a document with one subject and two options so that vote
/// paths are reachable.
///
/// Input is split on newlines; each line is one frame. After every frame the
/// document must still satisfy its invariants, and a no-op must leave it
/// unchanged.
fn replay_frames(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut document = Document::new();
    for seed in [
        Action::new_subject("s"),
        Action::new_option("s", "a"),
        Action::new_option("s", "b"),
    ] {
        document = apply(document, &seed).0;
    }

    for frame in text.lines() {
        let action = match Action::decode(frame) {
            Ok(Some(action)) => action,
            Ok(None) | Err(_) => continue,
        };
        let before = document.clone();
        let (after, changed) = apply(document, &action);
        if !changed {
            assert_eq!(after, before, "no-op modified the document");
        }
        if let Err(violation) = after.validate() {
            panic!("invariant broken after {:?}: {}", action, violation);
        }
        document = after;
    }
}

fuzz_target!(|data: &[u8]| {
    replay_frames(data);
});
