#![no_main]

use libfuzzer_sys::fuzz_target;
use pollcast::polls::Document;

/// Parses arbitrary bytes as a persisted document, the way the file store
/// does on load. Anything that parses and validates must serialize back to
/// an equal document.
fuzz_target!(|data: &[u8]| {
    let Ok(document) = serde_json::from_slice::<Document>(data) else {
        return;
    };
    if document.validate().is_err() {
        return;
    }
    let text = serde_json::to_string(&document).expect("document serializes");
    let reparsed: Document = serde_json::from_str(&text).expect("serialized document parses");
    assert_eq!(reparsed, document);
});
