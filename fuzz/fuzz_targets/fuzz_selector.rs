//! Fuzz target for selector matching.
//!
//! Arbitrary JSON on both sides: matching must never panic, and a document
//! always matches the empty selector.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_monitor::document::Document;
use replica_monitor::store::{matches_selector, Selector};

fuzz_target!(|data: (&[u8], &[u8])| {
    let (selector, doc) = data;

    let Ok(selector) = serde_json::from_slice::<Selector>(selector) else {
        return;
    };
    let Some(doc) = serde_json::from_slice(doc).ok().and_then(Document::from_value) else {
        return;
    };

    // Should never panic
    let _ = matches_selector(&selector, &doc);

    assert!(matches_selector(&Selector::new(), &doc));
});
