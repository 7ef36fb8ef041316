//! Fuzz target for the attachment URL fixup.
//!
//! Arbitrary documents: the fixup never panics, only ever adds
//! `attachmentUrl`, and leaves documents without attachments alone.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_monitor::document::{Document, DocumentFixup, ATTACHMENT_URL_FIELD};

fuzz_target!(|data: (&str, &[u8])| {
    let (base, doc) = data;
    let Some(doc) = serde_json::from_slice(doc).ok().and_then(Document::from_value) else {
        return;
    };

    let fixed = DocumentFixup::new(base).apply(doc.clone());

    if doc.first_attachment().is_none() || doc.id().is_none() {
        assert_eq!(fixed, doc);
    } else {
        assert!(fixed.attachment_url().is_some());
    }
    for (field, value) in doc.fields() {
        if field != ATTACHMENT_URL_FIELD {
            assert_eq!(fixed.get(field), Some(value));
        }
    }
});
