//! Property-based test generators using proptest.

use proptest::prelude::*;
use qbsync_protocol::Phase;

/// Strategy for dotted version strings with one to four components.
pub fn version_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(0u32..100, 1..=4).prop_map(|parts| {
        parts
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    })
}

/// Strategy for pipeline phases.
pub fn phase_strategy() -> impl Strategy<Value = Phase> {
    prop::sample::select(Phase::ALL.to_vec())
}

/// Strategy for element text, markup characters and edge spaces included.
pub fn xml_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{1,64}").expect("Invalid regex")
}

/// Strategy for ticket-like strings, mostly never issued.
pub fn ticket_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("Invalid regex")
}

/// Strategy for non-zero HRESULT codes as the Web Connector reports them.
pub fn hresult_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("0x8004[0-9A-F]{4}").expect("Invalid regex")
}
