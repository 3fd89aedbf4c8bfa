//! Fuzz target: inbound invoke routing
//!
//! Splits the input into a topic and a body, then runs both through the
//! session's topic parser and parameter decoder. Neither may panic, and a
//! parsed feature name must stay within its bounds.
//!
//! cargo fuzz run fuzz_invoke_message

#![no_main]

use libfuzzer_sys::fuzz_target;
use meo_node::app::session::{MAX_FEATURE_NAME_LEN, decode_params, parse_invoke_topic};

fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let (topic, body) = data.split_at(split);

    if let Ok(topic) = core::str::from_utf8(topic) {
        if let Some(name) = parse_invoke_topic(topic) {
            assert!(!name.is_empty(), "empty feature name accepted");
            assert!(name.len() <= MAX_FEATURE_NAME_LEN, "feature name too long");
        }
    }

    let _ = decode_params(body);
});
