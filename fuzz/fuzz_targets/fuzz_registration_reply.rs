//! Fuzz target: `RegistrationReply::parse`
//!
//! The gateway reply is the only unauthenticated input the device parses
//! before it has an identity. Arbitrary lines must yield a typed error,
//! never a panic.
//!
//! cargo fuzz run fuzz_registration_reply

#![no_main]

use libfuzzer_sys::fuzz_target;
use meo_node::app::registration::RegistrationReply;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    if let Ok(reply) = RegistrationReply::parse(&line) {
        // Both fields are required; a successful parse always carries them.
        let _ = (reply.device_id.len(), reply.transmit_key.len());
    }
});
