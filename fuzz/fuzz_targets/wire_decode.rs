//! Fuzz the wire decoders with arbitrary bytes.
//!
//! Goals:
//! - Decoding never panics and never allocates past the size limit.
//! - Any input that decodes re-encodes to exactly the same bytes.

#![no_main]

use {
    libfuzzer_sys::fuzz_target,
    tessera_consensus_bft::{wire, Action, ConsensusEvent},
};

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    if let Ok(action) = Action::decode(data, MAX_MESSAGE_SIZE) {
        let encoded = action.encode().expect("decoded action must encode");
        assert_eq!(encoded, data, "action decoding is not canonical");
    }

    if let Ok(event) = wire::decode::<ConsensusEvent>(data, MAX_MESSAGE_SIZE) {
        let encoded = wire::encode(&event).expect("decoded event must encode");
        assert_eq!(encoded, data, "event decoding is not canonical");
    }

    if let Ok(action) = wire::decode_framed::<Action>(data, MAX_MESSAGE_SIZE) {
        let framed =
            wire::encode_framed(&action, MAX_MESSAGE_SIZE).expect("decoded frame must encode");
        assert_eq!(framed, data, "framed decoding is not canonical");
    }
});
