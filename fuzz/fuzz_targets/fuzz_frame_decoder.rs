//! Fuzz target: inbound frame decoding
//!
//! Replays arbitrary bytes as the module's side of the SPI exchange and
//! runs the full read path (control steps, START_TOKEN wait, descriptor,
//! header) over them.  The codec must never panic and never report a
//! payload that does not fit the buffer it was given.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use runlink::config::{LINK_MAX_PAYLOAD, LinkConfig};
use runlink::link::ByteChannel;
use runlink::link::codec::{Codec, FrameDescriptor, FrameHeader, HEADER_LEN};

/// Answers each clocked byte with the next fuzz byte, then zeros.
struct Replay<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl ByteChannel for Replay<'_> {
    type Error = core::convert::Infallible;

    fn write_byte(&mut self, _value: u8) -> Result<u8, Self::Error> {
        let b = self.bytes.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        Ok(b)
    }

    fn has_input(&mut self) -> bool {
        self.pos < self.bytes.len()
    }

    fn backoff_us(&mut self, _us: u32) {}
}

fuzz_target!(|data: &[u8]| {
    // Stand-alone decoders: an accepted header survives re-encoding.
    if let Ok(header) = FrameHeader::decode(data) {
        assert_eq!(FrameHeader::decode(&header.encode()), Ok(header));
    }
    if let Some(raw) = data.get(..4) {
        let raw = [raw[0], raw[1], raw[2], raw[3]];
        if let Ok(desc) = FrameDescriptor::decode(raw) {
            assert!(usize::from(desc.wire_len) >= HEADER_LEN);
        }
    }

    // Full read path.
    let cfg = LinkConfig {
        busy_retry_limit: 4,
        start_token_retries: 8,
        ..LinkConfig::default()
    };
    let codec = Codec::new(&cfg);
    let mut ch = Replay { bytes: data, pos: 0 };
    let mut buf = [0u8; HEADER_LEN + LINK_MAX_PAYLOAD];
    if let Ok((header, len)) = codec.read_frame(&mut ch, &mut buf) {
        assert_eq!(usize::from(header.length), len);
        assert!(HEADER_LEN + len <= buf.len(), "payload exceeds the receive buffer");
    }
});
