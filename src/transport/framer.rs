//! Varint length-delimited framer for the device link.
//!
//! Frames on the serial/TCP link are emitted as:
//!
//!   `<varint length><payload bytes>`
//!
//! The framer is incremental: feed it arbitrary chunks, pull whole frames
//! when available. It caps frame size; a malformed length prefix means sync
//! is lost, so everything buffered is dropped and parsing resumes with the
//! next read off the link.
use bytes::BytesMut;

/// Upper bound on a single frame. Device packets are small; anything larger
/// means we lost sync.
const MAX_FRAME_SIZE: usize = 16 * 1024;

pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(2048),
        }
    }

    /// Feed raw bytes read from the link.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame, if one is buffered. An oversize or
    /// overlong length prefix means sync is lost: the buffer is discarded
    /// and framing restarts on the next push.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }

        let mut len: usize = 0;
        let mut shift = 0u32;
        let mut varint_len = 0usize;
        let mut terminated = false;
        for b in self.buf.iter() {
            varint_len += 1;
            len |= ((b & 0x7F) as usize) << shift;
            if b & 0x80 == 0 {
                terminated = true;
                break;
            }
            shift += 7;
            if shift > 21 {
                // Far beyond any sane length prefix.
                self.buf.clear();
                return None;
            }
        }
        if !terminated {
            return None; // varint still incomplete
        }
        if len > MAX_FRAME_SIZE {
            self.buf.clear();
            return None;
        }
        if self.buf.len() < varint_len + len {
            return None; // payload not fully buffered yet
        }

        let _ = self.buf.split_to(varint_len);
        Some(self.buf.split_to(len).to_vec())
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix `payload` with its varint length, ready for a single write.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    let mut len = payload.len();
    loop {
        let byte = (len & 0x7F) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_frame_round_trip() {
        let mut framer = Framer::new();
        framer.push(&encode_frame(b"hello"));
        assert_eq!(framer.next_frame().as_deref(), Some(&b"hello"[..]));
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn frame_split_across_pushes() {
        let encoded = encode_frame(b"split frame");
        let mut framer = Framer::new();
        framer.push(&encoded[..3]);
        assert!(framer.next_frame().is_none());
        framer.push(&encoded[3..]);
        assert_eq!(framer.next_frame().as_deref(), Some(&b"split frame"[..]));
    }

    #[test]
    fn two_byte_length_prefix() {
        let payload = vec![0xABu8; 300];
        let mut framer = Framer::new();
        framer.push(&encode_frame(&payload));
        assert_eq!(framer.next_frame(), Some(payload));
    }

    #[test]
    fn garbage_length_prefix_resets_framing() {
        let mut framer = Framer::new();
        // Four continuation bytes push the shift past the guard.
        framer.push(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(framer.next_frame().is_none());
        // Buffer was dropped; the next clean frame parses normally.
        framer.push(&encode_frame(b"ok"));
        assert_eq!(framer.next_frame().as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn oversize_declared_length_resets_framing() {
        let mut framer = Framer::new();
        // Declares a 100 KB frame, well past the cap.
        framer.push(&[0xA0, 0x8D, 0x06]);
        assert!(framer.next_frame().is_none());
        framer.push(&encode_frame(b"after"));
        assert_eq!(framer.next_frame().as_deref(), Some(&b"after"[..]));
    }
}
