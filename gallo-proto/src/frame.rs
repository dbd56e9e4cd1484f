//! Message framing.
//!
//! The transport is an ordered byte pipe with no message boundaries, so each
//! frame is COBS-encoded and terminated with a single `0x00` byte. COBS
//! removes every zero from the encoded frame, which makes the terminator
//! unambiguous whatever the payload holds, and lets a receiver that joined
//! mid-stream resynchronize at the next zero.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Largest encoded frame, terminator included, that either side accepts.
pub const MAX_FRAME_SIZE: usize = 1024;

/// One request or response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Correlation id. A response carries the id of the request it answers.
    pub seq: u16,
    /// Raw endpoint id. Kept as a plain byte so that a frame naming an
    /// endpoint this build does not know still decodes and can be answered.
    pub endpoint: u8,
    /// Postcard encoding of the endpoint's request type, or of a
    /// [`Reply`](crate::wire::Reply) of its response type.
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The output buffer is too small for the encoded value.
    Overflow,
    /// The bytes between two terminators are not a valid frame.
    Malformed,
    /// More than [`MAX_FRAME_SIZE`] bytes arrived without a terminator.
    Oversize,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameError::Overflow => "frame does not fit the output buffer",
            FrameError::Malformed => "malformed frame",
            FrameError::Oversize => "frame exceeds maximum size",
        })
    }
}

impl<'a> Frame<'a> {
    /// Encodes the frame into `buf`, terminator included, and returns the
    /// used prefix of `buf`.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], FrameError> {
        postcard::to_slice_cobs(self, buf).map_err(|_| FrameError::Overflow)
    }

    /// Decodes a frame from the bytes preceding a terminator. The bytes are
    /// unstuffed in place, and the returned frame borrows its body from
    /// them.
    pub fn decode(raw: &'a mut [u8]) -> Result<Self, FrameError> {
        postcard::from_bytes_cobs(raw).map_err(|_| FrameError::Malformed)
    }
}

/// Encodes a request or reply body into `buf`.
pub fn encode_body<'b, T: Serialize>(value: &T, buf: &'b mut [u8]) -> Result<&'b mut [u8], FrameError> {
    postcard::to_slice(value, buf).map_err(|_| FrameError::Overflow)
}

/// Decodes a request or reply body.
pub fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, FrameError> {
    postcard::from_bytes(body).map_err(|_| FrameError::Malformed)
}

/// `Decoder` splits a byte stream into raw frames.
///
/// Feed it one byte at a time with [`push`](Decoder::push); whenever a
/// terminator completes a frame it hands back the bytes that preceded it,
/// ready for [`Frame::decode`].
pub struct Decoder<const N: usize> {
    buf: [u8; N],
    len: usize,
    discarding: bool,
}

impl<const N: usize> Default for Decoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Decoder<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            discarding: false,
        }
    }

    /// Accepts one byte from the stream.
    ///
    /// Returns `None` while a frame is still incomplete. Empty frames (two
    /// terminators in a row) are skipped. A frame that overruns the buffer
    /// is dropped whole and reported as [`FrameError::Oversize`] once its
    /// terminator arrives.
    pub fn push(&mut self, byte: u8) -> Option<Result<&mut [u8], FrameError>> {
        if byte == 0x00 {
            let len = self.len;
            self.len = 0;
            if self.discarding {
                self.discarding = false;
                return Some(Err(FrameError::Oversize));
            }
            if len == 0 {
                return None;
            }
            return Some(Ok(&mut self.buf[..len]));
        }

        if self.discarding {
            return None;
        }
        if self.len == N {
            self.discarding = true;
            self.len = 0;
            return None;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        None
    }

    /// Drops any partially received frame.
    pub fn reset(&mut self) {
        self.len = 0;
        self.discarding = false;
    }

    /// Number of bytes buffered for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Endpoint, I2cWriteRequest};
    use proptest::prelude::*;

    fn collect(decoder: &mut Decoder<MAX_FRAME_SIZE>, bytes: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(res) = decoder.push(b) {
                out.push(res.map(|raw| raw.to_vec()));
            }
        }
        out
    }

    #[test]
    fn body_with_zeros_survives_framing() {
        let contents = [0x00, 0x00, 0x12, 0x00];
        let mut body = [0u8; 32];
        let body = encode_body(
            &I2cWriteRequest {
                address: 0x50,
                contents: &contents,
            },
            &mut body,
        )
        .unwrap();
        let frame = Frame {
            seq: 0x0100,
            endpoint: Endpoint::I2cWrite.id(),
            body,
        };

        let mut out = [0u8; MAX_FRAME_SIZE];
        let encoded = frame.encode(&mut out).unwrap();
        let (last, stuffed) = encoded.split_last().unwrap();
        assert_eq!(*last, 0x00);
        assert!(stuffed.iter().all(|&b| b != 0x00));

        let mut decoder = Decoder::<MAX_FRAME_SIZE>::new();
        let mut frames = collect(&mut decoder, encoded);
        assert_eq!(frames.len(), 1);
        let mut raw = frames.remove(0).unwrap();
        let decoded = Frame::decode(&mut raw).unwrap();
        assert_eq!(decoded.seq, 0x0100);
        assert_eq!(decoded.endpoint, Endpoint::I2cWrite.id());
        let req: I2cWriteRequest = decode_body(decoded.body).unwrap();
        assert_eq!(req.contents, &contents);
    }

    #[test]
    fn unknown_endpoint_still_decodes() {
        let frame = Frame {
            seq: 3,
            endpoint: 0xee,
            body: &[],
        };
        let mut out = [0u8; 16];
        let encoded = frame.encode(&mut out).unwrap();
        let len = encoded.len();
        let decoded = Frame::decode(&mut out[..len - 1]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn oversize_frame_is_dropped_and_stream_recovers() {
        let mut decoder = Decoder::<8>::new();
        for _ in 0..20 {
            assert!(decoder.push(0x11).is_none());
        }
        assert_eq!(decoder.push(0x00).map(|r| r.map(|_| ())), Some(Err(FrameError::Oversize)));

        let frame = Frame {
            seq: 1,
            endpoint: 0,
            body: &[],
        };
        let mut out = [0u8; 8];
        let encoded = frame.encode(&mut out).unwrap();
        let mut got = None;
        for &b in encoded.iter() {
            if let Some(res) = decoder.push(b) {
                got = Some(Frame::decode(res.unwrap()).unwrap().seq);
            }
        }
        assert_eq!(got, Some(1));
    }

    #[test]
    fn empty_frames_are_skipped() {
        let mut decoder = Decoder::<MAX_FRAME_SIZE>::new();
        assert!(collect(&mut decoder, &[0, 0, 0]).is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn garbage_between_terminators_is_malformed() {
        let mut raw = [0x05, 0x01];
        assert_eq!(Frame::decode(&mut raw), Err(FrameError::Malformed));
    }

    #[test]
    fn encode_overflow() {
        let frame = Frame {
            seq: 9,
            endpoint: 0x11,
            body: &[1, 2, 3, 4, 5, 6, 7, 8],
        };
        let mut out = [0u8; 4];
        assert_eq!(frame.encode(&mut out), Err(FrameError::Overflow));
    }

    proptest! {
        #[test]
        fn frames_split_at_any_boundary(
            seqs in proptest::collection::vec(any::<u16>(), 1..8),
            body in proptest::collection::vec(any::<u8>(), 0..200),
        ) {
            let mut stream = Vec::new();
            for &seq in &seqs {
                let frame = Frame { seq, endpoint: 0x20, body: &body };
                let mut out = [0u8; MAX_FRAME_SIZE];
                stream.extend_from_slice(frame.encode(&mut out).unwrap());
            }

            let mut decoder = Decoder::<MAX_FRAME_SIZE>::new();
            let frames = collect(&mut decoder, &stream);
            prop_assert_eq!(frames.len(), seqs.len());
            for (res, &seq) in frames.into_iter().zip(seqs.iter()) {
                let mut raw = res.unwrap();
                let frame = Frame::decode(&mut raw).unwrap();
                prop_assert_eq!(frame.seq, seq);
                prop_assert_eq!(frame.body, &body[..]);
            }
        }
    }
}
