//! Gallo wire protocol
//!
//! This crate holds everything that both ends of a Gallo link must agree on:
//! the closed table of endpoints with the payload layout of each request and
//! response ([`wire`]), and the framing that carries those payloads over a
//! byte pipe that has no delimiters of its own ([`frame`]).
//!
//! A request travels as a [`frame::Frame`] whose `seq` field is the
//! correlation id chosen by the host, whose `endpoint` field is the raw id of
//! an [`wire::Endpoint`], and whose `body` is the postcard encoding of the
//! endpoint's request type. The board answers with a frame carrying the same
//! `seq` and `endpoint`, whose body is a [`wire::Reply`] of the endpoint's
//! response type:
//!
//! ```rust
//! use gallo_proto::frame::{encode_body, Frame, MAX_FRAME_SIZE};
//! use gallo_proto::wire::{Endpoint, I2cReadRequest};
//!
//! let mut body = [0u8; 16];
//! let body = encode_body(&I2cReadRequest { address: 0x48, count: 2 }, &mut body).unwrap();
//! let frame = Frame { seq: 7, endpoint: Endpoint::I2cRead.id(), body };
//!
//! let mut out = [0u8; MAX_FRAME_SIZE];
//! let encoded = frame.encode(&mut out).unwrap();
//! assert_eq!(encoded.last(), Some(&0x00));
//! ```
//!
//! The crate is `no_std` and allocation free so that the firmware can use it
//! unchanged.

#![cfg_attr(not(test), no_std)]

pub mod frame;
pub mod wire;
