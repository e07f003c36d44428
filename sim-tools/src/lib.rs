// SPDX-License-Identifier: MIT

//! Manual, non-production simulators for STaRS.
//!
//! Mirrors the teacher's `test-tools` crate: small, hand-run harnesses that
//! exercise the library end-to-end without a real network. `transport`
//! provides the one piece `stars-core` deliberately doesn't ship — an
//! in-process `Transport` that actually connects several `Peer`s together.

pub mod transport;
