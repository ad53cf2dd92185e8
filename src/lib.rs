// SPDX-License-Identifier: Apache-2.0

//! Host side of a serial development bridge for a game console.
//!
//! The host uploads executables and raw binaries to a loader running on the
//! device, then watches the console output. Requests the device embeds in
//! that output are serviced by [`siofs`], which gives the device file and
//! directory access to the host's working directory.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod crc;
pub mod image;
pub mod monitor;
pub mod siofs;
pub mod transport;
pub mod upload;
