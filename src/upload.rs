// SPDX-License-Identifier: Apache-2.0

//! Uploads to the loader firmware.
//!
//! Every transfer has the same shape: a four byte magic, a single `K` from
//! the device, a fixed parameter block, a short pause and then the payload.
//! The payload is protected by a CRC-32 carried in the parameter block;
//! checking it is the device's business, nothing is acknowledged.

use crate::crc::{crc32, CRC32_SEED};
use crate::image::{self, Exec, Image};
use crate::transport::Transport;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info};

/// Magic announcing an executable.
pub const EXE_MAGIC: &[u8; 4] = b"MEXE";

/// Byte the device answers a magic with when it is ready.
pub const ACCEPT: u8 = b'K';

/// Layout of the executable parameter block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// EXEC block, CRC-32 and a flags word.
    Current,
    /// EXEC block and CRC-32 only, for older loaders.
    Legacy,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Current
    }
}

/// What a raw upload is for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Data placed at a caller-chosen address.
    Binary,
    /// A patch for the loader itself.
    Patch,
}

impl Kind {
    /// Magic that announces this kind of upload.
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            Kind::Binary => b"MBIN",
            Kind::Patch => b"MPAT",
        }
    }
}

/// Transfer tuning.
#[derive(Clone, Debug)]
pub struct Options {
    /// Parameter block layout for executables.
    pub protocol: Protocol,
    /// How many receives to try while waiting for the handshake reply.
    pub attempts: usize,
    /// Pause after each empty handshake receive.
    pub poll_interval: Duration,
    /// Pause between the parameter block and the payload.
    pub settle: Duration,
    /// Payload is sent in slices of this size for progress reporting.
    pub slice: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol: Protocol::Current,
            attempts: 10,
            poll_interval: Duration::from_millis(10),
            settle: Duration::from_millis(20),
            slice: 1024,
        }
    }
}

/// Why an upload failed.
#[derive(Debug)]
pub enum Error {
    /// The transport failed.
    Io(io::Error),

    /// The file could not be turned into a load image.
    Image(image::Error),

    /// No reply to the magic.
    Timeout,

    /// The device answered, but not with `K`.
    Rejected(u8),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => e.fmt(f),
            Error::Image(e) => e.fmt(f),
            Error::Timeout => write!(f, "no response from console"),
            Error::Rejected(b) => write!(f, "no valid response from console (got {:#04x})", b),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<image::Error> for Error {
    fn from(e: image::Error) -> Self {
        Error::Image(e)
    }
}

/// The parameter block following `MEXE`.
pub fn exec_block(params: &Exec, crc: u32, protocol: Protocol) -> Vec<u8> {
    let mut block = Vec::with_capacity(Exec::SIZE + 8);
    block.extend_from_slice(&params.encode());
    block.extend_from_slice(&crc.to_le_bytes());
    if protocol == Protocol::Current {
        block.extend_from_slice(&0u32.to_le_bytes());
    }
    block
}

/// The parameter block following `MBIN` / `MPAT`.
pub fn bin_block(size: i32, addr: u32, crc: u32) -> [u8; 12] {
    let mut block = [0u8; 12];
    block[0..4].copy_from_slice(&size.to_le_bytes());
    block[4..8].copy_from_slice(&addr.to_le_bytes());
    block[8..12].copy_from_slice(&crc.to_le_bytes());
    block
}

fn handshake(transport: &mut impl Transport, magic: &[u8; 4], opts: &Options) -> Result<(), Error> {
    debug!("handshake: {}", String::from_utf8_lossy(magic));
    transport.send_all(magic)?;

    let mut reply = [0u8; 1];
    for _ in 0..opts.attempts {
        if transport.receive(&mut reply)? > 0 {
            return match reply[0] {
                ACCEPT => Ok(()),
                other => Err(Error::Rejected(other)),
            };
        }
        sleep(opts.poll_interval);
    }

    Err(Error::Timeout)
}

fn transfer(
    transport: &mut impl Transport,
    magic: &[u8; 4],
    block: &[u8],
    payload: &[u8],
    opts: &Options,
    mut progress: impl FnMut(usize, usize),
) -> Result<(), Error> {
    handshake(transport, magic, opts)?;

    transport.send_all(block)?;
    sleep(opts.settle);

    let total = payload.len();
    let mut sent = 0;
    for slice in payload.chunks(opts.slice.max(1)) {
        transport.send_all(slice)?;
        sent += slice.len();
        progress(sent, total);
    }

    Ok(())
}

/// Uploads a load image; the device runs it once the transfer completes.
pub fn executable(
    transport: &mut impl Transport,
    image: &Image,
    opts: &Options,
    progress: impl FnMut(usize, usize),
) -> Result<(), Error> {
    let payload = &image.bytes()[..image.size() as usize];
    let crc = crc32(payload, CRC32_SEED);

    info!(
        "uploading {} executable: {} bytes at {:#010x}, entry {:#010x}, crc32 {:#010x}",
        image.format(),
        image.size(),
        image.load_address(),
        image.entry(),
        crc
    );

    let block = exec_block(image.params(), crc, opts.protocol);
    transfer(transport, EXE_MAGIC, &block, payload, opts, progress)
}

/// Uploads an arbitrary blob to `addr`.
pub fn binary(
    transport: &mut impl Transport,
    data: &[u8],
    addr: u32,
    kind: Kind,
    opts: &Options,
    progress: impl FnMut(usize, usize),
) -> Result<(), Error> {
    let size = i32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large"))?;
    let crc = crc32(data, CRC32_SEED);

    info!(
        "uploading {:?}: {} bytes at {:#010x}, crc32 {:#010x}",
        kind, size, addr, crc
    );

    let block = bin_block(size, addr, crc);
    transfer(transport, kind.magic(), &block, data, opts, progress)
}

/// Loads `path` and uploads it. Nothing is sent unless the file is a valid
/// executable.
pub fn executable_file(
    transport: &mut impl Transport,
    path: impl AsRef<Path>,
    opts: &Options,
    progress: impl FnMut(usize, usize),
) -> Result<Image, Error> {
    let image = Image::open(path)?;
    executable(transport, &image, opts, progress)?;
    Ok(image)
}

/// Reads `path` as-is and uploads it.
pub fn binary_file(
    transport: &mut impl Transport,
    path: impl AsRef<Path>,
    addr: u32,
    kind: Kind,
    opts: &Options,
    progress: impl FnMut(usize, usize),
) -> Result<(), Error> {
    let data = std::fs::read(path)?;
    binary(transport, &data, addr, kind, opts, progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        let exec = Exec::default();
        assert_eq!(exec_block(&exec, 0, Protocol::Current).len(), 68);
        assert_eq!(exec_block(&exec, 0, Protocol::Legacy).len(), 64);
    }

    #[test]
    fn exec_block_layout() {
        let exec = Exec {
            pc0: 1,
            t_size: 0x800,
            ..Default::default()
        };

        let block = exec_block(&exec, 0xcafe_f00d, Protocol::Current);
        assert_eq!(block[..Exec::SIZE], exec.encode());
        assert_eq!(block[60..64], 0xcafe_f00du32.to_le_bytes());
        assert_eq!(block[64..68], [0; 4]);

        let legacy = exec_block(&exec, 0xcafe_f00d, Protocol::Legacy);
        assert_eq!(legacy[..], block[..64]);
    }

    #[test]
    fn bin_block_layout() {
        let block = bin_block(3, 0x8010_0000, 0x1234_5678);
        assert_eq!(block[..4], 3i32.to_le_bytes());
        assert_eq!(block[4..8], 0x8010_0000u32.to_le_bytes());
        assert_eq!(block[8..], 0x1234_5678u32.to_le_bytes());
    }

    #[test]
    fn magics() {
        assert_eq!(Kind::Binary.magic(), b"MBIN");
        assert_eq!(Kind::Patch.magic(), b"MPAT");
        assert_eq!(EXE_MAGIC, b"MEXE");
    }
}
