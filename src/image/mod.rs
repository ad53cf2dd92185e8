// SPDX-License-Identifier: Apache-2.0

//! Executable containers and the canonical load image built from them.
//!
//! Three containers are understood: the native PS-EXE (fixed 2048 byte
//! header), CPE (a stream of typed chunks) and little-endian ELF32 MIPS
//! executables. Whatever the source, the result is an [`Image`]: an EXEC
//! parameter block describing where to put the bytes and where to jump,
//! plus the bytes themselves.

mod cpe;
mod elf;
mod psexe;

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Load images are padded to a whole number of CD sectors.
pub const SECTOR: usize = 2048;

/// Largest load image accepted from any container. The console maps at
/// most 8 MiB of main RAM.
pub const MAX_SIZE: usize = 8 << 20;

/// Round `size` up to the next [`SECTOR`] multiple.
pub fn round_up(size: usize) -> usize {
    (size + SECTOR - 1) / SECTOR * SECTOR
}

/// The EXEC parameter block understood by the loader firmware.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Exec {
    /// Entry point
    pub pc0: u32,
    /// Initial global pointer
    pub gp0: u32,
    /// Text (load) address
    pub t_addr: u32,
    /// Text size
    pub t_size: u32,
    /// Data address, unused by the loader
    pub d_addr: u32,
    /// Data size
    pub d_size: u32,
    /// BSS address, cleared before the jump when `b_size` is set
    pub b_addr: u32,
    /// BSS size
    pub b_size: u32,
    /// Initial stack address
    pub sp_addr: u32,
    /// Stack size, added to `sp_addr`
    pub sp_size: u32,

    // Register save area, filled in by the BIOS on execution.
    /// Saved stack pointer
    pub sp: u32,
    /// Saved frame pointer
    pub fp: u32,
    /// Saved global pointer
    pub gp: u32,
    /// Saved return address
    pub ret: u32,
    /// Saved base
    pub base: u32,
}

impl Exec {
    /// Encoded size in bytes.
    pub const SIZE: usize = 60;

    fn words(&self) -> [u32; 15] {
        [
            self.pc0,
            self.gp0,
            self.t_addr,
            self.t_size,
            self.d_addr,
            self.d_size,
            self.b_addr,
            self.b_size,
            self.sp_addr,
            self.sp_size,
            self.sp,
            self.fp,
            self.gp,
            self.ret,
            self.base,
        ]
    }

    fn from_words(w: [u32; 15]) -> Self {
        Self {
            pc0: w[0],
            gp0: w[1],
            t_addr: w[2],
            t_size: w[3],
            d_addr: w[4],
            d_size: w[5],
            b_addr: w[6],
            b_size: w[7],
            sp_addr: w[8],
            sp_size: w[9],
            sp: w[10],
            fp: w[11],
            gp: w[12],
            ret: w[13],
            base: w[14],
        }
    }

    /// Little-endian wire encoding.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes the little-endian block found in PS-EXE headers.
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u32; 15];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(words)
    }
}

/// The container an [`Image`] was loaded from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// Native `PS-X EXE`
    PsExe,
    /// Psy-Q linker output
    Cpe,
    /// Little-endian ELF32 for MIPS
    Elf,
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::PsExe => "PS-EXE",
            Format::Cpe => "CPE",
            Format::Elf => "ELF32-MIPS",
        })
    }
}

/// Errors produced while loading an executable.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Reading the container failed.
    Io(io::Error),

    /// The file ended before the container said it would.
    Truncated,

    /// Neither PS-EXE, CPE nor ELF.
    UnknownFormat,

    /// CPE chunk type we cannot interpret.
    UnknownChunk(u8),

    /// CPE set-register chunk for anything but the program counter.
    UnsupportedRegister(u16),

    /// The container has nothing to load.
    NoSegments,

    /// `goblin` rejected the ELF headers.
    Elf(goblin::error::Error),

    /// Valid container, but not something the target can run.
    Unsupported(&'static str),

    /// A segment points outside the file or the image.
    OutOfBounds,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => e.fmt(f),
            Error::Truncated => write!(f, "incomplete file"),
            Error::UnknownFormat => write!(f, "file is neither a PS-EXE, CPE or ELF binary"),
            Error::UnknownChunk(t) => write!(f, "unknown CPE chunk type: {:#04x}", t),
            Error::UnsupportedRegister(c) => write!(f, "unknown CPE SETREG code: {:#06x}", c),
            Error::NoSegments => write!(f, "executable has no loadable segments"),
            Error::Elf(e) => write!(f, "invalid ELF: {}", e),
            Error::Unsupported(what) => write!(f, "unsupported ELF header: {}", what),
            Error::OutOfBounds => write!(f, "segment lies outside the file or image"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Elf(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Truncated,
            _ => Error::Io(e),
        }
    }
}

impl From<goblin::error::Error> for Error {
    fn from(e: goblin::error::Error) -> Self {
        Error::Elf(e)
    }
}

/// A canonical load image.
#[derive(Clone, Debug)]
pub struct Image {
    format: Format,
    params: Exec,
    bytes: Vec<u8>,
}

impl Image {
    fn new(format: Format, params: Exec, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(params.t_size as usize, bytes.len());
        Self {
            format,
            params,
            bytes,
        }
    }

    /// Sniffs the container type and loads it.
    pub fn load(mut reader: impl Read + Seek) -> Result<Self, Error> {
        let mut magic = [0u8; 8];
        let len = fill(&mut reader, &mut magic)?;
        reader.rewind()?;

        if len == magic.len() && &magic == psexe::MAGIC {
            return psexe::load(reader);
        }

        if len >= 4 {
            let word = [magic[0], magic[1], magic[2], magic[3]];

            if u32::from_le_bytes(word) == cpe::MAGIC {
                return cpe::load(reader);
            }

            if word == *goblin::elf::header::ELFMAG {
                return elf::load(reader);
            }
        }

        Err(Error::UnknownFormat)
    }

    /// Opens and loads an executable file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::load(BufReader::new(file))
    }

    /// Container the image came from.
    pub fn format(&self) -> Format {
        self.format
    }

    /// The full EXEC block sent to the loader.
    pub fn params(&self) -> &Exec {
        &self.params
    }

    /// Address the loader jumps to.
    pub fn entry(&self) -> u32 {
        self.params.pc0
    }

    /// Address of the first byte of [`Image::bytes`].
    pub fn load_address(&self) -> u32 {
        self.params.t_addr
    }

    /// Size declared in the EXEC block.
    pub fn size(&self) -> u32 {
        self.params.t_size
    }

    /// Payload sent after the parameter block.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Bytes between the current position and the end of the stream.
fn remaining(reader: &mut impl Seek) -> io::Result<u64> {
    let pos = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(pos))?;
    Ok(end.saturating_sub(pos))
}

/// Reads until `buf` is full or the reader is exhausted.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(len)
}

fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    let mut b = [0u8; 1];
    reader.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16(reader: &mut impl Read) -> io::Result<u16> {
    let mut b = [0u8; 2];
    reader.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn rounding() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), SECTOR);
        assert_eq!(round_up(SECTOR), SECTOR);
        assert_eq!(round_up(SECTOR + 1), 2 * SECTOR);
    }

    #[test]
    fn exec_layout() {
        let exec = Exec {
            pc0: 0x8001_0000,
            t_addr: 0x8001_0000,
            t_size: 0x800,
            sp_addr: 0x801f_fff0,
            base: 0xdead_beef,
            ..Default::default()
        };

        let bytes = exec.encode();
        assert_eq!(bytes[0..4], 0x8001_0000u32.to_le_bytes());
        assert_eq!(bytes[12..16], 0x800u32.to_le_bytes());
        assert_eq!(bytes[32..36], 0x801f_fff0u32.to_le_bytes());
        assert_eq!(bytes[56..60], 0xdead_beefu32.to_le_bytes());
        assert_eq!(Exec::decode(&bytes), exec);
    }

    #[test]
    fn unknown_format() {
        let err = Image::load(Cursor::new(b"#!/bin/sh\nexit 0\n".to_vec())).unwrap_err();
        assert!(matches!(err, Error::UnknownFormat));

        let err = Image::load(Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::UnknownFormat));
    }
}
