// SPDX-License-Identifier: Apache-2.0

//! Host files opened on behalf of the device, addressed by small integers.

use std::fmt::{self, Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bitflags::bitflags;
use log::debug;

/// Number of simultaneously open files.
pub const CAPACITY: usize = 64;

bitflags! {
    /// Open flags as sent by the device.
    pub struct Mode: u16 {
        /// Open for reading.
        const READ = 1 << 0;
        /// Open for writing, creating or truncating unless READ is set too.
        const WRITE = 1 << 1;
        /// Accepted and ignored, host files are always binary.
        const BINARY = 1 << 2;
    }
}

impl Mode {
    /// Read-only, create-or-truncate for writing, or read/write on an
    /// existing file. `None` when neither direction is requested.
    pub fn options(self) -> Option<OpenOptions> {
        let mut opts = OpenOptions::new();
        match (self.contains(Mode::READ), self.contains(Mode::WRITE)) {
            (true, false) => opts.read(true),
            (false, true) => opts.write(true).create(true).truncate(true),
            (true, true) => opts.read(true).write(true),
            (false, false) => return None,
        };
        Some(opts)
    }
}

/// Why a handle could not be used. The discriminant is the wire code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleError {
    /// The slot exists but holds no file.
    NotOpen = 1,
    /// Past the end of the table.
    OutOfRange = 2,
}

impl HandleError {
    /// Status byte sent to the device.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Display for HandleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::NotOpen => write!(f, "handle not open"),
            HandleError::OutOfRange => write!(f, "handle out of range"),
        }
    }
}

impl std::error::Error for HandleError {}

/// Why FOP returned no handle.
#[derive(Debug)]
pub enum OpenError {
    /// Every slot is in use.
    NoFreeSlot,

    /// The mode was empty or the host refused the open.
    CannotOpen(Option<io::Error>),
}

impl OpenError {
    /// The signed byte sent back in place of a handle.
    pub fn code(&self) -> i8 {
        match self {
            OpenError::CannotOpen(_) => -1,
            OpenError::NoFreeSlot => -2,
        }
    }
}

impl Display for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::NoFreeSlot => write!(f, "no free file handles"),
            OpenError::CannotOpen(Some(e)) => e.fmt(f),
            OpenError::CannotOpen(None) => write!(f, "no access mode requested"),
        }
    }
}

impl std::error::Error for OpenError {}

/// Failure of an operation on an open handle.
#[derive(Debug)]
pub enum Error {
    /// The handle was unusable; the file was not touched.
    Handle(HandleError),
    /// The host file operation failed.
    Io(io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Handle(e) => e.fmt(f),
            Error::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<HandleError> for Error {
    fn from(e: HandleError) -> Self {
        Error::Handle(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Bytes returned by a read, and whether end of file was hit on the way.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes read
    pub data: Vec<u8>,
    /// End of file was reached
    pub eof: bool,
}

/// Seek origin. Unknown device modes seek from the start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Whence {
    /// Mode 0
    Start,
    /// Mode 1
    Current,
    /// Mode 2
    End,
}

impl From<u16> for Whence {
    fn from(mode: u16) -> Self {
        match mode {
            1 => Whence::Current,
            2 => Whence::End,
            _ => Whence::Start,
        }
    }
}

impl Whence {
    /// The offset is unsigned from the start and signed otherwise.
    pub fn seek_from(self, offset: u32) -> SeekFrom {
        match self {
            Whence::Start => SeekFrom::Start(offset.into()),
            Whence::Current => SeekFrom::Current((offset as i32).into()),
            Whence::End => SeekFrom::End((offset as i32).into()),
        }
    }
}

/// Fixed table of [`CAPACITY`] open files.
#[derive(Debug)]
pub struct HandleTable {
    slots: [Option<File>; CAPACITY],
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no handle is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens `path` in the lowest free slot.
    pub fn open(&mut self, path: impl AsRef<Path>, mode: Mode) -> Result<u8, OpenError> {
        let path = path.as_ref();
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(OpenError::NoFreeSlot)?;

        let opts = mode.options().ok_or(OpenError::CannotOpen(None))?;
        let file = opts
            .open(path)
            .map_err(|e| OpenError::CannotOpen(Some(e)))?;

        debug!("handle {}: {} ({:?})", index, path.display(), mode);
        self.slots[index] = Some(file);
        Ok(index as u8)
    }

    /// Validates `handle` without touching the file.
    pub fn check(&self, handle: usize) -> Result<(), HandleError> {
        match self.slots.get(handle) {
            None => Err(HandleError::OutOfRange),
            Some(None) => Err(HandleError::NotOpen),
            Some(Some(_)) => Ok(()),
        }
    }

    /// The file behind `handle`.
    pub fn get(&mut self, handle: usize) -> Result<&mut File, HandleError> {
        match self.slots.get_mut(handle) {
            None => Err(HandleError::OutOfRange),
            Some(None) => Err(HandleError::NotOpen),
            Some(Some(file)) => Ok(file),
        }
    }

    /// Closes `handle`, freeing its slot.
    pub fn close(&mut self, handle: usize) -> Result<(), HandleError> {
        self.check(handle)?;
        self.slots[handle] = None;
        debug!("handle {}: closed", handle);
        Ok(())
    }

    /// Closes everything.
    pub fn reset(&mut self) {
        let open = self.len();
        self.slots.iter_mut().for_each(|s| *s = None);
        if open > 0 {
            debug!("closed {} stale handles", open);
        }
    }

    /// Reads up to `len` bytes, stopping early only at end of file.
    pub fn read(&mut self, handle: usize, len: usize) -> Result<Chunk, Error> {
        let file = self.get(handle)?;

        let mut data = Vec::with_capacity(len.min(1 << 20));
        file.take(len as u64).read_to_end(&mut data)?;

        let eof = data.len() < len;
        Ok(Chunk { data, eof })
    }

    /// Reads one line of at most `len - 1` bytes, keeping the newline.
    /// `None` when end of file came before any byte.
    pub fn read_line(&mut self, handle: usize, len: usize) -> Result<Option<Chunk>, Error> {
        let file = self.get(handle)?;

        if len == 0 {
            return Ok(None);
        }

        let mut line = Chunk::default();
        let mut byte = [0u8; 1];
        while line.data.len() < len - 1 {
            if file.read(&mut byte)? == 0 {
                line.eof = true;
                break;
            }

            line.data.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }

        if line.eof && line.data.is_empty() {
            return Ok(None);
        }

        Ok(Some(line))
    }

    /// Writes all of `data`.
    pub fn write(&mut self, handle: usize, data: &[u8]) -> Result<usize, Error> {
        let file = self.get(handle)?;
        file.write_all(data)?;
        Ok(data.len())
    }

    /// Moves the file position, returning the new one.
    pub fn seek(&mut self, handle: usize, whence: Whence, offset: u32) -> Result<u64, Error> {
        let file = self.get(handle)?;
        Ok(file.seek(whence.seek_from(offset))?)
    }

    /// Current file position.
    pub fn tell(&mut self, handle: usize) -> Result<u64, Error> {
        let file = self.get(handle)?;
        Ok(file.stream_position()?)
    }
}
