// SPDX-License-Identifier: Apache-2.0

//! SIOFS: the device's remote view of the host filesystem.
//!
//! A request is announced in-band on the console stream by `~` followed by
//! a three letter code. From then on the command owns the transport until
//! its reply is complete.

pub mod dir;
pub mod handles;
pub mod wire;

use self::dir::{Directory, Policy, Step};
use self::handles::{HandleError, HandleTable, Mode, Whence};
use self::wire::{
    ListParams, OpenRequest, QuickReadRequest, ReadReply, SeekRequest, Stat, TransferRequest,
};
use crate::crc::crc16;
use crate::transport::Transport;

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};

/// Protocol version reported by FRS, major in the high byte.
pub const VERSION: u16 = 0x0100;

/// Sent before a request is read.
pub const ACCEPT: u8 = b'K';

/// FRD/FGS client status asking for a resend.
const RESEND_INCOMPLETE: u8 = 1;
const RESEND_CHECKSUM: u8 = 2;

/// FWR reply asking for the chunk again.
const WRITE_CHECKSUM: i32 = -2;

/// Pause between the FWD length and the path.
const WORKDIR_DELAY: Duration = Duration::from_millis(20);

/// Largest single receive into a device-sized buffer.
const RECEIVE_SLICE: usize = 4096;

/// A SIOFS request, framed in the console stream as `~` plus a three
/// letter code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// `FRS`: close every handle, report the version.
    Reset,
    /// `FOP`: open a file.
    Open,
    /// `FCL`: close a handle.
    Close,
    /// `FRQ`: read a range of a file by name.
    QuickRead,
    /// `FWR`: write to a handle.
    Write,
    /// `FRD`: read from a handle.
    Read,
    /// `FGS`: read a line from a handle.
    Gets,
    /// `FSK`: seek a handle.
    Seek,
    /// `FTL`: report a handle's position.
    Tell,
    /// `FLF`: start a directory listing.
    ListFirst,
    /// `FLN`: continue a directory listing.
    ListNext,
    /// `FLS`: list a page of the directory at once.
    List,
    /// `FST`: stat a path.
    Stat,
    /// `FCD`: change the working directory.
    ChangeDir,
    /// `FWD`: report the working directory.
    WorkDir,
}

impl Command {
    /// First byte of every frame.
    pub const MARKER: u8 = b'~';

    /// Marker plus code.
    pub const FRAME: usize = 4;

    /// Every command, in wire code order.
    pub const ALL: [Command; 15] = [
        Command::Reset,
        Command::Open,
        Command::Close,
        Command::QuickRead,
        Command::Write,
        Command::Read,
        Command::Gets,
        Command::Seek,
        Command::Tell,
        Command::ListFirst,
        Command::ListNext,
        Command::List,
        Command::Stat,
        Command::ChangeDir,
        Command::WorkDir,
    ];

    /// The three letters following the marker.
    pub fn code(self) -> &'static [u8; 3] {
        match self {
            Command::Reset => b"FRS",
            Command::Open => b"FOP",
            Command::Close => b"FCL",
            Command::QuickRead => b"FRQ",
            Command::Write => b"FWR",
            Command::Read => b"FRD",
            Command::Gets => b"FGS",
            Command::Seek => b"FSK",
            Command::Tell => b"FTL",
            Command::ListFirst => b"FLF",
            Command::ListNext => b"FLN",
            Command::List => b"FLS",
            Command::Stat => b"FST",
            Command::ChangeDir => b"FCD",
            Command::WorkDir => b"FWD",
        }
    }

    /// Looks a command up by its letters.
    pub fn from_code(code: &[u8]) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| &c.code()[..] == code)
    }

    /// Finds the first frame in `buf`, returning its offset.
    pub fn scan(buf: &[u8]) -> Option<(usize, Self)> {
        buf.windows(Self::FRAME)
            .enumerate()
            .filter(|(_, w)| w[0] == Self::MARKER)
            .find_map(|(i, w)| Self::from_code(&w[1..]).map(|c| (i, c)))
    }

    /// Whether the host acknowledges with `K` before reading a request.
    pub fn has_request(self) -> bool {
        !matches!(self, Command::Reset | Command::ListNext | Command::WorkDir)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.code()))
    }
}

/// Why a command was abandoned.
#[derive(Debug)]
pub enum Error {
    /// The transport failed.
    Io(io::Error),

    /// The device stopped talking mid-command.
    Timeout,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => e.fmt(f),
            Error::Timeout => write!(f, "timed out waiting for the client"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Timeout => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}

/// How the client confirms a read payload.
#[derive(Copy, Clone, Debug)]
enum Ack {
    /// A `u16`, zero meaning done.
    Word,
    /// A `u8` asking for a resend or not.
    Byte,
}

fn receive_array<const N: usize>(t: &mut dyn Transport) -> Result<[u8; N], Error> {
    let mut b = [0u8; N];
    t.receive_exact(&mut b)?;
    Ok(b)
}

/// Receives `len` bytes, growing the buffer only as data arrives.
///
/// Lengths come from the device and may be garbage after a framing slip.
fn receive_bytes(t: &mut dyn Transport, len: usize) -> Result<Vec<u8>, Error> {
    let mut slice = [0u8; RECEIVE_SLICE];
    let mut b = Vec::with_capacity(len.min(RECEIVE_SLICE));
    while b.len() < len {
        let n = (len - b.len()).min(RECEIVE_SLICE);
        t.receive_exact(&mut slice[..n])?;
        b.extend_from_slice(&slice[..n]);
    }
    Ok(b)
}

/// A `u8`-prefixed string.
fn receive_short(t: &mut dyn Transport) -> Result<Vec<u8>, Error> {
    let len = t.receive_u8()?;
    receive_bytes(t, len.into())
}

/// Names arrive with or without a terminating NUL.
fn host_path(name: &[u8]) -> PathBuf {
    let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
    PathBuf::from(String::from_utf8_lossy(&name[..end]).into_owned())
}

/// Waits for the go byte, then sends `payload` until the client is happy.
fn deliver(t: &mut dyn Transport, payload: &[u8], ack: Ack) -> Result<(), Error> {
    t.receive_u8()?;

    loop {
        t.send_all(payload)?;

        let again = match ack {
            Ack::Word => t.receive_u16()? != 0,
            Ack::Byte => matches!(t.receive_u8()?, RESEND_INCOMPLETE | RESEND_CHECKSUM),
        };

        if !again {
            return Ok(());
        }
        debug!("client asked for a resend of {} bytes", payload.len());
    }
}

fn handle_code(result: Result<(), HandleError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// The host side of SIOFS: open handles plus the directory cursor.
#[derive(Debug, Default)]
pub struct Siofs {
    handles: HandleTable,
    dir: Directory,
}

impl Siofs {
    /// No open handles, listing with `policy`.
    pub fn new(policy: Policy) -> Self {
        Self {
            handles: HandleTable::new(),
            dir: Directory::new(policy),
        }
    }

    /// The handle table.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// The directory cursor.
    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    /// Services one request. On error the table is left as the command
    /// left it.
    pub fn query(&mut self, t: &mut dyn Transport, cmd: Command) -> Result<(), Error> {
        debug!("{} request", cmd);

        if cmd.has_request() {
            t.send_all(&[ACCEPT])?;
        }

        match cmd {
            Command::Reset => self.reset(t),
            Command::Open => self.open(t),
            Command::Close => self.close(t),
            Command::QuickRead => self.quick_read(t),
            Command::Write => self.write(t),
            Command::Read => self.read(t),
            Command::Gets => self.gets(t),
            Command::Seek => self.seek(t),
            Command::Tell => self.tell(t),
            Command::ListFirst => self.list_first(t),
            Command::ListNext => self.list_next(t),
            Command::List => self.list(t),
            Command::Stat => self.stat(t),
            Command::ChangeDir => self.change_dir(t),
            Command::WorkDir => self.work_dir(t),
        }
    }

    fn reset(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        t.send_all(&VERSION.to_le_bytes())?;
        self.handles.reset();
        self.dir.close();
        info!("client connected");
        Ok(())
    }

    fn open(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let req = OpenRequest::decode(&receive_array(t)?);
        let name = receive_bytes(t, req.length.into())?;
        let path = host_path(&name);
        let mode = Mode::from_bits_truncate(req.flags);

        let reply = match self.handles.open(&path, mode) {
            Ok(handle) => handle as i8,
            Err(e) => {
                warn!("cannot open {}: {}", path.display(), e);
                e.code()
            }
        };

        t.send_all(&reply.to_le_bytes())?;
        Ok(())
    }

    fn close(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let handle = t.receive_u8()?;
        let code = handle_code(self.handles.close(handle.into()));
        t.send_all(&[code])?;
        Ok(())
    }

    fn quick_read(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let name = receive_short(t)?;
        let path = host_path(&name);

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!("cannot open {}: {}", path.display(), e);
                t.send_all(&[1])?;
                return Ok(());
            }
        };
        t.send_all(&[0])?;

        let req = QuickReadRequest::decode(&receive_array(t)?);
        debug!(
            "quick read {}: {} bytes at {:#x}",
            path.display(),
            req.length,
            req.offset
        );

        if let Err(e) = file.seek(SeekFrom::Start(req.offset.into())) {
            warn!("cannot seek {}: {}", path.display(), e);
            let reply = ReadReply {
                status: 2,
                ..Default::default()
            };
            t.send_all(&reply.encode())?;
            return Ok(());
        }

        let mut data = Vec::new();
        if let Err(e) = file.take(req.length.into()).read_to_end(&mut data) {
            warn!("cannot read {}: {}", path.display(), e);
        }

        if data.is_empty() {
            let reply = ReadReply {
                status: 1,
                ..Default::default()
            };
            t.send_all(&reply.encode())?;
            return Ok(());
        }

        let reply = ReadReply {
            status: 0,
            crc16: crc16(&data, 0),
            length: data.len() as u32,
        };
        t.send_all(&reply.encode())?;
        deliver(t, &data, Ack::Word)
    }

    fn write(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let req = TransferRequest::decode(&receive_array(t)?);
        let handle = usize::from(req.handle);

        let code = handle_code(self.handles.check(handle));
        t.send_all(&[code])?;
        if code != 0 {
            return Ok(());
        }

        let data = loop {
            let data = receive_bytes(t, req.length as usize)?;
            if crc16(&data, 0) == req.crc16 {
                break data;
            }

            debug!("write to handle {}: checksum mismatch", handle);
            t.send_all(&WRITE_CHECKSUM.to_le_bytes())?;
        };

        let written = match self.handles.write(handle, &data) {
            Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Err(e) => {
                warn!("write to handle {} failed: {}", handle, e);
                -1
            }
        };

        t.send_all(&written.to_le_bytes())?;
        Ok(())
    }

    fn read(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let req = TransferRequest::decode(&receive_array(t)?);
        let handle = usize::from(req.handle);

        let chunk = match self.handles.read(handle, req.length as usize) {
            Ok(chunk) => chunk,
            Err(handles::Error::Handle(e)) => return self.refuse(t, e),
            Err(handles::Error::Io(e)) => {
                warn!("read from handle {} failed: {}", handle, e);
                Default::default()
            }
        };

        self.send_chunk(t, chunk.data, chunk.eof)
    }

    fn gets(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let req = TransferRequest::decode(&receive_array(t)?);
        let handle = usize::from(req.handle);

        let (line, eof) = match self.handles.read_line(handle, req.length as usize) {
            Ok(Some(line)) => (Some(line.data), line.eof),
            Ok(None) => (None, req.length > 0),
            Err(handles::Error::Handle(e)) => return self.refuse(t, e),
            Err(handles::Error::Io(e)) => {
                warn!("read from handle {} failed: {}", handle, e);
                (None, false)
            }
        };

        // The client sees a C string: everything up to the first NUL.
        let data = match line {
            Some(mut data) => {
                if let Some(nul) = data.iter().position(|b| *b == 0) {
                    data.truncate(nul);
                }
                data.push(0);
                data
            }
            None => Vec::new(),
        };

        self.send_chunk(t, data, eof)
    }

    fn refuse(&mut self, t: &mut dyn Transport, e: HandleError) -> Result<(), Error> {
        debug!("read refused: {}", e);
        let reply = ReadReply {
            status: e.code().into(),
            ..Default::default()
        };
        t.send_all(&reply.encode())?;
        Ok(())
    }

    fn send_chunk(&mut self, t: &mut dyn Transport, data: Vec<u8>, eof: bool) -> Result<(), Error> {
        let reply = ReadReply {
            status: if eof { 4 } else { 0 },
            crc16: crc16(&data, 0),
            length: data.len() as u32,
        };
        t.send_all(&reply.encode())?;

        if data.is_empty() {
            return Ok(());
        }
        deliver(t, &data, Ack::Byte)
    }

    fn seek(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let req = SeekRequest::decode(&receive_array(t)?);
        let handle = usize::from(req.handle);

        let code = match self.handles.seek(handle, Whence::from(req.mode), req.offset) {
            Ok(_) => 0,
            Err(handles::Error::Handle(e)) => e.code(),
            Err(handles::Error::Io(e)) => {
                debug!("seek on handle {} failed: {}", handle, e);
                3
            }
        };

        t.send_all(&[code])?;
        Ok(())
    }

    fn tell(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let handle = t.receive_u8()?;

        let pos: i32 = match self.handles.tell(handle.into()) {
            Ok(pos) => i32::try_from(pos).unwrap_or(-1),
            Err(handles::Error::Handle(HandleError::NotOpen)) => -1,
            Err(handles::Error::Handle(HandleError::OutOfRange)) => -2,
            Err(handles::Error::Io(e)) => {
                debug!("tell on handle {} failed: {}", handle, e);
                -1
            }
        };

        t.send_all(&pos.to_le_bytes())?;
        Ok(())
    }

    /// Sends a step record and, for a hit, the name once the client asks.
    fn send_step(&mut self, t: &mut dyn Transport, step: Step) -> Result<(), Error> {
        t.send_all(&step.record().encode())?;

        if let Step::Found(entry) = step {
            let go = t.receive_u8()?;
            if go != ACCEPT {
                debug!("client declined name ({:#04x})", go);
                return Ok(());
            }
            t.send_all(entry.name.as_bytes())?;
        }

        Ok(())
    }

    fn list_first(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let wildcard = receive_short(t)?;
        let step = self.dir.first(&wildcard);
        self.send_step(t, step)
    }

    fn list_next(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let step = self.dir.next();
        self.send_step(t, step)
    }

    fn list(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let params = ListParams::decode(&receive_array(t)?);
        let wildcard = receive_short(t)?;

        let listing = match self.dir.list(&wildcard, params.offset, params.count) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("cannot list current directory: {}", e);
                let reply = ListParams {
                    count: -1,
                    offset: 0,
                };
                t.send_all(&reply.encode())?;
                return Ok(());
            }
        };

        let selected = listing.entries.len().min(i16::MAX as usize) as i16;
        let reply = ListParams {
            count: selected,
            offset: listing.total.min(i16::MAX as usize) as i16,
        };
        t.send_all(&reply.encode())?;

        if selected <= 0 {
            return Ok(());
        }

        let go = t.receive_u8()?;
        if go != ACCEPT {
            debug!("client declined listing ({:#04x})", go);
            return Ok(());
        }

        let records: Vec<u8> = listing
            .entries
            .iter()
            .flat_map(|entry| entry.record2().encode())
            .collect();
        t.send_all(&records)?;
        Ok(())
    }

    fn stat(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let name = receive_short(t)?;
        let path = host_path(&name);

        let stat = match std::fs::metadata(&path) {
            Ok(md) => Stat::from_metadata(&md),
            Err(e) => {
                debug!("cannot stat {}: {}", path.display(), e);
                Stat::sentinel(-1)
            }
        };

        t.send_all(&stat.encode()[..Stat::SENT])?;
        Ok(())
    }

    fn change_dir(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let name = receive_short(t)?;
        let path = host_path(&name);

        let code = match std::env::set_current_dir(&path) {
            Ok(()) => {
                info!("working directory: {}", path.display());
                0
            }
            Err(e) => {
                warn!("cannot change to {}: {}", path.display(), e);
                1
            }
        };

        t.send_all(&[code])?;
        Ok(())
    }

    fn work_dir(&mut self, t: &mut dyn Transport) -> Result<(), Error> {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => cwd.to_string_lossy().into_owned().into_bytes(),
            Err(e) => {
                warn!("cannot read working directory: {}", e);
                Vec::new()
            }
        };

        let len = cwd.len().min(u8::MAX.into());
        t.send_all(&[len as u8])?;

        if len > 0 {
            sleep(WORKDIR_DELAY);
            t.send_all(&cwd[..len])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(Command::from_code(b"FXX"), None);
        assert_eq!(Command::Gets.to_string(), "FGS");
    }

    #[test]
    fn scanning() {
        assert_eq!(Command::scan(b"hello~FRSworld"), Some((5, Command::Reset)));
        assert_eq!(Command::scan(b"~FOP"), Some((0, Command::Open)));
        assert_eq!(Command::scan(b"~~FCL~FRD"), Some((1, Command::Close)));
        assert_eq!(Command::scan(b"~XYZ ~FLS"), Some((5, Command::List)));
        assert_eq!(Command::scan(b"no frames ~FR"), None);
        assert_eq!(Command::scan(b""), None);
    }

    #[test]
    fn requests() {
        assert!(!Command::Reset.has_request());
        assert!(!Command::ListNext.has_request());
        assert!(!Command::WorkDir.has_request());
        assert_eq!(Command::ALL.iter().filter(|c| c.has_request()).count(), 12);
    }

    #[test]
    fn timeouts() {
        let e: Error = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(matches!(e, Error::Timeout));

        let e: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(e, Error::Io(_)));
    }
}
