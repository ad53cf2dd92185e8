// SPDX-License-Identifier: Apache-2.0

//! Fixed-layout SIOFS records. Everything is little endian.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// `flags` bit marking a directory.
pub const FLAG_DIRECTORY: u16 = 1 << 0;

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// A calendar timestamp as packed into 32 bits on the wire:
/// seconds 0-5, minutes 6-11, hours 12-15, day 16-20, month 21-24 and
/// years since 1980 in 25-31.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Date {
    /// Full year, 1980 to 2107
    pub year: u16,
    /// 1 to 12
    pub month: u8,
    /// 1 to 31
    pub day: u8,
    /// 0 to 15, the field is four bits wide
    pub hours: u8,
    /// 0 to 59
    pub minutes: u8,
    /// 0 to 59
    pub seconds: u8,
}

impl Date {
    /// Year zero of the packed form.
    pub const EPOCH_YEAR: u16 = 1980;

    /// Packs into the wire word. Years outside the representable range
    /// are clamped.
    pub fn pack(&self) -> u32 {
        let year = self.year.saturating_sub(Self::EPOCH_YEAR).min(0x7f);

        (u32::from(self.seconds) & 0x3f)
            | (u32::from(self.minutes) & 0x3f) << 6
            | (u32::from(self.hours) & 0x0f) << 12
            | (u32::from(self.day) & 0x1f) << 16
            | (u32::from(self.month) & 0x0f) << 21
            | u32::from(year) << 25
    }

    /// Inverse of [`Date::pack`].
    pub fn unpack(packed: u32) -> Self {
        Self {
            seconds: (packed & 0x3f) as u8,
            minutes: (packed >> 6 & 0x3f) as u8,
            hours: (packed >> 12 & 0x0f) as u8,
            day: (packed >> 16 & 0x1f) as u8,
            month: (packed >> 21 & 0x0f) as u8,
            year: (packed >> 25) as u16 + Self::EPOCH_YEAR,
        }
    }

    /// Breaks `time` down in UTC.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as libc::time_t,
            Err(_) => 0,
        };

        // SAFETY: gmtime_r only writes to the tm we hand it.
        let tm = unsafe {
            let mut tm: libc::tm = std::mem::zeroed();
            if libc::gmtime_r(&secs, &mut tm).is_null() {
                return Self::default();
            }
            tm
        };

        Self {
            year: (tm.tm_year + 1900).clamp(0, u16::MAX.into()) as u16,
            month: (tm.tm_mon + 1) as u8,
            day: tm.tm_mday as u8,
            hours: tm.tm_hour as u8,
            minutes: tm.tm_min as u8,
            seconds: tm.tm_sec as u8,
        }
    }
}

/// File attributes shared by stat replies and directory records.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes, or a negative sentinel
    pub size: i32,
    /// Modification time, see [`Date::pack`]
    pub date: u32,
    /// [`FLAG_DIRECTORY`] and nothing else so far
    pub flags: u16,
}

impl Stat {
    /// The in-memory record is 12 bytes (with trailing padding), but the
    /// device only ever receives the first 10.
    pub const SIZE: usize = 12;
    /// Bytes of the record that go on the wire.
    pub const SENT: usize = 10;

    /// Attributes of a host file. Sizes beyond `i32::MAX` saturate.
    pub fn from_metadata(md: &Metadata) -> Self {
        let date = md
            .modified()
            .map(Date::from_system_time)
            .unwrap_or_default();

        Self {
            size: i32::try_from(md.len()).unwrap_or(i32::MAX),
            date: date.pack(),
            flags: if md.is_dir() { FLAG_DIRECTORY } else { 0 },
        }
    }

    /// A record carrying only an error or end-of-listing size.
    pub fn sentinel(size: i32) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.size.to_le_bytes());
        b[4..8].copy_from_slice(&self.date.to_le_bytes());
        b[8..10].copy_from_slice(&self.flags.to_le_bytes());
        b
    }
}

/// Single-step directory record; the name follows separately.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// Attributes
    pub stat: Stat,
    /// Length of the name that follows
    pub length: u16,
}

impl DirEntry {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = self.stat.encode();
        b[10..12].copy_from_slice(&self.length.to_le_bytes());
        b
    }
}

/// Paged directory record with the name inline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirEntry2 {
    /// Attributes and name length
    pub entry: DirEntry,
    /// NUL-padded name
    pub name: [u8; Self::NAME],
}

impl DirEntry2 {
    /// Size of the name field, NUL included.
    pub const NAME: usize = 64;
    /// Encoded size in bytes.
    pub const SIZE: usize = DirEntry::SIZE + Self::NAME;

    /// Names longer than the field are cut to leave room for a NUL.
    pub fn new(stat: Stat, name: &[u8]) -> Self {
        let len = name.len().min(Self::NAME - 1);
        let mut field = [0u8; Self::NAME];
        field[..len].copy_from_slice(&name[..len]);

        Self {
            entry: DirEntry {
                stat,
                length: len as u16,
            },
            name: field,
        }
    }

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[..DirEntry::SIZE].copy_from_slice(&self.entry.encode());
        b[DirEntry::SIZE..].copy_from_slice(&self.name);
        b
    }
}

/// FOP request header: open flags and name length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    /// See [`crate::siofs::handles::Mode`]
    pub flags: u16,
    /// Name length
    pub length: u16,
}

impl OpenRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Reads the little-endian record.
    pub fn decode(b: &[u8; Self::SIZE]) -> Self {
        Self {
            flags: u16_at(b, 0),
            length: u16_at(b, 2),
        }
    }
}

/// FWR, FRD and FGS request: a handle, a checksum (writes only) and a
/// length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Handle from FOP
    pub handle: u16,
    /// CRC-16 of the data that follows a write
    pub crc16: u16,
    /// Bytes to transfer
    pub length: u32,
}

impl TransferRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Reads the little-endian record.
    pub fn decode(b: &[u8; Self::SIZE]) -> Self {
        Self {
            handle: u16_at(b, 0),
            crc16: u16_at(b, 2),
            length: u32_at(b, 4),
        }
    }
}

/// Reply header for every read flavour.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadReply {
    /// Command specific, 0 for success
    pub status: u16,
    /// CRC-16 of the payload
    pub crc16: u16,
    /// Payload length
    pub length: u32,
}

impl ReadReply {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..2].copy_from_slice(&self.status.to_le_bytes());
        b[2..4].copy_from_slice(&self.crc16.to_le_bytes());
        b[4..8].copy_from_slice(&self.length.to_le_bytes());
        b
    }
}

/// FSK request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekRequest {
    /// Handle from FOP
    pub handle: u16,
    /// See [`crate::siofs::handles::Whence`]
    pub mode: u16,
    /// Unsigned from the start, signed otherwise
    pub offset: u32,
}

impl SeekRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Reads the little-endian record.
    pub fn decode(b: &[u8; Self::SIZE]) -> Self {
        Self {
            handle: u16_at(b, 0),
            mode: u16_at(b, 2),
            offset: u32_at(b, 4),
        }
    }
}

/// FRQ request following the file name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QuickReadRequest {
    /// Most bytes to return
    pub length: u32,
    /// Where to start reading
    pub offset: u32,
}

impl QuickReadRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Reads the little-endian record.
    pub fn decode(b: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32_at(b, 0),
            offset: u32_at(b, 4),
        }
    }
}

/// FLS request parameters, and its reply with the fields reused as
/// `{selected, total}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ListParams {
    /// Window size, or `selected` in the reply
    pub count: i16,
    /// Window start, or `total` in the reply
    pub offset: i16,
}

impl ListParams {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Reads the little-endian record.
    pub fn decode(b: &[u8; Self::SIZE]) -> Self {
        Self {
            count: u16_at(b, 0) as i16,
            offset: u16_at(b, 2) as i16,
        }
    }

    /// Little-endian wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..2].copy_from_slice(&self.count.to_le_bytes());
        b[2..4].copy_from_slice(&self.offset.to_le_bytes());
        b
    }
}
