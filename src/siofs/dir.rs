// SPDX-License-Identifier: Apache-2.0

//! Directory listings of the current host directory.

use super::wire::{DirEntry, DirEntry2, Stat};

use std::fs::{self, ReadDir};
use std::io;

use glob::{MatchOptions, Pattern};
use log::debug;

/// Longest wildcard kept, in bytes.
pub const WILDCARD_MAX: usize = 128;

/// `DirEntry.size` when the directory cannot be opened or nothing is open.
pub const UNAVAILABLE: i32 = -1;

/// `DirEntry.size` once the listing is over.
pub const EXHAUSTED: i32 = -2;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// How a cursor step treats an entry that does not match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Each step looks at exactly one entry and a miss ends the listing.
    SingleCandidate,
    /// Each step skips ahead to the next match.
    FullScan,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::SingleCandidate
    }
}

/// `;`-separated shell patterns.
#[derive(Clone, Debug, Default)]
pub struct Wildcard {
    raw: String,
    patterns: Vec<Pattern>,
}

impl Wildcard {
    /// Parses wildcard bytes from the device, stopping at a NUL.
    pub fn new(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let bytes = &bytes[..end.min(WILDCARD_MAX)];
        let raw = String::from_utf8_lossy(bytes).into_owned();

        let patterns = raw
            .split(';')
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                Pattern::new(p)
                    .or_else(|_| Pattern::new(&Pattern::escape(p)))
                    .ok()
            })
            .collect();

        Self { raw, patterns }
    }

    /// The pattern text as received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether any alternative matches `name`. An empty wildcard matches
    /// everything.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches_with(name, MATCH))
    }
}

/// A directory entry with its attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// File name, lossily converted
    pub name: String,
    /// Size, date and flags
    pub stat: Stat,
}

impl Entry {
    fn read(entry: &fs::DirEntry) -> io::Result<Self> {
        let md = fs::metadata(entry.path())?;
        Ok(Self {
            name: entry.file_name().to_string_lossy().into_owned(),
            stat: Stat::from_metadata(&md),
        })
    }

    /// Single-step record; the name goes out separately.
    pub fn record(&self) -> DirEntry {
        DirEntry {
            stat: self.stat,
            length: self.name.len().min(u16::MAX as usize) as u16,
        }
    }

    /// Paged record with the name inline.
    pub fn record2(&self) -> DirEntry2 {
        DirEntry2::new(self.stat, self.name.as_bytes())
    }

    fn accepted(&self, wildcard: &Wildcard) -> bool {
        self.stat.is_dir() || wildcard.matches(&self.name)
    }
}

/// Outcome of a cursor step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The next matching entry.
    Found(Entry),
    /// No more entries; the cursor is closed.
    Exhausted,
    /// No listing in progress, or the directory could not be read.
    Unavailable,
}

impl Step {
    /// The record sent for this step.
    pub fn record(&self) -> DirEntry {
        match self {
            Step::Found(entry) => entry.record(),
            Step::Exhausted => DirEntry {
                stat: Stat::sentinel(EXHAUSTED),
                length: 0,
            },
            Step::Unavailable => DirEntry {
                stat: Stat::sentinel(UNAVAILABLE),
                length: 0,
            },
        }
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Entries inside the requested window
    pub entries: Vec<Entry>,
    /// Every match in the directory, not just this page.
    pub total: usize,
}

/// The FLF/FLN cursor over the current directory.
#[derive(Debug, Default)]
pub struct Directory {
    cursor: Option<ReadDir>,
    wildcard: Wildcard,
    policy: Policy,
}

impl Directory {
    /// A closed cursor that steps with `policy`.
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Whether a listing is in progress.
    pub fn is_open(&self) -> bool {
        self.cursor.is_some()
    }

    /// Drops any listing in progress.
    pub fn close(&mut self) {
        self.cursor = None;
    }

    /// Starts a listing of the current directory.
    pub fn first(&mut self, wildcard: &[u8]) -> Step {
        self.cursor = None;
        self.wildcard = Wildcard::new(wildcard);

        match fs::read_dir(".") {
            Ok(cursor) => self.cursor = Some(cursor),
            Err(e) => {
                debug!("cannot list current directory: {}", e);
                return Step::Unavailable;
            }
        }

        self.next()
    }

    /// Continues the listing started by [`Directory::first`].
    pub fn next(&mut self) -> Step {
        let step = match self.cursor.as_mut() {
            None => return Step::Unavailable,
            Some(cursor) => scan(cursor, &self.wildcard, self.policy),
        };

        if !matches!(step, Step::Found(_)) {
            self.cursor = None;
        }

        step
    }

    /// Matches `[offset, offset + count)` out of a full scan. The window is
    /// signed: a negative offset shifts it so fewer entries are selected.
    pub fn list(&mut self, wildcard: &[u8], offset: i16, count: i16) -> io::Result<Listing> {
        self.cursor = None;
        let wildcard = Wildcard::new(wildcard);

        let start = i64::from(offset);
        let end = start + i64::from(count);

        let mut listing = Listing::default();
        for entry in fs::read_dir(".")? {
            let entry = match entry.and_then(|e| Entry::read(&e)) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.accepted(&wildcard) {
                continue;
            }

            let index = listing.total as i64;
            listing.total += 1;
            if (start..end).contains(&index) {
                listing.entries.push(entry);
            }
        }

        Ok(listing)
    }
}

fn scan(cursor: &mut ReadDir, wildcard: &Wildcard, policy: Policy) -> Step {
    for entry in cursor {
        // read_dir never yields "." or "..".
        match entry.and_then(|e| Entry::read(&e)) {
            Ok(entry) if entry.accepted(wildcard) => return Step::Found(entry),
            Ok(entry) => debug!("{:?} does not match {:?}", entry.name, wildcard.as_str()),
            Err(e) => debug!("skipping unreadable entry: {}", e),
        }

        if policy == Policy::SingleCandidate {
            return Step::Exhausted;
        }
    }

    Step::Exhausted
}
