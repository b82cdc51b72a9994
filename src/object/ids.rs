//! Id spaces and allocation.
//!
//! Ids are split between the two peers:
//! ```text
//! 0                      null
//! 1                      display
//! 2 ..= 0xfeffffff       allocated by the client (request-issuing peer)
//! 0xff000000 ..= max     allocated by the server (id-issuing peer)
//! ```
//!
//! Each peer hands out ids from its own range monotonically, reusing
//! recycled ids first.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::error::{Result, WireError};

/// Id of the display object, present on every connection.
pub const DISPLAY_ID: u32 = 1;

/// First id of the client range.
pub const CLIENT_ID_MIN: u32 = 1;

/// Last id of the client range.
pub const CLIENT_ID_MAX: u32 = 0xfeff_ffff;

/// First id of the server range.
pub const SERVER_ID_MIN: u32 = 0xff00_0000;

/// Last id of the server range.
pub const SERVER_ID_MAX: u32 = 0xffff_ffff;

/// Which side of the protocol a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Issues requests and allocates from the low range.
    Client,
    /// Owns globals and allocates from the high range.
    Server,
}

impl Role {
    /// Range this peer allocates from.
    pub fn local_range(self) -> IdRange {
        match self {
            Role::Client => IdRange::Client,
            Role::Server => IdRange::Server,
        }
    }

    /// Range the other peer allocates from.
    pub fn remote_range(self) -> IdRange {
        match self {
            Role::Client => IdRange::Server,
            Role::Server => IdRange::Client,
        }
    }
}

/// One of the two disjoint id ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdRange {
    Client,
    Server,
}

impl IdRange {
    /// Range an id belongs to, `None` for the null id.
    pub fn of(id: u32) -> Option<Self> {
        match id {
            0 => None,
            CLIENT_ID_MIN..=CLIENT_ID_MAX => Some(IdRange::Client),
            _ => Some(IdRange::Server),
        }
    }

    #[inline]
    pub fn first(self) -> u32 {
        match self {
            IdRange::Client => CLIENT_ID_MIN,
            IdRange::Server => SERVER_ID_MIN,
        }
    }

    #[inline]
    pub fn last(self) -> u32 {
        match self {
            IdRange::Client => CLIENT_ID_MAX,
            IdRange::Server => SERVER_ID_MAX,
        }
    }

    #[inline]
    pub fn contains(self, id: u32) -> bool {
        (self.first()..=self.last()).contains(&id)
    }
}

/// Per-connection id allocator for the local range.
#[derive(Debug)]
pub struct IdAllocator {
    range: IdRange,
    /// Next never-used id, `None` once the range is spent.
    next: Option<u32>,
    recycled: VecDeque<u32>,
}

impl IdAllocator {
    /// Create an allocator for `role`'s local range.
    ///
    /// The client range starts after the display id.
    pub fn new(role: Role) -> Self {
        let range = role.local_range();
        let next = match range {
            IdRange::Client => DISPLAY_ID + 1,
            IdRange::Server => SERVER_ID_MIN,
        };
        Self {
            range,
            next: Some(next),
            recycled: VecDeque::new(),
        }
    }

    /// Range this allocator hands out.
    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Allocate an id, preferring the oldest recycled one.
    pub fn next_id(&mut self) -> Result<u32> {
        if let Some(id) = self.recycled.pop_front() {
            return Ok(id);
        }
        let id = self.next.ok_or(WireError::IdSpaceExhausted)?;
        self.next = if id == self.range.last() {
            None
        } else {
            Some(id + 1)
        };
        Ok(id)
    }

    /// Make `id` available again.
    ///
    /// Ids outside the local range, the display id, and ids never handed out
    /// are ignored. Returns whether the id was queued.
    pub fn recycle(&mut self, id: u32) -> bool {
        let issued = match self.next {
            Some(next) => id < next,
            None => true,
        };
        if id == DISPLAY_ID || !self.range.contains(id) || !issued || self.recycled.contains(&id) {
            return false;
        }
        self.recycled.push_back(id);
        true
    }

    /// Number of ids waiting to be reused.
    pub fn recycled_len(&self) -> usize {
        self.recycled.len()
    }
}
