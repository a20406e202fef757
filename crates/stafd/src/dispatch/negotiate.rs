//! API number and level negotiation.
//!
//! Every conversation opens with an API number and a level. Old-style APIs
//! take the level as sent and answer `Ok`. New-style APIs treat level 0 as a
//! handshake: the server answers `Ok`, reads the caller's supported range and
//! replies with the highest level both sides support. A reply of 0 means the
//! ranges do not meet.

use std::io::{Read, Write};
use std::ops::RangeInclusive;

use tracing::debug;

use staf_proto::{Api, ReadWire, ReturnCode, WireError, WriteWire};

use super::DISPATCH_TARGET;
use super::table::{ApiDescriptor, Family, descriptor};

/// Level written when no mutually supported level exists.
pub(crate) const NO_COMMON_LEVEL: u32 = 0;

/// Outcome of opening a new-style API as a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opened {
    Level(u32),
    /// The peer did not acknowledge the API at all.
    Refused(ReturnCode),
    NoCommonLevel,
}

/// Opens a new-style API on an outbound connection.
pub(crate) fn open_api<C: Read + Write + ?Sized>(
    connection: &mut C,
    api: Api,
    levels: RangeInclusive<u32>,
) -> Result<Opened, WireError> {
    connection.write_uint(api.number())?;
    connection.write_uint(0)?;
    let ack = connection.read_rc()?;
    if !ack.is_ok() {
        return Ok(Opened::Refused(ack));
    }
    connection.write_uint(*levels.start())?;
    connection.write_uint(*levels.end())?;
    Ok(match connection.read_uint()? {
        NO_COMMON_LEVEL => Opened::NoCommonLevel,
        level => Opened::Level(level),
    })
}

/// Opens an old-style API and returns the peer's acknowledgement.
pub(crate) fn open_legacy_api<C: Read + Write + ?Sized>(
    connection: &mut C,
    api: Api,
    level: u32,
) -> Result<ReturnCode, WireError> {
    connection.write_uint(api.number())?;
    connection.write_uint(level)?;
    connection.read_rc()
}

/// An inbound conversation that passed negotiation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Negotiated {
    pub(crate) descriptor: &'static ApiDescriptor,
    pub(crate) level: u32,
}

/// Server side: reads the envelope and validates it against the table.
///
/// Rejections are answered on the connection and yield `None`.
pub(crate) fn accept<C: Read + Write + ?Sized>(
    connection: &mut C,
    local: bool,
) -> Result<Option<Negotiated>, WireError> {
    let number = connection.read_uint()?;
    let level = connection.read_uint()?;
    let entry = descriptor(number);

    let (min, max) = match entry {
        Some(entry) if entry.family == Family::New && level == 0 => {
            connection.write_rc(ReturnCode::Ok)?;
            (connection.read_uint()?, connection.read_uint()?)
        }
        _ => (level, level),
    };

    let Some(entry) = entry else {
        debug!(target: DISPATCH_TARGET, api = number, "invalid API number");
        connection.write_rc(ReturnCode::InvalidApi)?;
        return Ok(None);
    };
    if max < *entry.levels.start() || min > *entry.levels.end() {
        debug!(target: DISPATCH_TARGET, api = number, min, max, "no supported API level");
        match entry.family {
            Family::New if level == 0 => connection.write_uint(NO_COMMON_LEVEL)?,
            _ => connection.write_rc(ReturnCode::InvalidApiLevel)?,
        }
        return Ok(None);
    }
    if !entry.available(local) {
        debug!(target: DISPATCH_TARGET, api = number, local, "API not available on this interface");
        connection.write_rc(ReturnCode::InvalidApi)?;
        return Ok(None);
    }

    let level = match entry.family {
        Family::Old => {
            connection.write_rc(ReturnCode::Ok)?;
            level
        }
        Family::New => {
            let agreed = max.min(*entry.levels.end());
            connection.write_uint(agreed)?;
            agreed
        }
    };
    Ok(Some(Negotiated {
        descriptor: entry,
        level,
    }))
}
