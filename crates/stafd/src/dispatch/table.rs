//! Read-only table of the APIs a connection may open.

use std::fmt;
use std::ops::RangeInclusive;

use staf_proto::{Api, WireError};

use crate::router::Router;
use crate::transport::{Peer, WireStream};

use super::{registration, service_request, termination, transfer};

/// How an API negotiates its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    /// The level is taken as sent and acknowledged with `Ok`.
    Old,
    /// Level 0 opens a range negotiation.
    New,
}

/// Everything a handler needs besides the stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ApiContext<'a> {
    pub(crate) router: &'a Router,
    pub(crate) peer: Peer<'a>,
    /// Level agreed during negotiation.
    pub(crate) level: u32,
}

/// What the daemon does once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Done,
    /// The reply is written; stop the daemon.
    Shutdown,
}

impl Disposition {
    pub(crate) fn from_shutdown(shutdown: bool) -> Self {
        if shutdown { Self::Shutdown } else { Self::Done }
    }
}

pub(crate) type ApiHandler =
    fn(&ApiContext<'_>, &mut dyn WireStream) -> Result<Disposition, WireError>;

/// One row of the table.
pub(crate) struct ApiDescriptor {
    pub(crate) api: Api,
    pub(crate) family: Family,
    pub(crate) levels: RangeInclusive<u32>,
    /// Reachable through the local interface.
    pub(crate) local: bool,
    /// Reachable through network interfaces.
    pub(crate) remote: bool,
    pub(crate) handler: ApiHandler,
}

impl ApiDescriptor {
    pub(crate) fn available(&self, local: bool) -> bool {
        if local { self.local } else { self.remote }
    }
}

impl fmt::Debug for ApiDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiDescriptor")
            .field("api", &self.api)
            .field("family", &self.family)
            .field("levels", &self.levels)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

static TABLE: [ApiDescriptor; 11] = [
    ApiDescriptor {
        api: Api::LocalServiceRequest,
        family: Family::Old,
        levels: 2..=2,
        local: true,
        remote: false,
        handler: service_request::local,
    },
    ApiDescriptor {
        api: Api::RemoteServiceRequest,
        family: Family::Old,
        levels: 0..=0,
        local: false,
        remote: true,
        handler: service_request::remote_v1,
    },
    ApiDescriptor {
        api: Api::ProcessRegistration,
        family: Family::Old,
        levels: 0..=0,
        local: true,
        remote: false,
        handler: registration::register,
    },
    ApiDescriptor {
        api: Api::ProcessUnregistration,
        family: Family::Old,
        levels: 0..=0,
        local: true,
        remote: false,
        handler: registration::unregister,
    },
    ApiDescriptor {
        api: Api::FileTransfer,
        family: Family::Old,
        levels: 0..=0,
        local: true,
        remote: true,
        handler: transfer::legacy_file,
    },
    ApiDescriptor {
        api: Api::FileTransferV2,
        family: Family::New,
        levels: 1..=3,
        local: true,
        remote: true,
        handler: transfer::file,
    },
    ApiDescriptor {
        api: Api::DirectoryCopy,
        family: Family::New,
        levels: 1..=4,
        local: true,
        remote: true,
        handler: transfer::directory,
    },
    ApiDescriptor {
        api: Api::RemoteServiceRequestV2,
        family: Family::New,
        levels: 2..=2,
        local: false,
        remote: true,
        handler: service_request::remote_v2,
    },
    ApiDescriptor {
        api: Api::HandleTerminationRegistration,
        family: Family::New,
        levels: 1..=2,
        local: false,
        remote: true,
        handler: termination::register,
    },
    ApiDescriptor {
        api: Api::RemoteHandleTerminated,
        family: Family::New,
        levels: 1..=1,
        local: false,
        remote: true,
        handler: termination::terminated,
    },
    ApiDescriptor {
        api: Api::HandleTerminationUnregistration,
        family: Family::New,
        levels: 1..=1,
        local: false,
        remote: true,
        handler: termination::unregister,
    },
];

/// Row for `number`, or `None` beyond the table.
pub(crate) fn descriptor(number: u32) -> Option<&'static ApiDescriptor> {
    usize::try_from(number)
        .ok()
        .and_then(|index| TABLE.get(index))
}
