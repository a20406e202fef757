//! Trust checks for inbound copies.
//!
//! Both the daemon pushing the data (the source) and the daemon whose
//! request started the copy (the requester) need trust level 4 here. Newer
//! senders transmit an identity block naming the requester's credentials
//! and instance UUIDs; older ones send machine names only, which are checked
//! without credentials.

use std::io::{Read, Write};

use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use crate::handles::{Authentication, NO_AUTHENTICATOR};
use crate::endpoint::SPEC_SEPARATOR;
use crate::identity::{LOCAL_MACHINE, is_local_target};
use crate::router::Router;
use crate::services::{ServiceRequest, ServiceResult};
use crate::transport::{ConnectionProvider, Peer};
use crate::trust::TrustQuery;

/// Trust level both parties of a copy must hold.
pub(crate) const COPY_TRUST_LEVEL: u32 = 4;

/// Requester identity carried by newer copy senders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdentityBlock {
    pub(crate) handle: u32,
    pub(crate) authentication: Authentication,
    pub(crate) interface: String,
    pub(crate) logical_id: String,
    pub(crate) physical_id: String,
    /// Instance UUID of the daemon the request originated on.
    pub(crate) origin_uuid: String,
    /// Instance UUID of the daemon sending the data.
    pub(crate) source_uuid: String,
}

impl IdentityBlock {
    pub(crate) fn read<C: Read + ?Sized>(connection: &mut C) -> Result<Self, WireError> {
        let handle = connection.read_uint()?;
        let authentication = Authentication {
            authenticator: connection.read_string()?,
            user: connection.read_string()?,
            data: connection.read_string()?,
        };
        Ok(Self {
            handle,
            authentication,
            interface: connection.read_string()?,
            logical_id: connection.read_string()?,
            physical_id: connection.read_string()?,
            origin_uuid: connection.read_string()?,
            source_uuid: connection.read_string()?,
        })
    }

    pub(crate) fn write<C: Write + ?Sized>(&self, connection: &mut C) -> Result<(), WireError> {
        connection.write_uint(self.handle)?;
        connection.write_string(&self.authentication.authenticator)?;
        connection.write_string(&self.authentication.user)?;
        connection.write_string(&self.authentication.data)?;
        connection.write_string(&self.interface)?;
        connection.write_string(&self.logical_id)?;
        connection.write_string(&self.physical_id)?;
        connection.write_string(&self.origin_uuid)?;
        connection.write_string(&self.source_uuid)
    }
}

/// Identity block describing `request` as sent over `provider`.
///
/// Credentials whose authenticator requires a secure link are replaced by
/// the anonymous identity on insecure transports.
pub(crate) fn outbound_identity(
    router: &Router,
    request: &ServiceRequest,
    provider: &dyn ConnectionProvider,
) -> IdentityBlock {
    let authentication = if router
        .services()
        .authenticators()
        .requires_secure(&request.authenticator)
        && !provider.is_secure()
    {
        Authentication::anonymous()
    } else {
        Authentication {
            authenticator: request.authenticator.clone(),
            user: request.user_id.clone(),
            data: request.auth_data.clone(),
        }
    };
    IdentityBlock {
        handle: request.handle,
        authentication,
        interface: request.interface.clone(),
        logical_id: request.logical_id.clone(),
        physical_id: request.physical_id.clone(),
        origin_uuid: request.instance_uuid.clone(),
        source_uuid: router.identity().instance_uuid().to_owned(),
    }
}

#[derive(Debug, Clone)]
struct Party {
    interface: String,
    logical_id: String,
    physical_id: String,
}

impl Party {
    fn local() -> Self {
        Self {
            interface: LOCAL_MACHINE.to_owned(),
            logical_id: LOCAL_MACHINE.to_owned(),
            physical_id: LOCAL_MACHINE.to_owned(),
        }
    }

    fn level(&self, router: &Router, authentication: &Authentication) -> u32 {
        router.trust().trust_level(&TrustQuery {
            interface: &self.interface,
            logical_id: &self.logical_id,
            physical_id: &self.physical_id,
            authenticator: &authentication.authenticator,
            user_id: &authentication.user,
        })
    }

    fn describe(&self) -> String {
        format!(
            "{0}://{1} ({0}://{2})",
            self.interface, self.logical_id, self.physical_id
        )
    }
}

fn denied(detail: String) -> ServiceResult {
    ServiceResult::error(
        ReturnCode::AccessDenied,
        format!("Trust level {COPY_TRUST_LEVEL} required for FS COPY request.\n{detail}"),
    )
}

/// Decides whether `peer` may write to this machine on behalf of
/// `origin_machine`.
pub(crate) fn authorize(
    router: &Router,
    peer: &Peer<'_>,
    origin_machine: &str,
    block: Option<IdentityBlock>,
) -> ServiceResult {
    match block {
        Some(block) => authorize_identified(router, peer, block),
        None => authorize_by_machine(router, peer, origin_machine),
    }
}

fn authorize_identified(router: &Router, peer: &Peer<'_>, block: IdentityBlock) -> ServiceResult {
    let mut authentication = block.authentication;
    if !authentication
        .authenticator
        .eq_ignore_ascii_case(NO_AUTHENTICATOR)
    {
        let verified = router.services().authenticators().authenticate_remote(
            peer.logical_id,
            block.handle,
            &mut authentication,
        );
        if !verified.is_ok() {
            authentication = Authentication::anonymous();
        }
    }
    let identity = router.identity();
    if identity.is_self(&block.origin_uuid) && !router.settings().strict_fs_copy_trust() {
        return ServiceResult::ok("");
    }

    let source = if identity.is_self(&block.source_uuid) {
        Party::local()
    } else {
        Party {
            interface: peer.provider.name().to_owned(),
            logical_id: peer.logical_id.to_owned(),
            physical_id: peer.physical_id.to_owned(),
        }
    };
    let target = peer.provider.logical_id();
    let user = format!("{}://{}", authentication.authenticator, authentication.user);
    let level = source.level(router, &authentication);
    if level < COPY_TRUST_LEVEL {
        return denied(format!(
            "Source machine/user has trust level {level} on TOMACHINE {target}\n\
             Source machine: {}\nSource user   : {user}",
            source.describe()
        ));
    }

    let origin = if identity.is_self(&block.origin_uuid) {
        Party::local()
    } else if block.origin_uuid == block.source_uuid {
        source
    } else {
        let interface = if block.logical_id == LOCAL_MACHINE {
            block.interface
        } else {
            peer.provider.name().to_owned()
        };
        Party {
            interface,
            logical_id: block.logical_id,
            physical_id: block.physical_id,
        }
    };
    let level = origin.level(router, &authentication);
    if level < COPY_TRUST_LEVEL {
        return denied(format!(
            "Requesting machine/user has trust level {level} on TOMACHINE {target}\n\
             Requesting machine: {}\nRequesting user   : {user}",
            origin.describe()
        ));
    }
    ServiceResult::ok("")
}

fn authorize_by_machine(router: &Router, peer: &Peer<'_>, origin_machine: &str) -> ServiceResult {
    let target = peer.provider.logical_id();
    let interface = peer.provider.name();
    if !is_local_target(origin_machine) {
        let source = Party {
            interface: interface.to_owned(),
            logical_id: peer.logical_id.to_owned(),
            physical_id: peer.physical_id.to_owned(),
        };
        let level = source.level(router, &Authentication::anonymous());
        if level < COPY_TRUST_LEVEL {
            return denied(format!(
                "Source machine has trust level {level} on TOMACHINE {target}\n\
                 Source machine: {}",
                source.describe()
            ));
        }
    }
    let origin = if origin_machine.contains(SPEC_SEPARATOR) {
        origin_machine.to_owned()
    } else {
        format!("{interface}{SPEC_SEPARATOR}{origin_machine}")
    };
    let level = router.trust().trust_for_machine(&origin);
    if level < COPY_TRUST_LEVEL {
        return denied(format!(
            "Requesting machine has trust level {level} on TOMACHINE {target}\n\
             Requesting machine: {origin}"
        ));
    }
    ServiceResult::ok("")
}
