//! Remote parties asking to hear when a local handle ends.

use tracing::debug;

use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use crate::handles::NotificationEntry;
use crate::transport::WireStream;

use super::DISPATCH_TARGET;
use super::table::{ApiContext, Disposition};

/// Records a notification. Level 2 callers also send their port.
pub(super) fn register(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    stream.write_rc(ReturnCode::Ok)?;
    let handle = stream.read_uint()?;
    let machine = stream.read_string()?;
    let port = if context.level > 1 {
        stream.read_string()?
    } else {
        String::new()
    };
    let uuid = stream.read_string()?;
    let service = stream.read_string()?;
    let key = stream.read_string()?;

    let endpoint = format!("{}://{machine}{port}", context.peer.provider.name());
    debug!(
        target: DISPATCH_TARGET,
        handle,
        endpoint = %endpoint,
        service = %service,
        "termination notification added"
    );
    context.router.handles().add_notification(NotificationEntry {
        handle,
        endpoint,
        machine,
        uuid,
        service,
        key,
    });
    Ok(Disposition::Done)
}

/// Accepted for compatibility; nothing is tracked for remote handles.
pub(super) fn terminated(
    _context: &ApiContext<'_>,
    _stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    Ok(Disposition::Done)
}

pub(super) fn unregister(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    stream.write_rc(ReturnCode::Ok)?;
    let handle = stream.read_uint()?;
    let machine = stream.read_string()?;
    let uuid = stream.read_string()?;
    let service = stream.read_string()?;
    let key = stream.read_string()?;

    let entry = NotificationEntry {
        handle,
        endpoint: machine.clone(),
        machine,
        uuid,
        service,
        key,
    };
    let removed = context.router.handles().delete_notification(&entry);
    debug!(target: DISPATCH_TARGET, handle, removed, "termination notification deleted");
    Ok(Disposition::Done)
}
