//! Inbound file and directory copies.

use staf_proto::WireError;

use crate::copy::{FileApi, receive_directory, receive_file};
use crate::transport::WireStream;

use super::table::{ApiContext, Disposition};

pub(super) fn legacy_file(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    receive_file(context.router, stream, &context.peer, FileApi::Legacy, context.level)?;
    Ok(Disposition::Done)
}

pub(super) fn file(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    receive_file(context.router, stream, &context.peer, FileApi::Current, context.level)?;
    Ok(Disposition::Done)
}

pub(super) fn directory(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    receive_directory(context.router, stream, &context.peer, context.level)?;
    Ok(Disposition::Done)
}
