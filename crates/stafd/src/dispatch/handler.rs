//! Connection handler that runs one API conversation per connection.
//!
//! The handler negotiates the API number and level against the dispatch
//! table, then hands the stream to the row's handler. A handler asking for
//! shutdown has already written its reply when the daemon is told to stop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, info};

use stafd_config::LOCAL_INTERFACE;
use staf_proto::WireError;

use crate::router::Router;
use crate::transport::{Connection, ConnectionHandler, ConnectionProvider, Peer};

use super::DISPATCH_TARGET;
use super::negotiate::accept;
use super::table::{ApiContext, Disposition};

/// Dispatches inbound connections against the API table.
#[derive(Debug)]
pub(crate) struct DispatchConnectionHandler {
    router: Arc<Router>,
}

impl DispatchConnectionHandler {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    fn serve(
        &self,
        connection: &mut Connection,
        provider: &dyn ConnectionProvider,
    ) -> Result<Disposition, WireError> {
        let logical_id = connection.logical_id().to_owned();
        let physical_id = connection.physical_id().to_owned();
        let local = provider.name() == LOCAL_INTERFACE;

        let Some(negotiated) = accept(connection, local)? else {
            return Ok(Disposition::Done);
        };
        debug!(
            target: DISPATCH_TARGET,
            api = negotiated.descriptor.api.number(),
            level = negotiated.level,
            interface = provider.name(),
            peer = %logical_id,
            "API accepted"
        );
        let context = ApiContext {
            router: &self.router,
            peer: Peer {
                provider,
                logical_id: &logical_id,
                physical_id: &physical_id,
            },
            level: negotiated.level,
        };
        (negotiated.descriptor.handler)(&context, connection)
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, mut connection: Connection, provider: Arc<dyn ConnectionProvider>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.serve(&mut connection, provider.as_ref())
        }));
        match outcome {
            Ok(Ok(Disposition::Done)) => {}
            Ok(Ok(Disposition::Shutdown)) => {
                info!(
                    target: DISPATCH_TARGET,
                    peer = connection.logical_id(),
                    "shutdown requested"
                );
                self.router.request_shutdown();
            }
            Ok(Err(error)) if error.is_closed() => {
                debug!(
                    target: DISPATCH_TARGET,
                    peer = connection.logical_id(),
                    "peer closed the connection"
                );
            }
            Ok(Err(error)) => {
                error!(
                    target: DISPATCH_TARGET,
                    peer = connection.logical_id(),
                    interface = provider.name(),
                    %error,
                    "connection failed"
                );
            }
            Err(_) => {
                error!(
                    target: DISPATCH_TARGET,
                    peer = connection.logical_id(),
                    interface = provider.name(),
                    "API handler panicked"
                );
            }
        }
    }
}
