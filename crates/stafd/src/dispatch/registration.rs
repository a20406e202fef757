//! Local processes registering and releasing handles.

use tracing::debug;

use staf_proto::{ReadWire, ReturnCode, WireError, WriteWire};

use crate::transport::WireStream;

use super::DISPATCH_TARGET;
use super::table::{ApiContext, Disposition};

/// Replies with a return code and the new handle, 0 on failure.
pub(super) fn register(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    let pid = stream.read_uint()?;
    let name = stream.read_string()?;
    let (rc, handle) = match context.router.handles().register(pid, &name) {
        Ok(handle) => (ReturnCode::Ok, handle),
        Err(rc) => (rc, 0),
    };
    debug!(target: DISPATCH_TARGET, pid, name = %name, handle, rc = %rc, "handle registration");
    stream.write_rc(rc)?;
    stream.write_uint(handle)?;
    Ok(Disposition::Done)
}

pub(super) fn unregister(
    context: &ApiContext<'_>,
    stream: &mut dyn WireStream,
) -> Result<Disposition, WireError> {
    let pid = stream.read_uint()?;
    let handle = stream.read_uint()?;
    let rc = context.router.handles().unregister(handle, pid);
    debug!(target: DISPATCH_TARGET, pid, handle, rc = %rc, "handle unregistration");
    stream.write_rc(rc)?;
    Ok(Disposition::Done)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use stafd_config::SocketEndpoint;

    use super::*;
    use crate::copy::test_support::Duplex;
    use crate::router::test_support::router;
    use crate::transport::{Peer, SocketProvider};

    #[rstest]
    fn handles_are_registered_then_released_by_their_process() {
        let router = router(5);
        let provider = SocketProvider::local(&SocketEndpoint::unix("/tmp/stafd-test/reg.sock"));
        let context = ApiContext {
            router: &router,
            peer: Peer {
                provider: &provider,
                logical_id: "local",
                physical_id: "local",
            },
            level: 0,
        };

        let mut script = Vec::new();
        script.write_uint(77).expect("encode");
        script.write_string("worker").expect("encode");
        let mut stream = Duplex::replying(script);
        register(&context, &mut stream).expect("register");
        let mut written = stream.written();
        assert_eq!(written.read_rc().expect("rc"), ReturnCode::Ok);
        let handle = written.read_uint().expect("handle");
        assert_eq!(router.handles().name(handle).as_deref(), Some("worker"));

        let mut script = Vec::new();
        script.write_uint(78).expect("encode");
        script.write_uint(handle).expect("encode");
        let mut stream = Duplex::replying(script);
        unregister(&context, &mut stream).expect("unregister");
        assert_ne!(stream.written().read_rc().expect("rc"), ReturnCode::Ok);
        assert!(router.handles().exists(handle));

        let mut script = Vec::new();
        script.write_uint(77).expect("encode");
        script.write_uint(handle).expect("encode");
        let mut stream = Duplex::replying(script);
        unregister(&context, &mut stream).expect("unregister");
        assert_eq!(stream.written().read_rc().expect("rc"), ReturnCode::Ok);
        assert!(!router.handles().exists(handle));
    }
}
