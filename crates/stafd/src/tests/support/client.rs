//! Minimal wire client used by end-to-end scenarios.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use staf_proto::{Api, ReadWire, ReturnCode, SyncMode, WriteWire};

use crate::dispatch::open_legacy_api;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Level at which local requests are submitted.
const LOCAL_REQUEST_LEVEL: u32 = 2;

/// Opens one connection per API call, as real clients do.
pub enum Client<'a> {
    /// A process on this machine talking over the `local` interface.
    Local(&'a Path),
    /// A peer daemon reaching the `tcp` interface.
    Remote(u16),
}

impl Client<'_> {
    fn open(&self) -> Box<dyn Stream> {
        match self {
            Self::Local(path) => {
                let stream = UnixStream::connect(path).expect("connect local socket");
                stream
                    .set_read_timeout(Some(CLIENT_TIMEOUT))
                    .expect("read timeout");
                Box::new(stream)
            }
            Self::Remote(port) => {
                let stream = TcpStream::connect(("127.0.0.1", *port)).expect("connect tcp");
                stream
                    .set_read_timeout(Some(CLIENT_TIMEOUT))
                    .expect("read timeout");
                Box::new(stream)
            }
        }
    }

    /// Registers a handle for `pid`.
    pub fn register(&self, pid: u32, name: &str) -> (ReturnCode, u32) {
        let mut stream = self.open();
        let ack = open_legacy_api(&mut *stream, Api::ProcessRegistration, 0).expect("open");
        assert_eq!(ack, ReturnCode::Ok);
        stream.write_uint(pid).expect("pid");
        stream.write_string(name).expect("name");
        stream.flush().expect("flush");
        let rc = stream.read_rc().expect("rc");
        let handle = stream.read_uint().expect("handle");
        (rc, handle)
    }

    /// Submits a synchronous request from a registered handle.
    pub fn submit(
        &self,
        pid: u32,
        handle: u32,
        target: &str,
        service: &str,
        request: &str,
    ) -> (ReturnCode, String) {
        let mut stream = self.open();
        let ack = open_legacy_api(&mut *stream, Api::LocalServiceRequest, LOCAL_REQUEST_LEVEL)
            .expect("open");
        assert_eq!(ack, ReturnCode::Ok);
        for word in [SyncMode::Sync.to_wire(), pid, handle] {
            stream.write_uint(word).expect("word");
        }
        for text in [target, service, request] {
            stream.write_string(text).expect("text");
        }
        stream.flush().expect("flush");
        read_result(&mut *stream)
    }

    /// Forwards a request the way an old peer does, without identity.
    pub fn forward(&self, service: &str, request: &str) -> (ReturnCode, String) {
        let mut stream = self.open();
        let ack = open_legacy_api(&mut *stream, Api::RemoteServiceRequest, 0).expect("open");
        assert_eq!(ack, ReturnCode::Ok);
        stream.write_string("peer").expect("machine");
        stream.write_uint(1).expect("handle");
        stream.write_string("scenario").expect("handle name");
        stream.write_string(service).expect("service");
        stream.write_string(request).expect("request");
        stream.flush().expect("flush");
        read_result(&mut *stream)
    }
}

fn read_result(stream: &mut dyn Stream) -> (ReturnCode, String) {
    let rc = stream.read_rc().expect("rc");
    let result = stream.read_string().expect("result");
    (rc, result)
}

trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}
