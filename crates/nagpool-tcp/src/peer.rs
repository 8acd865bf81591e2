//! Worker side: connect to a coordinator and serve it

use std::io::{BufReader, LineWriter};
use std::net::{TcpStream, ToSocketAddrs};

use anyhow::Context;
use nagpool::{PeerExit, PeerHandle, PeerRuntime, Searcher};

pub struct PeerConnection {
    runtime: PeerRuntime,
    reader: BufReader<TcpStream>,
}

pub fn connect_peer<A, S>(addr: A, searcher: S) -> anyhow::Result<PeerConnection>
where
    A: ToSocketAddrs,
    S: Searcher + 'static,
{
    let stream = TcpStream::connect(addr).context("connecting to coordinator")?;
    stream.set_nodelay(true).context("set_nodelay")?;
    let write_half = stream.try_clone().context("cloning stream")?;
    Ok(PeerConnection {
        runtime: PeerRuntime::new(searcher, LineWriter::new(write_half)),
        reader: BufReader::new(stream),
    })
}

impl PeerConnection {
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.runtime = self.runtime.with_protocol_version(version);
        self
    }

    pub fn handle(&self) -> PeerHandle {
        self.runtime.handle()
    }

    /// Serves until the coordinator ends the session or the connection drops.
    pub fn run(self) -> anyhow::Result<PeerExit> {
        self.runtime.run(self.reader)
    }
}
