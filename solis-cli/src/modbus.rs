//! Modbus TCP register transport
//!
//! Synchronous `tokio-modbus` client used by the `poll` command. Socket
//! errors are mapped onto the poller's timeout/reset classes so that its
//! retry policy applies.

use solis_log::poller::{RegisterTransport, TransportError};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio_modbus::client::sync::{self, Reader};
use tokio_modbus::Slave;

/// Input register reader over one TCP connection at a time
pub struct ModbusTcpTransport {
    host: String,
    port: u16,
    slave: Slave,
    timeout: Duration,
    context: Option<sync::Context>,
}

impl ModbusTcpTransport {
    pub fn new(host: impl Into<String>, port: u16, slave_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            slave: Slave(slave_id),
            timeout,
            context: None,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr, TransportError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| classify(&e))?
            .next()
            .ok_or_else(|| TransportError::Other(format!("no address found for {}", self.host)))
    }
}

/// Map a socket error onto the poller's retry classes
fn classify(e: &io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Reset,
        _ => TransportError::Other(e.to_string()),
    }
}

impl RegisterTransport for ModbusTcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.socket_addr()?;
        log::debug!("Connecting to {} (unit {})", addr, self.slave.0);
        let context = sync::tcp::connect_slave_with_timeout(addr, self.slave, Some(self.timeout))
            .map_err(|e| classify(&e))?;
        self.context = Some(context);
        Ok(())
    }

    fn read_input_registers(&mut self, first: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| TransportError::Other("not connected".to_string()))?;
        match context.read_input_registers(first, count) {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(TransportError::Other(format!(
                "exception reading ({}, {}): {}",
                first,
                first + count,
                exception
            ))),
            Err(tokio_modbus::Error::Transport(e)) => Err(classify(&e)),
            Err(e) => Err(TransportError::Other(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.context = None;
    }
}
