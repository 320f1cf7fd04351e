//! The persistent control connection to the host process.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::codec::ControlCodec;
use super::message::{ControlMessage, DecodeError};

/// Errors on the control channel.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delivers gateway-originated messages to the host.
pub trait HostNotifier: Send + Sync {
    fn notify(&self, msg: &ControlMessage) -> Result<(), IpcError>;
}

/// Write half of the control channel. Clones share the socket.
#[derive(Clone)]
pub struct IpcSender {
    stream: Arc<Mutex<TcpStream>>,
}

impl IpcSender {
    pub fn send(&self, msg: &ControlMessage) -> Result<(), IpcError> {
        let bytes = ControlCodec::encode(msg)?;
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.write_all(&bytes)?;
        stream.flush()?;
        tracing::debug!(header = msg.header(), "sent control message");
        Ok(())
    }
}

impl HostNotifier for IpcSender {
    fn notify(&self, msg: &ControlMessage) -> Result<(), IpcError> {
        self.send(msg)
    }
}

/// Read half of the control channel and its receive loop.
pub struct IpcBridge {
    stream: TcpStream,
    sender: IpcSender,
    codec: ControlCodec,
    read_size: usize,
}

impl IpcBridge {
    /// Connect to the host listening on `addr`.
    pub fn connect(addr: SocketAddr, read_size: usize, max_frame_len: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        tracing::info!(%addr, "connected to host");
        Self::from_stream(stream, read_size, max_frame_len)
    }

    pub fn from_stream(stream: TcpStream, read_size: usize, max_frame_len: usize) -> io::Result<Self> {
        let sender = IpcSender {
            stream: Arc::new(Mutex::new(stream.try_clone()?)),
        };
        Ok(Self {
            stream,
            sender,
            codec: ControlCodec::new(max_frame_len),
            read_size: read_size.max(1),
        })
    }

    pub fn sender(&self) -> IpcSender {
        self.sender.clone()
    }

    /// Run the receive loop on a thread named `wtlink-ipc`.
    pub fn spawn<F>(self, handler: F) -> io::Result<JoinHandle<Result<(), IpcError>>>
    where
        F: FnMut(ControlMessage) + Send + 'static,
    {
        thread::Builder::new()
            .name("wtlink-ipc".into())
            .spawn(move || self.run(handler))
    }

    /// Read and dispatch messages until the host closes the channel.
    ///
    /// Malformed messages are logged and dropped. Read errors end the loop.
    pub fn run<F>(mut self, mut handler: F) -> Result<(), IpcError>
    where
        F: FnMut(ControlMessage),
    {
        let mut chunk = vec![0u8; self.read_size];
        loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::info!("host closed the control channel");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "control channel read failed");
                    return Err(e.into());
                }
            };
            self.codec.feed(&chunk[..n]);

            while let Some(result) = self.codec.next_message() {
                match result {
                    Ok(msg) => {
                        tracing::debug!(header = msg.header(), "received control message");
                        handler(msg);
                    }
                    Err(DecodeError::UnknownHeader(header)) => {
                        tracing::warn!(header, "invalid control message header");
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed control message"),
                }
            }
        }
    }
}
