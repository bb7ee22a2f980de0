//! Connection lifecycle: the framed read loop, per-request handler dispatch,
//! in-band TLS upgrades and graceful close.
//!
//! One [`Conn`] serves one accepted socket. Requests are read off the wire
//! serially; each decoded request runs its handler in its own task, and the
//! socket writer is shared behind a mutex so concurrent handlers interleave
//! only at whole-packet granularity.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use crate::ber::{self, Packet};
use crate::codes;
use crate::message::Message;
use crate::mux::Mux;
use crate::request::Request;
use crate::response::{error_response_packet, ResponseWriter};
use crate::server::OnCloseFn;
use crate::{Error, Result};

/// Client transport: plain TCP or TLS, so one server loop handles ldap://,
/// ldaps:// and StartTLS upgrades.
pub enum ClientStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

pub(crate) enum ClientReadHalf {
    Tcp(OwnedReadHalf),
    Tls(ReadHalf<TlsStream<TcpStream>>),
    /// Placeholder while an upgrade owns the transport; reads fail.
    Detached,
}

pub(crate) enum ClientWriteHalf {
    Tcp(OwnedWriteHalf),
    Tls(WriteHalf<TlsStream<TcpStream>>),
}

impl ClientStream {
    fn into_split(self) -> (ClientReadHalf, ClientWriteHalf) {
        match self {
            ClientStream::Tcp(s) => {
                let (r, w) = s.into_split();
                (ClientReadHalf::Tcp(r), ClientWriteHalf::Tcp(w))
            }
            ClientStream::Tls(s) => {
                let (r, w) = tokio::io::split(s);
                (ClientReadHalf::Tls(r), ClientWriteHalf::Tls(w))
            }
        }
    }
}

fn reunite(read: ClientReadHalf, write: ClientWriteHalf) -> Result<ClientStream> {
    match (read, write) {
        (ClientReadHalf::Tcp(r), ClientWriteHalf::Tcp(w)) => r
            .reunite(w)
            .map(ClientStream::Tcp)
            .map_err(|e| Error::Internal(format!("conn.reunite: mismatched tcp halves: {e}"))),
        (ClientReadHalf::Tls(r), ClientWriteHalf::Tls(w)) => Ok(ClientStream::Tls(r.unsplit(w))),
        _ => Err(Error::Internal(
            "conn.reunite: mismatched transport halves".into(),
        )),
    }
}

impl AsyncRead for ClientReadHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientReadHalf::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ClientReadHalf::Tls(s) => Pin::new(s).poll_read(cx, buf),
            ClientReadHalf::Detached => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport detached",
            ))),
        }
    }
}

impl AsyncWrite for ClientWriteHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ClientWriteHalf::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ClientWriteHalf::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientWriteHalf::Tcp(s) => Pin::new(s).poll_flush(cx),
            ClientWriteHalf::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientWriteHalf::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ClientWriteHalf::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Shared write side of a connection. `None` once the transport is closed or
/// detached; writes then fail with `NotConnected`.
pub(crate) type SharedWriter = Arc<Mutex<Option<ClientWriteHalf>>>;

/// Write one response frame under the writer mutex, so concurrent handlers
/// never interleave bytes of distinct packets.
pub(crate) async fn write_frame(
    writer: &SharedWriter,
    timeout: Option<Duration>,
    bytes: &[u8],
) -> Result<()> {
    let mut guard = writer.lock().await;
    let half = guard.as_mut().ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection closed",
        ))
    })?;
    let write = async {
        half.write_all(bytes).await?;
        half.flush().await
    };
    match timeout {
        Some(d) => tokio::time::timeout(d, write)
            .await
            .map_err(|_| {
                Error::Io(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            })??,
        None => write.await?,
    }
    Ok(())
}

/// An in-band StartTLS upgrade command sent from a handler to its
/// connection's pump, which owns the transport.
pub(crate) struct TlsUpgrade {
    pub config: Arc<rustls::ServerConfig>,
    pub message_id: i64,
    pub done: oneshot::Sender<Result<()>>,
}

enum PumpEvent {
    Shutdown,
    Upgrade(TlsUpgrade),
    Read(Result<Option<Vec<u8>>>),
}

pub(crate) struct Conn {
    conn_id: u64,
    reader: ClientReadHalf,
    writer: SharedWriter,
    buf: BytesMut,
    router: Arc<Mux>,
    shutdown: watch::Receiver<bool>,
    upgrade_tx: mpsc::Sender<TlsUpgrade>,
    upgrade_rx: mpsc::Receiver<TlsUpgrade>,
    requests_tx: mpsc::Sender<()>,
    requests_rx: mpsc::Receiver<()>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    disable_panic_recovery: bool,
    on_close: Option<OnCloseFn>,
}

impl Conn {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shutdown: watch::Receiver<bool>,
        conn_id: u64,
        stream: ClientStream,
        router: Arc<Mux>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        disable_panic_recovery: bool,
        on_close: Option<OnCloseFn>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (upgrade_tx, upgrade_rx) = mpsc::channel(1);
        let (requests_tx, requests_rx) = mpsc::channel(1);
        Conn {
            conn_id,
            reader,
            writer: Arc::new(Mutex::new(Some(writer))),
            buf: BytesMut::with_capacity(4096),
            router,
            shutdown,
            upgrade_tx,
            upgrade_rx,
            requests_tx,
            requests_rx,
            read_timeout,
            write_timeout,
            disable_panic_recovery,
            on_close,
        }
    }

    /// Serve requests until the client disconnects, the transport fails or
    /// the server's shutdown signal is raised.
    pub(crate) async fn serve_requests(&mut self) -> Result<()> {
        const OP: &str = "conn.serve_requests";
        let mut request_id: i64 = 0;
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                debug!(conn = self.conn_id, "shutdown signal observed");
                return Ok(());
            }
            let event = tokio::select! {
                _ = shutdown.changed() => PumpEvent::Shutdown,
                upgrade = self.upgrade_rx.recv() => match upgrade {
                    Some(u) => PumpEvent::Upgrade(u),
                    // All request tasks are gone; keep reading.
                    None => continue,
                },
                read = read_one(&mut self.reader, &mut self.buf, self.read_timeout) => {
                    PumpEvent::Read(read)
                }
            };
            match event {
                PumpEvent::Shutdown => {
                    debug!(conn = self.conn_id, "shutdown signal observed");
                    return Ok(());
                }
                PumpEvent::Upgrade(upgrade) => {
                    let TlsUpgrade {
                        config,
                        message_id,
                        done,
                    } = upgrade;
                    let outcome = self.upgrade_tls(config, message_id).await;
                    // An already-encrypted session got an error reply and
                    // keeps serving; any other failure already answered the
                    // client and leaves the transport unusable.
                    let fatal = outcome.is_err() && !matches!(outcome, Err(Error::InvalidState(_)));
                    let _ = done.send(outcome);
                    if fatal {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "tls upgrade failed",
                        )));
                    }
                }
                PumpEvent::Read(Ok(None)) => {
                    debug!(conn = self.conn_id, "client closed connection");
                    return Ok(());
                }
                PumpEvent::Read(Ok(Some(bytes))) => {
                    request_id += 1;
                    self.dispatch(request_id, &bytes).await?;
                }
                PumpEvent::Read(Err(e)) => {
                    // Fatal: the reader state is unknown (framing error,
                    // transport failure, deadline). Close without a reply.
                    warn!(conn = self.conn_id, err = %e, "{OP}: fatal read error");
                    return Err(e);
                }
            }
        }
    }

    /// Decode one message and run its handler in a tracked task. Inner
    /// decode failures on an intact envelope answer ProtocolError and keep
    /// the connection; envelope failures propagate and close it.
    async fn dispatch(&mut self, request_id: i64, bytes: &[u8]) -> Result<()> {
        const OP: &str = "conn.dispatch";
        let packet = Packet::decode(bytes)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                conn = self.conn_id,
                request = request_id,
                packet = %packet.dump(),
                "packet read"
            );
        }
        let message = match Message::from_packet(&packet) {
            Ok(m) => m,
            Err(e @ Error::Malformed(_)) => return Err(e),
            Err(e) => {
                // The envelope already validated, so the id and request tag
                // are readable; tell the client and keep serving.
                let message_id = Message::validate_envelope(&packet)?;
                let response_tag = codes::response_application_code(packet.children[1].tag);
                warn!(
                    conn = self.conn_id,
                    request = request_id,
                    err = %e,
                    "{OP}: invalid request, answering ProtocolError"
                );
                let resp = error_response_packet(
                    message_id,
                    response_tag,
                    codes::RESULT_PROTOCOL_ERROR,
                    "",
                    "failed to decode request",
                );
                write_frame(&self.writer, self.write_timeout, &resp.encode()).await?;
                return Ok(());
            }
        };

        let request = Request::new(request_id, self.conn_id, message, self.upgrade_tx.clone());
        let writer = ResponseWriter::new(
            self.writer.clone(),
            self.write_timeout,
            self.conn_id,
            request_id,
        );
        let router = self.router.clone();
        let tracker = self.requests_tx.clone();
        let disable_panic_recovery = self.disable_panic_recovery;
        let conn_id = self.conn_id;
        tokio::spawn(async move {
            let _tracker = tracker;
            let served = router.serve(writer, request);
            if disable_panic_recovery {
                served.await;
            } else if let Err(panic) = std::panic::AssertUnwindSafe(served).catch_unwind().await {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    conn = conn_id,
                    request = request_id,
                    panic = %reason,
                    "caught panic while serving request"
                );
            }
        });
        Ok(())
    }

    /// Perform a StartTLS upgrade: acknowledge with a success extended
    /// response, then run the server handshake on the reunited raw transport
    /// and rebuild both halves on the TLS stream. Serialized against packet
    /// reads because the pump itself executes it.
    async fn upgrade_tls(
        &mut self,
        config: Arc<rustls::ServerConfig>,
        message_id: i64,
    ) -> Result<()> {
        const OP: &str = "conn.upgrade_tls";
        if matches!(self.reader, ClientReadHalf::Tls(_)) {
            let resp = error_response_packet(
                message_id,
                codes::APPLICATION_EXTENDED_RESPONSE,
                codes::RESULT_OPERATIONS_ERROR,
                "",
                "session is already encrypted",
            );
            write_frame(&self.writer, self.write_timeout, &resp.encode()).await?;
            return Err(Error::InvalidState(format!(
                "{OP}: connection {} is already tls",
                self.conn_id
            )));
        }
        if !self.buf.is_empty() {
            // Plaintext pipelined past the StartTLS request cannot be
            // replayed on the upgraded stream.
            warn!(
                conn = self.conn_id,
                bytes = self.buf.len(),
                "{OP}: discarding plaintext buffered before upgrade"
            );
            self.buf.clear();
        }

        // The client starts its handshake only after reading this response,
        // which is why the pump writes it rather than the handler.
        let accept = crate::response::extended_response_packet(
            message_id,
            codes::RESULT_SUCCESS,
            Some(codes::EXTENDED_OPERATION_START_TLS),
        );
        write_frame(&self.writer, self.write_timeout, &accept.encode()).await?;

        let write_half = self.writer.lock().await.take().ok_or_else(|| {
            Error::InvalidState(format!("{OP}: transport already closed"))
        })?;
        let read_half = std::mem::replace(&mut self.reader, ClientReadHalf::Detached);
        let stream = match reunite(read_half, write_half)? {
            ClientStream::Tcp(tcp) => tcp,
            ClientStream::Tls(_) => unreachable!("upgrade only runs on tcp transports"),
        };
        let acceptor = TlsAcceptor::from(config);
        // The fallible accept hands the raw socket back on failure, so the
        // error reply below goes out in plaintext before the close.
        match acceptor.accept(stream).into_fallible().await {
            Ok(tls) => {
                let (r, w) = tokio::io::split(tls);
                self.reader = ClientReadHalf::Tls(r);
                *self.writer.lock().await = Some(ClientWriteHalf::Tls(w));
                debug!(conn = self.conn_id, "tls upgrade complete");
                Ok(())
            }
            Err((e, mut stream)) => {
                error!(conn = self.conn_id, err = %e, "{OP}: handshake failed");
                let resp = error_response_packet(
                    message_id,
                    codes::APPLICATION_EXTENDED_RESPONSE,
                    codes::RESULT_OPERATIONS_ERROR,
                    "",
                    &format!("tls handshake failed: {e}"),
                );
                let _ = stream.write_all(&resp.encode()).await;
                let _ = stream.flush().await;
                let _ = stream.shutdown().await;
                Err(Error::Io(e))
            }
        }
    }

    /// Wait for in-flight request tasks, then shut the transport down and
    /// fire the close callback.
    pub(crate) async fn close(self) {
        const OP: &str = "conn.close";
        let Conn {
            conn_id,
            writer,
            requests_tx,
            mut requests_rx,
            on_close,
            ..
        } = self;
        drop(requests_tx);
        while requests_rx.recv().await.is_some() {}
        if let Some(mut half) = writer.lock().await.take() {
            let _ = half.shutdown().await;
        }
        debug!(conn = conn_id, "{OP}: connection closed");
        if let Some(cb) = on_close {
            cb(conn_id);
        }
    }
}

/// Read exactly one TLV frame, accumulating transport reads in `buf`.
/// `Ok(None)` is clean EOF (including EOF inside a partial frame, which the
/// pump treats the way it treats "unexpected EOF": the client went away).
async fn read_one(
    reader: &mut ClientReadHalf,
    buf: &mut BytesMut,
    timeout: Option<Duration>,
) -> Result<Option<Vec<u8>>> {
    loop {
        if let Some(frame) = ber::take_message_bytes(buf)? {
            return Ok(Some(frame));
        }
        let read = reader.read_buf(buf);
        let n = match timeout {
            Some(d) => tokio::time::timeout(d, read)
                .await
                .map_err(|_| {
                    Error::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                })??,
            None => read.await?,
        };
        if n == 0 {
            if !buf.is_empty() {
                debug!(
                    bytes = buf.len(),
                    "eof inside a partial frame, discarding"
                );
            }
            return Ok(None);
        }
    }
}
