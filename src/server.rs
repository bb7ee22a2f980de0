//! The listening server: accept loop, optional TLS, graceful stop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::conn::{ClientStream, Conn};
use crate::mux::Mux;
use crate::{Error, Result};

/// Callback invoked with the connection id after a connection has fully
/// closed.
pub type OnCloseFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Server configuration.
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Bound on each transport read; an expired deadline terminates the
    /// connection.
    pub read_timeout: Option<Duration>,
    /// Bound on each response write.
    pub write_timeout: Option<Duration>,
    /// Let handler panics unwind into the request task instead of being
    /// caught and logged. Helpful when debugging a handler.
    pub disable_panic_recovery: bool,
    /// Invoked after each connection closes.
    pub on_close: Option<OnCloseFn>,
}

/// An ldap server. Attach a router with [`Server::router`], then [`run`]
/// it; [`stop`] shuts it down without abandoning in-flight requests.
///
/// [`run`]: Server::run
/// [`stop`]: Server::stop
pub struct Server {
    options: ServerOptions,
    router: ArcSwap<Mux>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    next_conn_id: AtomicU64,
    local_addr: StdMutex<Option<SocketAddr>>,
    conn_wg_tx: StdMutex<Option<mpsc::Sender<()>>>,
    conn_wg_rx: Mutex<mpsc::Receiver<()>>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (wg_tx, wg_rx) = mpsc::channel(1);
        Server {
            options,
            router: ArcSwap::from_pointee(Mux::new()),
            shutdown_tx,
            started: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(0),
            local_addr: StdMutex::new(None),
            conn_wg_tx: StdMutex::new(Some(wg_tx)),
            conn_wg_rx: Mutex::new(wg_rx),
        }
    }

    /// Swap the router used for connections accepted from now on.
    pub fn router(&self, mux: Arc<Mux>) {
        self.router.store(mux);
    }

    /// True once the listener is bound.
    pub fn ready(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The bound listener address, once [`Server::ready`] is true. With port
    /// 0 in the run address this is where the server actually listens.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("addr lock poisoned")
    }

    /// Listen on `addr` (`host:port`; empty host means every interface,
    /// bare IPv6 hosts are bracketed automatically) and serve plaintext
    /// connections until [`Server::stop`].
    pub async fn run(&self, addr: &str) -> Result<()> {
        self.run_inner(addr, None).await
    }

    /// Like [`Server::run`], with every accepted connection wrapped in TLS
    /// before serving. Client certificates are required when `tls_config`
    /// carries a client verifier (see [`crate::tls::server_config_mtls`]).
    pub async fn run_with_tls(
        &self,
        addr: &str,
        tls_config: Arc<rustls::ServerConfig>,
    ) -> Result<()> {
        self.run_inner(addr, Some(TlsAcceptor::from(tls_config))).await
    }

    async fn run_inner(&self, addr: &str, acceptor: Option<TlsAcceptor>) -> Result<()> {
        const OP: &str = "server.run";
        let addr = parse_listen_addr(addr)?;
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock().expect("addr lock poisoned") = Some(local);
        self.started.store(true, Ordering::SeqCst);
        info!(addr = %local, tls = acceptor.is_some(), "{OP}: listening");

        let wg_tx = self
            .conn_wg_tx
            .lock()
            .expect("wg lock poisoned")
            .clone()
            .ok_or_else(|| Error::InvalidState(format!("{OP}: server already stopped")))?;
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                debug!("{OP}: shutdown signal observed, accept loop exiting");
                return Ok(());
            }
            let (socket, peer) = tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(err = %e, "{OP}: accept failed");
                        continue;
                    }
                },
            };
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(conn = conn_id, peer = %peer, "{OP}: connection accepted");

            let acceptor = acceptor.clone();
            let router = self.router.load_full();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let options = self.options.clone();
            let tracker = wg_tx.clone();
            tokio::spawn(async move {
                let _tracker = tracker;
                let stream = match acceptor {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(tls) => ClientStream::Tls(tls),
                        Err(e) => {
                            error!(conn = conn_id, peer = %peer, err = %e, "tls handshake failed");
                            return;
                        }
                    },
                    None => ClientStream::Tcp(socket),
                };
                let mut conn = Conn::new(
                    shutdown_rx,
                    conn_id,
                    stream,
                    router,
                    options.read_timeout,
                    options.write_timeout,
                    options.disable_panic_recovery,
                    options.on_close,
                );
                if let Err(e) = conn.serve_requests().await {
                    error!(conn = conn_id, peer = %peer, err = %e, "error serving connection");
                }
                conn.close().await;
            });
        }
    }

    /// Raise the shutdown signal and wait until the accept loop and every
    /// connection task (including their in-flight requests) have finished.
    /// Stopping a server that never ran is an error.
    pub async fn stop(&self) -> Result<()> {
        const OP: &str = "server.stop";
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(format!(
                "{OP}: server was never started"
            )));
        }
        debug!("{OP}: shutting down");
        let _ = self.shutdown_tx.send(true);
        // Drop the origin sender; the receiver drains to None once the
        // accept loop and all connection tasks release their clones.
        drop(self.conn_wg_tx.lock().expect("wg lock poisoned").take());
        let mut rx = self.conn_wg_rx.lock().await;
        while rx.recv().await.is_some() {}
        debug!("{OP}: stopped");
        Ok(())
    }
}

/// Validate and normalize a `host:port` listen address. The port is
/// required; an empty host listens on every interface. A bare IPv6 host is
/// only unambiguous when it carries a %zone (the zone never contains a
/// colon), and is then bracketed; any other unbracketed IPv6 input reads as
/// an address with no port and is rejected.
fn parse_listen_addr(addr: &str) -> Result<String> {
    const OP: &str = "server.parse_listen_addr";
    if let Some(bracket_end) = addr.rfind(']') {
        // Already-bracketed IPv6: require a :port suffix.
        match addr[bracket_end + 1..].strip_prefix(':') {
            Some(port) if port.parse::<u16>().is_ok() => return Ok(addr.to_string()),
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: missing or invalid port in {addr:?}"
                )))
            }
        }
    }
    // "::1" or "2001:db8::1:389" would split into nonsense at the last
    // colon; an unbracketed port-carrying IPv6 host must be bracketed.
    if is_bare_ipv6(addr) {
        return Err(Error::InvalidParameter(format!(
            "{OP}: address {addr:?} is missing a port (bracket the host as [host]:port)"
        )));
    }
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(Error::InvalidParameter(format!(
            "{OP}: address {addr:?} is missing a port"
        )));
    };
    if port.parse::<u16>().is_err() {
        return Err(Error::InvalidParameter(format!(
            "{OP}: invalid port {port:?} in {addr:?}"
        )));
    }
    if host.is_empty() {
        return Ok(format!("0.0.0.0:{port}"));
    }
    if host.contains(':') {
        if !is_bare_ipv6(host) {
            return Err(Error::InvalidParameter(format!(
                "{OP}: ambiguous host in {addr:?} (bracket the host as [host]:port)"
            )));
        }
        // Bare IPv6 host with a %zone.
        return Ok(format!("[{host}]:{port}"));
    }
    Ok(addr.to_string())
}

/// True when `s` is an unbracketed IPv6 address, optionally with a %zone.
fn is_bare_ipv6(s: &str) -> bool {
    let host = match s.split_once('%') {
        Some((host, zone)) => {
            if zone.is_empty() || zone.contains(':') {
                return false;
            }
            host
        }
        None => s,
    };
    host.parse::<std::net::Ipv6Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_addr_ipv4() {
        assert_eq!(parse_listen_addr("127.0.0.1:389").unwrap(), "127.0.0.1:389");
        assert_eq!(parse_listen_addr("0.0.0.0:1389").unwrap(), "0.0.0.0:1389");
    }

    #[test]
    fn test_parse_listen_addr_hostname() {
        assert_eq!(
            parse_listen_addr("localhost:1389").unwrap(),
            "localhost:1389"
        );
    }

    #[test]
    fn test_parse_listen_addr_empty_host() {
        assert_eq!(parse_listen_addr(":1389").unwrap(), "0.0.0.0:1389");
    }

    #[test]
    fn test_parse_listen_addr_bare_ipv6_with_zone_bracketed() {
        assert_eq!(
            parse_listen_addr("fe80::1%eth0:389").unwrap(),
            "[fe80::1%eth0]:389"
        );
    }

    #[test]
    fn test_parse_listen_addr_bare_ipv6_without_port_rejected() {
        // "::1" reads as an address with no port, not as host ":" port "1".
        assert!(matches!(
            parse_listen_addr("::1"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_listen_addr("2001:db8::1"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_listen_addr("fe80::1%eth0"),
            Err(Error::InvalidParameter(_))
        ));
        // Without a zone the port position is ambiguous; brackets required.
        assert!(matches!(
            parse_listen_addr("::1:389"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_listen_addr("2001:db8::1:389"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_parse_listen_addr_already_bracketed() {
        assert_eq!(parse_listen_addr("[::1]:389").unwrap(), "[::1]:389");
        assert!(parse_listen_addr("[::1]").is_err());
        assert!(parse_listen_addr("[::1]:").is_err());
    }

    #[test]
    fn test_parse_listen_addr_missing_port() {
        assert!(matches!(
            parse_listen_addr("127.0.0.1"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_listen_addr("127.0.0.1:notaport"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_listen_addr("127.0.0.1:99999"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_run_is_invalid_state() {
        let server = Server::new(ServerOptions::default());
        assert!(matches!(
            server.stop().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_new_server_not_ready() {
        let server = Server::new(ServerOptions::default());
        assert!(!server.ready());
        assert!(server.local_addr().is_none());
    }
}
