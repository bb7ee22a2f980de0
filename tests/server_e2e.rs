//! End-to-end tests: a live server driven by a real LDAP client (`ldap3`)
//! where a client operation exists, and by raw BER exchanges where the
//! property under test concerns wire bytes.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ldapserve::ber::{self, Class, Packet};
use ldapserve::codes;
use ldapserve::{Mux, ResponseOptions, Server, ServerOptions};

const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=org";
const ALICE_PASSWORD: &str = "password";

async fn start_server(mux: Mux, options: ServerOptions) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(Server::new(options));
    server.router(Arc::new(mux));
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.run("127.0.0.1:0").await;
    });
    for _ in 0..200 {
        if server.ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let addr = server.local_addr().expect("server must be ready");
    (server, addr)
}

fn password_check_mux() -> Mux {
    let mux = Mux::new();
    mux.bind(|w, req| async move {
        let code = match req.get_simple_bind_message() {
            Ok(m) if m.user_name == ALICE_DN && m.password == ALICE_PASSWORD => {
                codes::RESULT_SUCCESS
            }
            _ => codes::RESULT_INVALID_CREDENTIALS,
        };
        let resp = req.new_bind_response(ResponseOptions::new().with_response_code(code));
        let _ = w.write(&resp).await;
    })
    .unwrap();
    mux
}

fn bind_request_bytes(message_id: i64, dn: &str, password: &str) -> Vec<u8> {
    Packet::sequence()
        .with_child(Packet::integer(message_id))
        .with_child(
            Packet::constructed(Class::Application, codes::APPLICATION_BIND_REQUEST)
                .with_child(Packet::integer(3))
                .with_child(Packet::octet_string(dn))
                .with_child(Packet::context(0, password.as_bytes().to_vec())),
        )
        .encode()
}

fn search_request_bytes(message_id: i64, base: &str, attr: &str) -> Vec<u8> {
    Packet::sequence()
        .with_child(Packet::integer(message_id))
        .with_child(
            Packet::constructed(Class::Application, codes::APPLICATION_SEARCH_REQUEST)
                .with_child(Packet::octet_string(base))
                .with_child(Packet::enumerated(2))
                .with_child(Packet::enumerated(0))
                .with_child(Packet::integer(0))
                .with_child(Packet::integer(0))
                .with_child(Packet::boolean(false))
                .with_child(Packet::context(7, attr.as_bytes().to_vec()))
                .with_child(Packet::sequence()),
        )
        .encode()
}

/// Read one BER frame off a raw socket.
async fn read_frame(stream: &mut TcpStream) -> Result<Option<Packet>> {
    let mut buf = bytes::BytesMut::with_capacity(1024);
    loop {
        if let Some(frame) = ber::take_message_bytes(&mut buf)? {
            return Ok(Some(Packet::decode(&frame)?));
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_buf(&mut buf)).await??;
        if n == 0 {
            return Ok(None);
        }
    }
}

#[tokio::test]
async fn test_simple_bind_success() -> Result<()> {
    let (server, addr) = start_server(password_check_mux(), ServerOptions::default()).await;

    let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    let res = ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?;
    assert_eq!(res.rc, 0);

    let res = ldap.simple_bind(ALICE_DN, "wrong-password").await?;
    assert_eq!(res.rc, u32::from(codes::RESULT_INVALID_CREDENTIALS));

    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_anonymous_bind_configurable() -> Result<()> {
    async fn run_case(allow_anonymous: bool) -> Result<u32> {
        let mux = Mux::new();
        mux.bind(move |w, req| async move {
            let code = match req.get_simple_bind_message() {
                Ok(m) if m.password.is_empty() && allow_anonymous => codes::RESULT_SUCCESS,
                Ok(m) if m.password.is_empty() => codes::RESULT_INVALID_CREDENTIALS,
                _ => codes::RESULT_INVALID_CREDENTIALS,
            };
            let resp = req.new_bind_response(ResponseOptions::new().with_response_code(code));
            let _ = w.write(&resp).await;
        })
        .unwrap();
        let (server, addr) = start_server(mux, ServerOptions::default()).await;
        let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
        ldap3::drive!(conn);
        let res = ldap.simple_bind("", "").await?;
        ldap.unbind().await?;
        server.stop().await?;
        Ok(res.rc)
    }

    assert_eq!(run_case(true).await?, 0);
    assert_eq!(
        run_case(false).await?,
        u32::from(codes::RESULT_INVALID_CREDENTIALS)
    );
    Ok(())
}

#[tokio::test]
async fn test_search_returns_entries_then_done() -> Result<()> {
    let mux = password_check_mux();
    mux.search(
        |w, req| async move {
            let mut alice = HashMap::new();
            alice.insert("cn".to_string(), vec!["alice".to_string()]);
            alice.insert("mail".to_string(), vec!["alice@example.org".to_string()]);
            let entry = req
                .new_search_response_entry(ALICE_DN, ResponseOptions::new().with_attributes(alice));
            let _ = w.write(&entry).await;

            let mut second = req.new_search_response_entry(
                "uid=alice2,ou=people,dc=example,dc=org",
                ResponseOptions::new(),
            );
            second.add_attribute("cn", vec!["alice2".to_string()]);
            let _ = w.write(&second).await;

            let done = req.new_search_done_response(ResponseOptions::new());
            let _ = w.write(&done).await;
        },
        ldapserve::SearchRouteOptions::new().with_base_dn("ou=people,dc=example,dc=org"),
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?.success()?;

    let (entries, res) = ldap
        .search(
            "ou=people,dc=example,dc=org",
            Scope::Subtree,
            "(uid=alice)",
            vec!["cn", "mail"],
        )
        .await?
        .success()?;
    assert_eq!(res.rc, 0);
    assert_eq!(entries.len(), 2);
    let first = SearchEntry::construct(entries.into_iter().next().unwrap());
    assert_eq!(first.dn, ALICE_DN);
    assert_eq!(first.attrs["cn"], vec!["alice".to_string()]);
    assert_eq!(first.attrs["mail"], vec!["alice@example.org".to_string()]);

    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_no_matching_route_answers_unwilling() -> Result<()> {
    // No routes and no default: the framework itself must answer.
    let (server, addr) = start_server(Mux::new(), ServerOptions::default()).await;
    let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    let res = ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?;
    assert_eq!(res.rc, u32::from(codes::RESULT_UNWILLING_TO_PERFORM));
    assert_eq!(res.text, "No matching handler found");
    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_route_registration_order_wins() -> Result<()> {
    let mux = Mux::new();
    mux.bind(|w, req| async move {
        let resp = req.new_bind_response(
            ResponseOptions::new()
                .with_response_code(codes::RESULT_SUCCESS)
                .with_diagnostic_message("first"),
        );
        let _ = w.write(&resp).await;
    })
    .unwrap();
    mux.bind(|w, req| async move {
        let resp = req.new_bind_response(
            ResponseOptions::new()
                .with_response_code(codes::RESULT_BUSY)
                .with_diagnostic_message("second"),
        );
        let _ = w.write(&resp).await;
    })
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    let res = ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?;
    assert_eq!(res.rc, 0);
    assert_eq!(res.text, "first");
    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_message_id_fidelity_raw() -> Result<()> {
    let (server, addr) = start_server(password_check_mux(), ServerOptions::default()).await;

    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&bind_request_bytes(7, ALICE_DN, ALICE_PASSWORD))
        .await?;
    let response = read_frame(&mut stream).await?.expect("bind response");
    assert_eq!(response.children[0].as_i64()?, 7);
    assert_eq!(
        response.children[1].tag,
        codes::APPLICATION_BIND_RESPONSE
    );
    assert_eq!(response.children[1].children[0].as_i64()?, 0);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_pipelined_requests_keep_packets_whole() -> Result<()> {
    // Two searches pipelined on one connection; handlers run concurrently
    // and every frame must decode cleanly with its own request's id.
    let mux = Mux::new();
    mux.search(
        |w, req| async move {
            for i in 0..8 {
                let mut entry = req.new_search_response_entry(
                    format!("uid=u{i},ou=people,dc=example,dc=org"),
                    ResponseOptions::new(),
                );
                entry.add_attribute("cn", vec![format!("user-{i}"); 16]);
                let _ = w.write(&entry).await;
                tokio::task::yield_now().await;
            }
            let done = req.new_search_done_response(ResponseOptions::new());
            let _ = w.write(&done).await;
        },
        ldapserve::SearchRouteOptions::new(),
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await?;
    let mut pipelined = search_request_bytes(101, "dc=example,dc=org", "objectClass");
    pipelined.extend_from_slice(&search_request_bytes(102, "dc=example,dc=org", "objectClass"));
    stream.write_all(&pipelined).await?;

    let mut done = HashSet::new();
    let mut entries = 0usize;
    while done.len() < 2 {
        let frame = read_frame(&mut stream).await?.expect("response frame");
        let id = frame.children[0].as_i64()?;
        assert!(id == 101 || id == 102, "unexpected message id {id}");
        match frame.children[1].tag {
            codes::APPLICATION_SEARCH_RESULT_ENTRY => entries += 1,
            codes::APPLICATION_SEARCH_RESULT_DONE => {
                assert!(done.insert(id), "duplicate done for {id}");
            }
            other => panic!("unexpected application tag {other}"),
        }
    }
    assert_eq!(entries, 16);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_envelope_closes_without_response() -> Result<()> {
    let (server, addr) = start_server(password_check_mux(), ServerOptions::default()).await;

    // Not a sequence at all.
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&Packet::octet_string("junk").encode())
        .await?;
    assert!(read_frame(&mut stream).await?.is_none(), "expected close");

    // A sequence with a single child.
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&Packet::sequence().with_child(Packet::integer(1)).encode())
        .await?;
    assert!(read_frame(&mut stream).await?.is_none(), "expected close");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_inner_decode_error_answers_protocol_error() -> Result<()> {
    let (server, addr) = start_server(password_check_mux(), ServerOptions::default()).await;

    // Intact envelope, but a bind request with ldap version 2.
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&{
            Packet::sequence()
                .with_child(Packet::integer(5))
                .with_child(
                    Packet::constructed(Class::Application, codes::APPLICATION_BIND_REQUEST)
                        .with_child(Packet::integer(2))
                        .with_child(Packet::octet_string(ALICE_DN))
                        .with_child(Packet::context(0, b"pw".to_vec())),
                )
                .encode()
        })
        .await?;
    let response = read_frame(&mut stream).await?.expect("protocol error reply");
    assert_eq!(response.children[0].as_i64()?, 5);
    assert_eq!(response.children[1].tag, codes::APPLICATION_BIND_RESPONSE);
    assert_eq!(
        response.children[1].children[0].as_i64()?,
        i64::from(codes::RESULT_PROTOCOL_ERROR)
    );

    // The connection survives; a valid bind still works.
    stream
        .write_all(&bind_request_bytes(6, ALICE_DN, ALICE_PASSWORD))
        .await?;
    let response = read_frame(&mut stream).await?.expect("bind response");
    assert_eq!(response.children[0].as_i64()?, 6);
    assert_eq!(response.children[1].children[0].as_i64()?, 0);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_modify_replace_then_search_sees_change() -> Result<()> {
    type Directory = Arc<Mutex<HashMap<String, HashMap<String, Vec<String>>>>>;
    let directory: Directory = Arc::new(Mutex::new(HashMap::new()));
    {
        let mut attrs = HashMap::new();
        attrs.insert("mail".to_string(), vec!["bob@old".to_string()]);
        directory
            .lock()
            .unwrap()
            .insert("uid=bob,ou=people,dc=example,dc=org".to_string(), attrs);
    }

    let mux = password_check_mux();
    let modify_dir = directory.clone();
    mux.modify(move |w, req| {
        let directory = modify_dir.clone();
        async move {
            let code = match req.get_modify_message() {
                Ok(m) => {
                    let mut dir = directory.lock().unwrap();
                    match dir.get_mut(&m.dn) {
                        Some(attrs) => {
                            for change in &m.changes {
                                attrs.insert(
                                    change.modification.name.clone(),
                                    change.modification.values.clone(),
                                );
                            }
                            codes::RESULT_SUCCESS
                        }
                        None => codes::RESULT_NO_SUCH_OBJECT,
                    }
                }
                Err(_) => codes::RESULT_OPERATIONS_ERROR,
            };
            let resp = req.new_modify_response(ResponseOptions::new().with_response_code(code));
            let _ = w.write(&resp).await;
        }
    })
    .unwrap();
    let search_dir = directory.clone();
    mux.search(
        move |w, req| {
            let directory = search_dir.clone();
            async move {
                let base = match req.get_search_message() {
                    Ok(m) => m.base_dn.clone(),
                    Err(_) => String::new(),
                };
                let found = directory.lock().unwrap().get(&base).cloned();
                if let Some(attrs) = found {
                    let entry = req.new_search_response_entry(
                        base,
                        ResponseOptions::new().with_attributes(attrs),
                    );
                    let _ = w.write(&entry).await;
                }
                let done = req.new_search_done_response(ResponseOptions::new());
                let _ = w.write(&done).await;
            }
        },
        ldapserve::SearchRouteOptions::new(),
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let (conn, mut ldap) = LdapConnAsync::new(&format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?.success()?;

    let mut new_mail = HashSet::new();
    new_mail.insert("bob@new");
    ldap.modify(
        "uid=bob,ou=people,dc=example,dc=org",
        vec![Mod::Replace("mail", new_mail)],
    )
    .await?
    .success()?;

    let (entries, _) = ldap
        .search(
            "uid=bob,ou=people,dc=example,dc=org",
            Scope::Base,
            "(objectClass=*)",
            vec!["mail"],
        )
        .await?
        .success()?;
    assert_eq!(entries.len(), 1);
    let entry = SearchEntry::construct(entries.into_iter().next().unwrap());
    assert_eq!(entry.attrs["mail"], vec!["bob@new".to_string()]);

    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_starttls_upgrade_then_bind() -> Result<()> {
    let tls_config = ldapserve::tls::server_config_from_pem(
        include_bytes!("fixtures/server-cert.pem"),
        include_bytes!("fixtures/server-key.pem"),
    )?;

    let mux = password_check_mux();
    let handler_config = tls_config.clone();
    mux.extended_operation(
        move |w, req| {
            let tls_config = handler_config.clone();
            async move {
                // The framework writes the success response and swaps the
                // transport; only the failure path answers here.
                if let Err(e) = req.start_tls(tls_config).await {
                    let resp = req.new_extended_response(
                        ResponseOptions::new()
                            .with_response_code(codes::RESULT_OPERATIONS_ERROR)
                            .with_diagnostic_message(e.to_string()),
                    );
                    let _ = w.write(&resp).await;
                }
            }
        },
        codes::EXTENDED_OPERATION_START_TLS,
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let settings = LdapConnSettings::new().set_starttls(true).set_no_tls_verify(true);
    let (conn, mut ldap) =
        LdapConnAsync::with_settings(settings, &format!("ldap://{addr}")).await?;
    ldap3::drive!(conn);
    let res = ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?;
    assert_eq!(res.rc, 0);
    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_starttls_handshake_failure_answers_operations_error() -> Result<()> {
    let tls_config = ldapserve::tls::server_config_from_pem(
        include_bytes!("fixtures/server-cert.pem"),
        include_bytes!("fixtures/server-key.pem"),
    )?;

    let mux = password_check_mux();
    let handler_config = tls_config.clone();
    mux.extended_operation(
        move |_w, req| {
            let tls_config = handler_config.clone();
            async move {
                let _ = req.start_tls(tls_config).await;
            }
        },
        codes::EXTENDED_OPERATION_START_TLS,
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await?;
    let request = Packet::sequence()
        .with_child(Packet::integer(4))
        .with_child(
            Packet::constructed(Class::Application, codes::APPLICATION_EXTENDED_REQUEST)
                .with_child(Packet::context(
                    0,
                    codes::EXTENDED_OPERATION_START_TLS.as_bytes().to_vec(),
                )),
        )
        .encode();
    stream.write_all(&request).await?;

    let accept = read_frame(&mut stream).await?.expect("starttls accept");
    assert_eq!(accept.children[0].as_i64()?, 4);
    assert_eq!(accept.children[1].tag, codes::APPLICATION_EXTENDED_RESPONSE);
    assert_eq!(accept.children[1].children[0].as_i64()?, 0);

    // Anything but a ClientHello fails the handshake; the server must still
    // deliver a plaintext OperationsError reply before closing.
    stream.write_all(b"this is not a tls client hello").await?;
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw)).await??;
    let mut buf = bytes::BytesMut::from(&raw[..]);
    // A fatal TLS alert record (content type 0x15) may precede the reply.
    while buf.len() >= 5 && buf[0] == 0x15 {
        let record_len = ((buf[3] as usize) << 8) | buf[4] as usize;
        if buf.len() < 5 + record_len {
            break;
        }
        let _ = buf.split_to(5 + record_len);
    }
    let frame = ber::take_message_bytes(&mut buf)?.expect("handshake error reply");
    let failure = Packet::decode(&frame)?;
    assert_eq!(failure.children[0].as_i64()?, 4);
    assert_eq!(failure.children[1].tag, codes::APPLICATION_EXTENDED_RESPONSE);
    assert_eq!(
        failure.children[1].children[0].as_i64()?,
        i64::from(codes::RESULT_OPERATIONS_ERROR)
    );
    assert!(!failure.children[1].children[2].data.is_empty());
    // read_to_end returning means the server closed the connection.
    assert!(buf.is_empty(), "unexpected trailing bytes after reply");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_ldaps_listener() -> Result<()> {
    let tls_config = ldapserve::tls::server_config_from_pem(
        include_bytes!("fixtures/server-cert.pem"),
        include_bytes!("fixtures/server-key.pem"),
    )?;

    let server = Arc::new(Server::new(ServerOptions::default()));
    server.router(Arc::new(password_check_mux()));
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.run_with_tls("127.0.0.1:0", tls_config).await;
    });
    for _ in 0..200 {
        if server.ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let addr = server.local_addr().expect("server must be ready");

    let settings = LdapConnSettings::new().set_no_tls_verify(true);
    let (conn, mut ldap) =
        LdapConnAsync::with_settings(settings, &format!("ldaps://{addr}")).await?;
    ldap3::drive!(conn);
    let res = ldap.simple_bind(ALICE_DN, ALICE_PASSWORD).await?;
    assert_eq!(res.rc, 0);
    ldap.unbind().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_graceful_stop_waits_for_inflight_requests() -> Result<()> {
    let mux = Mux::new();
    mux.bind(|w, req| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let resp = req.new_bind_response(
            ResponseOptions::new().with_response_code(codes::RESULT_SUCCESS),
        );
        let _ = w.write(&resp).await;
    })
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(&bind_request_bytes(3, ALICE_DN, ALICE_PASSWORD))
        .await?;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let stop_started = Instant::now();
    let stop_server = server.clone();
    let stop_task = tokio::spawn(async move { stop_server.stop().await });

    // The in-flight handler's response must still be delivered.
    let response = read_frame(&mut stream).await?.expect("bind response");
    assert_eq!(response.children[0].as_i64()?, 3);
    assert_eq!(response.children[1].children[0].as_i64()?, 0);

    stop_task.await??;
    let elapsed = stop_started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(30),
        "stop returned before the handler finished ({elapsed:?})"
    );

    // The port is released once stop returns.
    let rebind = tokio::net::TcpListener::bind(addr).await;
    assert!(rebind.is_ok(), "port not released: {rebind:?}");
    Ok(())
}

#[tokio::test]
async fn test_on_close_callback_fires() -> Result<()> {
    let closed: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let cb_closed = closed.clone();
    let options = ServerOptions {
        on_close: Some(Arc::new(move |conn_id| {
            cb_closed.lock().unwrap().push(conn_id);
        })),
        ..Default::default()
    };
    let (server, addr) = start_server(password_check_mux(), options).await;

    {
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(&bind_request_bytes(1, ALICE_DN, ALICE_PASSWORD))
            .await?;
        let _ = read_frame(&mut stream).await?;
    }
    server.stop().await?;
    let closed = closed.lock().unwrap().clone();
    assert_eq!(closed, vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_is_contained() -> Result<()> {
    let mux = Mux::new();
    mux.bind(|_w, _req| async move {
        panic!("handler exploded");
    })
    .unwrap();
    mux.search(
        |w, req| async move {
            let done = req.new_search_done_response(ResponseOptions::new());
            let _ = w.write(&done).await;
        },
        ldapserve::SearchRouteOptions::new(),
    )
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await?;
    // The bind handler panics and writes nothing; the connection (and
    // server) keep serving subsequent requests.
    stream
        .write_all(&bind_request_bytes(1, ALICE_DN, ALICE_PASSWORD))
        .await?;
    stream
        .write_all(&search_request_bytes(2, "dc=example,dc=org", "objectClass"))
        .await?;
    let response = read_frame(&mut stream).await?.expect("search done");
    assert_eq!(response.children[0].as_i64()?, 2);
    assert_eq!(
        response.children[1].tag,
        codes::APPLICATION_SEARCH_RESULT_DONE
    );

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_operation_reaches_default_route() -> Result<()> {
    let mux = Mux::new();
    mux.default_route(|w, req| async move {
        let resp = req.new_response(
            ResponseOptions::new()
                .with_response_code(codes::RESULT_UNWILLING_TO_PERFORM)
                .with_diagnostic_message("unsupported operation"),
        );
        let _ = w.write(&resp).await;
    })
    .unwrap();

    let (server, addr) = start_server(mux, ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await?;
    // A CompareRequest has no typed decoder and no compare route; it lands
    // on the default route as an unknown extended operation.
    let compare = Packet::sequence()
        .with_child(Packet::integer(9))
        .with_child(
            Packet::constructed(Class::Application, codes::APPLICATION_COMPARE_REQUEST)
                .with_child(Packet::octet_string("uid=x,dc=example,dc=org"))
                .with_child(
                    Packet::sequence()
                        .with_child(Packet::octet_string("cn"))
                        .with_child(Packet::octet_string("x")),
                ),
        )
        .encode();
    stream.write_all(&compare).await?;
    let response = read_frame(&mut stream).await?.expect("default response");
    assert_eq!(response.children[0].as_i64()?, 9);
    assert_eq!(
        response.children[1].tag,
        codes::APPLICATION_EXTENDED_RESPONSE
    );
    assert_eq!(
        response.children[1].children[0].as_i64()?,
        i64::from(codes::RESULT_UNWILLING_TO_PERFORM)
    );

    server.stop().await?;
    Ok(())
}
