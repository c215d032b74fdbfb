//! Traffic proxy tests

use std::net::SocketAddr;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use revlay::filesys::file::File;
use revlay::proxy::manager::ProxyManager;
use revlay::storage::state::ActivePortState;

/// Backend that greets with `tag` and then echoes
async fn spawn_backend(tag: u8) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                if stream.write_all(&[tag]).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

async fn greeting(addr: SocketAddr) -> (TcpStream, u8) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut tag = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut tag))
        .await
        .unwrap()
        .unwrap();
    (stream, tag[0])
}

#[tokio::test]
async fn test_proxy_follows_state_file() {
    let dir = TempDir::new().unwrap();
    let port_a = spawn_backend(b'A').await;
    let port_b = spawn_backend(b'B').await;

    let state_path = dir.path().join(".state/active_port");
    let state = ActivePortState::new(File::new(&state_path));
    state.write(port_a).await.unwrap();

    let manager = ProxyManager::start("127.0.0.1:0", state_path.clone(), port_b)
        .await
        .unwrap();
    let addr = manager.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(manager.run(async move {
        let _ = shutdown_rx.await;
    }));

    let (mut old_conn, tag) = greeting(addr).await;
    assert_eq!(tag, b'A');

    state.write(port_b).await.unwrap();

    let mut switched = false;
    for _ in 0..50 {
        let (_conn, tag) = greeting(addr).await;
        if tag == b'B' {
            switched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(switched, "proxy never switched to the new backend");

    // The connection opened before the switch still talks to A
    old_conn.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    old_conn.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"ping");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_state_uses_and_persists_fallback() {
    let dir = TempDir::new().unwrap();
    let port = spawn_backend(b'F').await;
    let state_path = dir.path().join(".state/active_port");

    let manager = ProxyManager::start("127.0.0.1:0", state_path.clone(), port)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&state_path).unwrap().trim(),
        port.to_string()
    );

    let addr = manager.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(manager.run(async move {
        let _ = shutdown_rx.await;
    }));

    let (_conn, tag) = greeting(addr).await;
    assert_eq!(tag, b'F');

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_garbage_state_keeps_target() {
    let dir = TempDir::new().unwrap();
    let port = spawn_backend(b'K').await;
    let state_path = dir.path().join(".state/active_port");
    let state_file = File::new(&state_path);
    state_file.write_string(&port.to_string()).await.unwrap();

    let manager = ProxyManager::start("127.0.0.1:0", state_path.clone(), 1)
        .await
        .unwrap();
    let proxy = manager.proxy();
    let addr = manager.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(manager.run(async move {
        let _ = shutdown_rx.await;
    }));

    state_file.write_atomic(b"not-a-port").await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(proxy.target().await, format!("localhost:{}", port));
    let (_conn, tag) = greeting(addr).await;
    assert_eq!(tag, b'K');

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dead_backend_drops_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let live = spawn_backend(b'L').await;
    let state_path = dir.path().join(".state/active_port");
    let state = ActivePortState::new(File::new(&state_path));
    state.write(closed).await.unwrap();

    let manager = ProxyManager::start("127.0.0.1:0", state_path, live)
        .await
        .unwrap();
    let proxy = manager.proxy();
    let addr = manager.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(manager.run(async move {
        let _ = shutdown_rx.await;
    }));

    let mut doomed = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(10), doomed.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    // Listener still serves once the target is fixed
    proxy.switch_target(format!("localhost:{}", live)).await;
    let (_conn, tag) = greeting(addr).await;
    assert_eq!(tag, b'L');

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
