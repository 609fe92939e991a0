//! Manager Module Tests
//!
//! ## Test Scopes
//! - **ShadowLockTable**: reservation, conflicts, rollback and the disabled mode.
//! - **Upstream**: mapping of transport failures onto `REPO_DOWN` / `REPO_NO_RESPONSE`.
//! - **ManagerServer**: a real Repository behind a real Manager, driven over TCP and UDP.

#[cfg(test)]
mod tests {
    use crate::config::{ManagerConfig, RepositoryConfig};
    use crate::manager::service::ManagerServer;
    use crate::manager::shadow::ShadowLockTable;
    use crate::manager::types::{SessionId, ShadowOutcome, UpstreamError};
    use crate::manager::upstream::Upstream;
    use crate::protocol::frame::{encode_body, read_frame, write_frame};
    use crate::protocol::{ClientId, Command, ErrorReason, Reply};
    use crate::repository::handlers::guarded;
    use crate::repository::service::RepositoryServer;
    use crate::repository::store::RecordStore;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    fn alice() -> ClientId {
        ClientId::new("alice")
    }

    fn bob() -> ClientId {
        ClientId::new("bob")
    }

    struct Conn {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Conn {
        async fn connect(addr: SocketAddr) -> Self {
            let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader: BufReader::new(read_half),
                writer,
            }
        }

        async fn call(&mut self, frame: &str) -> String {
            write_frame(&mut self.writer, frame).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.reader))
                .await
                .expect("reply timed out")
                .unwrap()
                .expect("connection closed")
        }
    }

    struct Cluster {
        store: Arc<RecordStore>,
        shadow: Arc<ShadowLockTable>,
        manager_tcp: SocketAddr,
        manager_udp: SocketAddr,
    }

    async fn start_cluster(shadow_locks: bool) -> Cluster {
        let store = RecordStore::new();
        let repository = RepositoryServer::bind(&RepositoryConfig::for_testing(), store.clone())
            .await
            .unwrap();
        let repository_tcp = repository.tcp_addr().unwrap();
        tokio::spawn(repository.run());

        let mut config = ManagerConfig::for_testing(repository_tcp);
        config.shadow_locks = shadow_locks;
        start_manager(store, &config).await
    }

    async fn start_manager(store: Arc<RecordStore>, config: &ManagerConfig) -> Cluster {
        let manager = ManagerServer::bind(config).await.unwrap();
        let cluster = Cluster {
            store,
            shadow: manager.shadow(),
            manager_tcp: manager.tcp_addr().unwrap(),
            manager_udp: manager.udp_addr().unwrap(),
        };
        tokio::spawn(manager.run());
        cluster
    }

    /// Address nothing is listening on.
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn upload(name: &str, author: &str, content: &str) -> String {
        format!("UPLOAD|{}|{}|{}", name, author, encode_body(content))
    }

    fn edit(name: &str, author: &str, content: &str) -> String {
        format!("EDIT|{}|{}|{}", name, author, encode_body(content))
    }

    // ============================================================
    // SHADOW LOCK TABLE
    // ============================================================

    #[test]
    fn test_shadow_reserve_and_conflict() {
        let shadow = ShadowLockTable::new(true);

        assert_eq!(shadow.try_reserve("x.txt", &alice()), ShadowOutcome::Reserved);
        assert_eq!(
            shadow.try_reserve("X.TXT", &ClientId::new("Alice")),
            ShadowOutcome::AlreadyHeld
        );
        assert_eq!(
            shadow.try_reserve("x.txt", &bob()),
            ShadowOutcome::Conflict(alice())
        );
        assert_eq!(shadow.owner("x.txt"), Some(alice()));
    }

    #[test]
    fn test_shadow_rollback_only_removes_own_entry() {
        let shadow = ShadowLockTable::new(true);
        shadow.try_reserve("x.txt", &alice());

        shadow.rollback("x.txt", &bob());
        assert_eq!(shadow.len(), 1);

        shadow.rollback("x.txt", &alice());
        assert!(shadow.is_empty());
    }

    #[test]
    fn test_shadow_release_all() {
        let shadow = ShadowLockTable::new(true);
        shadow.try_reserve("a", &alice());
        shadow.try_reserve("b", &alice());
        shadow.try_reserve("c", &bob());

        assert_eq!(shadow.release_all(&alice()), 2);
        assert_eq!(shadow.release_all(&alice()), 0);
        assert_eq!(shadow.owner("c"), Some(bob()));
    }

    #[test]
    fn test_shadow_disabled_never_rejects() {
        let shadow = ShadowLockTable::new(false);

        assert_eq!(shadow.try_reserve("x", &alice()), ShadowOutcome::Disabled);
        assert_eq!(shadow.try_reserve("x", &bob()), ShadowOutcome::Disabled);
        assert!(shadow.is_empty());
    }

    // ============================================================
    // UPSTREAM
    // ============================================================

    #[test]
    fn test_upstream_error_reasons() {
        assert_eq!(
            UpstreamError::Down("x".into()).reason(),
            ErrorReason::RepoDown
        );
        assert_eq!(
            UpstreamError::NoResponse("x".into()).reason(),
            ErrorReason::RepoNoResponse
        );
    }

    #[tokio::test]
    async fn test_upstream_connect_refused_is_down() {
        let mut upstream = Upstream::new(dead_addr().await, Duration::from_millis(500));

        let result = upstream.request("LIST", &Command::List).await;

        assert!(matches!(result, Err(UpstreamError::Down(_))));
        assert!(!upstream.is_connected());
    }

    #[tokio::test]
    async fn test_upstream_silence_times_out_as_down() {
        // ARRANGE: a peer that accepts and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let mut upstream = Upstream::new(addr, Duration::from_millis(200));

        // ACT
        let result = upstream.request("LIST", &Command::List).await;

        // ASSERT
        assert!(matches!(result, Err(UpstreamError::Down(_))));
        assert!(!upstream.is_connected());
    }

    #[tokio::test]
    async fn test_upstream_closed_link_is_no_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        let mut upstream = Upstream::new(addr, Duration::from_secs(2));

        let result = upstream.request("LIST", &Command::List).await;

        assert!(matches!(result, Err(UpstreamError::NoResponse(_))));
    }

    #[tokio::test]
    async fn test_upstream_garbled_reply_is_no_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"HELLO WORLD\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        let mut upstream = Upstream::new(addr, Duration::from_secs(2));

        let result = upstream.request("LIST", &Command::List).await;

        assert!(matches!(result, Err(UpstreamError::NoResponse(_))));
    }

    #[tokio::test]
    async fn test_upstream_mismatched_reply_is_no_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"OK|CLOSED\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        let mut upstream = Upstream::new(addr, Duration::from_secs(2));

        let result = upstream.request("LIST", &Command::List).await;

        assert!(matches!(result, Err(UpstreamError::NoResponse(_))));
    }

    // ============================================================
    // MANAGER: END-TO-END OVER TCP
    // ============================================================

    async fn add_edit_conflict(shadow_locks: bool) {
        let cluster = start_cluster(shadow_locks).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        let mut b = Conn::connect(cluster.manager_tcp).await;

        assert_eq!(a.call("HELLO|alice").await, "OK|HELLO|alice");
        assert_eq!(b.call("HELLO|bob").await, "OK|HELLO|bob");

        assert_eq!(a.call(&upload("x.txt", "alice", "hello")).await, "OK|UPLOADED");
        assert_eq!(a.call("OPEN|x.txt|alice").await, "OK|OPENED");
        assert_eq!(b.call("OPEN|x.txt|bob").await, "ERROR|LOCKED_BY|alice");
        assert_eq!(a.call(&edit("x.txt", "alice", "hello world")).await, "OK|EDITED");
        assert_eq!(a.call("CLOSE|x.txt|alice").await, "OK|CLOSED");
        assert_eq!(b.call("OPEN|x.txt|bob").await, "OK|OPENED");

        let download = b.call("DOWNLOAD|x.txt").await;
        match Reply::parse(&download).unwrap() {
            Reply::Download(view) => assert_eq!(view.content, "hello world"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scenario_add_edit_conflict() {
        add_edit_conflict(true).await;
    }

    #[tokio::test]
    async fn test_scenario_add_edit_conflict_without_shadow_table() {
        add_edit_conflict(false).await;
    }

    #[tokio::test]
    async fn test_scenario_delete_without_open() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        a.call(&upload("z.txt", "alice", "keep")).await;

        assert_eq!(a.call("DELETE|z.txt|alice").await, "ERROR|NOT_OPENED");
        assert!(cluster.store.get("z.txt").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_with_lease_clears_shadow_entry() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        a.call(&upload("z.txt", "alice", "bye")).await;

        assert_eq!(a.call("OPEN|z.txt|alice").await, "OK|OPENED");
        assert_eq!(cluster.shadow.owner("z.txt"), Some(alice()));
        assert_eq!(a.call("DELETE|z.txt|alice").await, "OK|DELETED");

        assert!(cluster.shadow.is_empty());
        assert!(cluster.store.get("z.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_open_rejected_upstream_rolls_back_shadow() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;

        assert_eq!(a.call("OPEN|missing.txt|alice").await, "ERROR|NOT_FOUND");

        assert!(cluster.shadow.is_empty());
    }

    #[tokio::test]
    async fn test_shadow_conflict_answers_without_repository() {
        // ARRANGE: a stale shadow entry the Repository knows nothing about
        let cluster = start_cluster(true).await;
        cluster.store.upload("x.txt", &alice(), String::new()).await.unwrap();
        cluster.shadow.try_reserve("x.txt", &alice());
        let mut b = Conn::connect(cluster.manager_tcp).await;

        // ACT
        let reply = b.call("OPEN|x.txt|bob").await;

        // ASSERT: rejected locally, the Repository lock was never taken
        assert_eq!(reply, "ERROR|LOCKED_BY|alice");
        assert_eq!(cluster.store.get("x.txt").await.unwrap().lock_owner, None);
    }

    #[tokio::test]
    async fn test_scenario_disconnect_cleanup() {
        let cluster = start_cluster(true).await;
        cluster.store.upload("y.txt", &alice(), "data".into()).await.unwrap();

        {
            let mut a = Conn::connect(cluster.manager_tcp).await;
            assert_eq!(a.call("HELLO|alice").await, "OK|HELLO|alice");
            assert_eq!(a.call("OPEN|y.txt|alice").await, "OK|OPENED");
            // Dropped without CLOSE
        }

        let mut b = Conn::connect(cluster.manager_tcp).await;
        let mut reply = String::new();
        for _ in 0..50 {
            reply = b.call("OPEN|y.txt|bob").await;
            if reply == "OK|OPENED" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(reply, "OK|OPENED");
        assert_eq!(cluster.shadow.owner("y.txt"), Some(bob()));
    }

    #[tokio::test]
    async fn test_reentrant_open_from_another_session_keeps_lock() {
        // ARRANGE: alice holds x.txt through her own session
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        let mut b = Conn::connect(cluster.manager_tcp).await;
        assert_eq!(a.call("HELLO|alice").await, "OK|HELLO|alice");
        assert_eq!(b.call("HELLO|bob").await, "OK|HELLO|bob");
        a.call(&upload("x.txt", "alice", "hello")).await;
        assert_eq!(a.call("OPEN|x.txt|alice").await, "OK|OPENED");

        // ACT: a second session repeats the OPEN under alice's name, then goes away
        {
            let mut c = Conn::connect(cluster.manager_tcp).await;
            assert_eq!(c.call("HELLO|carol").await, "OK|HELLO|carol");
            assert_eq!(c.call("OPEN|x.txt|alice").await, "OK|OPENED");
        }
        for _ in 0..50 {
            if cluster.shadow.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // ASSERT: the Repository lock still belongs to alice's session
        assert_eq!(
            cluster.store.get("x.txt").await.unwrap().lock_owner,
            Some(alice())
        );
        assert_eq!(b.call("OPEN|x.txt|bob").await, "ERROR|LOCKED_BY|alice");
        assert_eq!(a.call(&edit("x.txt", "alice", "mine")).await, "OK|EDITED");
    }

    #[tokio::test]
    async fn test_every_edit_shows_a_later_timestamp() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        a.call(&upload("t.txt", "alice", "v0")).await;
        assert_eq!(a.call("OPEN|t.txt|alice").await, "OK|OPENED");

        let mut stamps = Vec::new();
        for version in ["v1", "v2", "v3"] {
            assert_eq!(a.call(&edit("t.txt", "alice", version)).await, "OK|EDITED");
            match Reply::parse(&a.call("DOWNLOAD|t.txt").await).unwrap() {
                Reply::Download(view) => {
                    assert_eq!(view.content, version);
                    stamps.push(view.last_modified);
                }
                other => panic!("unexpected reply {:?}", other),
            }
        }

        // Back-to-back edits land within one second of each other
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", stamps);
    }

    #[tokio::test]
    async fn test_session_panic_answers_internal() {
        let id = SessionId::new();

        let frame = guarded(&id, async {
            if !id.to_string().is_empty() {
                panic!("session bug");
            }
            Reply::Opened.to_frame()
        })
        .await
        .unwrap_or_else(|reason| Reply::Error(reason).to_frame());

        assert_eq!(frame, "ERROR|INTERNAL");
    }

    #[tokio::test]
    async fn test_release_all_through_manager() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;
        a.call(&upload("a", "alice", "")).await;
        a.call(&upload("b", "alice", "")).await;
        a.call("OPEN|a|alice").await;
        a.call("OPEN|b|alice").await;

        assert_eq!(a.call("RELEASE_ALL|alice").await, "OK|RELEASED|2");
        assert_eq!(a.call("RELEASE_ALL|alice").await, "OK|RELEASED|0");
        assert!(cluster.shadow.is_empty());
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_session_open() {
        let cluster = start_cluster(true).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;

        assert_eq!(a.call("EDIT|x.txt|alice").await, "ERROR|BAD_FORMAT");
        assert_eq!(a.call("EDIT|x.txt|alice|***").await, "ERROR|BAD_FORMAT");
        assert_eq!(a.call("SHUTDOWN").await, "ERROR|UNKNOWN_COMMAND");
        assert_eq!(a.call("LIST").await, "OK|LIST|EMPTY");
    }

    #[tokio::test]
    async fn test_repository_down_reports_and_keeps_session() {
        let store = RecordStore::new();
        let config = ManagerConfig::for_testing(dead_addr().await);
        let cluster = start_manager(store, &config).await;
        let mut a = Conn::connect(cluster.manager_tcp).await;

        assert_eq!(a.call("OPEN|x.txt|alice").await, "ERROR|REPO_DOWN");
        assert!(cluster.shadow.is_empty());

        // Still connected: local commands work, forwarded ones keep failing cleanly
        assert_eq!(a.call("HELLO|alice").await, "OK|HELLO|alice");
        assert_eq!(a.call("LIST").await, "ERROR|REPO_DOWN");
    }

    // ============================================================
    // MANAGER: UDP RELAY
    // ============================================================

    async fn datagram(to: SocketAddr, frame: &str) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(frame.as_bytes(), to).await.unwrap();
        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), socket.recv_from(&mut buf))
            .await
            .expect("no datagram reply")
            .unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_udp_relay_answers_stats_and_discovery() {
        let cluster = start_cluster(true).await;
        cluster.store.upload("a.txt", &alice(), "hello".into()).await.unwrap();

        let stats = datagram(cluster.manager_udp, "STATS|alice|2000-01-01").await;
        let announce = datagram(cluster.manager_udp, "PRIJAVA|alice").await;
        let upload = datagram(cluster.manager_udp, &upload("b.txt", "alice", "x")).await;

        match Reply::parse(&stats).unwrap() {
            Reply::Stats(summary) => {
                assert_eq!(summary.my_files, 5);
                assert_eq!(summary.latest_after.unwrap().name, "a.txt");
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            announce,
            format!("OK|PRIJAVA|{}", cluster.manager_tcp.port())
        );
        assert_eq!(upload, "ERROR|UNKNOWN_COMMAND");
    }
}
