use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use dx_admin::auth::Credentials;
use dx_admin::config::PeerEndpoint;
use dx_admin::storage::AccountStatus;
use dx_admin::{AdminClient, AdminConfig, AdminServer, MemoryObjectLayer, ObjectLayer};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

struct Cluster {
    addrs: Vec<SocketAddr>,
    dead: SocketAddr,
    _state: TempDir,
}

fn bootstrap() -> Credentials {
    let config = AdminConfig::default();
    Credentials::new(config.access_key, config.secret_key)
}

/// Start `nodes` servers sharing one state directory. Every node also lists
/// a peer that nothing listens on.
async fn start_cluster(nodes: usize) -> Cluster {
    let state = TempDir::new().unwrap();

    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut listeners = Vec::new();
    for _ in 0..nodes {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let addrs: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

    for listener in listeners {
        let addr = listener.local_addr().unwrap();
        let config = node_config(addr, &addrs, dead, state.path());
        let layer: Arc<dyn ObjectLayer> = Arc::new(MemoryObjectLayer::new(4));
        let server = AdminServer::new(config, Some(layer)).unwrap();
        tokio::spawn(async move {
            let _ = server.run(listener).await;
        });
    }

    Cluster {
        addrs,
        dead,
        _state: state,
    }
}

fn node_config(addr: SocketAddr, all: &[SocketAddr], dead: SocketAddr, state_dir: &Path) -> AdminConfig {
    let mut peers: Vec<PeerEndpoint> = all
        .iter()
        .filter(|a| **a != addr)
        .map(|a| PeerEndpoint::new(a.to_string()))
        .collect();
    peers.push(PeerEndpoint::new(dead.to_string()));

    AdminConfig {
        bind_addr: addr,
        node_name: addr.to_string(),
        peers,
        state_dir: Some(state_dir.to_path_buf()),
        peer_timeout_secs: 5,
        ..Default::default()
    }
}

fn client_for(addr: SocketAddr, credentials: Credentials) -> AdminClient {
    AdminClient::new(&format!("http://{addr}"), credentials).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_reports_every_node() {
    let cluster = start_cluster(3).await;
    let client = client_for(cluster.addrs[0], bootstrap());

    let results = client.server_info().await.unwrap();
    // Two live peers, one dead peer and the local node
    assert_eq!(results.len(), 4);

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.error.is_some())
        .map(|r| r.host.as_str())
        .collect();
    assert_eq!(failed, vec![cluster.dead.to_string().as_str()]);

    let local = results.last().unwrap();
    assert_eq!(local.host, cluster.addrs[0].to_string());
    let info = local.data.as_ref().unwrap();
    assert_eq!(info.storage.backend.online_disks, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_changes_reach_peers() {
    let cluster = start_cluster(2).await;
    let a = client_for(cluster.addrs[0], bootstrap());
    let b = client_for(cluster.addrs[1], bootstrap());

    a.add_user("alice", "alicesecret", AccountStatus::Enabled)
        .await
        .unwrap();
    a.add_canned_policy("readonly", &json!({"Statement": [{"Effect": "Allow"}]}))
        .await
        .unwrap();
    a.set_user_policy("alice", "readonly").await.unwrap();

    let users = b.list_users().await.unwrap();
    assert_eq!(users["alice"].policy_name.as_deref(), Some("readonly"));
    assert!(b.list_canned_policies().await.unwrap().contains_key("readonly"));

    b.remove_canned_policy("readonly").await.unwrap();
    let users = a.list_users().await.unwrap();
    assert_eq!(users["alice"].policy_name, None);

    let err = a.remove_user("bob").await.unwrap_err();
    assert_eq!(err.code(), Some("XAdminAdminNoSuchUser"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn credential_rotation_applies_cluster_wide() {
    let cluster = start_cluster(2).await;
    let mut a = client_for(cluster.addrs[0], bootstrap());
    let rotated = Credentials::new("rotated", "rotated-secret");

    a.set_credentials(rotated.clone()).await.unwrap();
    assert_eq!(a.version().await.unwrap(), "1");

    let b = client_for(cluster.addrs[1], rotated);
    assert_eq!(b.version().await.unwrap(), "1");

    let stale = client_for(cluster.addrs[1], bootstrap());
    let err = stale.version().await.unwrap_err();
    assert_eq!(err.code(), Some("AccessDenied"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn profiling_bundle_has_one_report_per_node() {
    let cluster = start_cluster(2).await;
    let client = client_for(cluster.addrs[0], bootstrap());

    let err = client.download_profiling().await.unwrap_err();
    assert_eq!(err.code(), Some("XAdminAdminProfilerNotEnabled"));

    let started = client
        .start_profiling("mem".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(started.iter().filter(|r| r.error.is_none()).count(), 2);

    let archive = client.download_profiling().await.unwrap();
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
    assert_eq!(zip.len(), 2);
    let names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.iter().all(|n| n.starts_with("profiling-127.0.0.1_")));
}
