use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dx_admin::auth::{sign_now, Credentials};
use dx_admin::heal::{HealSessionRegistry, HealStartSuccess, HealState};
use dx_admin::{AdminClient, AdminConfig, AdminServer, HealOpts, MemoryObjectLayer, ObjectLayer};
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

async fn start_server(
    layer: Option<Arc<dyn ObjectLayer>>,
    keepalive_ms: u64,
) -> (SocketAddr, Arc<HealSessionRegistry>, AdminClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = AdminConfig {
        bind_addr: addr,
        node_name: addr.to_string(),
        keepalive_interval_ms: keepalive_ms,
        ..Default::default()
    };
    let credentials = Credentials::new(config.access_key.clone(), config.secret_key.clone());

    let server = AdminServer::new(config, layer).unwrap();
    let registry = server.registry().clone();
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    let client = AdminClient::new(&format!("http://{addr}"), credentials).unwrap();
    (addr, registry, client)
}

fn photo_layer(objects: usize, heal_delay: Duration) -> Arc<dyn ObjectLayer> {
    let layer = MemoryObjectLayer::new(4).with_heal_delay(heal_delay);
    layer.make_bucket("photos");
    for i in 0..objects {
        layer.put_object("photos", &format!("2019/img-{i:03}.jpg"), 1024);
    }
    Arc::new(layer)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heal_token_reuse_and_force_restart() {
    let layer = photo_layer(40, Duration::from_millis(25));
    let (_, registry, client) = start_server(Some(layer), 10_000).await;
    let opts = HealOpts {
        recursive: true,
        dry_run: false,
    };

    let first = client.heal_start("photos", "", &opts, false).await.unwrap();
    wait_until(|| {
        registry
            .get_sequence("photos/")
            .is_some_and(|s| s.has_items())
    })
    .await;

    // Same scope, progress buffered: the running sequence's token comes back
    let again = client.heal_start("photos", "", &opts, false).await.unwrap();
    assert_eq!(again.client_token, first.client_token);

    let forced = client.heal_start("photos", "", &opts, true).await.unwrap();
    assert_ne!(forced.client_token, first.client_token);

    let err = client
        .heal_status("photos", "", &first.client_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("XAdminHealNoSuchProcess"));

    let status = client
        .heal_status("photos", "", &forced.client_token)
        .await
        .unwrap();
    assert!(matches!(status.summary, HealState::Running | HealState::Finished));
    assert!(status.settings.recursive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heal_status_drains_once() {
    let layer = photo_layer(5, Duration::ZERO);
    let (_, registry, client) = start_server(Some(layer), 10_000).await;
    let opts = HealOpts {
        recursive: true,
        dry_run: false,
    };

    let started = client.heal_start("photos", "", &opts, false).await.unwrap();
    wait_until(|| {
        registry
            .get_sequence("photos/")
            .is_some_and(|s| s.has_ended())
    })
    .await;

    let status = client
        .heal_status("photos", "", &started.client_token)
        .await
        .unwrap();
    assert_eq!(status.summary, HealState::Finished);
    // The bucket plus every object
    assert_eq!(status.items.len(), 6);
    let indexes: Vec<usize> = status.items.iter().map(|i| i.result_index).collect();
    assert_eq!(indexes, (1..=6).collect::<Vec<_>>());

    let status = client
        .heal_status("photos", "", &started.client_token)
        .await
        .unwrap();
    assert_eq!(status.summary, HealState::Finished);
    assert!(status.items.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heal_overlap_and_stop() {
    let layer = photo_layer(40, Duration::from_millis(25));
    let (_, _, client) = start_server(Some(layer), 10_000).await;
    let opts = HealOpts {
        recursive: true,
        dry_run: false,
    };

    client.heal_start("photos", "", &opts, false).await.unwrap();

    let err = client
        .heal_start("photos", "2019", &opts, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("XAdminHealOverlappingPaths"));

    let stopped = client.heal_stop("photos", "").await.unwrap();
    assert!(!stopped.client_token.is_empty());

    let err = client.heal_stop("photos", "").await.unwrap_err();
    assert_eq!(err.code(), Some("XAdminHealNoSuchProcess"));

    // Stopped sequences no longer block overlapping scopes
    client.heal_start("photos", "2019", &opts, false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_restart_streams_keepalive_filler() {
    let layer = photo_layer(5, Duration::from_millis(300));
    let (addr, registry, client) = start_server(Some(layer), 1).await;
    let opts = HealOpts {
        recursive: true,
        dry_run: false,
    };

    let first = client.heal_start("photos", "", &opts, false).await.unwrap();
    wait_until(|| registry.get_sequence("photos/").is_some()).await;
    sleep(Duration::from_millis(50)).await;

    // The replacement waits out the old executor's 300ms heal step, far past
    // the 1ms keep-alive tick
    let credentials = AdminConfig::default();
    let token = sign_now(&Credentials::new(credentials.access_key, credentials.secret_key));
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/admin/v1/heal/photos?forceStart"))
        .bearer_auth(token)
        .json(&opts)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("\n\r"), "expected filler before payload: {body:?}");

    let forced: HealStartSuccess = serde_json::from_str(body.trim()).unwrap();
    assert_ne!(forced.client_token, first.client_token);

    // The client sees through the filler the same way
    sleep(Duration::from_millis(50)).await;
    let again = client.heal_start("photos", "", &opts, true).await.unwrap();
    assert_ne!(again.client_token, forced.client_token);
    assert_eq!(
        registry.get_sequence("photos/").unwrap().client_token(),
        again.client_token
    );
}

#[tokio::test]
async fn heal_requires_object_layer() {
    let (_, _, client) = start_server(None, 10_000).await;
    let err = client
        .heal_start("photos", "", &HealOpts::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("XAdminServerNotInitialized"));
}

#[tokio::test]
async fn heal_rejects_bad_scope() {
    let layer = photo_layer(1, Duration::ZERO);
    let (_, _, client) = start_server(Some(layer), 10_000).await;

    let err = client
        .heal_start("Not_A_Bucket", "", &HealOpts::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("InvalidBucketName"));
}
