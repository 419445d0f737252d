//! End-to-end cluster tests: brokers run in-process against a shared
//! in-memory coordination store, speaking real HTTP to each other.

use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use yak_broker::config::BrokerConfig;
use yak_broker::Broker;
use yak_common::coord::{CoordStore, InMemoryCoordStore};

struct TestBroker {
    broker: Broker,
    base_url: String,
    id: u32,
}

impl TestBroker {
    async fn shutdown(self) {
        self.broker.shutdown().await;
    }
}

async fn start_broker(id: u32, coord: &Arc<InMemoryCoordStore>, data_dir: &Path) -> TestBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = BrokerConfig::new(id, "127.0.0.1", port);
    config.data_dir = data_dir.to_path_buf();
    config.lease_ttl = Duration::from_millis(600);
    config.renew_interval = Duration::from_millis(100);
    config.heartbeat_interval = Duration::from_millis(50);
    config.heartbeat_ttl = Duration::from_millis(400);
    config.replication_poll = Duration::from_millis(25);
    config.request_timeout = Duration::from_secs(2);

    let broker = Broker::start(config, coord.clone() as Arc<dyn CoordStore>, listener)
        .await
        .unwrap();
    TestBroker {
        broker,
        base_url: format!("http://127.0.0.1:{port}"),
        id,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Poll `check` until it yields a value or ten seconds pass.
async fn eventually<F, Fut, T>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn get_json(client: &reqwest::Client, url: &str) -> Option<Value> {
    let resp = client.get(url).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.json().await.ok()
}

/// Wait until the cluster has a leader, returning its broker id.
async fn wait_for_leader(client: &reqwest::Client, any_broker: &str) -> u32 {
    eventually("a leader to be elected", || async {
        let body = get_json(client, &format!("{any_broker}/metadata/leader")).await?;
        body["leader"]["broker_id"].as_u64().map(|id| id as u32)
    })
    .await
}

/// Wait until a broker's own view settles on `role`.
async fn wait_for_role(client: &reqwest::Client, base: &str, role: &str) {
    eventually(&format!("{base} to become {role}"), || async {
        let body = get_json(client, &format!("{base}/health")).await?;
        (body["role"] == json!(role)).then_some(())
    })
    .await
}

async fn register_topic(client: &reqwest::Client, base: &str, topic: &str) -> reqwest::Response {
    client
        .post(format!("{base}/register_topic"))
        .json(&json!({ "topic": topic }))
        .send()
        .await
        .unwrap()
}

async fn produce(client: &reqwest::Client, base: &str, topic: &str, message: &str) -> reqwest::Response {
    client
        .post(format!("{base}/produce"))
        .json(&json!({ "topic": topic, "message": message }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_single_broker_happy_path() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let broker = start_broker(1, &coord, dir.path()).await;
    let client = client();

    assert_eq!(wait_for_leader(&client, &broker.base_url).await, 1);
    wait_for_role(&client, &broker.base_url, "leader").await;

    let resp = register_topic(&client, &broker.base_url, "t").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], json!(true));

    // Registering again conflicts.
    let resp = register_topic(&client, &broker.base_url, "t").await;
    assert_eq!(resp.status().as_u16(), 409);

    for (i, message) in ["a", "b", "c"].iter().enumerate() {
        let resp = produce(&client, &broker.base_url, "t", message).await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["offset"].as_u64(), Some(i as u64));
    }

    // A single-broker cluster commits on its own; all three records
    // become consumer-visible.
    let body = eventually("hwm to reach 3", || async {
        let body = get_json(
            &client,
            &format!("{}/consume?topic=t&offset=0", broker.base_url),
        )
        .await?;
        (body["hwm"].as_u64() == Some(3)).then_some(body)
    })
    .await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["message"], json!("a"));
    assert_eq!(messages[2]["message"], json!("c"));
    assert_eq!(messages[2]["offset"].as_u64(), Some(2));
    assert_eq!(body["total_available"].as_u64(), Some(3));

    // Unknown topics are a clean 404.
    let resp = produce(&client, &broker.base_url, "nope", "x").await;
    assert_eq!(resp.status().as_u16(), 404);
    let resp = client
        .get(format!("{}/consume?topic=nope&offset=0", broker.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_follower_redirects_writes_to_leader() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let b1 = start_broker(1, &coord, dir.path()).await;
    let b2 = start_broker(2, &coord, dir.path()).await;
    let client = client();

    let leader_id = wait_for_leader(&client, &b1.base_url).await;
    let (leader, follower) = if leader_id == b1.id { (&b1, &b2) } else { (&b2, &b1) };

    // Both sides must settle: the leader to accept writes, the
    // follower to know where to point the redirect.
    wait_for_role(&client, &leader.base_url, "leader").await;
    wait_for_role(&client, &follower.base_url, "follower").await;

    assert_eq!(
        register_topic(&client, &leader.base_url, "t").await.status().as_u16(),
        200
    );

    let resp = produce(&client, &follower.base_url, "t", "hello").await;
    assert_eq!(resp.status().as_u16(), 307);
    let location = resp
        .headers()
        .get(reqwest::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with(&leader.base_url), "location {location}");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["leader"]["broker_id"].as_u64(), Some(leader_id as u64));

    // Following the redirect succeeds.
    let resp = produce(&client, &leader.base_url, "t", "hello").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["offset"].as_u64(), Some(0));

    b1.shutdown().await;
    b2.shutdown().await;
}

#[tokio::test]
async fn test_follower_converges_and_serves_consumers() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let b1 = start_broker(1, &coord, dir.path()).await;
    let client = client();
    assert_eq!(wait_for_leader(&client, &b1.base_url).await, 1);
    wait_for_role(&client, &b1.base_url, "leader").await;

    register_topic(&client, &b1.base_url, "t").await;
    for i in 0..30 {
        let resp = produce(&client, &b1.base_url, "t", &format!("m{i}")).await;
        assert_eq!(resp.status().as_u16(), 200);
    }

    // A broker that joins later pulls the whole log and the hwm.
    let b2 = start_broker(2, &coord, dir.path()).await;
    eventually("follower to converge", || async {
        let body = get_json(&client, &format!("{}/health", b2.base_url)).await?;
        let topic = &body["topics"]["t"];
        (topic["next_offset"].as_u64() == Some(30) && topic["hwm"].as_u64() == Some(30))
            .then_some(())
    })
    .await;

    // The committed prefix is readable from the follower directly.
    let body = get_json(&client, &format!("{}/consume?topic=t&offset=0&max=100", b2.base_url))
        .await
        .unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 30);
    assert_eq!(messages[29]["message"], json!("m29"));

    // Reads from a given offset only return the suffix.
    let body = get_json(&client, &format!("{}/consume?topic=t&offset=28", b2.base_url))
        .await
        .unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["requested_offset"].as_u64(), Some(28));
    assert_eq!(body["total_available"].as_u64(), Some(2));

    b1.shutdown().await;
    b2.shutdown().await;
}

#[tokio::test]
async fn test_leader_failover_preserves_committed_records() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let b1 = start_broker(1, &coord, dir.path()).await;
    let b2 = start_broker(2, &coord, dir.path()).await;
    let b3 = start_broker(3, &coord, dir.path()).await;
    let client = client();

    let leader_id = wait_for_leader(&client, &b1.base_url).await;
    let mut brokers = vec![b1, b2, b3];
    let pos = brokers.iter().position(|b| b.id == leader_id).unwrap();
    let leader = brokers.remove(pos);
    wait_for_role(&client, &leader.base_url, "leader").await;

    register_topic(&client, &leader.base_url, "t").await;
    for i in 0..5 {
        produce(&client, &leader.base_url, "t", &format!("m{i}")).await;
    }

    // Wait for the records to be committed and replicated everywhere.
    for broker in &brokers {
        let url = broker.base_url.clone();
        eventually("replicas to converge before failover", || async {
            let body = get_json(&client, &format!("{url}/health")).await?;
            (body["topics"]["t"]["hwm"].as_u64() == Some(5)).then_some(())
        })
        .await;
    }

    let old_epoch = get_json(&client, &format!("{}/health", leader.base_url))
        .await
        .unwrap()["epoch"]
        .as_u64()
        .unwrap();

    leader.shutdown().await;

    // Exactly one survivor takes over, at the next epoch.
    let new_leader_id = wait_for_leader(&client, &brokers[0].base_url).await;
    assert_ne!(new_leader_id, leader_id);
    let new_leader = brokers.iter().find(|b| b.id == new_leader_id).unwrap();
    eventually("new leader to assume the role", || async {
        let body = get_json(&client, &format!("{}/health", new_leader.base_url)).await?;
        (body["role"] == json!("leader") && body["epoch"].as_u64() == Some(old_epoch + 1))
            .then_some(())
    })
    .await;

    // Writes resume under the new epoch.
    let resp = eventually("writes to resume on the new leader", || async {
        let resp = produce(&client, &new_leader.base_url, "t", "after-failover").await;
        (resp.status().as_u16() == 200).then_some(resp)
    })
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["offset"].as_u64(), Some(5));

    // Nothing committed under the old epoch was lost.
    let body = eventually("committed prefix to include the new record", || async {
        let body = get_json(
            &client,
            &format!("{}/consume?topic=t&offset=0&max=100", new_leader.base_url),
        )
        .await?;
        (body["hwm"].as_u64() >= Some(6)).then_some(body)
    })
    .await;
    let messages = body["messages"].as_array().unwrap();
    for i in 0..5 {
        assert_eq!(messages[i]["message"], json!(format!("m{i}")));
    }
    assert_eq!(messages[5]["message"], json!("after-failover"));

    for broker in brokers {
        broker.shutdown().await;
    }
}

#[tokio::test]
async fn test_restarted_broker_recovers_its_log() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let broker = start_broker(1, &coord, dir.path()).await;
    let client = client();
    wait_for_leader(&client, &broker.base_url).await;
    wait_for_role(&client, &broker.base_url, "leader").await;

    register_topic(&client, &broker.base_url, "t").await;
    for i in 0..4 {
        produce(&client, &broker.base_url, "t", &format!("m{i}")).await;
    }
    eventually("records to commit", || async {
        let body = get_json(&client, &format!("{}/health", broker.base_url)).await?;
        (body["topics"]["t"]["hwm"].as_u64() == Some(4)).then_some(())
    })
    .await;

    broker.shutdown().await;

    // Same id, same data dir: the log and hwm come back from disk.
    let broker = start_broker(1, &coord, dir.path()).await;
    wait_for_leader(&client, &broker.base_url).await;
    let body = get_json(&client, &format!("{}/consume?topic=t&offset=0", broker.base_url))
        .await
        .unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    assert_eq!(body["hwm"].as_u64(), Some(4));

    broker.shutdown().await;
}

#[tokio::test]
async fn test_metadata_brokers_lists_live_cluster() {
    let coord = Arc::new(InMemoryCoordStore::new());
    let dir = TempDir::new().unwrap();
    let b1 = start_broker(1, &coord, dir.path()).await;
    let b2 = start_broker(2, &coord, dir.path()).await;
    let client = client();

    eventually("both brokers to appear in the registry", || async {
        let body = get_json(&client, &format!("{}/metadata/brokers", b1.base_url)).await?;
        let ids: Vec<u64> = body["brokers"]
            .as_array()?
            .iter()
            .filter_map(|b| b["broker_id"].as_u64())
            .collect();
        (ids == vec![1, 2]).then_some(())
    })
    .await;

    // A departed broker drops out of the registry.
    b2.shutdown().await;
    eventually("departed broker to drop out", || async {
        let body = get_json(&client, &format!("{}/metadata/brokers", b1.base_url)).await?;
        (body["brokers"].as_array()?.len() == 1).then_some(())
    })
    .await;

    b1.shutdown().await;
}
