//! End-to-end scenarios: control plane writes feeding the DNS pipeline,
//! geo-scoped answers, import modes, replication, and the cache
//! invalidation contract between the two planes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use meridian_cache::{spawn_invalidation_listener, ResponseCache, ZoneCache, ZoneEvents};
use meridian_cache::ZoneEvent;
use meridian_config::Config;
use meridian_geo::{GeoInfo, NoopProvider, Provider};
use meridian_proto::{Message, Name, Question, RecordType, ResponseCode};
use meridian_rest::{router, AppState};
use meridian_server::authority::{AuthorityConfig, AuthorityHandler};
use meridian_server::{Protocol, QueryContext, QueryHandler};
use meridian_store::Store;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

fn base_config() -> Config {
    Config::from_yaml("db:\n  driver: sqlite\n  dsn: \"sqlite::memory:\"\n").unwrap()
}

async fn new_state(config: Config) -> Arc<AppState> {
    let store = Store::connect("sqlite", "sqlite::memory:").await.unwrap();
    store.migrate().await.unwrap();
    Arc::new(AppState {
        store,
        config: Arc::new(config),
        events: ZoneEvents::new(),
    })
}

/// A full single-node deployment: REST state plus the DNS pipeline wired
/// to the same store through the zones-changed contract.
struct Node {
    state: Arc<AppState>,
    handler: AuthorityHandler,
}

impl Node {
    async fn new(geo: Arc<dyn Provider>, use_ecs: bool) -> Self {
        let state = new_state(base_config()).await;
        let response_cache = Arc::new(ResponseCache::new(128));
        let zone_cache = Arc::new(ZoneCache::default());
        spawn_invalidation_listener(
            zone_cache.clone(),
            response_cache.clone(),
            state.events.subscribe(),
        );

        let handler = AuthorityHandler::new(
            state.store.clone(),
            response_cache,
            zone_cache,
            geo,
            None,
            AuthorityConfig {
                use_ecs,
                verbose: false,
            },
        );
        Self { state, handler }
    }

    async fn api(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let app = router(self.state.clone());
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn query(&self, name: &str, rtype: RecordType) -> Message {
        let query = Message::query(Question::new(Name::from_str(name).unwrap(), rtype));
        let ctx = QueryContext::new("198.51.100.7:5353".parse().unwrap(), Protocol::Udp);
        self.handler.handle(query, ctx).await
    }

    /// Wait until the invalidation listener has drained pending events.
    async fn settle(&self) {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// Static geo provider used to pin lookups in tests.
struct StaticGeo(GeoInfo);

impl Provider for StaticGeo {
    fn lookup(&self, _ip: Option<IpAddr>) -> GeoInfo {
        self.0.clone()
    }
}

#[tokio::test]
async fn positive_lookup_then_cache_hit() {
    let node = Node::new(Arc::new(NoopProvider), false).await;

    let (_, zone) = node
        .api("POST", "/zones", Some(json!({"name": "example.com"})))
        .await;
    let id = zone["id"].as_i64().unwrap();
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "www", "type": "A", "ttl": 300,
            "records": [{"data": "192.0.2.10"}]
        })),
    )
    .await;
    node.settle().await;

    let first = node.query("www.example.com.", RecordType::A).await;
    assert_eq!(first.rcode(), ResponseCode::NoError);
    assert_eq!(first.answers().len(), 1);
    assert_eq!(first.answers()[0].ttl, 300);
    assert_eq!(first.answers()[0].rdata.to_string(), "192.0.2.10");

    // Remove the rrset behind the cache's back: the second identical
    // query is served from the response cache.
    node.state
        .store
        .delete_rrset(id, node.state.store.list_rrsets(id).await.unwrap()[0].id)
        .await
        .unwrap();

    let second = node.query("www.example.com.", RecordType::A).await;
    assert_eq!(second.answers().len(), 1);
    assert_eq!(second.answers()[0].rdata.to_string(), "192.0.2.10");
}

#[tokio::test]
async fn geo_subnet_beats_country_via_ecs() {
    // Client resolves to US, but one record pins an exact subnet.
    let geo = Arc::new(StaticGeo(GeoInfo {
        country: "US".to_string(),
        continent: "NA".to_string(),
        asn: 15169,
    }));
    let node = Node::new(geo, true).await;

    let (_, zone) = node
        .api("POST", "/zones", Some(json!({"name": "test"})))
        .await;
    let id = zone["id"].as_i64().unwrap();
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "svc", "type": "A", "ttl": 60,
            "records": [
                {"data": "198.51.100.11", "country": "US"},
                {"data": "198.51.100.12"},
                {"data": "198.51.100.13", "subnet": "8.8.8.0/24"}
            ]
        })),
    )
    .await;
    node.settle().await;

    // Query carrying an ECS option for 8.8.8.8/24.
    let query = Message::query(Question::new(
        Name::from_str("svc.test.").unwrap(),
        RecordType::A,
    ));
    let mut wire = query.to_wire();
    wire[11] = 1; // ARCOUNT
    wire.extend_from_slice(&[
        0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 11, 0, 8, 0, 7, 0, 1, 24, 0, 8, 8, 8,
    ]);
    let query = Message::parse(&wire).unwrap();
    assert!(query.ecs_addr().is_some());

    let ctx = QueryContext::new("203.0.113.50:5353".parse().unwrap(), Protocol::Udp);
    let response = node.handler.handle(query, ctx).await;

    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].rdata.to_string(), "198.51.100.13");
}

#[tokio::test]
async fn cname_fallback_returned_for_a_query() {
    let node = Node::new(Arc::new(NoopProvider), false).await;

    let (_, zone) = node
        .api("POST", "/zones", Some(json!({"name": "example.com"})))
        .await;
    let id = zone["id"].as_i64().unwrap();
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "www", "type": "A", "ttl": 300,
            "records": [{"data": "192.0.2.10"}]
        })),
    )
    .await;
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "api", "type": "CNAME", "ttl": 120,
            "records": [{"data": "www.example.com."}]
        })),
    )
    .await;
    node.settle().await;

    let response = node.query("api.example.com.", RecordType::A).await;
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].rtype, RecordType::Cname);
    assert_eq!(
        response.answers()[0].rdata.to_string(),
        "www.example.com."
    );
}

#[tokio::test]
async fn import_replace_vs_upsert() {
    let node = Node::new(Arc::new(NoopProvider), false).await;

    let (_, zone) = node
        .api("POST", "/zones", Some(json!({"name": "example.com"})))
        .await;
    let id = zone["id"].as_i64().unwrap();
    for (name, rtype, data) in [
        ("www", "A", "192.0.2.1"),
        ("@", "MX", "10 mail.example.com."),
    ] {
        node.api(
            "POST",
            &format!("/zones/{}/rrsets", id),
            Some(json!({
                "name": name, "type": rtype, "ttl": 300,
                "records": [{"data": data}]
            })),
        )
        .await;
    }

    let only_a = json!({
        "name": "example.com.",
        "rrsets": [{
            "name": "www", "type": "A", "ttl": 300,
            "records": [{"data": "192.0.2.1"}]
        }]
    });

    let (status, _) = node
        .api(
            "POST",
            &format!("/zones/{}/import?mode=replace", id),
            Some(only_a.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, sets) = node
        .api("GET", &format!("/zones/{}/rrsets", id), None)
        .await;
    let types: Vec<&str> = sets
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["A"]);

    // Re-create the MX and upsert the same payload: MX preserved.
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "@", "type": "MX", "ttl": 300,
            "records": [{"data": "10 mail.example.com."}]
        })),
    )
    .await;
    let (status, _) = node
        .api(
            "POST",
            &format!("/zones/{}/import?mode=upsert", id),
            Some(only_a),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, sets) = node
        .api("GET", &format!("/zones/{}/rrsets", id), None)
        .await;
    let mut types: Vec<String> = sets
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["type"].as_str().unwrap().to_string())
        .collect();
    types.sort();
    assert_eq!(types, vec!["A", "MX"]);
}

#[tokio::test]
async fn master_slave_replication() {
    let master = Node::new(Arc::new(NoopProvider), false).await;
    let slave = Node::new(Arc::new(NoopProvider), false).await;

    for name in ["alpha.test", "beta.test"] {
        let (_, zone) = master
            .api("POST", "/zones", Some(json!({"name": name})))
            .await;
        let id = zone["id"].as_i64().unwrap();
        master
            .api(
                "POST",
                &format!("/zones/{}/rrsets", id),
                Some(json!({
                    "name": "www", "type": "A", "ttl": 300,
                    "records": [{"data": "192.0.2.1"}]
                })),
            )
            .await;
    }
    master
        .api(
            "POST",
            "/templates",
            Some(json!({
                "name": "web", "description": "demo",
                "records": [{"name": "{domain}", "type": "A", "ttl": 60, "data": "203.0.113.1"}]
            })),
        )
        .await;

    // The replication cycle: export from the master, import into the
    // slave's control plane.
    let (status, snapshot) = master.api("GET", "/sync/export", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, result) = slave
        .api("POST", "/sync/import", Some(snapshot.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["zones"], 2);
    assert_eq!(result["templates"], 1);

    // The slave's own export is observably equal.
    let (_, mirrored) = slave.api("GET", "/sync/export", None).await;
    let names = |v: &Value| -> Vec<String> {
        let mut out: Vec<String> = v["zones"]
            .as_array()
            .unwrap()
            .iter()
            .map(|z| z["name"].as_str().unwrap().to_string())
            .collect();
        out.sort();
        out
    };
    assert_eq!(names(&snapshot), names(&mirrored));

    // And the slave now answers for replicated data.
    slave.settle().await;
    let response = slave.query("www.alpha.test.", RecordType::A).await;
    assert_eq!(response.answers().len(), 1);
}

#[tokio::test]
async fn negative_caching_without_forwarder() {
    let node = Node::new(Arc::new(NoopProvider), false).await;

    let first = node.query("nx.unknown.test.", RecordType::A).await;
    assert_eq!(first.rcode(), ResponseCode::NXDomain);

    // Create the zone and record without publishing any event: the
    // negative entry keeps answering within its TTL.
    let zone = node.state.store.create_zone("unknown.test.").await.unwrap();
    node.state
        .store
        .create_rrset(
            &zone,
            "nx",
            "A",
            300,
            vec![meridian_store::RecordData {
                data: "192.0.2.1".to_string(),
                ..Default::default()
            }],
        )
        .await
        .unwrap();

    let second = node.query("nx.unknown.test.", RecordType::A).await;
    assert_eq!(second.rcode(), ResponseCode::NXDomain);
}

#[tokio::test]
async fn rest_mutation_invalidates_dns_caches() {
    let node = Node::new(Arc::new(NoopProvider), false).await;

    let (_, zone) = node
        .api("POST", "/zones", Some(json!({"name": "example.com"})))
        .await;
    let id = zone["id"].as_i64().unwrap();
    node.api(
        "POST",
        &format!("/zones/{}/rrsets", id),
        Some(json!({
            "name": "www", "type": "A", "ttl": 300,
            "records": [{"data": "192.0.2.10"}]
        })),
    )
    .await;
    node.settle().await;

    let before = node.query("www.example.com.", RecordType::A).await;
    assert_eq!(before.answers()[0].rdata.to_string(), "192.0.2.10");

    // Update through the control plane; the zones-changed event clears
    // both caches, so the very next query sees the committed state.
    let rid = node.state.store.list_rrsets(id).await.unwrap()[0].id;
    let (status, _) = node
        .api(
            "PUT",
            &format!("/zones/{}/rrsets/{}", id, rid),
            Some(json!({
                "name": "www", "type": "A", "ttl": 300,
                "records": [{"data": "203.0.113.99"}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    node.settle().await;

    let after = node.query("www.example.com.", RecordType::A).await;
    assert_eq!(after.answers()[0].rdata.to_string(), "203.0.113.99");
}

#[tokio::test]
async fn zone_events_reach_subscribers() {
    let events = ZoneEvents::new();
    let mut rx = events.subscribe();
    events.publish();
    assert_eq!(rx.recv().await.unwrap(), ZoneEvent::Changed);
}
