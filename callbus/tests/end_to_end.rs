//! End-to-end tests: client and server over the in-process bus, with
//! endpoint resolution through the registry-backed caching selector.

use callbus::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Cluster {
    bus: Arc<MemoryTransport>,
    codecs: Arc<CodecRegistry>,
    registry: Arc<MemoryRegistry>,
    hub: SessionHub,
}

async fn cluster(settings: RpcSettings) -> Cluster {
    let bus = Arc::new(MemoryTransport::new());
    let codecs = Arc::new(CodecRegistry::new());
    let registry = Arc::new(MemoryRegistry::new());
    let hub = SessionHub::new(
        bus.clone(),
        codecs.clone(),
        settings,
        Arc::new(CacheSelector::new(registry.clone())),
    );
    Cluster {
        bus,
        codecs,
        registry,
        hub,
    }
}

async fn spawn_echo_server(cluster: &Cluster, service: &str, id: &str) -> RpcServer {
    let server = RpcServer::new(
        cluster.bus.clone(),
        cluster.codecs.clone(),
        RpcSettings::default(),
    )
    .await
    .unwrap();
    server.register("Echo", |mut args: Vec<Value>| {
        args.pop().ok_or_else(|| "missing argument".to_string())
    });
    cluster
        .registry
        .register(Node::new(service, id, server.addr()));
    server
}

#[tokio::test]
async fn test_echo_round_trip() {
    let cluster = cluster(RpcSettings::default()).await;
    let _server = spawn_echo_server(&cluster, "echo-svc", "n1").await;

    let session = cluster
        .hub
        .route("echo-svc", SelectOptions::default())
        .await
        .unwrap();
    let reply = session
        .call("Echo", &[Value::from("hello")])
        .await
        .unwrap();
    assert_eq!(reply, Value::Str("hello".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_statistics_and_late_reply() {
    // One-second call budget against a two-second handler.
    let cluster = cluster(RpcSettings {
        call_timeout_secs: 1,
        ..RpcSettings::default()
    })
    .await;
    let server = spawn_echo_server(&cluster, "svc", "n1").await;
    server.register_go("Slow", |_args: Vec<Value>, responder: Responder| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            responder.succeed(Value::Str("too late".to_string()));
        });
    });

    let session = cluster
        .hub
        .route("svc", SelectOptions::default())
        .await
        .unwrap();

    // Two slow calls time out on the caller side after ~1s each.
    let slow_calls: Vec<_> = (0..2)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.call("Slow", &[]).await })
        })
        .collect();
    for call in slow_calls {
        let outcome = call.await.unwrap();
        assert!(matches!(outcome, Err(RpcError::DeadlineExceeded)));
    }

    // The client is unharmed; prompt calls keep working while the slow
    // handlers are still running.
    for i in 0..3 {
        let reply = session.call("Echo", &[Value::Int(i)]).await.unwrap();
        assert_eq!(reply, Value::Int(i));
    }

    // Let the slow handlers finish; their late replies find no pending
    // call and are dropped without affecting anything.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let reply = session.call("Echo", &[Value::from("still fine")]).await.unwrap();
    assert_eq!(reply, Value::Str("still fine".to_string()));

    // Server-side statistics: three successes for Echo (plus the final
    // probe), two past-deadline completions for Slow.
    let stats = server.statistics();
    assert_eq!(stats["Echo"].exec_success, 4);
    assert_eq!(stats["Echo"].exec_total, 4);
    assert_eq!(stats["Slow"].exec_timeout, 2);
    assert_eq!(stats["Slow"].exec_total, 2);
    assert!(stats["Echo"].min_exec_time <= stats["Echo"].max_exec_time);
}

#[tokio::test]
async fn test_call_nr_executes_without_reply() {
    let cluster = cluster(RpcSettings::default()).await;
    let server = RpcServer::new(
        cluster.bus.clone(),
        cluster.codecs.clone(),
        RpcSettings::default(),
    )
    .await
    .unwrap();
    let hits = Arc::new(AtomicU64::new(0));
    server.register("Bump", {
        let hits = hits.clone();
        move |_args: Vec<Value>| {
            hits.fetch_add(1, Ordering::Relaxed);
            Ok(Value::Null)
        }
    });
    cluster
        .registry
        .register(Node::new("svc", "n1", server.addr()));

    let session = cluster
        .hub
        .route("svc", SelectOptions::default())
        .await
        .unwrap();
    session.call_nr("Bump", &[]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
    assert_eq!(server.statistics()["Bump"].exec_success, 1);
}

#[tokio::test]
async fn test_round_robin_across_live_nodes() {
    let cluster = cluster(RpcSettings::default()).await;

    // Three servers for the same service, each answering with its own id.
    let mut servers = Vec::new();
    for id in ["a", "b", "c"] {
        let server = RpcServer::new(
            cluster.bus.clone(),
            cluster.codecs.clone(),
            RpcSettings::default(),
        )
        .await
        .unwrap();
        let whoami = id.to_string();
        server.register("WhoAmI", move |_args: Vec<Value>| {
            Ok(Value::Str(whoami.clone()))
        });
        cluster
            .registry
            .register(Node::new("svc", id, server.addr()));
        servers.push(server);
    }

    let opts = SelectOptions::default().with_strategy(Strategy::round_robin());
    let mut answered = Vec::new();
    for _ in 0..4 {
        let session = cluster.hub.route("svc", opts.clone()).await.unwrap();
        let reply = session.call("WhoAmI", &[]).await.unwrap();
        answered.push(reply.as_str().unwrap().to_string());
    }
    assert_eq!(answered, ["a", "b", "c", "a"]);

    // One routed service, three distinct node sessions.
    assert_eq!(cluster.hub.session_count().await, 3);
    // All four resolutions were served by a single registry fetch.
    assert_eq!(cluster.registry.list_calls(), 1);
}

/// A codec carrying an opaque session handle across the RPC boundary.
struct HandleCodec;

impl ExtCodec for HandleCodec {
    fn encode(&self, value: &Value) -> Result<Option<(String, Vec<u8>)>, CodecError> {
        match value {
            Value::Ext { tag, data } if tag == "handle" => {
                Ok(Some((tag.clone(), data.clone())))
            }
            _ => Ok(None),
        }
    }

    fn decode(&self, tag: &str, data: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Ext {
            tag: tag.to_string(),
            data: data.to_vec(),
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["handle".to_string()]
    }
}

#[tokio::test]
async fn test_custom_codec_crosses_the_wire() {
    let bus = Arc::new(MemoryTransport::new());
    let mut codecs = CodecRegistry::new();
    codecs.register("gate", Arc::new(HandleCodec)).unwrap();
    let codecs = Arc::new(codecs);
    let registry = Arc::new(MemoryRegistry::new());

    let server = RpcServer::new(bus.clone(), codecs.clone(), RpcSettings::default())
        .await
        .unwrap();
    // The handler treats the handle as opaque data and tags a reply onto it.
    server.register("Stamp", |mut args: Vec<Value>| match args.pop() {
        Some(Value::Ext { tag, mut data }) => {
            data.extend_from_slice(b":stamped");
            Ok(Value::Ext { tag, data })
        }
        _ => Err("expected a handle".to_string()),
    });
    registry.register(Node::new("gate-svc", "n1", server.addr()));

    let hub = SessionHub::new(
        bus,
        codecs,
        RpcSettings::default(),
        Arc::new(CacheSelector::new(registry)),
    );
    let session = hub.route("gate-svc", SelectOptions::default()).await.unwrap();

    let handle = Value::Ext {
        tag: "handle".to_string(),
        data: b"user-77".to_vec(),
    };
    let reply = session.call("Stamp", &[handle]).await.unwrap();
    assert_eq!(
        reply,
        Value::Ext {
            tag: "handle".to_string(),
            data: b"user-77:stamped".to_vec(),
        }
    );
}

#[tokio::test]
async fn test_remote_error_travels_as_string() {
    let cluster = cluster(RpcSettings::default()).await;
    let server = RpcServer::new(
        cluster.bus.clone(),
        cluster.codecs.clone(),
        RpcSettings::default(),
    )
    .await
    .unwrap();
    server.register("Withdraw", |_args: Vec<Value>| -> Result<Value, String> {
        Err("insufficient funds".to_string())
    });
    cluster
        .registry
        .register(Node::new("bank", "n1", server.addr()));

    let session = cluster
        .hub
        .route("bank", SelectOptions::default())
        .await
        .unwrap();
    match session.call("Withdraw", &[]).await {
        Err(RpcError::Remote(message)) => assert_eq!(message, "insufficient funds"),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hub_close_cancels_everything() {
    let cluster = cluster(RpcSettings::default()).await;
    let _server = spawn_echo_server(&cluster, "svc", "n1").await;

    let session = cluster
        .hub
        .route("svc", SelectOptions::default())
        .await
        .unwrap();
    cluster.hub.close().await;

    assert!(matches!(
        session.call("Echo", &[Value::Null]).await,
        Err(RpcError::Closed)
    ));
}
