//! End-to-end scenarios: a real server run against an in-process master,
//! exercised over the real client wire protocol.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use regiond::RegionServerError;
use regiond::config::Config;
use regiond::core::master::{
    Instruction, MasterClient, OutboundMessage, ServerIdentity, ServerLoad,
};
use regiond::core::protocol::{Request, Response, RpcCodec};
use regiond::core::region::{BatchOp, BatchUpdate, RegionDescriptor, TableSchema};
use regiond::server::run_with_master;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// A master whose answers are scripted by the test.
struct ScriptedMaster {
    overrides: HashMap<String, String>,
    scripts: parking_lot::Mutex<VecDeque<Vec<Instruction>>>,
    received: parking_lot::Mutex<Vec<OutboundMessage>>,
    fail_reports: AtomicBool,
}

impl ScriptedMaster {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            overrides: HashMap::new(),
            scripts: parking_lot::Mutex::new(VecDeque::new()),
            received: parking_lot::Mutex::new(Vec::new()),
            fail_reports: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, instructions: Vec<Instruction>) {
        self.scripts.lock().push_back(instructions);
    }

    fn received(&self) -> Vec<OutboundMessage> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl MasterClient for ScriptedMaster {
    async fn startup(
        &self,
        _identity: &ServerIdentity,
    ) -> Result<HashMap<String, String>, RegionServerError> {
        Ok(self.overrides.clone())
    }

    async fn report(
        &self,
        _identity: &ServerIdentity,
        _load: ServerLoad,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Instruction>, RegionServerError> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(RegionServerError::IoString("injected master outage".to_string()));
        }
        self.received.lock().extend(messages);
        Ok(self.scripts.lock().pop_front().unwrap_or_default())
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn fast_config(dir: &TempDir) -> (Config, SocketAddr) {
    let address: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
    let mut config = Config::default();
    config.address = address;
    config.rootdir = dir.path().to_path_buf();
    config.msg_interval = Duration::from_millis(50);
    config.master_lease_period = Duration::from_secs(60);
    config.thread_wake_frequency = Duration::from_millis(100);
    (config, address)
}

fn user_descriptor() -> RegionDescriptor {
    RegionDescriptor::new(
        TableSchema::new("users", vec!["f".to_string()]),
        Bytes::new(),
        Bytes::new(),
        42,
    )
}

async fn call(address: SocketAddr, request: Request) -> Option<Response> {
    let stream = TcpStream::connect(address).await.ok()?;
    let mut framed = Framed::new(stream, RpcCodec::<Response, Request>::new());
    framed.send(request).await.ok()?;
    framed.next().await?.ok()
}

/// Polls `probe` until it returns `Some`, within a generous deadline.
async fn eventually<T, F, Fut>(what: &str, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Some(value) = probe().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}

#[tokio::test]
async fn test_open_serve_close_reports_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (config, address) = fast_config(&dir);
    let master = ScriptedMaster::new();
    let descriptor = user_descriptor();
    let region_name = descriptor.region_name();

    master.enqueue(vec![Instruction::RegionOpen(descriptor.clone())]);
    let server = tokio::spawn(run_with_master(
        config,
        master.clone() as Arc<dyn MasterClient>,
    ));

    // Wait until the region is being served.
    let info_region = region_name.clone();
    eventually("region to come online", || {
        let name = info_region.clone();
        async move {
            match call(address, Request::GetRegionInfo { region: name }).await {
                Some(Response::RegionInfo(_)) => Some(()),
                _ => None,
            }
        }
    })
    .await;

    // Write a cell and read it back.
    let update = BatchUpdate {
        row: Bytes::from_static(b"a"),
        ops: vec![BatchOp::Put {
            column: "f:x".to_string(),
            value: Bytes::from_static(b"1"),
        }],
    };
    let written = call(
        address,
        Request::BatchUpdate {
            region: region_name.clone(),
            timestamp: None,
            update,
        },
    )
    .await;
    assert!(matches!(written, Some(Response::Done)));

    let read = call(
        address,
        Request::Get {
            region: region_name.clone(),
            row: Bytes::from_static(b"a"),
            column: "f:x".to_string(),
            versions: None,
            timestamp: None,
        },
    )
    .await;
    match read {
        Some(Response::Cells(cells)) => {
            assert_eq!(cells.len(), 1);
            assert_eq!(cells[0].value, Bytes::from_static(b"1"));
        }
        other => panic!("unexpected get response: {other:?}"),
    }

    // The master takes the region back; the server stops serving it.
    master.enqueue(vec![Instruction::RegionClose(descriptor.clone())]);
    let gone_region = region_name.clone();
    eventually("region to close", || {
        let name = gone_region.clone();
        async move {
            match call(address, Request::GetRegionInfo { region: name }).await {
                Some(Response::Error { kind, .. }) if kind == "NotServingRegion" => Some(()),
                _ => None,
            }
        }
    })
    .await;

    master.enqueue(vec![Instruction::ServerStop]);
    tokio::time::timeout(Duration::from_secs(30), server)
        .await
        .expect("server stopped in time")
        .expect("server task completed")
        .expect("server exited cleanly");

    // Exactly one open followed by exactly one close for this region.
    let received = master.received();
    let lifecycle: Vec<&OutboundMessage> = received
        .iter()
        .filter(|m| {
            matches!(m, OutboundMessage::ReportOpen(d) | OutboundMessage::ReportClose(d)
                if d.region_name() == region_name)
        })
        .collect();
    assert_eq!(lifecycle.len(), 2);
    assert!(matches!(lifecycle[0], OutboundMessage::ReportOpen(_)));
    assert!(matches!(lifecycle[1], OutboundMessage::ReportClose(_)));

    // The final report leads with the exit notice.
    assert_eq!(received.last(), Some(&OutboundMessage::ReportExiting));
}

#[tokio::test]
async fn test_master_outage_past_the_retry_budget_stops_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, _address) = fast_config(&dir);
    config.retry_count = 1;
    let master = ScriptedMaster::new();

    let server = tokio::spawn(run_with_master(
        config,
        master.clone() as Arc<dyn MasterClient>,
    ));

    // Let at least one heartbeat succeed, then cut the master off.
    tokio::time::sleep(Duration::from_millis(200)).await;
    master.fail_reports.store(true, Ordering::SeqCst);

    // The filesystem is healthy, so the server stops gracefully.
    tokio::time::timeout(Duration::from_secs(30), server)
        .await
        .expect("server stopped in time")
        .expect("server task completed")
        .expect("server exited cleanly");
}

#[tokio::test]
async fn test_silent_master_past_the_lease_aborts_and_leaves_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, _address) = fast_config(&dir);
    // A huge retry budget so the lease guard is what fires.
    config.retry_count = 1000;
    config.master_lease_period = Duration::from_millis(300);
    let master = ScriptedMaster::new();

    let server = tokio::spawn(run_with_master(
        config,
        master.clone() as Arc<dyn MasterClient>,
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    master.fail_reports.store(true, Ordering::SeqCst);

    tokio::time::timeout(Duration::from_secs(30), server)
        .await
        .expect("server aborted in time")
        .expect("server task completed")
        .expect("abort is not an error return");

    // An abort leaves the log directory behind; only a graceful stop deletes it.
    let log_dirs: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("log_"))
        .collect();
    assert_eq!(log_dirs.len(), 1);
}
