//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use mtconnect_rs::client::{ByteStream, ClientEvent, Transport};
use mtconnect_rs::error::{MTConnectError, MTConnectResult};
use tokio::sync::broadcast;
use tokio::time::Instant;
use url::Url;

/// Base URL used with [`ScriptedTransport`]; never contacted.
pub const AGENT_URL: &str = "http://agent.test:5000";

// ──────────────────────────────────────────────────
// Documents
// ──────────────────────────────────────────────────

pub fn header_xml(instance_id: u64, first: u64, next: u64) -> String {
    format!(
        r#"<Header creationTime="2024-03-01T10:00:00Z" sender="mock" instanceId="{instance_id}" version="2.0.0" bufferSize="131072" firstSequence="{first}" lastSequence="{last}" nextSequence="{next}"/>"#,
        last = next.saturating_sub(1)
    )
}

pub fn probe_xml(instance_id: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:2.0">
  {header}
  <Devices>
    <Device id="d1" name="mill" uuid="mill-01">
      <DataItems>
        <DataItem id="avail" type="AVAILABILITY" category="EVENT"/>
        <DataItem id="asset_chg" type="ASSET_CHANGED" category="EVENT"/>
        <DataItem id="asset_rem" type="ASSET_REMOVED" category="EVENT"/>
        <DataItem id="exec" type="EXECUTION" category="EVENT"/>
      </DataItems>
    </Device>
  </Devices>
</MTConnectDevices>"#,
        header = header_xml(instance_id, 1, 1)
    )
}

/// A streams document for device `mill` whose events are
/// `(sequence, element, value)`.
pub fn streams_xml(instance_id: u64, first: u64, next: u64, events: &[(u64, &str, &str)]) -> String {
    let events: String = events
        .iter()
        .map(|(sequence, element, value)| {
            format!(
                r#"<{element} dataItemId="{id}" timestamp="2024-03-01T10:00:01Z" sequence="{sequence}">{value}</{element}>"#,
                id = element.to_ascii_lowercase()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectStreams xmlns="urn:mtconnect.org:MTConnectStreams:2.0">
  {header}
  <Streams>
    <DeviceStream name="mill" uuid="mill-01">
      <ComponentStream component="Device" name="mill" componentId="d1">
        <Events>{events}</Events>
      </ComponentStream>
    </DeviceStream>
  </Streams>
</MTConnectStreams>"#,
        header = header_xml(instance_id, first, next)
    )
}

pub fn assets_xml(instance_id: u64, asset_ids: &[&str]) -> String {
    let assets: String = asset_ids
        .iter()
        .map(|id| {
            format!(
                r#"<CuttingTool assetId="{id}" deviceUuid="mill-01" timestamp="2024-03-01T10:00:00Z"><CuttingToolLifeCycle><ToolLife type="MINUTES">12</ToolLife></CuttingToolLifeCycle></CuttingTool>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectAssets xmlns="urn:mtconnect.org:MTConnectAssets:2.0">
  {header}
  <Assets>{assets}</Assets>
</MTConnectAssets>"#,
        header = header_xml(instance_id, 1, 1)
    )
}

pub fn error_xml(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectError xmlns="urn:mtconnect.org:MTConnectError:2.0">
  {header}
  <Errors><Error errorCode="{code}">{message}</Error></Errors>
</MTConnectError>"#,
        header = header_xml(1, 1, 1)
    )
}

pub fn header_json(instance_id: u64, first: u64, next: u64) -> String {
    format!(
        r#"{{"creationTime":"2024-03-01T10:00:00Z","sender":"mock","instanceId":{instance_id},"version":"2.2.0.16","bufferSize":131072,"firstSequence":{first},"lastSequence":{last},"nextSequence":{next}}}"#,
        last = next.saturating_sub(1)
    )
}

pub fn probe_json(instance_id: u64) -> String {
    format!(
        r#"{{"MTConnectDevices":{{"jsonVersion":2,"Header":{header},"Devices":{{"Device":[{{"id":"d1","name":"mill","uuid":"mill-01","DataItems":{{"DataItem":[{{"id":"avail","type":"AVAILABILITY","category":"EVENT"}},{{"id":"assetchanged","type":"ASSET_CHANGED","category":"EVENT"}},{{"id":"execution","type":"EXECUTION","category":"EVENT"}}]}}}}]}}}}}}"#,
        header = header_json(instance_id, 1, 1)
    )
}

/// JSON (version 2 layout) counterpart of [`streams_xml`].
pub fn streams_json(instance_id: u64, first: u64, next: u64, events: &[(u64, &str, &str)]) -> String {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (sequence, element, value) in events {
        groups.entry(*element).or_default().push(format!(
            r#"{{"dataItemId":"{id}","timestamp":"2024-03-01T10:00:01Z","sequence":{sequence},"value":"{value}"}}"#,
            id = element.to_ascii_lowercase()
        ));
    }
    let events: Vec<String> = groups
        .iter()
        .map(|(element, items)| format!(r#""{element}":[{}]"#, items.join(",")))
        .collect();
    format!(
        r#"{{"MTConnectStreams":{{"jsonVersion":2,"Header":{header},"Streams":{{"DeviceStream":[{{"name":"mill","uuid":"mill-01","ComponentStream":[{{"component":"Device","name":"mill","componentId":"d1","Events":{{{events}}}}}]}}]}}}}}}"#,
        header = header_json(instance_id, first, next),
        events = events.join(",")
    )
}

pub fn assets_json(instance_id: u64, asset_ids: &[&str]) -> String {
    let assets: Vec<String> = asset_ids
        .iter()
        .map(|id| format!(r#"{{"assetId":"{id}","deviceUuid":"mill-01","timestamp":"2024-03-01T10:00:00Z"}}"#))
        .collect();
    format!(
        r#"{{"MTConnectAssets":{{"jsonVersion":2,"Header":{header},"Assets":{{"CuttingTool":[{assets}]}}}}}}"#,
        header = header_json(instance_id, 1, 1),
        assets = assets.join(",")
    )
}

/// Split `text` into chunks of at most `size` bytes on char boundaries.
pub fn chunked(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.len() + c.len_utf8() > size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ──────────────────────────────────────────────────
// Scripted transport
// ──────────────────────────────────────────────────

/// What a [`ScriptedTransport`] answers to a request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with this body.
    Document(String),
    /// Non-2xx status with this body.
    Status(u16, String),
    /// Fail with this error.
    Fail(MTConnectError),
    /// Streaming body: these chunks, then silence until dropped.
    Stream(Vec<String>),
    /// Streaming body: these chunks, then end of stream.
    ClosedStream(Vec<String>),
    /// Never answer.
    Hang,
}

/// A request seen by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: Url,
    pub accept: String,
    pub at: Instant,
    pub streaming: bool,
}

type Script = dyn Fn(&Url, usize) -> Reply + Send + Sync;

/// In-memory [`Transport`] answering from a script and recording every
/// request. The script receives the URL and how many earlier requests went
/// to the same path.
pub struct ScriptedTransport {
    script: Box<Script>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(script: impl Fn(&Url, usize) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, url: &Url, accept: &str, streaming: bool) -> usize {
        let mut requests = self.requests.lock().unwrap();
        let earlier = requests.iter().filter(|r| r.url.path() == url.path()).count();
        requests.push(Recorded {
            url: url.clone(),
            accept: accept.to_string(),
            at: Instant::now(),
            streaming,
        });
        earlier
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path is exactly `path`.
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    /// Paths of requests starting with `prefix`.
    pub fn paths_starting_with(&self, prefix: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.url.path().to_string())
            .filter(|p| p.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url, accept: &str) -> MTConnectResult<Bytes> {
        let n = self.record(url, accept, false);
        match (self.script)(url, n) {
            Reply::Document(body) => Ok(Bytes::from(body)),
            Reply::Status(status, body) => Err(MTConnectError::Http { status, body }),
            Reply::Fail(e) => Err(e),
            Reply::Stream(chunks) | Reply::ClosedStream(chunks) => Ok(Bytes::from(chunks.concat())),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn get_stream(&self, url: &Url, accept: &str) -> MTConnectResult<ByteStream> {
        let n = self.record(url, accept, true);
        let (chunks, close) = match (self.script)(url, n) {
            Reply::Document(body) => (vec![body], true),
            Reply::Status(status, body) => return Err(MTConnectError::Http { status, body }),
            Reply::Fail(e) => return Err(e),
            Reply::Stream(chunks) => (chunks, false),
            Reply::ClosedStream(chunks) => (chunks, true),
            Reply::Hang => futures::future::pending().await,
        };
        let chunks: Vec<MTConnectResult<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        let body = futures::stream::iter(chunks);
        if close {
            Ok(Box::pin(body))
        } else {
            Ok(Box::pin(body.chain(futures::stream::pending())))
        }
    }
}

/// A transport that behaves like a healthy Agent with one instance and a
/// fixed buffer; `sample` requests are answered by `sample`.
pub fn healthy_agent(
    instance_id: u64,
    first: u64,
    next: u64,
    sample: impl Fn(usize) -> Reply + Send + Sync + 'static,
) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |url, n| match url.path() {
        "/probe" => Reply::Document(probe_xml(instance_id)),
        "/assets" => Reply::Document(assets_xml(instance_id, &[])),
        "/current" => Reply::Document(streams_xml(instance_id, first, next, &[])),
        "/sample" => sample(n),
        path => match path.strip_prefix("/assets/") {
            Some(id) => Reply::Document(assets_xml(instance_id, &[id])),
            None => Reply::Status(404, error_xml("INVALID_REQUEST", path)),
        },
    })
}

/// Wait (up to a minute) for the first event matching `predicate`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut predicate: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

// ──────────────────────────────────────────────────
// HTTP mock Agent
// ──────────────────────────────────────────────────

/// State of the in-process mock Agent.
#[derive(Clone)]
pub struct MockAgent {
    pub instance_id: u64,
    pub first_sequence: u64,
    pub next_sequence: u64,
    /// Chunks written on a streaming `sample` request.
    pub stream_chunks: Vec<String>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockAgent {
    pub fn new(instance_id: u64, first_sequence: u64, next_sequence: u64) -> Self {
        Self {
            instance_id,
            first_sequence,
            next_sequence,
            stream_chunks: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_stream(mut self, chunks: Vec<String>) -> Self {
        self.stream_chunks = chunks;
        self
    }

    /// Path and query of every request received.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, uri: &Uri) {
        let entry = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        self.requests.lock().unwrap().push(entry);
    }
}

fn xml(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn probe(State(agent): State<MockAgent>, uri: Uri) -> Response {
    agent.record(&uri);
    xml(StatusCode::OK, probe_xml(agent.instance_id))
}

async fn device_probe(State(agent): State<MockAgent>, Path(device): Path<String>, uri: Uri) -> Response {
    agent.record(&uri);
    match device.as_str() {
        "mill" | "mill-01" => xml(StatusCode::OK, probe_xml(agent.instance_id)),
        "garbage" => (StatusCode::OK, "<html><body>proxy error</body></html>").into_response(),
        _ => xml(
            StatusCode::NOT_FOUND,
            error_xml("NO_DEVICE", &format!("Could not find the device '{device}'")),
        ),
    }
}

async fn current(
    State(agent): State<MockAgent>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response {
    agent.record(&uri);
    if let Some(at) = params.get("at").and_then(|a| a.parse::<u64>().ok()) {
        if at < agent.first_sequence || at >= agent.next_sequence {
            return xml(
                StatusCode::BAD_REQUEST,
                error_xml("OUT_OF_RANGE", &format!("'at' must be less than {}", agent.next_sequence)),
            );
        }
    }
    let last = agent.next_sequence - 1;
    xml(
        StatusCode::OK,
        streams_xml(
            agent.instance_id,
            agent.first_sequence,
            agent.next_sequence,
            &[(last, "Execution", "ACTIVE")],
        ),
    )
}

async fn sample(
    State(agent): State<MockAgent>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response {
    agent.record(&uri);
    if params.contains_key("interval") {
        let chunks = agent.stream_chunks.clone();
        let body = async_stream::stream! {
            for chunk in chunks {
                yield Ok::<_, Infallible>(chunk);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            futures::future::pending::<()>().await;
        };
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "multipart/x-mixed-replace;boundary=d8a4")],
            Body::from_stream(body),
        )
            .into_response();
    }

    let from = params
        .get("from")
        .and_then(|f| f.parse::<u64>().ok())
        .unwrap_or(agent.first_sequence);
    xml(
        StatusCode::OK,
        streams_xml(
            agent.instance_id,
            agent.first_sequence,
            agent.next_sequence,
            &[(from, "Execution", "READY")],
        ),
    )
}

async fn assets(State(agent): State<MockAgent>, uri: Uri) -> Response {
    agent.record(&uri);
    xml(StatusCode::OK, assets_xml(agent.instance_id, &["tool-42"]))
}

async fn asset(State(agent): State<MockAgent>, Path(id): Path<String>, uri: Uri) -> Response {
    agent.record(&uri);
    if id == "missing" {
        return xml(
            StatusCode::NOT_FOUND,
            error_xml("ASSET_NOT_FOUND", &format!("Cannot find asset: {id}")),
        );
    }
    xml(StatusCode::OK, assets_xml(agent.instance_id, &[&id]))
}

/// Start a mock Agent on a random port. Returns the base URL and the server
/// task.
pub async fn start_mock_agent(agent: MockAgent) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let app = Router::new()
        .route("/probe", get(probe))
        .route("/current", get(current))
        .route("/sample", get(sample))
        .route("/assets", get(assets))
        .route("/assets/{id}", get(asset))
        .route("/{device}/probe", get(device_probe))
        .with_state(agent);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (base_url, handle)
}
