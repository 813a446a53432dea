//! Shared test infrastructure for registry and DNS integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use onedari::config::{DnsConfig, RegistryConfig};
use onedari::dns::{DnsHandler, ZoneResolver};
use onedari::registry::Registry;
use onedari::{ApiClient, Node, RegistryServer, Store};

// --- Constants ---

pub const ZONE: &str = "onedari.local.";
pub const NODE_ID: &str = "web1";
pub const NODE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Registry fixture ---

/// A real registry HTTP API on an ephemeral port, over the in-memory store.
pub struct TestRegistry {
    pub endpoint: String,
    pub registry: Registry,
    cancel: CancellationToken,
}

impl TestRegistry {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind registry listener");
        let addr = listener.local_addr().expect("failed to get local addr");

        let server = RegistryServer::new(
            &RegistryConfig::default(),
            Store::in_memory(),
            Node::new(NODE_ID, NODE_IP),
        );
        let registry = server.registry().clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener, token).await {
                eprintln!("registry error: {}", e);
            }
        });

        let registry_fixture = Self {
            endpoint: format!("http://{}", addr),
            registry,
            cancel,
        };
        registry_fixture.wait_ready().await;
        registry_fixture
    }

    /// Poll until the node record exists, i.e. the server is serving.
    async fn wait_ready(&self) {
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(format!("{}/v0/node", self.endpoint)).await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("registry did not come up at {}", self.endpoint);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// PUT a JSON body and return status plus decoded body.
    pub async fn put(&self, path: &str, body: Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("PUT failed");
        decode(response).await
    }

    /// GET and return status plus decoded body.
    pub async fn get(&self, path: &str) -> (u16, Value) {
        let response = reqwest::get(self.url(path)).await.expect("GET failed");
        decode(response).await
    }

    /// Register an up instance with an address on `node`.
    pub async fn add_instance(&self, id: &str, node: &str, ip: &str, labels: Value) {
        let (status, body) = self
            .put(
                &format!("/v0/instances/{}", id),
                serde_json::json!({"node": node, "ip": ip, "port": 80, "up": true, "labels": labels}),
            )
            .await;
        assert_eq!(status, 201, "failed to add instance: {}", body);
    }

    /// Define a service selecting instances by `query`.
    pub async fn add_service(&self, id: &str, query: Value) {
        let (status, body) = self
            .put(
                &format!("/v0/services/{}", id),
                serde_json::json!({"labels": {"kind": "test"}, "query": query}),
            )
            .await;
        assert_eq!(status, 201, "failed to add service: {}", body);
    }

    /// A DNS handler resolving against this registry.
    pub fn dns_handler(&self, config: DnsConfig) -> DnsHandler {
        build_handler(&self.endpoint, config)
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn decode(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = response.bytes().await.expect("failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not JSON")
    };
    (status, body)
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        zone: ZONE.to_string(),
        ttl: 60,
        max_answers: 3,
        request_timeout_secs: 2,
        ..Default::default()
    }
}

pub fn build_handler(endpoint: &str, config: DnsConfig) -> DnsHandler {
    let client = ApiClient::new(endpoint, config.request_timeout()).expect("bad endpoint");
    DnsHandler::new(ZoneResolver::new(&config, Arc::new(client)))
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a loopback source.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &DnsHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let response = TestResponseHandler::new();
    handler.handle_request(&request, response.clone()).await;
    response.into_message()
}

/// Extract A addresses from a record section.
pub fn extract_a_ips(records: &[Record]) -> Vec<Ipv4Addr> {
    records
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs, in any order.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg.answers());
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
