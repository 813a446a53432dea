//! Turns one DNS question into answer and additional records.

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, SRV};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{classify, metadata_u16, Directory, QueryKind};
use crate::client::ClientError;
use crate::config::DnsConfig;
use crate::metrics;
use crate::model::Instance;

/// Outcome of resolving one question.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Reply code.
    pub response_code: ResponseCode,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Additional section; SRV glue.
    pub additionals: Vec<Record>,
}

impl Resolution {
    fn records(answers: Vec<Record>, additionals: Vec<Record>) -> Self {
        Self {
            response_code: ResponseCode::NoError,
            answers,
            additionals,
        }
    }

    fn error(response_code: ResponseCode) -> Self {
        Self {
            response_code,
            answers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    fn upstream(err: ClientError) -> Self {
        if err.is_not_found() {
            debug!(error = %err, "registry has no such entry");
            Self::error(ResponseCode::NXDomain)
        } else {
            warn!(error = %err, "registry lookup failed");
            Self::error(ResponseCode::ServFail)
        }
    }
}

/// Stateless resolver for the registry zone.
#[derive(Clone)]
pub struct ZoneResolver {
    directory: Arc<dyn Directory>,
    zone: String,
    ttl: u32,
    max_answers: usize,
}

impl ZoneResolver {
    /// Create a resolver answering for `config.zone` from `directory`.
    pub fn new(config: &DnsConfig, directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            zone: format!("{}.", config.zone.trim_matches('.').to_ascii_lowercase()),
            ttl: config.ttl,
            max_answers: config.max_answers,
        }
    }

    /// Zone served, lowercased and fully qualified.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    fn record(&self, name: Name, rdata: RData) -> Record {
        let mut record = Record::from_rdata(name, self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        record
    }

    fn cap<T>(&self, record_type: RecordType, items: Vec<T>) -> Vec<T> {
        let total = items.len();
        if total > self.max_answers {
            debug!(total, cap = self.max_answers, "truncating answer list");
            metrics::record_answers_capped(&record_type.to_string(), total - self.max_answers);
        }
        items.into_iter().take(self.max_answers).collect()
    }

    /// Resolve one question. Always returns something to reply with.
    pub async fn resolve(&self, name: &LowerName, record_type: RecordType) -> Resolution {
        let kind = classify(&name.to_string(), &self.zone);
        trace!(%name, ?record_type, ?kind, "resolving");

        match (kind, record_type) {
            (QueryKind::Service(id), RecordType::A) => self.service_a(name, &id).await,
            (QueryKind::Service(id), RecordType::SRV) => self.service_srv(name, &id).await,
            (QueryKind::Node(id), RecordType::A) => self.node_a(name, &id).await,
            _ => Resolution::error(ResponseCode::NXDomain),
        }
    }

    async fn service_a(&self, name: &LowerName, id: &str) -> Resolution {
        let service = match self.directory.service(id).await {
            Ok(service) => service,
            Err(e) => return Resolution::upstream(e),
        };

        let addressed: Vec<&Instance> = service
            .instances
            .iter()
            .filter(|i| i.address.is_some())
            .collect();

        let owner = Name::from(name.clone());
        let answers = self
            .cap(RecordType::A, addressed)
            .into_iter()
            .filter_map(|i| i.address)
            .map(|addr| self.record(owner.clone(), RData::A(A::from(addr))))
            .collect();
        Resolution::records(answers, Vec::new())
    }

    async fn service_srv(&self, name: &LowerName, id: &str) -> Resolution {
        let service = match self.directory.service(id).await {
            Ok(service) => service,
            Err(e) => return Resolution::upstream(e),
        };

        let targeted: Vec<(&Instance, Ipv4Addr, Name)> = service
            .instances
            .iter()
            .filter(|i| !i.node.is_empty())
            .filter_map(|instance| {
                let addr = instance.address?;
                match self.node_name(&instance.node) {
                    Ok(target) => Some((instance, addr, target)),
                    Err(e) => {
                        warn!(node = %instance.node, error = %e, "skipping instance with unusable node name");
                        None
                    }
                }
            })
            .collect();

        let owner = Name::from(name.clone());
        let mut answers = Vec::new();
        let mut additionals = Vec::new();
        for (instance, addr, target) in self.cap(RecordType::SRV, targeted) {
            let srv = SRV::new(
                metadata_u16(instance, "priority"),
                metadata_u16(instance, "weight"),
                instance.port,
                target.clone(),
            );
            answers.push(self.record(owner.clone(), RData::SRV(srv)));
            additionals.push(self.glue(target, addr));
        }
        Resolution::records(answers, additionals)
    }

    async fn node_a(&self, name: &LowerName, id: &str) -> Resolution {
        let node = match self.directory.node(id).await {
            Ok(node) => node,
            Err(e) => return Resolution::upstream(e),
        };

        let Some(addr) = node.address.filter(|_| !node.id.is_empty()) else {
            warn!(node = %id, "registry returned a node without an id or address");
            return Resolution::error(ResponseCode::ServFail);
        };

        let answer = self.record(Name::from(name.clone()), RData::A(A::from(addr)));
        Resolution::records(vec![answer], Vec::new())
    }

    fn node_name(&self, node: &str) -> Result<Name, hickory_proto::ProtoError> {
        Name::from_ascii(format!("{}.nodes.{}", node.to_ascii_lowercase(), self.zone))
    }

    fn glue(&self, target: Name, addr: Ipv4Addr) -> Record {
        self.record(target, RData::A(A::from(addr)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Node, Service};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::str::FromStr;

    /// In-process directory standing in for the registry API.
    #[derive(Default)]
    pub(crate) struct FakeDirectory {
        pub services: HashMap<String, Service>,
        pub nodes: HashMap<String, Node>,
        pub unavailable: bool,
    }

    #[async_trait]
    impl Directory for FakeDirectory {
        async fn service(&self, id: &str) -> Result<Service, ClientError> {
            if self.unavailable {
                return Err(ClientError::Status {
                    status: 500,
                    url: format!("/v0/services/{id}"),
                });
            }
            self.services
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("/v0/services/{id}")))
        }

        async fn node(&self, id: &str) -> Result<Node, ClientError> {
            if self.unavailable {
                return Err(ClientError::Status {
                    status: 500,
                    url: format!("/v0/nodes/{id}"),
                });
            }
            self.nodes
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("/v0/nodes/{id}")))
        }
    }

    pub(crate) fn instance(node: &str, addr: Option<[u8; 4]>, port: u16) -> Instance {
        let mut instance = Instance::new();
        instance.id = format!("{node}-app");
        instance.node = node.to_string();
        instance.address = addr.map(Ipv4Addr::from);
        instance.port = port;
        instance.up = true;
        instance
    }

    pub(crate) fn service(id: &str, instances: Vec<Instance>) -> Service {
        Service {
            id: id.to_string(),
            instances,
            ..Default::default()
        }
    }

    fn config(ttl: u32, max_answers: usize) -> DnsConfig {
        DnsConfig {
            ttl,
            max_answers,
            ..Default::default()
        }
    }

    fn resolver(directory: FakeDirectory, ttl: u32, max_answers: usize) -> ZoneResolver {
        ZoneResolver::new(&config(ttl, max_answers), Arc::new(directory))
    }

    fn lower(name: &str) -> LowerName {
        LowerName::from(Name::from_str(name).unwrap())
    }

    fn a_addrs(records: &[Record]) -> Vec<Ipv4Addr> {
        records
            .iter()
            .filter_map(|r| match r.data() {
                RData::A(a) => Some(a.0),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_service_a_returns_one_record_per_addressed_instance() {
        let mut directory = FakeDirectory::default();
        directory.services.insert(
            "foo".to_string(),
            service(
                "foo",
                vec![
                    instance("web1", Some([10, 0, 0, 1]), 80),
                    instance("web2", Some([10, 0, 0, 2]), 80),
                    instance("web3", None, 80),
                ],
            ),
        );
        let resolver = resolver(directory, 30, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::A)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert_eq!(
            a_addrs(&res.answers),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        for record in &res.answers {
            assert_eq!(record.ttl(), 30);
            assert_eq!(record.dns_class(), DNSClass::IN);
            assert_eq!(record.name().to_string(), "foo.services.onedari.local.");
        }
        assert!(res.additionals.is_empty());
    }

    #[tokio::test]
    async fn test_service_a_is_capped() {
        let instances = (1..=5)
            .map(|n| instance(&format!("web{n}"), Some([10, 0, 0, n]), 80))
            .collect();
        let mut directory = FakeDirectory::default();
        directory.services.insert("foo".to_string(), service("foo", instances));
        let resolver = resolver(directory, 0, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::A)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert_eq!(res.answers.len(), 3);
    }

    #[tokio::test]
    async fn test_service_with_no_members_is_empty_noerror() {
        let mut directory = FakeDirectory::default();
        directory.services.insert("foo".to_string(), service("foo", Vec::new()));
        let resolver = resolver(directory, 0, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::A)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert!(res.answers.is_empty());
    }

    #[tokio::test]
    async fn test_service_srv_with_glue() {
        let mut weighted = instance("Web1", Some([10, 0, 0, 1]), 8080);
        weighted.metadata.insert("weight".to_string(), "5".to_string());
        weighted.metadata.insert("priority".to_string(), "10".to_string());
        let plain = instance("web2", Some([10, 0, 0, 2]), 8081);
        let external = instance("", Some([10, 0, 0, 3]), 8082);
        let unaddressed = instance("web4", None, 8083);

        let mut directory = FakeDirectory::default();
        directory.services.insert(
            "foo".to_string(),
            service("foo", vec![weighted, plain, external, unaddressed]),
        );
        let resolver = resolver(directory, 15, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::SRV)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert_eq!(res.answers.len(), 2);
        assert_eq!(res.additionals.len(), 2);

        let srvs: Vec<&SRV> = res
            .answers
            .iter()
            .filter_map(|r| match r.data() {
                RData::SRV(srv) => Some(srv),
                _ => None,
            })
            .collect();
        assert_eq!(srvs[0].priority(), 10);
        assert_eq!(srvs[0].weight(), 5);
        assert_eq!(srvs[0].port(), 8080);
        assert_eq!(srvs[0].target().to_string(), "web1.nodes.onedari.local.");
        assert_eq!(srvs[1].priority(), 100);
        assert_eq!(srvs[1].weight(), 100);
        assert_eq!(srvs[1].target().to_string(), "web2.nodes.onedari.local.");

        assert_eq!(res.additionals[0].name().to_string(), "web1.nodes.onedari.local.");
        assert_eq!(
            a_addrs(&res.additionals),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        assert!(res.answers.iter().chain(&res.additionals).all(|r| r.ttl() == 15));
    }

    #[tokio::test]
    async fn test_service_srv_is_capped_with_glue() {
        let instances = (1..=4)
            .map(|n| instance(&format!("web{n}"), Some([10, 0, 0, n]), 80))
            .collect();
        let mut directory = FakeDirectory::default();
        directory.services.insert("foo".to_string(), service("foo", instances));
        let resolver = resolver(directory, 0, 2);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::SRV)
            .await;
        assert_eq!(res.answers.len(), 2);
        assert_eq!(res.additionals.len(), 2);
    }

    #[tokio::test]
    async fn test_service_srv_cap_skips_unusable_node_names() {
        let long_label = "x".repeat(64);
        let mut instances = vec![
            instance(&long_label, Some([10, 0, 0, 9]), 80),
            instance(&long_label, Some([10, 0, 0, 8]), 80),
        ];
        instances.extend((1..=3).map(|n| instance(&format!("web{n}"), Some([10, 0, 0, n]), 80)));
        let mut directory = FakeDirectory::default();
        directory.services.insert("foo".to_string(), service("foo", instances));
        let resolver = resolver(directory, 0, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::SRV)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert_eq!(res.answers.len(), 3);
        assert_eq!(
            a_addrs(&res.additionals),
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_node_a() {
        let mut directory = FakeDirectory::default();
        directory.nodes.insert(
            "web1".to_string(),
            Node::new("web1", Ipv4Addr::new(10, 0, 0, 1)),
        );
        let resolver = resolver(directory, 60, 3);

        let res = resolver
            .resolve(&lower("WEB1.nodes.onedari.local."), RecordType::A)
            .await;
        assert_eq!(res.response_code, ResponseCode::NoError);
        assert_eq!(a_addrs(&res.answers), vec![Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(res.answers[0].ttl(), 60);
    }

    #[tokio::test]
    async fn test_missing_node_is_nxdomain() {
        let resolver = resolver(FakeDirectory::default(), 0, 3);
        let res = resolver
            .resolve(&lower("bar.nodes.onedari.local."), RecordType::A)
            .await;
        assert_eq!(res.response_code, ResponseCode::NXDomain);
        assert!(res.answers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_node_is_servfail() {
        let mut directory = FakeDirectory::default();
        directory.nodes.insert(
            "web1".to_string(),
            Node {
                id: "web1".to_string(),
                address: None,
            },
        );
        directory.nodes.insert(
            "web2".to_string(),
            Node {
                id: String::new(),
                address: Some(Ipv4Addr::new(10, 0, 0, 2)),
            },
        );
        let resolver = resolver(directory, 0, 3);

        for name in ["web1.nodes.onedari.local.", "web2.nodes.onedari.local."] {
            let res = resolver.resolve(&lower(name), RecordType::A).await;
            assert_eq!(res.response_code, ResponseCode::ServFail, "{name}");
            assert!(res.answers.is_empty());
        }
    }

    #[tokio::test]
    async fn test_registry_failure_is_servfail() {
        let directory = FakeDirectory {
            unavailable: true,
            ..Default::default()
        };
        let resolver = resolver(directory, 0, 3);

        let res = resolver
            .resolve(&lower("foo.services.onedari.local."), RecordType::SRV)
            .await;
        assert_eq!(res.response_code, ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn test_unsupported_combinations_are_nxdomain() {
        let mut directory = FakeDirectory::default();
        directory.services.insert("foo".to_string(), service("foo", Vec::new()));
        directory.nodes.insert(
            "web1".to_string(),
            Node::new("web1", Ipv4Addr::new(10, 0, 0, 1)),
        );
        let resolver = resolver(directory, 0, 3);

        let cases = [
            ("web1.nodes.onedari.local.", RecordType::SRV),
            ("foo.services.onedari.local.", RecordType::AAAA),
            ("foo.services.onedari.local.", RecordType::TXT),
            ("onedari.local.", RecordType::SOA),
            ("foo.other.onedari.local.", RecordType::A),
            ("foo.services.example.com.", RecordType::A),
        ];
        for (name, rtype) in cases {
            let res = resolver.resolve(&lower(name), rtype).await;
            assert_eq!(res.response_code, ResponseCode::NXDomain, "{name} {rtype}");
        }
    }
}
