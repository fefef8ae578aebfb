//! DNS probe: one query over UDP, answers checked against the target.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, DnsParams, DnsRecordType, Measurements, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use chrono::Utc;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_resolver::config::ResolverConfig;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Resolver used when neither the target, the config nor the system names one.
pub const FALLBACK_RESOLVER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);

/// Parse `ip` or `ip:port` (port defaults to 53).
pub fn parse_resolver(s: &str) -> Option<SocketAddr> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }
    s.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53))
}

fn first_nameserver(config: &ResolverConfig) -> Option<SocketAddr> {
    config.name_servers().first().map(|ns| ns.socket_addr)
}

fn system_resolver() -> Option<SocketAddr> {
    match hickory_resolver::system_conf::read_system_conf() {
        Ok((config, _)) => first_nameserver(&config),
        Err(e) => {
            tracing::debug!("DNS: no usable system resolver configuration: {}", e);
            None
        }
    }
}

/// Queries a resolver for one record and checks the answer.
#[derive(Debug, Clone)]
pub struct DnsDriver {
    default_resolver: Option<SocketAddr>,
}

impl DnsDriver {
    pub fn new(default_resolver: Option<SocketAddr>) -> Self {
        Self { default_resolver }
    }

    fn resolver_for(&self, params: &DnsParams) -> Result<SocketAddr, ProbeError> {
        if let Some(configured) = params.resolver.as_deref().filter(|s| !s.is_empty()) {
            return parse_resolver(configured)
                .ok_or_else(|| ProbeError::Config(format!("invalid resolver: {}", configured)));
        }
        Ok(self
            .default_resolver
            .or_else(system_resolver)
            .unwrap_or(FALLBACK_RESOLVER))
    }
}

#[async_trait]
impl Driver for DnsDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match &target.params {
            TargetParams::Dns(params) => match self.resolver_for(params) {
                Ok(resolver) => run_dns_probe(params, resolver, deadline).await,
                Err(e) => Err(e),
            },
            _ => Err(ProbeError::Config("expected DNS parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Failed)
    }
}

/// A decoded answer record.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsAnswer {
    pub record_type: RecordType,
    pub value: String,
}

/// Query `resolver` for the target's record and evaluate the answers.
pub async fn run_dns_probe(
    params: &DnsParams,
    resolver: SocketAddr,
    timeout: Duration,
) -> Result<Probed, ProbeError> {
    let query = build_dns_query(&params.record_name, params.record_type)?;
    let tx_id = query.id();
    let packet = query
        .to_vec()
        .map_err(|e| ProbeError::Config(format!("failed to encode query: {}", e)))?;

    let bind_addr: SocketAddr = if resolver.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(resolver)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let start = Instant::now();

    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let answers = tokio::time::timeout(timeout, async {
        let mut response = [0u8; 4096];
        loop {
            let n = socket
                .recv(&mut response)
                .await
                .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;
            // Ignore stray datagrams for other transactions.
            if n >= 2 && u16::from_be_bytes([response[0], response[1]]) != tx_id {
                continue;
            }
            return parse_dns_response(&response[..n], tx_id);
        }
    })
    .await
    .map_err(|_| ProbeError::Timeout(timeout))??;

    let measurements_base = Measurements {
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        ..Default::default()
    };

    if answers.is_empty() {
        return Err(ProbeError::Mismatch("no DNS answer received".to_string()));
    }

    let wanted = RecordType::from(params.record_type.code());
    let first = answers
        .iter()
        .find(|a| a.record_type == wanted)
        .unwrap_or(&answers[0]);

    let measurements = Measurements {
        resolved_ip: Some(first.value.clone()),
        ..measurements_base
    };

    if let Some(expected) = params.expected_ip.as_deref().filter(|s| !s.is_empty()) {
        if !same_address(expected, &first.value) {
            return Ok(Probed {
                status: CheckStatus::Failed,
                measurements,
                error: Some(format!("expected {}, got {}", expected, first.value)),
            });
        }
    }

    Ok(Probed::healthy(CheckStatus::Resolved, measurements))
}

fn same_address(expected: &str, got: &str) -> bool {
    match (expected.parse::<IpAddr>(), got.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => expected.trim_end_matches('.').eq_ignore_ascii_case(got.trim_end_matches('.')),
    }
}

/// Build a recursive query for `name`/`record_type` with a random id.
pub fn build_dns_query(name: &str, record_type: DnsRecordType) -> Result<Message, ProbeError> {
    let trimmed = name.trim();
    if trimmed.trim_end_matches('.').is_empty() {
        return Err(ProbeError::Config("empty record name".to_string()));
    }
    let mut name = Name::from_ascii(trimmed)
        .map_err(|e| ProbeError::Config(format!("invalid record name {}: {}", trimmed, e)))?;
    name.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::from(record_type.code())));
    Ok(message)
}

/// Parse a response, returning its answer records.
pub fn parse_dns_response(response: &[u8], tx_id: u16) -> Result<Vec<DnsAnswer>, ProbeError> {
    let message = Message::from_vec(response)
        .map_err(|e| ProbeError::Network(format!("malformed DNS response: {}", e)))?;

    if message.id() != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            message.id(),
            tx_id
        )));
    }
    if message.message_type() != MessageType::Response {
        return Err(ProbeError::Network("not a DNS response".to_string()));
    }

    let rcode = message.response_code();
    if rcode != ResponseCode::NoError {
        return Err(ProbeError::Mismatch(format!(
            "DNS error RCODE: {} ({})",
            u16::from(rcode),
            rcode_name(rcode)
        )));
    }

    Ok(message.answers().iter().map(answer).collect())
}

fn answer(record: &Record) -> DnsAnswer {
    let data: &RData = record.data();
    let value = match data.ip_addr() {
        Some(ip) => ip.to_string(),
        None => data.to_string().trim_end_matches('.').to_string(),
    };
    DnsAnswer {
        record_type: record.record_type(),
        value,
    }
}

fn rcode_name(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::FormErr => "FORMERR",
        ResponseCode::ServFail => "SERVFAIL",
        ResponseCode::NXDomain => "NXDOMAIN",
        ResponseCode::NotImp => "NOTIMP",
        ResponseCode::Refused => "REFUSED",
        _ => "UNKNOWN",
    }
}
