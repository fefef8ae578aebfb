//! Domain model types shared by the engine, the repository and the sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque target identifier.
pub type TargetId = i64;

/// Kinds of monitoring target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Http,
    Tcp,
    Grpc,
    Mqtt,
    Dns,
    Instance,
    DomainTls,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Http => "http",
            TargetKind::Tcp => "tcp",
            TargetKind::Grpc => "grpc",
            TargetKind::Mqtt => "mqtt",
            TargetKind::Dns => "dns",
            TargetKind::Instance => "instance",
            TargetKind::DomainTls => "domain_tls",
        }
    }

    /// The alert source family a kind reports under.
    pub fn source_kind(&self) -> SourceKind {
        match self {
            TargetKind::Http | TargetKind::Tcp | TargetKind::Grpc | TargetKind::Mqtt => {
                SourceKind::Service
            }
            TargetKind::Dns => SourceKind::Dns,
            TargetKind::Instance => SourceKind::Instance,
            TargetKind::DomainTls => SourceKind::DomainTls,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpParams {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub body_regex: Option<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpParams {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrpcParams {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub authority: Option<String>,
    /// Fully-qualified service name, e.g. `helloworld.Greeter`.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expected_response_regex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttParams {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// DNS record types a DNS target can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    #[default]
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Txt,
    Srv,
    Ptr,
}

impl DnsRecordType {
    /// Wire QTYPE code.
    pub fn code(&self) -> u16 {
        match self {
            DnsRecordType::A => 1,
            DnsRecordType::Ns => 2,
            DnsRecordType::Cname => 5,
            DnsRecordType::Ptr => 12,
            DnsRecordType::Mx => 15,
            DnsRecordType::Txt => 16,
            DnsRecordType::Aaaa => 28,
            DnsRecordType::Srv => 33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsParams {
    pub record_name: String,
    #[serde(default)]
    pub record_type: DnsRecordType,
    /// Resolver address, `ip` or `ip:port`.
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub expected_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstanceParams {
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTlsParams {
    pub domain: String,
    #[serde(default = "default_warning_days")]
    pub warning_threshold_days: i64,
    #[serde(default = "default_expiry_days")]
    pub expiry_threshold_days: i64,
}

/// Kind-specific parameters; the variant tag is the target kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetParams {
    Http(HttpParams),
    Tcp(TcpParams),
    Grpc(GrpcParams),
    Mqtt(MqttParams),
    Dns(DnsParams),
    Instance(InstanceParams),
    DomainTls(DomainTlsParams),
    /// A stored row whose kind or parameters could not be understood.
    #[serde(skip)]
    Unsupported { kind: String, reason: String },
}

impl TargetParams {
    pub fn kind(&self) -> Option<TargetKind> {
        match self {
            TargetParams::Http(_) => Some(TargetKind::Http),
            TargetParams::Tcp(_) => Some(TargetKind::Tcp),
            TargetParams::Grpc(_) => Some(TargetKind::Grpc),
            TargetParams::Mqtt(_) => Some(TargetKind::Mqtt),
            TargetParams::Dns(_) => Some(TargetKind::Dns),
            TargetParams::Instance(_) => Some(TargetKind::Instance),
            TargetParams::DomainTls(_) => Some(TargetKind::DomainTls),
            TargetParams::Unsupported { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            TargetParams::Unsupported { kind, .. } => kind,
            other => other.kind().map(|k| k.as_str()).unwrap_or("unknown"),
        }
    }
}

/// Longest probe interval honored; larger configured values are clamped.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A monitoring target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub interval_secs: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub recovery_threshold: Option<u32>,
    #[serde(default)]
    pub deleted: bool,
    pub params: TargetParams,
}

impl Target {
    pub fn new(id: TargetId, name: &str, params: TargetParams) -> Self {
        Self {
            id,
            name: name.to_string(),
            interval_secs: 60,
            timeout_ms: 5000,
            failure_threshold: None,
            recovery_threshold: None,
            deleted: false,
            params,
        }
    }

    pub fn kind(&self) -> Option<TargetKind> {
        self.params.kind()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1)).min(MAX_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Probe status. DNS targets use `Resolved`/`Failed`, every other kind `Up`/`Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Up,
    Down,
    Unknown,
    Resolved,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
            CheckStatus::Unknown => "unknown",
            CheckStatus::Resolved => "resolved",
            CheckStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(CheckStatus::Up),
            "down" => Some(CheckStatus::Down),
            "unknown" => Some(CheckStatus::Unknown),
            "resolved" => Some(CheckStatus::Resolved),
            "failed" => Some(CheckStatus::Failed),
            _ => None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, CheckStatus::Up | CheckStatus::Resolved)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, CheckStatus::Down | CheckStatus::Failed)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional numeric and descriptive measurements attached to an outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
}

impl Measurements {
    pub fn is_empty(&self) -> bool {
        *self == Measurements::default()
    }
}

/// Host metrics reported by an instance agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_io_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_io_out: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average_1m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average_5m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average_15m: Option<f64>,
}

/// The result of a single probe, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub target_id: TargetId,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub status: CheckStatus,
    #[serde(default)]
    pub measurements: Measurements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<InstanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn new(target_id: TargetId, started_at: DateTime<Utc>, status: CheckStatus) -> Self {
        Self {
            target_id,
            started_at,
            elapsed_ms: 0,
            status,
            measurements: Measurements::default(),
            metrics: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }
}

/// A persisted probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Service,
    Dns,
    Instance,
    DomainTls,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Service => "service",
            SourceKind::Dns => "dns",
            SourceKind::Instance => "instance",
            SourceKind::DomainTls => "domain_tls",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service" => Some(SourceKind::Service),
            "dns" => Some(SourceKind::Dns),
            "instance" => Some(SourceKind::Instance),
            "domain_tls" => Some(SourceKind::DomainTls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Triggered,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Triggered => "triggered",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "triggered" => Some(AlertStatus::Triggered),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }
}

/// An alert emitted on a state edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Zero until persisted.
    #[serde(default)]
    pub id: i64,
    pub source_kind: SourceKind,
    pub target_id: TargetId,
    pub metric: String,
    pub threshold: String,
    pub current_value: String,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Email,
    Slack,
    Telegram,
    Webhook,
    AlertmanagerWebhook,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Email => "email",
            SinkKind::Slack => "slack",
            SinkKind::Telegram => "telegram",
            SinkKind::Webhook => "webhook",
            SinkKind::AlertmanagerWebhook => "alertmanager_webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(SinkKind::Email),
            "slack" => Some(SinkKind::Slack),
            "telegram" => Some(SinkKind::Telegram),
            "webhook" => Some(SinkKind::Webhook),
            "alertmanager_webhook" => Some(SinkKind::AlertmanagerWebhook),
            _ => None,
        }
    }
}

/// A user-defined notification endpoint. `config` is an opaque JSON document
/// interpreted by the sink implementation for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSink {
    pub id: i64,
    pub kind: SinkKind,
    pub config: serde_json::Value,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_true() -> bool {
    true
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_warning_days() -> i64 {
    30
}

fn default_expiry_days() -> i64 {
    7
}
