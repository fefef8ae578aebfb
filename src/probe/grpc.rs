//! gRPC probe.
//!
//! Without a service method configured this calls the standard
//! `grpc.health.v1.Health/Check`; otherwise it sends an empty message to
//! `/service/method` and optionally matches the raw response bytes.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, GrpcParams, Measurements, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use chrono::Utc;
use regex::Regex;
use std::time::{Duration, Instant};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder, ProstCodec};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::http::Uri;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

/// `grpc.health.v1.HealthCheckResponse.ServingStatus.SERVING`
const SERVING: i32 = 1;

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    pub service: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
}

/// Probes plaintext gRPC endpoints.
#[derive(Debug, Default)]
pub struct GrpcDriver;

#[async_trait]
impl Driver for GrpcDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match &target.params {
            TargetParams::Grpc(params) => run_grpc_probe(params, deadline).await,
            _ => Err(ProbeError::Config("expected gRPC parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Down)
    }
}

/// The RPC path for a target: the health check, or `/service/method`.
pub fn rpc_path(params: &GrpcParams) -> Result<PathAndQuery, ProbeError> {
    let method = params.method.as_deref().filter(|m| !m.is_empty());
    let service = params.service.as_deref().filter(|s| !s.is_empty());

    let path = match (service, method) {
        (_, None) => HEALTH_CHECK_PATH.to_string(),
        (Some(service), Some(method)) => format!("/{}/{}", service.trim_matches('/'), method.trim_matches('/')),
        (None, Some(_)) => {
            return Err(ProbeError::Config("method configured without a service".to_string()))
        }
    };

    path.parse::<PathAndQuery>()
        .map_err(|e| ProbeError::Config(format!("invalid RPC path {}: {}", path, e)))
}

async fn connect(params: &GrpcParams, timeout: Duration) -> Result<Channel, ProbeError> {
    if params.host.is_empty() || params.port == 0 {
        return Err(ProbeError::Config(format!("invalid address {}:{}", params.host, params.port)));
    }

    let mut endpoint = Endpoint::from_shared(format!("http://{}:{}", params.host, params.port))
        .map_err(|e| ProbeError::Config(format!("invalid endpoint: {}", e)))?
        .connect_timeout(timeout)
        .timeout(timeout);

    if let Some(authority) = params.authority.as_deref().filter(|a| !a.is_empty()) {
        let origin = format!("http://{}", authority)
            .parse::<Uri>()
            .map_err(|e| ProbeError::Config(format!("invalid authority {}: {}", authority, e)))?;
        endpoint = endpoint.origin(origin);
    }

    endpoint
        .connect()
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))
}

/// Run a gRPC probe.
pub async fn run_grpc_probe(params: &GrpcParams, timeout: Duration) -> Result<Probed, ProbeError> {
    let path = rpc_path(params)?;
    let expected = params
        .expected_response_regex
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(Regex::new)
        .transpose()
        .map_err(|e| ProbeError::Config(format!("invalid response regex: {}", e)))?;

    let start = Instant::now();
    let channel = tokio::time::timeout(timeout, connect(params, timeout))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    let mut client = tonic::client::Grpc::new(channel);
    client
        .ready()
        .await
        .map_err(|e| ProbeError::Network(format!("service was not ready: {}", e)))?;

    let mismatch = if path.as_str() == HEALTH_CHECK_PATH {
        let request = HealthCheckRequest {
            service: params.service.clone().unwrap_or_default(),
        };
        let codec: ProstCodec<HealthCheckRequest, HealthCheckResponse> = ProstCodec::default();
        let response = client
            .unary(Request::new(request), path, codec)
            .await
            .map_err(|s| status_error(s, timeout))?;
        let serving = response.into_inner().status;
        (serving != SERVING).then(|| format!("health status {} is not SERVING", serving))
    } else {
        let response = client
            .unary(Request::new(Vec::new()), path, RawCodec)
            .await
            .map_err(|s| status_error(s, timeout))?;
        let body = response.into_inner();
        expected.and_then(|re| {
            let text = String::from_utf8_lossy(&body);
            (!re.is_match(&text)).then(|| format!("response does not match /{}/", re.as_str()))
        })
    };

    let measurements = Measurements {
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        ..Default::default()
    };

    Ok(match mismatch {
        Some(msg) => Probed {
            status: CheckStatus::Down,
            measurements,
            error: Some(msg),
        },
        None => Probed::healthy(CheckStatus::Up, measurements),
    })
}

fn status_error(status: Status, timeout: Duration) -> ProbeError {
    match status.code() {
        Code::DeadlineExceeded => ProbeError::Timeout(timeout),
        code => ProbeError::Network(format!("rpc failed ({:?}): {}", code, status.message())),
    }
}

/// Passes message bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut out = vec![0u8; src.remaining()];
        src.copy_to_slice(&mut out);
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn params() -> GrpcParams {
        GrpcParams {
            host: "127.0.0.1".to_string(),
            port: 50051,
            authority: None,
            service: None,
            method: None,
            expected_response_regex: None,
        }
    }

    #[test]
    fn test_rpc_path() {
        assert_eq!(rpc_path(&params()).unwrap().as_str(), HEALTH_CHECK_PATH);

        let mut custom = params();
        custom.service = Some("helloworld.Greeter".to_string());
        custom.method = Some("SayHello".to_string());
        assert_eq!(rpc_path(&custom).unwrap().as_str(), "/helloworld.Greeter/SayHello");

        let mut orphan = params();
        orphan.method = Some("SayHello".to_string());
        assert!(matches!(rpc_path(&orphan), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_health_messages_wire_compatible() {
        let encoded = HealthCheckResponse { status: SERVING }.encode_to_vec();
        assert_eq!(encoded, vec![0x08, 0x01]);
        let decoded = HealthCheckResponse::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded.status, SERVING);
        assert!(HealthCheckRequest::default().encode_to_vec().is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_is_down() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut p = params();
        p.port = port;
        let target = Target::new(21, "grpc", TargetParams::Grpc(p));
        let outcome = GrpcDriver.probe(&target, Duration::from_secs(1)).await;
        assert_eq!(outcome.status, CheckStatus::Down);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_invalid_regex_is_unknown() {
        let mut p = params();
        p.expected_response_regex = Some("[".to_string());
        let target = Target::new(22, "grpc", TargetParams::Grpc(p));
        let outcome = GrpcDriver.probe(&target, Duration::from_secs(1)).await;
        assert_eq!(outcome.status, CheckStatus::Unknown);
    }
}
