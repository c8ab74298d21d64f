// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! gRPC Transport
//!
//! Forwards routed requests to service instances as unary gRPC calls. The
//! router does not know the message schemas of the services it connects, so
//! payloads travel as opaque, already-encoded protobuf bytes through a
//! pass-through codec.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Implements `RouteTransport` over pooled `tonic` channels
//!
//! One lazily connected channel is pooled per `host:port`. The gRPC path is the
//! request method when it starts with `/` (a fully qualified
//! `/package.Service/Method`), otherwise `/{target_service}/{method}`.

use crate::domain::routing::{RouteRequest, RouteTransport, TransportError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use http::uri::PathAndQuery;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Pass-through codec
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let remaining = src.remaining();
        Ok(Some(src.copy_to_bytes(remaining)))
    }
}

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

// ============================================================================
// GrpcTransport
// ============================================================================

pub fn method_path(request: &RouteRequest) -> String {
    if request.method.starts_with('/') {
        request.method.clone()
    } else {
        format!("/{}/{}", request.target_service, request.method)
    }
}

#[derive(Default)]
pub struct GrpcTransport {
    channels: Mutex<HashMap<String, Channel>>,
}

impl GrpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, address: &str) -> Result<Channel, TransportError> {
        if let Some(channel) = self.channels.lock().get(address) {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                message: e.to_string(),
            })?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = endpoint.connect_lazy();
        debug!(address = %address, "Created gRPC channel");

        Ok(self
            .channels
            .lock()
            .entry(address.to_string())
            .or_insert(channel)
            .clone())
    }

    fn build_request(request: &RouteRequest) -> tonic::Request<Bytes> {
        let mut outgoing = tonic::Request::new(request.payload.clone());
        outgoing.set_timeout(request.timeout);

        let metadata = outgoing.metadata_mut();
        let pairs = request
            .metadata
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .chain(std::iter::once(("source-service".to_string(), request.source_service.as_str())));
        for (key, value) in pairs {
            match (AsciiMetadataKey::from_bytes(key.as_bytes()), AsciiMetadataValue::try_from(value)) {
                (Ok(key), Ok(value)) => {
                    metadata.insert(key, value);
                }
                _ => warn!(key = %key, "Skipping metadata entry that is not valid gRPC metadata"),
            }
        }
        outgoing
    }
}

#[async_trait]
impl RouteTransport for GrpcTransport {
    async fn forward(&self, address: &str, request: &RouteRequest) -> Result<Bytes, TransportError> {
        let path_string = method_path(request);
        let path = PathAndQuery::try_from(path_string.as_str())
            .map_err(|_| TransportError::InvalidPath(path_string.clone()))?;

        let channel = self.channel(address)?;
        let mut client = tonic::client::Grpc::new(channel);
        client.ready().await.map_err(|e| TransportError::Connect {
            address: address.to_string(),
            message: e.to_string(),
        })?;

        let response = client
            .unary(Self::build_request(request), path, RawCodec)
            .await
            .map_err(|status| TransportError::Call(format!("{}: {}", status.code(), status.message())))?;
        Ok(response.into_inner())
    }

    fn pool_size(&self) -> usize {
        self.channels.lock().len()
    }

    async fn close(&self) {
        let closed = {
            let mut channels = self.channels.lock();
            let count = channels.len();
            channels.clear();
            count
        };
        debug!(closed, "Closed gRPC channels");
    }
}
