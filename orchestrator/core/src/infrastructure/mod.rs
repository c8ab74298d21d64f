// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod consul;
pub mod event_bus;
pub mod grpc_transport;
pub mod health_probe;
pub mod registry;
pub mod telemetry;

pub use event_bus::EventBus;
pub use registry::InMemoryServiceRegistry;
