// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`aol-core`)
//!
//! HTTP and WebSocket surface of the monitoring API. Handlers delegate to
//! the application services in `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | REST endpoints for services, events, routes, agents, workflows and analysis |
//! | [`ws`] | WebSocket (Axum) | Live event feed and alert subscriptions |

pub mod api;
pub mod ws;
