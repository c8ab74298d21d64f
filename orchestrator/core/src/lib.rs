// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! AOL Core
//!
//! Central coordination service of the Agent Orchestration Layer: service
//! registry, event store with credit assignment, request routing, health
//! management, workflow execution and the monitoring API.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library consumed by the `aol` binary and by tests

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
