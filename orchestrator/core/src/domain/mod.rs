// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Entities, value objects and repository contracts of the orchestration core.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types with no I/O

pub mod config;
pub mod credit;
pub mod events;
pub mod health;
pub mod manifest;
pub mod registry;
pub mod routing;
pub mod service;
pub mod workflow;
