// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the AOL CLI

pub mod config;
pub mod manifest;
pub mod service;
pub mod services;
pub mod workflow;

pub use self::config::ConfigCommand;
pub use self::manifest::ManifestCommand;
pub use self::service::ServiceCommand;
pub use self::services::ServicesCommand;
pub use self::workflow::WorkflowCommand;
