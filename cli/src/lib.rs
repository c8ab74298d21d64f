// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0
//! AOL CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers, core server wiring and the core HTTP client

pub mod commands;
pub mod daemon;
