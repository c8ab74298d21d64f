// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod analysis;
pub mod event_store;
pub mod health_manager;
pub mod registration;
pub mod router;
pub mod workflow_executor;
