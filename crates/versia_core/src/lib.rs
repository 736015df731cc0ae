/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod actor_fetch;
pub mod bridge;
pub mod config;
pub mod defederation;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod http_retry;
pub mod http_sig;
pub mod inbox;
pub mod keys;
pub mod sender;
pub mod server;
pub mod social_db;
pub mod store;
