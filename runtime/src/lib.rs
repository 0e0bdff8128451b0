// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

//! weread-extract: chapter extraction for the WeRead web reader.
//!
//! Responses are rewritten in flight so the reader exposes its state and
//! its section decryption routine; chapters are then walked one by one
//! and saved as plain text.

pub mod bridge;
pub mod cache;
pub mod cli;
pub mod config;
pub mod extraction;
pub mod intercept;
pub mod live;
pub mod renderer;
pub mod rewrite;
