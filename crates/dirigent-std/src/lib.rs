// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # dirigent-std
//!
//! File-backed persistence for `dirigent-core`.
//!
//! This crate provides [`FilePersistence`], a JSON file-backed
//! implementation of the [`Persistence`](dirigent_core::Persistence) trait
//! suitable for CLI tools, local agents, and single-process deployments
//! that do not need a full database.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dirigent_std::storage::FilePersistence;
//! use dirigent_core::{config::Config, engine::DirigentEngine};
//!
//! let persistence = FilePersistence::open("/var/lib/dirigent/state.json")
//!     .expect("failed to open state file");
//!
//! let mut engine = DirigentEngine::open(Config::default(), persistence)
//!     .expect("failed to open engine");
//! ```

pub mod storage;

pub use storage::file::FilePersistence;
