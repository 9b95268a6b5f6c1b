// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Persistence backends.

pub mod file;

pub use file::FilePersistence;
