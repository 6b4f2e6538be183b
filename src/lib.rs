// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declarative dotfile and environment manager.
//!
//! A repository root (usually `~/.gdf`) holds __app bundles__ under `apps/`,
//! each describing a package to install, dotfiles to link from `dotfiles/`,
//! shell integration, and lifecycle hooks. The [`engine`] makes the machine
//! converge to what the bundles declare, while keeping every destructive
//! filesystem change reversible through snapshots and operation logs.
//!
//! # Repository Layout
//!
//! ```text
//! <root>/
//! ├── apps/*.yaml                    bundle definitions
//! ├── dotfiles/**                    files linked into place
//! ├── config.toml                    engine settings, optional
//! ├── .history/<nanos>.snap          snapshots of displaced files
//! ├── .operations/<timestamp>.json   one log per apply run
//! └── .generated/init.<shell>        generated shell init script
//! ```

pub mod alias;
pub mod config;
pub mod detect;
pub mod engine;
pub mod exec;
pub mod install;
pub mod path;
pub mod platform;
pub mod resolve;
pub mod risk;
pub mod shell;

pub use engine::{ApplyOptions, ApplyReport, Engine, EngineError, ErrorKind};
