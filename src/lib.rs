//! Payroll Batch library crate.
//!
//! This crate exposes the batch aggregation engine shared by the
//! payroll register, bank disbursement, tax-year and redundancy
//! screens: predicate filtering, grouping into decimal summaries,
//! stable multi-key sorting, delimited-text export, and the gated
//! workflow that sits in front of every irreversible commit.
//! External applications may call into `engine::Pipeline` and
//! `workflow::WorkflowSession` directly or embed the API via
//! `api::build_router`.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod group;
pub mod models;
pub mod service;
pub mod sort;
pub mod workflow;
