//! Nurse shift allocation for hospital wards.
//!
//! A monthly schedule is built in three phases (fill minimum headcount,
//! balance working days, redistribute towards targets) over an in-memory
//! ledger, with every proposal checked against the labor rules first. An
//! external optimizer process can produce the schedule instead, with the
//! heuristic engine as fallback.

pub mod api;
pub mod config;
pub mod console;
pub mod demo_data;
pub mod domain;
pub mod dto;
pub mod engine;
pub mod error;
pub mod interval;
pub mod ledger;
pub mod optimizer;
pub mod profile;
pub mod ranking;
pub mod rules;
pub mod solver;
pub mod store;
