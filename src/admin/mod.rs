//! Operational endpoints: `/health` and `/stats`.
//!
//! Served on the gateway listener; `health` and `stats` are reserved and
//! cannot be used as service names.

pub mod handlers;
