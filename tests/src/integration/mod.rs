//! # Integration Scenarios

pub mod failover;
pub mod lifecycle;
