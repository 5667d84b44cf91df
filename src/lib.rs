//! Fulcrum - attribute-based access control decision service.
//!
//! Policy rules live in a relational store, are compiled into an
//! immutable in-memory snapshot, and every authorization question is
//! answered from that snapshot with full audit evidence. See the
//! `authz` module for the core engine.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod settings;
pub mod storage;
pub mod web;
