//! Trellis - per-node prefix origination manager for a replicated routing mesh.
//!
//! Each routing node owns a set of originated IP prefixes contributed by
//! in-process clients (loopback announcer, static configuration, BGP,
//! prefix allocator). Trellis arbitrates those contributions, persists the
//! non-ephemeral subset across restarts, and publishes the winning state
//! into a gossip-replicated key-value store with bounded churn: one
//! coalesced burst per throttle window, strictly monotone per-key
//! versions, and delete-markers that let withdrawn keys age out by TTL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Producing Clients                          │
//! │   loopback │ static config │ BGP │ prefix allocator │ tests     │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ direct calls                │ request queue
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Prefix Manager Loop                         │
//! │  Origin Table │ Snapshot Keeper │ Publication Engine │ Timers   │
//! │        (single task, all mutations serialized)                  │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ snapshot blob                │ versioned keys + TTL
//! ┌──────────────────────────┐  ┌───────────────────────────────────┐
//! │   Durable Config Store   │  │     Replicated KV Store           │
//! │  (single-file blob map)  │  │  (gossip keyspace, per-key TTL)   │
//! └──────────────────────────┘  └───────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::types`] - Prefix origination data model
//! - [`core::config`] - Configuration and contractual constants
//! - [`core::error`] - Error types
//!
//! ## Manager
//! - [`manager::origin`] - Contribution table with client arbitration
//! - [`manager::snapshot`] - Durable non-ephemeral snapshot
//! - [`manager::publish`] - Throttled diff-and-publish engine
//! - [`manager::intake`] - External request queue
//! - [`manager::manager`] - Lifecycle, event loop, direct-call handle
//!
//! ## Store
//! - [`store::keys`] - Store key codec
//! - [`store::kv`] - Replicated-store client interface
//! - [`store::memory`] - In-process store client
//! - [`store::persistent`] - Durable config store

pub mod core;
pub mod manager;
pub mod store;
