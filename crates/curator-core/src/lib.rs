//! Curator Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `File`, `Instance`, `RemoteInstance`, `Store`,
//!   `OutgoingTransfer`, `IncomingTransfer`, `SendQueueItem`, `Peer`, `User`
//! - **Use cases** - ingest, search/locate/validate, instance deletion,
//!   store manifest export and import
//! - **Port definitions** - Traits for adapters: `MetadataRepository`,
//!   `StoreBackend`, `SyncTransferManager`, `AsyncTransferManager`,
//!   `PeerClient`, `Notifier`
//! - **State machines** - outgoing and incoming transfer lifecycles
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external
//! dependencies. Ports define trait interfaces that adapter crates implement.
//! Use cases orchestrate domain entities through port interfaces; no use case
//! names a concrete database, store backend, or transport.

pub mod config;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod usecases;
