//! Adapters for the domain ports: clocks, the HMAC key service, in-memory
//! stores, a scripted payment provider and the optional RocksDB event log.

pub mod clock;
pub mod hmac_key_service;
pub mod in_memory;
pub mod provider;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
