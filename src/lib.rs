//! KEEL - Embeddable Key-Value Storage Engine
//!
//! A persistent key-value store built on an append-only value log, a key
//! index log and an in-memory sorted key directory, with typed collections
//! and TTL eviction on top.
//!
//! ## Features
//! - **Value Log / Index Log**: Values and key locations in two append-only files
//! - **Key Directory**: Sorted keys for ordered listing, paging and prefix scans
//! - **In-place Overwrites**: Values that fit reuse their slot; larger ones relocate
//! - **Typed Collections**: Strings, hashes and sets
//! - **TTL Support**: Lazy expiry on access plus background sweepers
//! - **Journal**: CRC32-framed log of collection mutations for crash recovery
//! - **Metrics**: Lock-free atomic counters for observability
//! - **Concurrency**: Every handle is `Send + Sync` behind reader/writer locks
//!
//! ## Example
//! ```no_run
//! use keeldb::{config::Config, engine::Keel, types::CollectionType};
//!
//! let keel = Keel::open(Config::new("./data")).unwrap();
//!
//! keel.set("key", "value").unwrap();
//! assert_eq!(keel.get("key").unwrap(), b"value".to_vec());
//!
//! keel.hset("user:1", "name", "ada").unwrap();
//! keel.expire(CollectionType::Hash, "user:1", 60).unwrap();
//! keel.close().unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod types;
