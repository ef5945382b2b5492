//! Remote record store client and local relational store for VentriLinks.

pub mod local;
pub mod remote;

pub use local::{JoinedMatch, LocalStore, MemoryStore, PgStore, StoreError};
pub use remote::{
    fetch_all_tables, AirtableClient, AirtableConfig, FetchError, Filter, MemoryRecordStore,
    RecordStore, RecordWrite, TableSnapshot, UnconfiguredRecordStore,
};

pub const CRATE_NAME: &str = "vlinks-storage";
