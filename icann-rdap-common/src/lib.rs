//! Common, I/O-free types shared by RDAP client code.
//!
//! This crate holds the parts of the RDAP client core that never touch the
//! network: the IANA bootstrap registry data model and its matching rules,
//! and the query [`target`] type with its validators. Everything that issues
//! HTTP requests (fetching, bootstrapping over the wire, caching, redaction,
//! orchestration) lives in `icann-rdap-client`.
pub mod httpdata;
pub mod iana;
pub mod media_types;
pub mod target;
pub mod validators;

/// Version of this software.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
