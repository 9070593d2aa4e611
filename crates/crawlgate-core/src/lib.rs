//! # crawlgate-core
//!
//! Shared vocabulary for the crawl gateway:
//!
//! - Branded identifiers (`ClientId`)
//! - Wire message types exchanged with clients and the broker
//!   (`Job`, `DoneJob`)
//! - The gateway error taxonomy (`GatewayError`)

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod messages;
