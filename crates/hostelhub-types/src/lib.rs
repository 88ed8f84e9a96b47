//! Wire and domain types shared by the HostelHub client crates.

pub mod api;
pub mod events;
pub mod models;
