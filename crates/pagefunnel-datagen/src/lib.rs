//! Deterministic clickstream generation for pagefunnel.
//!
//! Produces per-subject page journeys for one month and country, suitable for
//! seeding a local source event table. The same seed always yields the same
//! events.

pub mod journey;
pub mod writer;

pub use journey::{ClickEvent, JourneyConfig, JourneyGenerator, Page};
pub use writer::{write_events_to_duckdb, EventTableLayout};
