//! Search orchestration: provider selection, bounded fan-out, fusion, and
//! bookkeeping of health and cache around each search.

mod fanout;
pub mod search;

pub use search::{FederatedSearch, SearchOptions};
