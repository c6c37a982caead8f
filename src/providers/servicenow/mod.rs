mod client;
mod pagination;
mod types;

pub use client::{now_in, ChangeClient, ExtractionWindow};
pub use pagination::{fetch_all, PageSource};
pub use types::RawChangeRecord;

#[cfg(test)]
pub(crate) use pagination::fakes;
