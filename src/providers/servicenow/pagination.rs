use async_trait::async_trait;
use log::{debug, info};

use crate::error::{EtlError, Result};

use super::types::RawChangeRecord;

/// Anything that can serve one offset-addressed page of change records.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch up to `limit` records starting at `offset`.
    ///
    /// A failed request must surface as `Err`, never as an empty page.
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<RawChangeRecord>>;
}

/// Drain `source` page by page until a short page signals the end.
///
/// The offset advances by the number of records each page actually
/// returned. A page shorter than `page_size` (including an empty one)
/// ends the loop, so a total that is an exact multiple of `page_size`
/// costs one extra empty request.
///
/// # Errors
///
/// Returns `EtlError::Config` for a zero page size, or the first page
/// error unchanged. Records fetched before a failure are discarded.
pub async fn fetch_all<S>(source: &S, page_size: usize) -> Result<Vec<RawChangeRecord>>
where
    S: PageSource + ?Sized,
{
    if page_size == 0 {
        return Err(EtlError::Config("page size must be positive".into()));
    }

    let mut all_records = Vec::new();
    let mut offset = 0;

    loop {
        let page = source.fetch_page(offset, page_size).await?;
        let fetched = page.len();
        debug!("Fetched {fetched} records at offset {offset}");

        all_records.extend(page);
        offset += fetched;

        if fetched < page_size {
            break;
        }
    }

    info!("Fetched {} change records", all_records.len());
    Ok(all_records)
}
