use crate::errors::{MergeError, MergeResult};
use crate::models::{Limit, PageMeta, PageRequest};

/// Resolves page bounds and metadata. The requested index is used for the
/// offset even when it lies past the last page.
pub fn paginate<F>(page_index: i64, page_size: i64, row_count_provider: F) -> MergeResult<PageMeta>
where
    F: FnOnce() -> MergeResult<i64>,
{
    let limit = limit_for(PageRequest::new(page_index, page_size))?;

    let total_rows = row_count_provider()?;
    let total_rows = u64::try_from(total_rows).map_err(|_| {
        MergeError::Decode(format!("row count {} is negative", total_rows))
    })?;

    let total_pages = total_rows.div_ceil(limit.count);
    let current_page = if total_pages == 0 {
        0
    } else {
        (page_index as u64).min(total_pages - 1)
    };

    Ok(PageMeta {
        total_rows,
        total_pages,
        current_page,
        limit,
    })
}

/// `LIMIT page_size OFFSET page_size * page_index`.
pub fn limit_for(request: PageRequest) -> MergeResult<Limit> {
    if request.page_size <= 0 {
        return Err(MergeError::InvalidArgument(format!(
            "page size must be positive, got {}",
            request.page_size
        )));
    }
    if request.page_index < 0 {
        return Err(MergeError::InvalidArgument(format!(
            "page index must not be negative, got {}",
            request.page_index
        )));
    }

    let count = request.page_size as u64;
    let offset = count.checked_mul(request.page_index as u64).ok_or_else(|| {
        MergeError::InvalidArgument(format!(
            "page {} of size {} overflows the row offset",
            request.page_index, request.page_size
        ))
    })?;
    Ok(Limit { count, offset })
}
