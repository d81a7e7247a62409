//! Resumable traversal and offset pagination over a single container.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::store::{Entry, Tx};

/// Page size used when a caller asks for a non-positive limit.
pub const DEFAULT_PAGE_LIMIT: i64 = 100;

/// One window of an ordered structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub number: i64,
    pub limit: i64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        u64::try_from(self.number).map_or(true, |n| n >= self.total_pages)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            limit: self.limit,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}

/// What a container holds, which decides how its elements are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holds {
    Values,
    Containers,
}

/// Visits entries starting at `start` (or at the first/last entry) until
/// `visit` returns false or the container runs out.
///
/// Returns the entry after the last visited one when `visit` stopped the
/// walk, so the caller can resume from it; `None` when the walk ran off the
/// end.
pub(crate) fn iterate<T: Tx>(
    container: &Container<'_, T>,
    start: Option<&[u8]>,
    reverse: bool,
    mut visit: impl FnMut(Entry) -> Result<bool>,
) -> Result<Option<Entry>> {
    let mut cursor = container.cursor();
    let mut entry = match start {
        None if reverse => cursor.last()?,
        None => cursor.first()?,
        Some(key) => {
            let found = cursor.seek(key)?;
            // Seek lands on the smallest key >= start; walking backwards must
            // not begin above it.
            if reverse && found.as_ref().is_none_or(|e| e.key != key) {
                cursor.prev()?
            } else {
                found
            }
        }
    };

    while let Some(current) = entry {
        let keep_going = visit(current)?;
        entry = if reverse { cursor.prev()? } else { cursor.next()? };
        if !keep_going {
            return Ok(entry);
        }
    }
    Ok(None)
}

/// Collects page `number` of `limit` entries, walking from the front or,
/// when `reverse`, from the back. A missing container yields an empty page.
pub(crate) fn page<T: Tx, R>(
    container: Option<&Container<'_, T>>,
    number: i64,
    limit: i64,
    reverse: bool,
    holds: Holds,
    mut map: impl FnMut(Entry) -> Result<R>,
) -> Result<Page<R>> {
    if number < 1 {
        return Err(Error::InvalidPageNumber(number));
    }
    let limit = if limit <= 0 { DEFAULT_PAGE_LIMIT } else { limit };
    let mut page = Page {
        items: Vec::new(),
        number,
        limit,
        total_elements: 0,
        total_pages: 0,
    };
    let Some(container) = container else {
        return Ok(page);
    };

    let stats = container.stats()?;
    let total = match holds {
        Holds::Values => stats.key_n,
        // bucket_n includes the container itself.
        Holds::Containers => stats.bucket_n.saturating_sub(1),
    } as u64;
    page.total_elements = total;
    page.total_pages = total.div_ceil(limit.unsigned_abs());

    let start = (number - 1).saturating_mul(limit);
    let end = number.saturating_mul(limit);
    let mut cursor = container.cursor();
    let mut entry = if reverse { cursor.last()? } else { cursor.first()? };
    let mut count: i64 = 0;
    while let Some(current) = entry {
        count += 1;
        if count > end {
            break;
        }
        if count > start {
            page.items.push(map(current)?);
        }
        entry = if reverse { cursor.prev()? } else { cursor.next()? };
    }
    Ok(page)
}
