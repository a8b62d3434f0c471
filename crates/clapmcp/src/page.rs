//! Cursor pagination for list operations.
//!
//! Items are kept sorted by key. A cursor is the URL-safe base64 encoding of
//! the last key returned, so the next page starts strictly after it even if
//! items were added or removed in between.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A page of items plus the cursor for the next page, if any.
#[derive(Debug)]
pub struct Page<'a, V> {
    pub items: Vec<&'a V>,
    pub next_cursor: Option<String>,
}

/// The cursor could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cursor: {0}")]
pub struct InvalidCursor(pub String);

/// Return the page starting after `cursor`.
///
/// A `page_size` of zero returns everything remaining in one page.
pub fn paginate<'a, V>(
    items: &'a BTreeMap<String, V>,
    cursor: Option<&str>,
    page_size: usize,
) -> Result<Page<'a, V>, InvalidCursor> {
    let start = match cursor {
        Some(cursor) => Bound::Excluded(decode_cursor(cursor)?),
        None => Bound::Unbounded,
    };

    let mut range = items.range::<str, _>((start.as_ref().map(String::as_str), Bound::Unbounded));

    if page_size == 0 {
        return Ok(Page {
            items: range.map(|(_, v)| v).collect(),
            next_cursor: None,
        });
    }

    let mut page = Vec::with_capacity(page_size.min(items.len()));
    let mut last_key = None;
    for (key, value) in range.by_ref().take(page_size) {
        page.push(value);
        last_key = Some(key);
    }

    let next_cursor = match (last_key, range.next()) {
        (Some(key), Some(_)) => Some(encode_cursor(key)),
        _ => None,
    };

    Ok(Page {
        items: page,
        next_cursor,
    })
}

fn encode_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<String, InvalidCursor> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| InvalidCursor(cursor.to_string()))?;
    String::from_utf8(bytes).map_err(|_| InvalidCursor(cursor.to_string()))
}
