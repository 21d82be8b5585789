//! Cursor-based pagination over an already ordered list.
//!
//! Cursors are opaque hex strings wrapping an offset into the full list.

use director_state::{StateError, StateResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 100;

const CURSOR_PREFIX: &str = "cursor:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page size. When absent, `DEFAULT_PAGE_SIZE` capped at the configured maximum.
    #[serde(default)]
    pub first: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub start_cursor: String,
    pub end_cursor: String,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page_info: PageInfo,
    /// Size of the full list, not of this page.
    pub total_count: usize,
}

impl PageRequest {
    pub fn first(first: usize) -> Self {
        Self {
            first: Some(first),
            after: None,
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }
}

pub fn encode_cursor(offset: usize) -> String {
    hex::encode(format!("{CURSOR_PREFIX}{offset}"))
}

pub fn decode_cursor(cursor: &str) -> StateResult<usize> {
    let invalid = || StateError::Validation("cursor is not correct".to_string());
    let bytes = hex::decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)
}

/// Cut one page out of `items`.
pub fn paginate<T>(items: Vec<T>, request: &PageRequest, max_page_size: usize) -> StateResult<Page<T>> {
    let first = request.first.unwrap_or(DEFAULT_PAGE_SIZE.min(max_page_size));
    if first == 0 || first > max_page_size {
        return Err(StateError::Validation(format!(
            "page size must be between 1 and {max_page_size}"
        )));
    }
    let offset = match &request.after {
        Some(cursor) if !cursor.is_empty() => decode_cursor(cursor)?,
        _ => 0,
    };
    let total_count = items.len();
    if offset > total_count {
        return Err(StateError::Validation("cursor is out of range".to_string()));
    }

    let data: Vec<T> = items.into_iter().skip(offset).take(first).collect();
    let end = offset + data.len();
    Ok(Page {
        data,
        page_info: PageInfo {
            start_cursor: encode_cursor(offset),
            end_cursor: encode_cursor(end),
            has_next_page: end < total_count,
        },
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_decodes_back() {
        assert_eq!(decode_cursor(&encode_cursor(42)).unwrap(), 42);
    }

    #[test]
    fn bad_cursors_rejected() {
        assert!(matches!(decode_cursor("zz"), Err(StateError::Validation(_))));
        assert!(matches!(
            decode_cursor(&hex::encode("offset:3")),
            Err(StateError::Validation(_))
        ));
        let req = PageRequest::first(2).after(encode_cursor(10));
        assert!(paginate(vec![1, 2, 3], &req, 200).is_err());
    }

    #[test]
    fn pages_concatenate_to_full_list() {
        let items: Vec<u32> = (0..7).collect();
        let mut request = PageRequest::first(3);
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = paginate(items.clone(), &request, 200).unwrap();
            assert_eq!(page.total_count, 7);
            pages += 1;
            seen.extend(page.data);
            if !page.page_info.has_next_page {
                break;
            }
            request = request.after(page.page_info.end_cursor);
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, items);
    }

    #[test]
    fn page_size_bounds() {
        assert!(paginate(vec![1], &PageRequest::first(0), 200).is_err());
        assert!(paginate(vec![1], &PageRequest::first(201), 200).is_err());
        assert!(paginate(vec![1], &PageRequest::first(200), 200).is_ok());
    }

    #[test]
    fn default_size_capped_by_maximum() {
        let items: Vec<u32> = (0..120).collect();
        let page = paginate(items.clone(), &PageRequest::default(), 200).unwrap();
        assert_eq!(page.data.len(), DEFAULT_PAGE_SIZE);

        let page = paginate(items, &PageRequest::default(), 50).unwrap();
        assert_eq!(page.data.len(), 50);
        assert!(page.page_info.has_next_page);
        assert_eq!(page.total_count, 120);
    }

    #[test]
    fn empty_list() {
        let page = paginate(Vec::<u32>::new(), &PageRequest::default(), 200).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(!page.page_info.has_next_page);
    }
}
