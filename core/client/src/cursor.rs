//! Pagination cursor extracted from the upstream's `next` reference.

use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameter carrying the page token in `next` URLs.
pub const OFFSET_PARAM: &str = "offset";

/// Position in a cursor-paginated collection.
///
/// `offset_token == None` means "start" before the first page and "no further
/// pages" after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor {
    pub offset_token: Option<String>,
}

/// Why a `next` reference could not be turned into a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorWarning {
    pub reference: String,
    pub reason: String,
}

impl std::fmt::Display for CursorWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unusable next reference '{}': {}", self.reference, self.reason)
    }
}

impl PageCursor {
    /// Cursor for the first page.
    pub fn initial() -> Self {
        Self { offset_token: None }
    }

    /// Cursor positioned at an explicit token.
    pub fn at(token: impl Into<String>) -> Self {
        Self {
            offset_token: Some(token.into()),
        }
    }

    /// Derive the following cursor from a page's `next` reference.
    ///
    /// Never fails: an absent reference ends the traversal, and a malformed
    /// one also ends it but comes back with a warning for the caller to log.
    pub fn from_next_reference(next_url: Option<&str>) -> (Self, Option<CursorWarning>) {
        let Some(reference) = next_url else {
            return (Self::initial(), None);
        };

        let warning = |reason: &str| {
            Some(CursorWarning {
                reference: reference.to_string(),
                reason: reason.to_string(),
            })
        };

        let url = match Url::parse(reference) {
            Ok(url) => url,
            Err(e) => return (Self::initial(), warning(&e.to_string())),
        };

        match url.query_pairs().find(|(key, _)| key == OFFSET_PARAM) {
            Some((_, value)) if !value.is_empty() => (Self::at(value.into_owned()), None),
            Some(_) => (Self::initial(), warning("empty offset parameter")),
            None => (Self::initial(), warning("missing offset parameter")),
        }
    }

    /// Whether there is no token.
    pub fn is_end(&self) -> bool {
        self.offset_token.is_none()
    }

    /// The token, if any.
    pub fn token(&self) -> Option<&str> {
        self.offset_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_cursor_has_no_token() {
        assert!(PageCursor::initial().is_end());
        assert_eq!(PageCursor::initial().token(), None);
    }

    #[test]
    fn test_extracts_offset_from_next_url() {
        let (cursor, warning) = PageCursor::from_next_reference(Some(
            "https://api.example.com/api/database/rows/table/1/?offset=200&size=100&user_field_names=true",
        ));
        assert_eq!(cursor.token(), Some("200"));
        assert!(warning.is_none());
    }

    #[test]
    fn test_missing_reference_ends_traversal() {
        let (cursor, warning) = PageCursor::from_next_reference(None);
        assert!(cursor.is_end());
        assert!(warning.is_none());
    }

    #[test]
    fn test_malformed_reference_ends_with_warning() {
        let (cursor, warning) = PageCursor::from_next_reference(Some("not a url"));
        assert!(cursor.is_end());
        assert_eq!(warning.unwrap().reference, "not a url");

        let (cursor, warning) =
            PageCursor::from_next_reference(Some("https://api.example.com/rows/?size=100"));
        assert!(cursor.is_end());
        assert_eq!(warning.unwrap().reason, "missing offset parameter");

        let (cursor, warning) =
            PageCursor::from_next_reference(Some("https://api.example.com/rows/?offset="));
        assert!(cursor.is_end());
        assert!(warning.is_some());
    }
}
