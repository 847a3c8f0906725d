//! Request handlers, grouped by surface.

pub mod admin;
pub mod auth;
pub mod billing;
pub mod download;
pub mod sse;
pub mod torrents;

use serde::{Deserialize, Serialize};

/// Generic `{message}` acknowledgement body.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Human-readable confirmation.
    pub message: String,
}

impl SuccessResponse {
    /// Acknowledge with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Common `?page&page_size` query with the service's clamping rules.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, capped at 100.
    pub page_size: Option<i64>,
}

impl Pagination {
    /// Clamped `(page, page_size, offset)`.
    #[must_use]
    pub fn clamp(self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let mut page_size = self.page_size.unwrap_or(20);
        if !(1..=100).contains(&page_size) {
            page_size = 20;
        }
        (page, page_size, (page - 1) * page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_out_of_range_values() {
        let (page, size, offset) = Pagination { page: None, page_size: None }.clamp();
        assert_eq!((page, size, offset), (1, 20, 0));

        let (page, size, offset) = Pagination { page: Some(0), page_size: Some(500) }.clamp();
        assert_eq!((page, size, offset), (1, 20, 0));

        let (page, size, offset) = Pagination { page: Some(3), page_size: Some(50) }.clamp();
        assert_eq!((page, size, offset), (3, 50, 100));
    }
}
