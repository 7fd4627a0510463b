//! The pagination/sort query parameters shared by every list endpoint
//! (spec §6: "Pagination uses `page`, `per_page`, `sort_by`, `sort_order`").

use serde::Deserialize;

const DEFAULT_PAGE: i64 = 0;
const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Desc
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    per_page: Option<i64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl PageParams {
    /// The `page` value clamped to a non-negative offset, defaulting to 0.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(DEFAULT_PAGE).max(0)
    }

    /// The `per_page` value clamped to `(0, MAX_PER_PAGE]`, defaulting to 20.
    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_params_fall_back_to_defaults() {
        let params = PageParams {
            page: None,
            per_page: None,
            sort_by: None,
            sort_order: SortOrder::default(),
        };
        assert_eq!(params.page(), 0);
        assert_eq!(params.per_page(), DEFAULT_PER_PAGE);
    }

    #[test]
    fn per_page_is_clamped_to_the_configured_maximum() {
        let params = PageParams {
            page: Some(0),
            per_page: Some(10_000),
            sort_by: None,
            sort_order: SortOrder::default(),
        };
        assert_eq!(params.per_page(), MAX_PER_PAGE);
    }
}
