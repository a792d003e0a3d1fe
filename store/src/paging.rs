/// Sentinel `PerPage` value meaning "no limit/offset" (spec §4.4, §9).
pub const ALL_PER_PAGE: i64 = -1;

/// Uniform paging applied across every listing operation (spec §4.9).
///
/// `PerPage = 0` is preserved as-designed: it returns an empty page rather
/// than an error or "no limit" (spec §9 open question). `PerPage =
/// ALL_PER_PAGE` disables the limit/offset clause entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub per_page: i64,
    pub include_deleted: bool,
}

impl Default for Paging {
    fn default() -> Self {
        Self::all_pages()
    }
}

impl Paging {
    /// All pages, excluding soft-deleted rows.
    pub fn all_pages() -> Self {
        Self {
            page: 0,
            per_page: ALL_PER_PAGE,
            include_deleted: false,
        }
    }

    /// All pages, including soft-deleted rows.
    pub fn all_pages_with_deleted() -> Self {
        Self {
            include_deleted: true,
            ..Self::all_pages()
        }
    }

    pub fn new(page: i64, per_page: i64, include_deleted: bool) -> Self {
        Self {
            page,
            per_page,
            include_deleted,
        }
    }

    /// Returns `None` when this page can never contain a row (the `PerPage =
    /// 0` quirk); `Some(None)` when there is no limit/offset clause to add;
    /// `Some(Some((limit, offset)))` otherwise.
    pub(crate) fn limit_offset(&self) -> Option<Option<(i64, i64)>> {
        if self.per_page == 0 {
            return None;
        }
        if self.per_page == ALL_PER_PAGE {
            return Some(None);
        }
        let offset = self.page.max(0) * self.per_page;
        Some(Some((self.per_page, offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_per_page_yields_no_rows() {
        assert_eq!(Paging::new(0, 0, false).limit_offset(), None);
    }

    #[test]
    fn all_per_page_disables_limit() {
        assert_eq!(Paging::all_pages().limit_offset(), Some(None));
    }

    #[test]
    fn paged_request_computes_offset() {
        assert_eq!(
            Paging::new(2, 10, false).limit_offset(),
            Some(Some((10, 20)))
        );
    }
}
