//! Filtering, sorting and paging over lock records
//!
//! Queries run against a snapshot of the lock table taken by the manager, so
//! they never hold the table while sorting or paging.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::record::LockRecord;

/// Field a query can sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Resource,
    LockedBy,
    LockedAt,
    ExpiryDate,
    LastLockDate,
    PendingRequests,
}

impl SortField {
    /// Compare two records on this field. Unset values order first.
    fn compare(&self, a: &LockRecord, b: &LockRecord) -> Ordering {
        match self {
            Self::Resource => a.resource.cmp(&b.resource),
            Self::LockedBy => a.locked_by.cmp(&b.locked_by),
            Self::LockedAt => a.locked_at.cmp(&b.locked_at),
            Self::ExpiryDate => a.expiry_date.cmp(&b.expiry_date),
            Self::LastLockDate => a.last_lock_date.cmp(&b.last_lock_date),
            Self::PendingRequests => a.pending_requests.cmp(&b.pending_requests),
        }
    }
}

/// A query over the lock table
///
/// Pages are 1-indexed. A page or page size of zero returns every matching
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockQuery {
    pub filter: Option<String>,
    pub case_sensitive: bool,
    pub sort_by: Option<SortField>,
    pub descending: bool,
    pub page: usize,
    pub page_size: usize,
}

impl LockQuery {
    /// A query matching everything, unsorted, unpaged
    pub fn new() -> Self {
        Self::default()
    }

    /// Only include resources whose name contains `filter`
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Match the filter case-sensitively (default is case-insensitive)
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Sort ascending by `field`
    pub fn sort_by(mut self, field: SortField) -> Self {
        self.sort_by = Some(field);
        self
    }

    /// Reverse the sort order
    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Select a 1-indexed page
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn is_paged(&self) -> bool {
        self.page > 0 && self.page_size > 0
    }

    fn matches(&self, record: &LockRecord) -> bool {
        match self.filter.as_deref() {
            None | Some("") => true,
            Some(filter) if self.case_sensitive => record.resource.contains(filter),
            Some(filter) => record
                .resource
                .to_lowercase()
                .contains(&filter.to_lowercase()),
        }
    }

    /// Run the query over a snapshot of records
    pub fn apply(&self, records: Vec<LockRecord>) -> QueryPage {
        let mut items: Vec<LockRecord> = records.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(field) = self.sort_by {
            // sort_by is stable, equal keys keep snapshot order
            if self.descending {
                items.sort_by(|a, b| field.compare(b, a));
            } else {
                items.sort_by(|a, b| field.compare(a, b));
            }
        }

        let total = items.len();
        if self.is_paged() {
            let skip = (self.page - 1).saturating_mul(self.page_size);
            items = items.into_iter().skip(skip).take(self.page_size).collect();
        }

        QueryPage {
            items,
            total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPage {
    /// Records on this page
    pub items: Vec<LockRecord>,
    /// Matching records across all pages
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl QueryPage {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Resource names on this page, in order
    pub fn resources(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.resource.as_str()).collect()
    }
}
