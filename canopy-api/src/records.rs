use canopy_lib::fs::NodeKind;
use canopy_lib::query::{Limit, Offset, PageRequest};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Limit,
    pub offset: Offset,
}

impl From<&PageRequest> for Pagination {
    fn from(page: &PageRequest) -> Self {
        Pagination {
            limit: page.limit,
            offset: page.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(page: &PageRequest, items: Vec<T>) -> Self {
        Page {
            pagination: page.into(),
            items,
        }
    }

    /// a full page means there may be more to fetch
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.pagination.limit.as_usize()
    }
}

/// a node as returned by child, tag and collection listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub key: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: i64,
    pub owner: String,
    pub parent: Option<String>,
    pub thumbnail: Option<String>,
    pub sensitive: bool,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

/// one binding event of a versioned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub file_key: String,
    pub bound_by: String,
    pub bound_at: DateTime<Utc>,
}
