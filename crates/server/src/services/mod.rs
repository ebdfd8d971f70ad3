//! Request handlers: validate, resolve, authorize through [`crate::policy`],
//! mutate, audit.

pub mod activity;
pub mod actors;
pub mod generator;
pub mod projects;
pub mod quota;
pub mod scaffold;
pub mod slug;
pub mod teams;
pub mod templates;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0).max(0) as usize
    }

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE) as usize
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    /// Slice an already-authorized, ordered list.
    pub fn from_visible(visible: Vec<T>, pagination: Pagination) -> Self {
        let total = visible.len() as i64;
        let offset = pagination.offset();
        let limit = pagination.limit();
        let items = visible.into_iter().skip(offset).take(limit).collect();

        Self {
            items,
            total,
            offset: offset as i64,
            limit: limit as i64,
        }
    }
}
