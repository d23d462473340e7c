//! API handlers.

pub mod credits;
pub mod health;
pub mod subscriptions;
pub mod webhooks;

use serde::Deserialize;

use canvas_credits_core::UserId;

use crate::error::ApiError;

/// Largest page a history query may return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Pagination query parameters shared by history endpoints.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl PageQuery {
    /// The requested page size, capped at [`MAX_PAGE_SIZE`].
    #[must_use]
    pub fn capped_limit(&self) -> usize {
        self.limit.min(MAX_PAGE_SIZE)
    }
}

/// Split one extra fetched item off into a `has_more` flag.
pub(crate) fn paginate<T>(mut items: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let has_more = items.len() > limit;
    items.truncate(limit);
    (items, has_more)
}

/// Parse a user ID from a request body or path.
pub(crate) fn parse_user_id(value: &str) -> Result<UserId, ApiError> {
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid user_id: {e}")))
}
