use crate::record::Record;
use crate::storage::{OrderBy, Visibility};
use std::marker::PhantomData;

/// Bulk read of one record type, scoped by the session.
///
/// ```ignore
/// let users = session
///     .query(Query::<User>::new().filter_eq("email", "one@example.com").order_by("name"))
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Query<T> {
    pub(crate) fields: Vec<(String, serde_json::Value)>,
    pub(crate) order: OrderBy,
    pub(crate) visibility: Visibility,
    pub(crate) limit: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Query<T> {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            order: OrderBy::default(),
            visibility: Visibility::default(),
            limit: None,
            _marker: PhantomData,
        }
    }

    /// Require a business field to equal `value`.
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order = OrderBy::field(field);
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order = OrderBy::field(field).desc();
        self
    }

    /// Also surface soft-deleted records.
    pub fn include_deleted(mut self) -> Self {
        self.visibility.include_deleted = true;
        self
    }

    /// Also surface destroyed records.
    pub fn include_destroyed(mut self) -> Self {
        self.visibility.include_destroyed = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }
}
