use chrono::{DateTime, Utc};

use crate::{MovementType, ProductId, StockMovement};

/// Builder for stock ledger queries.
///
/// Results are returned newest first.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    /// Filter by product.
    pub product_id: Option<ProductId>,

    /// Filter by movement types (any of these types).
    pub movement_types: Option<Vec<MovementType>>,

    /// Filter by the business reference (e.g. an order number).
    pub reference_id: Option<String>,

    /// Filter by movements at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Filter by movements at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of movements to return.
    pub limit: Option<usize>,

    /// Number of movements to skip.
    pub offset: Option<usize>,
}

impl MovementQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one product's ledger.
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    /// Creates a query for every movement tagged with a reference.
    pub fn for_reference(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            ..Default::default()
        }
    }

    /// Filters by product.
    pub fn product_id(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Filters by a single movement type.
    pub fn movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_types = Some(vec![movement_type]);
        self
    }

    /// Filters by several movement types.
    pub fn movement_types(mut self, movement_types: Vec<MovementType>) -> Self {
        self.movement_types = Some(movement_types);
        self
    }

    /// Filters by reference ID.
    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Filters to movements at or after this timestamp.
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters to movements at or before this timestamp.
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of movements returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many movements before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the movement passes every filter (paging excluded).
    pub fn matches(&self, movement: &StockMovement) -> bool {
        if let Some(id) = self.product_id
            && movement.product_id != id
        {
            return false;
        }
        if let Some(ref types) = self.movement_types
            && !types.contains(&movement.movement_type)
        {
            return false;
        }
        if let Some(ref reference) = self.reference_id
            && &movement.reference_id != reference
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && movement.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && movement.created_at > to
        {
            return false;
        }
        true
    }
}
