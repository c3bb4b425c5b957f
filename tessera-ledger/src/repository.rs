use async_trait::async_trait;
use tessera_core::CoreResult;
use uuid::Uuid;

use crate::models::{GroupTicketAllocation, GroupTicketSale};

/// Data access for allocations and group sales. Implementations must make
/// `try_record_sale` and `refund_sale` transactional: the quantity change
/// and the sale-row mutation commit together or not at all, and the
/// quantity check is a conditional update, never read-then-write.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn get_allocation(&self, id: Uuid) -> CoreResult<Option<GroupTicketAllocation>>;

    /// Insert the sale and increment `used_quantity` by 1 in one
    /// transaction, guarded by `used + reserved < allocated`. Returns the
    /// post-increment allocation, or `None` when the guard matched zero
    /// rows (the sale would overbook).
    async fn try_record_sale(
        &self,
        sale: &GroupTicketSale,
    ) -> CoreResult<Option<GroupTicketAllocation>>;

    async fn find_sale_by_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<GroupTicketSale>>;

    /// Mark the sale refunded and decrement `used_quantity` in one
    /// transaction, guarded by `payment_status = 'paid'`. Returns the
    /// post-decrement allocation, or `None` when the guard matched zero
    /// rows (a concurrent refund got there first).
    async fn refund_sale(&self, sale_id: Uuid) -> CoreResult<Option<GroupTicketAllocation>>;

    /// Persist the low-inventory notification watermark.
    async fn set_low_stock_watermark(
        &self,
        allocation_id: Uuid,
        remaining: Option<i32>,
    ) -> CoreResult<()>;
}
