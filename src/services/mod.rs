pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod order_status;
pub mod pricing;
pub mod reconciliation;

pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use inventory::InventoryService;
pub use order_status::OrderStatusService;
pub use pricing::PricingService;
pub use reconciliation::ReconciliationService;
