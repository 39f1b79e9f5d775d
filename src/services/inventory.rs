use crate::entities::product::{self, ProductStatus};
use crate::errors::ServiceError;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of committing one order line against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub was_pre_order: bool,
    /// Stock reached zero with this commit (pre-order lines never set this).
    pub depleted: bool,
}

/// Atomic stock, pre-order, and promo counter mutations.
///
/// Every mutation is a single guarded `UPDATE ... SET x = x + ?` so
/// concurrent callers on the same product row cannot lose updates; the
/// guards live in the WHERE clause and a zero `rows_affected` means the
/// guard failed. All methods take a `ConnectionTrait` so callers can run
/// them inside a wider transaction.
pub struct InventoryService;

impl InventoryService {
    /// Commits `quantity` units of a product: pre-order products get a
    /// guarded `pre_order_count` increment, everything else a guarded
    /// stock decrement.
    #[instrument(skip(conn))]
    pub async fn reserve_or_commit<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReserveOutcome, ServiceError> {
        let item = product::Entity::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if item.status == ProductStatus::PreOrder {
            Self::increment_pre_order(conn, product_id, quantity).await?;
            return Ok(ReserveOutcome {
                was_pre_order: true,
                depleted: false,
            });
        }

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "Product {} has fewer than {} units left",
                product_id, quantity
            )));
        }

        let depleted = Self::mark_out_of_stock_if_depleted(conn, product_id).await?;
        Ok(ReserveOutcome {
            was_pre_order: false,
            depleted,
        })
    }

    async fn increment_pre_order<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let within_limit = Condition::any()
            .add(product::Column::PreOrderLimit.is_null())
            .add(
                Expr::col(product::Column::PreOrderCount)
                    .add(quantity)
                    .lte(Expr::col(product::Column::PreOrderLimit)),
            );
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::PreOrderCount,
                Expr::col(product::Column::PreOrderCount).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(within_limit)
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::PreOrderLimitExceeded(format!(
                "Pre-order limit reached for product {}",
                product_id
            )));
        }
        Ok(())
    }

    async fn mark_out_of_stock_if_depleted<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Status,
                Expr::value(ProductStatus::OutOfStock),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.lte(0))
            .filter(product::Column::Status.eq(ProductStatus::InStock))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Inverse of [`reserve_or_commit`](Self::reserve_or_commit), used on
    /// cancellation. Counters never go below zero.
    #[instrument(skip(conn))]
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
        was_pre_order: bool,
    ) -> Result<(), ServiceError> {
        if was_pre_order {
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::PreOrderCount,
                    Expr::col(product::Column::PreOrderCount).sub(quantity),
                )
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::PreOrderCount.gte(quantity))
                .exec(conn)
                .await?;
            if result.rows_affected == 0 {
                // Counter smaller than the release, settle at zero.
                product::Entity::update_many()
                    .col_expr(product::Column::PreOrderCount, Expr::value(0))
                    .filter(product::Column::Id.eq(product_id))
                    .exec(conn)
                    .await?;
            }
            return Ok(());
        }

        product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;
        // Restocking revives products that had sold out.
        product::Entity::update_many()
            .col_expr(product::Column::Status, Expr::value(ProductStatus::InStock))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Status.eq(ProductStatus::OutOfStock))
            .filter(product::Column::Stock.gt(0))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Records `quantity` promotional sales. Only limited promos count
    /// sales; when the limit is reached the promo auto-expires:
    /// `has_promo` flips off and the current price snaps back to the
    /// original. Returns true when this call expired the promo.
    #[instrument(skip(conn))]
    pub async fn record_promo_sale<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::PromoSold,
                Expr::col(product::Column::PromoSold).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::HasPromo.eq(true))
            .filter(product::Column::PromoLimit.is_not_null())
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Ok(false);
        }

        let expired = product::Entity::update_many()
            .col_expr(product::Column::HasPromo, Expr::value(false))
            .col_expr(
                product::Column::CurrentPrice,
                Expr::col(product::Column::OriginalPrice).into(),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::HasPromo.eq(true))
            .filter(product::Column::PromoLimit.is_not_null())
            .filter(
                Expr::col(product::Column::PromoSold)
                    .gte(Expr::col(product::Column::PromoLimit)),
            )
            .exec(conn)
            .await?;
        if expired.rows_affected > 0 {
            info!(%product_id, "Promo limit reached, reverting to original price");
        }
        Ok(expired.rows_affected > 0)
    }

    /// Forces stock to zero after an oversell was detected at payment
    /// confirmation. The payment stands; the shortfall is resolved
    /// operationally.
    #[instrument(skip(conn))]
    pub async fn clamp_stock_to_zero<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        warn!(%product_id, "Stock insufficient at confirmation, clamping to zero");
        product::Entity::update_many()
            .col_expr(product::Column::Stock, Expr::value(0))
            .col_expr(
                product::Column::Status,
                Expr::value(ProductStatus::OutOfStock),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Status.ne(ProductStatus::PreOrder))
            .exec(conn)
            .await?;
        Ok(())
    }
}
