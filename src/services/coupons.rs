use crate::entities::coupon::{self, CouponType};
use crate::errors::{CouponRejection, ServiceError};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument, warn};

/// A coupon that passed every rule, together with the discount it grants
/// against the subtotal it was checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponCheck {
    pub code: String,
    pub discount: Decimal,
}

/// Stateless coupon rules engine. Validation never mutates `used_count`;
/// redemption happens once, at confirmed payment.
pub struct CouponService;

impl CouponService {
    /// Applies the usability rules in order, first failure wins, then
    /// computes the discount. Pure so the rule table is unit-testable
    /// without storage.
    pub fn evaluate(
        candidate: &coupon::Model,
        subtotal: Decimal,
    ) -> Result<Decimal, CouponRejection> {
        if !candidate.is_active {
            return Err(CouponRejection::Inactive);
        }
        if let Some(expires_at) = candidate.expires_at {
            if expires_at < Utc::now() {
                return Err(CouponRejection::Expired);
            }
        }
        if let Some(max_uses) = candidate.max_uses {
            if candidate.used_count >= max_uses {
                return Err(CouponRejection::LimitReached);
            }
        }
        if let Some(min_order) = candidate.min_order {
            if subtotal < min_order {
                return Err(CouponRejection::BelowMinimum { min_order });
            }
        }

        let discount = match candidate.coupon_type {
            CouponType::Percentage => subtotal * candidate.value / Decimal::from(100),
            // A fixed discount never exceeds what is being discounted.
            CouponType::Fixed => candidate.value.min(subtotal),
        };
        Ok(discount.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero))
    }

    /// Looks up a code (case-insensitive, stored canonically uppercase)
    /// and evaluates it against `subtotal`.
    #[instrument(skip(conn))]
    pub async fn validate<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponCheck, ServiceError> {
        let canonical = code.trim().to_uppercase();
        let candidate = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(canonical.clone()))
            .one(conn)
            .await?
            .ok_or(ServiceError::CouponError(CouponRejection::NotFound))?;

        let discount =
            Self::evaluate(&candidate, subtotal).map_err(ServiceError::CouponError)?;
        debug!(code = %canonical, %discount, "Coupon accepted");
        Ok(CouponCheck {
            code: canonical,
            discount,
        })
    }

    /// Burns one use of a coupon at confirmed payment. The increment is
    /// guarded in the WHERE clause so `used_count` can never pass
    /// `max_uses` even under concurrent confirmations. A missing or
    /// exhausted coupon is non-fatal: the payment already succeeded.
    /// Returns whether a use was recorded.
    #[instrument(skip(conn))]
    pub async fn redeem<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<bool, ServiceError> {
        let canonical = code.trim().to_uppercase();
        let within_limit = Condition::any()
            .add(coupon::Column::MaxUses.is_null())
            .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::MaxUses)));
        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .filter(coupon::Column::Code.eq(canonical.clone()))
            .filter(within_limit)
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            warn!(code = %canonical, "Coupon missing or exhausted at redemption, continuing");
        }
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn coupon(coupon_type: CouponType, value: Decimal) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            coupon_type,
            value,
            min_order: None,
            max_uses: None,
            used_count: 0,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_rounds_to_cents() {
        let c = coupon(CouponType::Percentage, dec!(10));
        assert_eq!(CouponService::evaluate(&c, dec!(100.00)), Ok(dec!(10.00)));
        let c = coupon(CouponType::Percentage, dec!(15));
        assert_eq!(CouponService::evaluate(&c, dec!(33.33)), Ok(dec!(5.00)));
    }

    #[test]
    fn fixed_discount_clamps_to_subtotal() {
        let c = coupon(CouponType::Fixed, dec!(20));
        assert_eq!(CouponService::evaluate(&c, dec!(15.00)), Ok(dec!(15.00)));
        assert_eq!(CouponService::evaluate(&c, dec!(45.00)), Ok(dec!(20.00)));
    }

    #[test]
    fn inactive_rejected_before_expiry() {
        let mut c = coupon(CouponType::Fixed, dec!(5));
        c.is_active = false;
        c.expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(
            CouponService::evaluate(&c, dec!(100)),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn expired_coupon_rejected() {
        let mut c = coupon(CouponType::Fixed, dec!(5));
        c.expires_at = Some(Utc::now() - Duration::hours(1));
        assert_eq!(
            CouponService::evaluate(&c, dec!(100)),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn use_limit_rejected() {
        let mut c = coupon(CouponType::Fixed, dec!(5));
        c.max_uses = Some(3);
        c.used_count = 3;
        assert_eq!(
            CouponService::evaluate(&c, dec!(100)),
            Err(CouponRejection::LimitReached)
        );
    }

    proptest::proptest! {
        #[test]
        fn discount_never_exceeds_subtotal(
            subtotal_cents in 0i64..1_000_000,
            value_cents in 0i64..100_000,
            percentage in proptest::bool::ANY,
        ) {
            let subtotal = Decimal::new(subtotal_cents, 2);
            let c = if percentage {
                coupon(CouponType::Percentage, Decimal::from(value_cents % 101))
            } else {
                coupon(CouponType::Fixed, Decimal::new(value_cents, 2))
            };
            let discount = CouponService::evaluate(&c, subtotal).unwrap();
            proptest::prop_assert!(discount >= Decimal::ZERO);
            proptest::prop_assert!(discount <= subtotal);
        }
    }

    #[test]
    fn minimum_order_rejected() {
        let mut c = coupon(CouponType::Percentage, dec!(10));
        c.min_order = Some(dec!(30));
        assert_eq!(
            CouponService::evaluate(&c, dec!(29.99)),
            Err(CouponRejection::BelowMinimum {
                min_order: dec!(30)
            })
        );
        assert!(CouponService::evaluate(&c, dec!(30)).is_ok());
    }
}
