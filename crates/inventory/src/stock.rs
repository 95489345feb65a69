//! Per-(product, warehouse) stock state and its transitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{ProductId, WarehouseId};

/// Business-rule failures raised by stock transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("quantity must be greater than 0 (got {0})")]
    InvalidQuantity(i64),

    #[error("adjustment delta cannot be zero")]
    ZeroAdjustment,

    #[error("insufficient stock available: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("insufficient reserved stock: requested {requested}, reserved {reserved}")]
    InsufficientReserved { requested: i64, reserved: i64 },

    #[error("quantity overflow: {current} + {delta} does not fit in a stock level")]
    QuantityOverflow { current: i64, delta: i64 },
}

/// Key of a stock level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// What a negative adjustment does when it would take quantity below zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustPolicy {
    /// Floor the new quantity at zero and record the effective delta.
    #[default]
    ClampAtZero,
    /// Fail with `InsufficientStock` instead of clamping.
    Reject,
}

/// Current stock of one product in one warehouse.
///
/// Invariants (held by every transition):
/// - `quantity >= 0`
/// - `0 <= reserved <= quantity`
///
/// Serialized with a derived `available` field next to the stored ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StockLevelView")]
pub struct StockLevel {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reserved: i64,
    /// Number of committed changes to this level; 0 means never written.
    pub version: u64,
}

#[derive(Serialize)]
struct StockLevelView {
    product_id: ProductId,
    warehouse_id: WarehouseId,
    quantity: i64,
    reserved: i64,
    available: i64,
    version: u64,
}

impl From<StockLevel> for StockLevelView {
    fn from(level: StockLevel) -> Self {
        Self {
            available: level.available(),
            product_id: level.product_id,
            warehouse_id: level.warehouse_id,
            quantity: level.quantity,
            reserved: level.reserved,
            version: level.version,
        }
    }
}

impl StockLevel {
    /// The state of a key that has never received stock.
    pub fn empty(key: StockKey) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved: 0,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Stock-in of `quantity` units. Capacity is checked by the caller.
    pub fn receive(&self, quantity: i64) -> Result<StockChange, StockError> {
        ensure_positive(quantity)?;
        self.change(quantity, 0, quantity, false)
    }

    /// Stock-out of `quantity` units, bounded by available (unreserved) stock.
    pub fn ship(&self, quantity: i64) -> Result<StockChange, StockError> {
        ensure_positive(quantity)?;
        self.ensure_available(quantity)?;
        self.change(-quantity, 0, -quantity, false)
    }

    /// Signed manual correction.
    ///
    /// Under `ClampAtZero` a negative delta larger than the current quantity
    /// floors at zero; the change carries both the effective and the requested
    /// delta. Reserved stock is cut back so it never exceeds quantity.
    pub fn adjust(&self, delta: i64, policy: AdjustPolicy) -> Result<StockChange, StockError> {
        if delta == 0 {
            return Err(StockError::ZeroAdjustment);
        }

        let target = self.quantity.checked_add(delta).ok_or(StockError::QuantityOverflow {
            current: self.quantity,
            delta,
        })?;
        let (new_quantity, clamped) = match (target < 0, policy) {
            (false, _) => (target, false),
            (true, AdjustPolicy::ClampAtZero) => (0, true),
            (true, AdjustPolicy::Reject) => {
                // i64::MIN has no positive counterpart; report the largest request.
                return Err(StockError::InsufficientStock {
                    requested: delta.saturating_neg(),
                    available: self.quantity,
                });
            }
        };

        let quantity_delta = new_quantity - self.quantity;
        let reserved_delta = self.reserved.min(new_quantity) - self.reserved;
        self.change(quantity_delta, reserved_delta, delta, clamped)
    }

    /// Source leg of a transfer; same rule as `ship`.
    pub fn transfer_out(&self, quantity: i64) -> Result<StockChange, StockError> {
        self.ship(quantity)
    }

    /// Destination leg of a transfer; same rule as `receive`.
    pub fn transfer_in(&self, quantity: i64) -> Result<StockChange, StockError> {
        self.receive(quantity)
    }

    /// Earmark `quantity` available units. On-hand quantity is unchanged.
    pub fn reserve(&self, quantity: i64) -> Result<StockChange, StockError> {
        ensure_positive(quantity)?;
        self.ensure_available(quantity)?;
        self.change(0, quantity, 0, false)
    }

    /// Return `quantity` reserved units to available stock.
    pub fn release(&self, quantity: i64) -> Result<StockChange, StockError> {
        ensure_positive(quantity)?;
        if self.reserved < quantity {
            return Err(StockError::InsufficientReserved {
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.change(0, -quantity, 0, false)
    }

    fn ensure_available(&self, quantity: i64) -> Result<(), StockError> {
        let available = self.available();
        if available < quantity {
            return Err(StockError::InsufficientStock {
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    fn change(
        &self,
        quantity_delta: i64,
        reserved_delta: i64,
        requested_delta: i64,
        clamped: bool,
    ) -> Result<StockChange, StockError> {
        let quantity = self
            .quantity
            .checked_add(quantity_delta)
            .ok_or(StockError::QuantityOverflow {
                current: self.quantity,
                delta: quantity_delta,
            })?;
        let reserved = self
            .reserved
            .checked_add(reserved_delta)
            .ok_or(StockError::QuantityOverflow {
                current: self.reserved,
                delta: reserved_delta,
            })?;
        let after = StockLevel {
            quantity,
            reserved,
            version: self.version.saturating_add(1),
            ..self.clone()
        };

        Ok(StockChange {
            before: self.clone(),
            after,
            quantity_delta,
            reserved_delta,
            requested_delta,
            clamped,
        })
    }
}

fn ensure_positive(quantity: i64) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// Result of one transition, before it is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub before: StockLevel,
    pub after: StockLevel,
    /// Effective change of on-hand quantity (`after - before`).
    pub quantity_delta: i64,
    /// Effective change of reserved quantity.
    pub reserved_delta: i64,
    /// Delta the caller asked for; differs from `quantity_delta` only when clamped.
    pub requested_delta: i64,
    pub clamped: bool,
}

impl StockChange {
    pub fn key(&self) -> StockKey {
        self.after.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level(quantity: i64, reserved: i64) -> StockLevel {
        StockLevel {
            quantity,
            reserved,
            version: 3,
            ..StockLevel::empty(StockKey::new(ProductId::new(), WarehouseId::new()))
        }
    }

    #[test]
    fn receive_adds_quantity_and_bumps_version() {
        let change = level(5, 0).receive(10).unwrap();
        assert_eq!(change.before.quantity, 5);
        assert_eq!(change.after.quantity, 15);
        assert_eq!(change.quantity_delta, 10);
        assert_eq!(change.after.version, 4);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let l = level(5, 0);
        assert_eq!(l.receive(0), Err(StockError::InvalidQuantity(0)));
        assert_eq!(l.ship(-1), Err(StockError::InvalidQuantity(-1)));
        assert_eq!(l.reserve(0), Err(StockError::InvalidQuantity(0)));
        assert_eq!(l.release(0), Err(StockError::InvalidQuantity(0)));
        assert_eq!(l.adjust(0, AdjustPolicy::ClampAtZero), Err(StockError::ZeroAdjustment));
    }

    #[test]
    fn ship_more_than_available_fails() {
        let err = level(5, 0).ship(7).unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientStock {
                requested: 7,
                available: 5
            }
        );
    }

    #[test]
    fn ship_respects_reservations() {
        let l = level(10, 8);
        assert!(l.ship(3).is_err());
        assert_eq!(l.ship(2).unwrap().after.quantity, 8);
    }

    #[test]
    fn negative_adjust_clamps_at_zero() {
        let change = level(3, 0).adjust(-10, AdjustPolicy::ClampAtZero).unwrap();
        assert_eq!(change.after.quantity, 0);
        assert_eq!(change.quantity_delta, -3);
        assert_eq!(change.requested_delta, -10);
        assert!(change.clamped);
    }

    #[test]
    fn negative_adjust_can_be_rejected() {
        let err = level(3, 0).adjust(-10, AdjustPolicy::Reject).unwrap_err();
        assert!(matches!(err, StockError::InsufficientStock { .. }));
    }

    #[test]
    fn adjust_below_reserved_shrinks_reservation() {
        let change = level(10, 6).adjust(-7, AdjustPolicy::ClampAtZero).unwrap();
        assert_eq!(change.after.quantity, 3);
        assert_eq!(change.after.reserved, 3);
        assert_eq!(change.reserved_delta, -3);
        assert!(!change.clamped);
    }

    #[test]
    fn reserve_and_release_leave_quantity_alone() {
        let reserved = level(10, 0).reserve(4).unwrap();
        assert_eq!(reserved.after.quantity, 10);
        assert_eq!(reserved.after.reserved, 4);
        assert_eq!(reserved.after.available(), 6);
        assert_eq!(reserved.quantity_delta, 0);

        let released = reserved.after.release(3).unwrap();
        assert_eq!(released.after.reserved, 1);
        assert_eq!(released.reserved_delta, -3);
    }

    #[test]
    fn release_more_than_reserved_fails() {
        let err = level(10, 2).release(3).unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientReserved {
                requested: 3,
                reserved: 2
            }
        );
    }

    #[test]
    fn receive_past_i64_max_overflows_without_panicking() {
        assert_eq!(
            level(1, 0).receive(i64::MAX),
            Err(StockError::QuantityOverflow {
                current: 1,
                delta: i64::MAX
            })
        );
        assert!(level(0, 0).receive(i64::MAX).is_ok());
        assert!(level(i64::MAX, 0).transfer_in(1).is_err());
    }

    #[test]
    fn extreme_adjust_deltas_are_errors_not_panics() {
        let empty = StockLevel::empty(StockKey::new(ProductId::new(), WarehouseId::new()));
        assert_eq!(
            empty.adjust(i64::MIN, AdjustPolicy::Reject),
            Err(StockError::InsufficientStock {
                requested: i64::MAX,
                available: 0
            })
        );

        let change = level(5, 2).adjust(i64::MIN, AdjustPolicy::ClampAtZero).unwrap();
        assert_eq!(change.after.quantity, 0);
        assert_eq!(change.after.reserved, 0);
        assert_eq!(change.requested_delta, i64::MIN);

        assert!(matches!(
            level(1, 0).adjust(i64::MAX, AdjustPolicy::ClampAtZero),
            Err(StockError::QuantityOverflow { .. })
        ));
        assert!(level(i64::MAX, 0).ship(i64::MAX).is_ok());
    }

    #[test]
    fn serialized_level_carries_available() {
        let original = level(10, 4);
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["quantity"], 10);
        assert_eq!(json["reserved"], 4);
        assert_eq!(json["available"], 6);

        let back: StockLevel = serde_json::from_value(json).unwrap();
        assert_eq!(back, original);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Ship(i64),
        Adjust(i64),
        Reserve(i64),
        Release(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Receive),
            (1i64..50).prop_map(Op::Ship),
            (-60i64..60).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Adjust),
            (1i64..30).prop_map(Op::Reserve),
            (1i64..30).prop_map(Op::Release),
        ]
    }

    fn extreme_op_strategy() -> impl Strategy<Value = Op> {
        let quantity = prop_oneof![Just(i64::MAX), Just(i64::MAX - 1), (1i64..=i64::MAX)];
        let delta = prop_oneof![Just(i64::MIN), Just(i64::MAX), any::<i64>()].prop_filter("non-zero", |d| *d != 0);
        prop_oneof![
            quantity.clone().prop_map(Op::Receive),
            quantity.clone().prop_map(Op::Ship),
            delta.prop_map(Op::Adjust),
            quantity.clone().prop_map(Op::Reserve),
            quantity.prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn extreme_quantities_fail_cleanly(ops in proptest::collection::vec(extreme_op_strategy(), 1..40)) {
            let mut current = StockLevel::empty(StockKey::new(ProductId::new(), WarehouseId::new()));

            for op in ops {
                let result = match op {
                    Op::Receive(q) => current.receive(q),
                    Op::Ship(q) => current.ship(q),
                    Op::Adjust(d) => current.adjust(d, AdjustPolicy::ClampAtZero),
                    Op::Reserve(q) => current.reserve(q),
                    Op::Release(q) => current.release(q),
                };

                if let Ok(change) = result {
                    prop_assert_eq!(change.before.quantity.checked_add(change.quantity_delta), Some(change.after.quantity));
                    current = change.after;
                }

                prop_assert!(current.quantity >= 0);
                prop_assert!(current.reserved >= 0);
                prop_assert!(current.reserved <= current.quantity);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn transitions_preserve_invariants_and_deltas(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let mut current = StockLevel::empty(StockKey::new(ProductId::new(), WarehouseId::new()));
            let mut delta_sum = 0i64;
            let mut reserved_sum = 0i64;

            for op in ops {
                let result = match op {
                    Op::Receive(q) => current.receive(q),
                    Op::Ship(q) => current.ship(q),
                    Op::Adjust(d) => current.adjust(d, AdjustPolicy::ClampAtZero),
                    Op::Reserve(q) => current.reserve(q),
                    Op::Release(q) => current.release(q),
                };

                if let Ok(change) = result {
                    prop_assert_eq!(change.after.quantity, change.before.quantity + change.quantity_delta);
                    prop_assert_eq!(change.after.version, change.before.version + 1);
                    delta_sum += change.quantity_delta;
                    reserved_sum += change.reserved_delta;
                    current = change.after;
                }

                prop_assert!(current.quantity >= 0);
                prop_assert!(current.reserved >= 0);
                prop_assert!(current.reserved <= current.quantity);
            }

            prop_assert_eq!(current.quantity, delta_sum);
            prop_assert_eq!(current.reserved, reserved_sum);
        }
    }
}
