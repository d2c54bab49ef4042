//! Reservation (hold) models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{normalize_lines, ParseEnumError, StockLine};
use crate::types::{BranchId, IngredientId};

/// Reservation lifecycle: ACTIVE -> COMMITTED | RELEASED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Committed,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Released => "RELEASED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Only ACTIVE rows move, and only into a terminal state
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Active, ReservationStatus::Committed)
                | (ReservationStatus::Active, ReservationStatus::Released)
        )
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationStatus::Active),
            "COMMITTED" => Ok(ReservationStatus::Committed),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(ParseEnumError::new("reservation status", other)),
        }
    }
}

/// Checkout session a hold belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum HoldOwner {
    Cart(Uuid),
    Guest(Uuid),
}

impl HoldOwner {
    /// Cart wins when both are supplied
    pub fn from_parts(cart_id: Option<Uuid>, guest_id: Option<Uuid>) -> Option<Self> {
        match (cart_id, guest_id) {
            (Some(cart), _) => Some(HoldOwner::Cart(cart)),
            (None, Some(guest)) => Some(HoldOwner::Guest(guest)),
            (None, None) => None,
        }
    }

    pub fn cart_id(&self) -> Option<Uuid> {
        match self {
            HoldOwner::Cart(id) => Some(*id),
            HoldOwner::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<Uuid> {
        match self {
            HoldOwner::Guest(id) => Some(*id),
            HoldOwner::Cart(_) => None,
        }
    }
}

/// One ingredient's share of a hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    /// Hold id shared by every row of one order attempt
    pub group_id: Uuid,
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    pub quantity_reserved: Decimal,
    pub unit_code: String,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub owner: HoldOwner,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether `commit` may claim this row at `now`
    pub fn is_committable(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && !self.is_expired(now)
    }
}

/// Ledger lines for a set of reservation rows, merged per ingredient
pub fn hold_lines(reservations: &[Reservation]) -> Vec<StockLine> {
    let lines: Vec<StockLine> = reservations
        .iter()
        .map(|r| StockLine::new(r.ingredient_id, r.quantity_reserved))
        .collect();
    normalize_lines(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(ingredient_id: IngredientId, qty: i64, expires_in: i64) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            group_id: Uuid::nil(),
            branch_id: 1,
            ingredient_id,
            quantity_reserved: Decimal::from(qty),
            unit_code: "G".to_string(),
            status: ReservationStatus::Active,
            expires_at: now + Duration::minutes(expires_in),
            owner: HoldOwner::Cart(Uuid::nil()),
            order_id: None,
            created_at: now,
            committed_at: None,
            released_at: None,
        }
    }

    #[test]
    fn test_terminal_states_never_reentered() {
        assert!(ReservationStatus::Active.can_transition_to(ReservationStatus::Committed));
        assert!(ReservationStatus::Active.can_transition_to(ReservationStatus::Released));
        assert!(!ReservationStatus::Committed.can_transition_to(ReservationStatus::Released));
        assert!(!ReservationStatus::Released.can_transition_to(ReservationStatus::Active));
        assert!(!ReservationStatus::Released.can_transition_to(ReservationStatus::Committed));
    }

    #[test]
    fn test_expired_hold_not_committable() {
        let r = reservation(5, 10, -1);
        assert!(r.is_expired(Utc::now()));
        assert!(!r.is_committable(Utc::now()));
        assert!(reservation(5, 10, 15).is_committable(Utc::now()));
    }

    #[test]
    fn test_owner_prefers_cart() {
        let cart = Uuid::new_v4();
        let guest = Uuid::new_v4();
        assert_eq!(HoldOwner::from_parts(Some(cart), Some(guest)), Some(HoldOwner::Cart(cart)));
        assert_eq!(HoldOwner::from_parts(None, Some(guest)), Some(HoldOwner::Guest(guest)));
        assert_eq!(HoldOwner::from_parts(None, None), None);
    }

    #[test]
    fn test_hold_lines_sorted() {
        let lines = hold_lines(&[reservation(8, 1, 15), reservation(2, 3, 15)]);
        assert_eq!(lines[0].ingredient_id, 2);
        assert_eq!(lines[1].ingredient_id, 8);
    }
}
