use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw storage identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw storage identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of the user who owns reservations, payments and a wallet.
    UserId
);
define_id!(
    /// Identifier of a seat.
    SeatId
);
define_id!(
    /// Identifier of a concert.
    ConcertId
);
define_id!(
    /// Identifier of a concert schedule (one performance with a fixed price).
    ScheduleId
);
define_id!(
    /// Identifier of a reservation.
    ReservationId
);
define_id!(
    /// Identifier of an approved payment.
    PaymentId
);
define_id!(
    /// Identifier of a wallet.
    WalletId
);
define_id!(
    /// Identifier of a ledger entry.
    LedgerEntryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_preserves_raw_value() {
        let id = SeatId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(SeatId::from(42), id);
    }

    #[test]
    fn id_display_is_the_raw_number() {
        assert_eq!(ReservationId::new(7).to_string(), "7");
    }

    #[test]
    fn id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UserId::new(3));
    }
}
