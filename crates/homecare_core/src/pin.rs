//! crates/homecare_core/src/pin.rs
//!
//! The delivery PIN and the pure state transitions of the PIN handshake.
//!
//! Every transition takes the current order by reference and returns the
//! next order value. Nothing here touches storage; the delivery service
//! writes the result back with a compare-and-swap.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;

use crate::domain::{AttemptOutcome, DeliveryOrder, DeliveryStatus, PinState};
use crate::error::{ServiceError, ServiceResult};

/// A four-digit delivery PIN.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub const LENGTH: usize = 4;

    /// Parses user input, accepting exactly four ASCII digits.
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        if raw.len() != Self::LENGTH {
            return Err(ServiceError::validation(format!(
                "PIN must be exactly {} digits",
                Self::LENGTH
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ServiceError::validation("PIN must contain only digits"));
        }
        Ok(Self(raw.to_string()))
    }

    /// Draws a uniformly random PIN that differs from `previous`.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, previous: Option<&Pin>) -> Self {
        let mut value: u16 = rng.gen_range(0..10_000);
        if let Some(previous) = previous {
            if previous.0 == format!("{value:04}") {
                value = (value + 1) % 10_000;
            }
        }
        Self(format!("{value:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The PIN is a credential; keep it out of debug logs.
impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// What the caller must do after a lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Confirm the delivery with the recipient by phone.
    CallCustomer,
}

/// The result of one well-formed PIN entry against a verifiable order.
///
/// A lockout is a successful call with its own outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Rejected { remaining_attempts: u8 },
    LockedOut { escalation: Escalation },
}

impl VerificationOutcome {
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            VerificationOutcome::Verified => AttemptOutcome::Verified,
            VerificationOutcome::Rejected { .. } => AttemptOutcome::Rejected,
            VerificationOutcome::LockedOut { .. } => AttemptOutcome::LockedOut,
        }
    }
}

impl DeliveryOrder {
    /// Rejects orders that cannot take a PIN entry.
    pub fn ensure_verifiable(&self) -> ServiceResult<()> {
        match self.pin_state {
            PinState::Verified => {
                return Err(ServiceError::invalid_state(format!(
                    "order {} is already verified",
                    self.id
                )))
            }
            PinState::Locked => {
                return Err(ServiceError::invalid_state(format!(
                    "order {} is locked after too many failed attempts; call the customer",
                    self.id
                )))
            }
            PinState::Issued | PinState::Verifying => {}
        }
        if self.status.is_closed() {
            return Err(ServiceError::invalid_state(format!(
                "order {} is {} and cannot be verified",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Applies one PIN entry by `agent_id` at `now`.
    pub fn apply_pin_attempt(
        &self,
        entered: &Pin,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<(DeliveryOrder, VerificationOutcome)> {
        self.ensure_verifiable()?;
        let mut next = self.clone();

        if entered == &self.pin {
            next.pin_state = PinState::Verified;
            next.verified_by = Some(agent_id.to_string());
            next.status = DeliveryStatus::Delivered;
            next.delivered_at = Some(now);
            return Ok((next, VerificationOutcome::Verified));
        }

        next.remaining_attempts = self.remaining_attempts.saturating_sub(1);
        let outcome = if next.remaining_attempts == 0 {
            next.pin_state = PinState::Locked;
            VerificationOutcome::LockedOut {
                escalation: Escalation::CallCustomer,
            }
        } else {
            next.pin_state = PinState::Verifying;
            VerificationOutcome::Rejected {
                remaining_attempts: next.remaining_attempts,
            }
        };
        Ok((next, outcome))
    }

    /// Replaces the PIN and restores the full attempt budget.
    pub fn apply_pin_reset(&self, new_pin: Pin, retry_limit: u8) -> ServiceResult<DeliveryOrder> {
        if self.status.is_closed() {
            return Err(ServiceError::invalid_state(format!(
                "cannot reset the PIN of order {} once it is {}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.pin = new_pin;
        next.pin_state = PinState::Issued;
        next.remaining_attempts = retry_limit;
        Ok(next)
    }

    pub fn apply_cancel(&self) -> ServiceResult<DeliveryOrder> {
        if self.status.is_closed() {
            return Err(ServiceError::invalid_state(format!(
                "order {} is already {}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = DeliveryStatus::Cancelled;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_RETRY_LIMIT;
    use chrono::TimeZone;
    use rand::rngs::mock::StepRng;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn order_with_pin(pin: &str) -> DeliveryOrder {
        DeliveryOrder::dispatched(
            "order-1".to_string(),
            Pin::parse(pin).unwrap(),
            vec!["item-1".to_string()],
            DEFAULT_RETRY_LIMIT,
            now(),
        )
    }

    #[rstest]
    #[case("")]
    #[case("123")]
    #[case("12345")]
    #[case("12a4")]
    #[case("-123")]
    #[case("１２３４")]
    fn malformed_pins_are_rejected(#[case] raw: &str) {
        assert!(matches!(Pin::parse(raw), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn leading_zeros_are_kept() {
        assert_eq!(Pin::parse("0042").unwrap().as_str(), "0042");
    }

    #[test]
    fn debug_output_hides_the_digits() {
        let pin = Pin::parse("4821").unwrap();
        assert_eq!(format!("{pin:?}"), "Pin(****)");
    }

    #[test]
    fn generated_pin_differs_from_previous() {
        // StepRng with a zero step yields the same draw every time.
        let mut rng = StepRng::new(0, 0);
        let first = Pin::generate(&mut rng, None);
        let second = Pin::generate(&mut rng, Some(&first));
        assert_eq!(first.as_str().len(), Pin::LENGTH);
        assert_ne!(first, second);
        assert!(Pin::parse(second.as_str()).is_ok());
    }

    #[test]
    fn failed_attempts_count_down_to_lockout() {
        let wrong = Pin::parse("1111").unwrap();
        let mut order = order_with_pin("4821");

        for n in 1..=DEFAULT_RETRY_LIMIT {
            let (next, outcome) = order.apply_pin_attempt(&wrong, "agent-7", now()).unwrap();
            assert_eq!(next.remaining_attempts, DEFAULT_RETRY_LIMIT - n);
            assert_eq!(
                next.remaining_attempts == 0,
                next.pin_state == PinState::Locked
            );
            if n == DEFAULT_RETRY_LIMIT {
                assert_eq!(
                    outcome,
                    VerificationOutcome::LockedOut {
                        escalation: Escalation::CallCustomer
                    }
                );
            } else {
                assert_eq!(
                    outcome,
                    VerificationOutcome::Rejected {
                        remaining_attempts: DEFAULT_RETRY_LIMIT - n
                    }
                );
            }
            order = next;
        }

        let err = order.apply_pin_attempt(&wrong, "agent-7", now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(order.remaining_attempts, 0);
    }

    #[test]
    fn correct_pin_after_failures_marks_delivery() {
        let order = order_with_pin("4821");
        let (order, _) = order
            .apply_pin_attempt(&Pin::parse("0000").unwrap(), "agent-7", now())
            .unwrap();
        let (order, outcome) = order
            .apply_pin_attempt(&Pin::parse("4821").unwrap(), "agent-7", now())
            .unwrap();

        assert_eq!(outcome, VerificationOutcome::Verified);
        assert_eq!(order.pin_state, PinState::Verified);
        assert_eq!(order.status, DeliveryStatus::Delivered);
        assert_eq!(order.delivered_at, Some(now()));
        assert_eq!(order.verified_by.as_deref(), Some("agent-7"));
    }

    #[test]
    fn verified_order_rejects_further_attempts() {
        let pin = Pin::parse("4821").unwrap();
        let (order, _) = order_with_pin("4821")
            .apply_pin_attempt(&pin, "agent-7", now())
            .unwrap();
        let err = order.apply_pin_attempt(&pin, "agent-7", now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(msg) if msg.contains("already verified")));
    }

    #[test]
    fn reset_restores_attempts_and_unlocks() {
        let mut order = order_with_pin("4821");
        order.pin_state = PinState::Locked;
        order.remaining_attempts = 0;

        let reset = order
            .apply_pin_reset(Pin::parse("9034").unwrap(), DEFAULT_RETRY_LIMIT)
            .unwrap();
        assert_eq!(reset.pin_state, PinState::Issued);
        assert_eq!(reset.remaining_attempts, DEFAULT_RETRY_LIMIT);

        let (_, outcome) = reset
            .apply_pin_attempt(&Pin::parse("4821").unwrap(), "agent-7", now())
            .unwrap();
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected {
                remaining_attempts: DEFAULT_RETRY_LIMIT - 1
            }
        );
    }

    #[rstest]
    #[case(DeliveryStatus::Delivered)]
    #[case(DeliveryStatus::Cancelled)]
    fn reset_is_refused_on_closed_orders(#[case] status: DeliveryStatus) {
        let mut order = order_with_pin("4821");
        order.status = status;
        let err = order
            .apply_pin_reset(Pin::parse("9034").unwrap(), DEFAULT_RETRY_LIMIT)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn cancelled_order_cannot_be_verified() {
        let order = order_with_pin("4821").apply_cancel().unwrap();
        let err = order
            .apply_pin_attempt(&Pin::parse("4821").unwrap(), "agent-7", now())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}
