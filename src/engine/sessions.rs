use serde_json::json;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    async fn slot_price_for_booking(&self, booking_id: &Ulid) -> Option<f64> {
        let booking = self.store.get_booking(booking_id)?;
        let slot_id = booking.read().await.slot_id.clone();
        let slot = self.store.get_slot(&slot_id)?;
        let price = slot.read().await.dynamic_price;
        Some(price)
    }

    // ── Sessions ─────────────────────────────────────────────

    /// Start a parking session against a held/confirmed booking and move the
    /// booking to active.
    pub async fn start_session(
        &self,
        booking_id: Ulid,
        validation_method: Option<ValidationMethod>,
        bay_label: Option<String>,
        grace_minutes: i64,
    ) -> Result<Session, EngineError> {
        if let Some(ref label) = bay_label
            && label.len() > MAX_BAY_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("bay label too long"));
        }
        let grace_minutes = grace_minutes.clamp(0, MAX_GRACE_MINUTES);

        let arc = self
            .store
            .get_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut guard = arc.write().await;
        let already_active = guard.status == BookingStatus::Active;
        if !already_active && !guard.status.can_transition(BookingStatus::Active) {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                to: BookingStatus::Active,
            });
        }

        let now = now_ms();
        let session = Session {
            id: Ulid::new(),
            booking_id,
            started_at: now,
            ended_at: None,
            validation_method,
            bay_label,
            grace_ends_at: now + grace_minutes * MINUTE_MS,
        };
        let event = OutboxEvent::new(
            "session.started",
            json!({
                "session_id": session.id.to_string(),
                "booking_id": booking_id.to_string(),
                "grace_ends_at": to_iso(session.grace_ends_at),
                "at": to_iso(now),
            }),
            now,
        );

        let mut ops = vec![Op::InsertSession {
            session: session.clone(),
        }];
        if !already_active {
            ops.push(Op::SetBookingStatus {
                booking_id,
                status: BookingStatus::Active,
            });
        }
        ops.push(Op::AppendOutbox {
            event: event.clone(),
        });
        self.persist(&Commit { ops }).await?;

        self.store.insert_session(session.clone());
        if !already_active {
            guard.status = BookingStatus::Active;
        }
        drop(guard);
        self.store.push_outbox(event).await;
        tracing::info!("session {} started for booking {booking_id}", session.id);
        Ok(session)
    }

    /// Record a validation (QR/NFC/plate scan) on a running session. When the
    /// booking has no payment yet, a preauthorization at the slot's current
    /// dynamic price is created in the same commit.
    pub async fn validate_session(
        &self,
        session_id: Ulid,
        method: ValidationMethod,
        bay_label: Option<String>,
    ) -> Result<Session, EngineError> {
        if let Some(ref label) = bay_label
            && label.len() > MAX_BAY_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("bay label too long"));
        }
        let arc = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let mut guard = arc.write().await;
        let booking_id = guard.booking_id;
        let now = now_ms();

        let mut ops = vec![Op::SetSessionValidation {
            session_id,
            method,
            bay_label: bay_label.clone(),
        }];
        let mut events = Vec::new();

        let new_payment = if self.store.payment_by_booking.contains_key(&booking_id) {
            None
        } else {
            let amount = self.slot_price_for_booking(&booking_id).await.unwrap_or(0.0);
            let payment = Payment {
                id: Ulid::new(),
                booking_id,
                amount_authorized: amount,
                amount_captured: None,
                status: PaymentStatus::PreauthOk,
                created_at: now,
            };
            ops.push(Op::InsertPayment {
                payment: payment.clone(),
            });
            events.push(OutboxEvent::new(
                "payment.preauth_ok",
                json!({
                    "booking_id": booking_id.to_string(),
                    "payment_id": payment.id.to_string(),
                    "amount_authorized": payment.amount_authorized,
                    "at": to_iso(now),
                }),
                now,
            ));
            Some(payment)
        };

        events.push(OutboxEvent::new(
            "session.validated",
            json!({
                "session_id": session_id.to_string(),
                "booking_id": booking_id.to_string(),
                "method": method.as_str(),
                "bay_label": bay_label,
                "at": to_iso(now),
            }),
            now,
        ));
        for event in &events {
            ops.push(Op::AppendOutbox {
                event: event.clone(),
            });
        }
        self.persist(&Commit { ops }).await?;

        guard.validation_method = Some(method);
        guard.bay_label = bay_label;
        let session = guard.clone();
        drop(guard);
        if let Some(payment) = new_payment {
            self.store.insert_payment(payment);
        }
        for event in events {
            self.store.push_outbox(event).await;
        }
        Ok(session)
    }

    /// Push the grace deadline forward, either by a number of minutes or to
    /// an absolute ISO timestamp.
    pub async fn extend_session(
        &self,
        session_id: Ulid,
        minutes: Option<i64>,
        grace_until_iso: Option<&str>,
    ) -> Result<Session, EngineError> {
        let arc = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let mut guard = arc.write().await;

        let new_grace = match (minutes, grace_until_iso) {
            (Some(m), _) => {
                let m = m.clamp(1, MAX_GRACE_MINUTES);
                guard.grace_ends_at.max(now_ms()) + m * MINUTE_MS
            }
            (None, Some(iso)) => {
                parse_iso(iso).ok_or_else(|| EngineError::InvalidTimestamp(iso.to_string()))?
            }
            (None, None) => {
                return Err(EngineError::LimitExceeded("provide minutes or grace_until"));
            }
        };

        self.persist(&Commit::one(Op::SetSessionGrace {
            session_id,
            grace_ends_at: new_grace,
        }))
        .await?;
        guard.grace_ends_at = new_grace;
        Ok(guard.clone())
    }

    /// End a session: completes the booking and captures the payment at the
    /// slot's current dynamic price. Ending an already-ended session is a
    /// no-op, so an interrupted caller can safely retry.
    pub async fn end_session(&self, session_id: Ulid) -> Result<Session, EngineError> {
        let arc = self
            .store
            .get_session(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let mut guard = arc.write().await;
        if guard.ended_at.is_some() {
            return Ok(guard.clone());
        }
        let booking_id = guard.booking_id;
        let now = now_ms();

        let final_amount = self.slot_price_for_booking(&booking_id).await.unwrap_or(0.0);
        let mut ops = vec![Op::EndSession {
            session_id,
            ended_at: now,
        }];

        let booking_arc = self.store.get_booking(&booking_id);
        let mut complete_booking = false;
        if let Some(ref b) = booking_arc {
            let status = b.read().await.status;
            if status.can_transition(BookingStatus::Completed) {
                ops.push(Op::SetBookingStatus {
                    booking_id,
                    status: BookingStatus::Completed,
                });
                complete_booking = true;
            }
        }

        // Capture an existing payment, or settle directly when none exists.
        let existing_payment = self
            .store
            .payment_by_booking
            .get(&booking_id)
            .map(|e| *e.value());
        let mut new_payment = None;
        let payment_id = match existing_payment {
            Some(pid) => {
                ops.push(Op::SetPaymentCaptured {
                    payment_id: pid,
                    amount: final_amount,
                });
                pid
            }
            None => {
                let payment = Payment {
                    id: Ulid::new(),
                    booking_id,
                    amount_authorized: final_amount,
                    amount_captured: Some(final_amount),
                    status: PaymentStatus::Captured,
                    created_at: now,
                };
                let pid = payment.id;
                ops.push(Op::InsertPayment {
                    payment: payment.clone(),
                });
                new_payment = Some(payment);
                pid
            }
        };

        let events = vec![
            OutboxEvent::new(
                "payment.captured",
                json!({
                    "booking_id": booking_id.to_string(),
                    "payment_id": payment_id.to_string(),
                    "amount_captured": final_amount,
                    "at": to_iso(now),
                }),
                now,
            ),
            OutboxEvent::new(
                "session.ended",
                json!({
                    "session_id": session_id.to_string(),
                    "booking_id": booking_id.to_string(),
                    "at": to_iso(now),
                }),
                now,
            ),
        ];
        for event in &events {
            ops.push(Op::AppendOutbox {
                event: event.clone(),
            });
        }
        self.persist(&Commit { ops }).await?;

        guard.ended_at = Some(now);
        let session = guard.clone();
        drop(guard);

        if complete_booking
            && let Some(b) = booking_arc
        {
            b.write().await.status = BookingStatus::Completed;
        }
        match new_payment {
            Some(payment) => self.store.insert_payment(payment),
            None => {
                if let Some(p) = self.store.get_payment(&payment_id) {
                    let mut pg = p.write().await;
                    pg.amount_captured = Some(final_amount);
                    pg.status = PaymentStatus::Captured;
                }
            }
        }
        for event in events {
            self.store.push_outbox(event).await;
        }
        tracing::info!("session {session_id} ended, captured {final_amount}");
        Ok(session)
    }

    // ── Payments ─────────────────────────────────────────────

    /// Preauthorize a payment for a booking. Amount defaults to the slot's
    /// current dynamic price.
    pub async fn preauth_payment(
        &self,
        booking_id: Ulid,
        amount_override: Option<f64>,
    ) -> Result<Payment, EngineError> {
        if !self.store.bookings.contains_key(&booking_id) {
            return Err(EngineError::BookingNotFound(booking_id));
        }
        if self.store.payment_by_booking.contains_key(&booking_id) {
            return Err(EngineError::PaymentState("payment already exists"));
        }
        let amount = match amount_override {
            Some(a) if a >= 0.0 => a,
            Some(_) => return Err(EngineError::LimitExceeded("negative amount")),
            None => self.slot_price_for_booking(&booking_id).await.unwrap_or(0.0),
        };

        let now = now_ms();
        let payment = Payment {
            id: Ulid::new(),
            booking_id,
            amount_authorized: amount,
            amount_captured: None,
            status: PaymentStatus::PreauthOk,
            created_at: now,
        };
        let event = OutboxEvent::new(
            "payment.preauth_ok",
            json!({
                "booking_id": booking_id.to_string(),
                "payment_id": payment.id.to_string(),
                "amount_authorized": amount,
                "at": to_iso(now),
            }),
            now,
        );
        self.persist(&Commit {
            ops: vec![
                Op::InsertPayment {
                    payment: payment.clone(),
                },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        })
        .await?;

        self.store.insert_payment(payment.clone());
        self.store.push_outbox(event).await;
        Ok(payment)
    }

    /// Capture a preauthorized payment at its authorized amount.
    pub async fn capture_payment(&self, payment_id: Ulid) -> Result<Payment, EngineError> {
        let arc = self
            .store
            .get_payment(&payment_id)
            .ok_or(EngineError::PaymentNotFound(payment_id))?;
        let mut guard = arc.write().await;
        if !matches!(guard.status, PaymentStatus::PreauthOk | PaymentStatus::Init) {
            return Err(EngineError::PaymentState("payment not capturable"));
        }

        let amount = guard.amount_authorized;
        let now = now_ms();
        let event = OutboxEvent::new(
            "payment.captured",
            json!({
                "payment_id": payment_id.to_string(),
                "booking_id": guard.booking_id.to_string(),
                "amount_captured": amount,
                "at": to_iso(now),
            }),
            now,
        );
        self.persist(&Commit {
            ops: vec![
                Op::SetPaymentCaptured { payment_id, amount },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        })
        .await?;

        guard.amount_captured = Some(amount);
        guard.status = PaymentStatus::Captured;
        let payment = guard.clone();
        drop(guard);
        self.store.push_outbox(event).await;
        Ok(payment)
    }

    /// Refund a captured payment.
    pub async fn refund_payment(&self, payment_id: Ulid) -> Result<Payment, EngineError> {
        let arc = self
            .store
            .get_payment(&payment_id)
            .ok_or(EngineError::PaymentNotFound(payment_id))?;
        let mut guard = arc.write().await;
        if guard.status != PaymentStatus::Captured {
            return Err(EngineError::PaymentState("payment not refundable"));
        }

        let now = now_ms();
        let event = OutboxEvent::new(
            "payment.refunded",
            json!({
                "payment_id": payment_id.to_string(),
                "booking_id": guard.booking_id.to_string(),
                "amount_refunded": guard.amount_captured.unwrap_or(0.0),
                "at": to_iso(now),
            }),
            now,
        );
        self.persist(&Commit {
            ops: vec![
                Op::SetPaymentStatus {
                    payment_id,
                    status: PaymentStatus::Refunded,
                },
                Op::AppendOutbox {
                    event: event.clone(),
                },
            ],
        })
        .await?;

        guard.status = PaymentStatus::Refunded;
        let payment = guard.clone();
        drop(guard);
        self.store.push_outbox(event).await;
        Ok(payment)
    }
}
