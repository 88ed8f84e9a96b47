use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use hostelhub_types::models::{AuthUser, Booking, BookingStatus, PaymentStatus, Role};

use crate::api::BookingApi;
use crate::error::{ClientError, GatewayError, Result};
use crate::payment::{PaymentData, PaymentGateway, to_minor_units};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Checkout dismissed before paying. No verification was attempted.
    UserCancelled,
    /// The backend did not confirm the payment.
    PaymentRejected,
    ProviderFailure(String),
}

/// Client-side lifecycle of one booking, keyed by its payment reference.
///
/// ```text
/// Uninitiated -> Initiated -> AwaitingPayment -> Verifying -> Confirmed | Failed
///                                                             Confirmed -> Cancelled
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingPhase {
    Uninitiated,
    Initiated,
    AwaitingPayment,
    Verifying,
    Confirmed,
    Failed(FailureReason),
    Cancelled,
}

impl fmt::Display for BookingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitiated => f.write_str("uninitiated"),
            Self::Initiated => f.write_str("initiated"),
            Self::AwaitingPayment => f.write_str("awaiting payment"),
            Self::Verifying => f.write_str("verifying"),
            Self::Confirmed => f.write_str("confirmed"),
            Self::Failed(reason) => write!(f, "failed ({:?})", reason),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl BookingPhase {
    /// Phase implied by a server snapshot of a booking this session never drove.
    fn from_snapshot(booking: &Booking) -> Self {
        if booking.status == BookingStatus::Cancelled {
            return Self::Cancelled;
        }
        match booking.payment_status {
            PaymentStatus::Pending => Self::Initiated,
            PaymentStatus::Processing => Self::Verifying,
            PaymentStatus::Success => Self::Confirmed,
            PaymentStatus::Failed => Self::Failed(FailureReason::PaymentRejected),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBooking {
    pub booking: Booking,
    pub phase: BookingPhase,
    pub authorization_url: Option<String>,
    pub public_key: Option<String>,
}

impl TrackedBooking {
    fn adopted(booking: Booking) -> Self {
        Self {
            phase: BookingPhase::from_snapshot(&booking),
            booking,
            authorization_url: None,
            public_key: None,
        }
    }
}

/// Drives bookings through initiation, checkout, server verification and
/// cancellation for one logged-in user. `Confirmed` is only ever set from a
/// backend response, never from the checkout callback.
pub struct BookingService {
    api: Arc<dyn BookingApi>,
    gateway: Arc<dyn PaymentGateway>,
    user: AuthUser,
    currency: String,
    /// reference -> booking
    bookings: RwLock<HashMap<String, TrackedBooking>>,
}

impl BookingService {
    pub fn new(
        api: Arc<dyn BookingApi>,
        gateway: Arc<dyn PaymentGateway>,
        user: AuthUser,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            api,
            gateway,
            user,
            currency: currency.into(),
            bookings: RwLock::new(HashMap::new()),
        }
    }

    /// Current phase for a reference; `Uninitiated` if this session has not seen it.
    pub async fn phase(&self, reference: &str) -> BookingPhase {
        self.bookings
            .read()
            .await
            .get(reference)
            .map(|t| t.phase.clone())
            .unwrap_or(BookingPhase::Uninitiated)
    }

    pub async fn tracked(&self, reference: &str) -> Option<TrackedBooking> {
        self.bookings.read().await.get(reference).cloned()
    }

    pub async fn bookings(&self) -> Vec<TrackedBooking> {
        self.bookings.read().await.values().cloned().collect()
    }

    pub async fn initiate_booking(&self, hostel_id: &str) -> Result<TrackedBooking> {
        if self.user.role != Role::Student {
            warn!("{} ({:?}) tried to book hostel {}", self.user.id, self.user.role, hostel_id);
            return Err(ClientError::Auth("only students can book hostels".into()));
        }

        let resp = self.api.initiate_booking(hostel_id).await.inspect_err(|e| {
            warn!("Booking hostel {} failed: {}", hostel_id, e);
        })?;

        let reference = resp.booking.reference.clone();
        let tracked = TrackedBooking {
            booking: resp.booking,
            phase: BookingPhase::Initiated,
            authorization_url: resp.payment_authorization_url,
            public_key: resp.paystack_public_key,
        };

        info!("Booking {} initiated for hostel {}", reference, hostel_id);
        self.bookings.write().await.insert(reference, tracked.clone());
        Ok(tracked)
    }

    /// Hand the booking to the checkout, then verify with the backend.
    /// Returns the confirmed booking.
    pub async fn process_payment(&self, reference: &str) -> Result<Booking> {
        let payment = {
            let mut bookings = self.bookings.write().await;
            let tracked = bookings
                .get_mut(reference)
                .ok_or_else(|| ClientError::State(format!("unknown booking reference {}", reference)))?;

            if tracked.phase != BookingPhase::Initiated {
                return Err(illegal("pay for", reference, &tracked.phase));
            }
            if tracked.booking.payment_status != PaymentStatus::Pending {
                warn!(
                    "Refusing checkout for {}: payment already {:?}",
                    reference, tracked.booking.payment_status
                );
                return Err(ClientError::State(format!(
                    "payment for {} is already {:?}",
                    reference, tracked.booking.payment_status
                )));
            }

            let amount_minor = to_minor_units(tracked.booking.amount)?;
            tracked.phase = BookingPhase::AwaitingPayment;

            PaymentData {
                email: self.user.email.clone(),
                amount_minor,
                reference: reference.to_string(),
                currency: if tracked.booking.currency.is_empty() {
                    self.currency.clone()
                } else {
                    tracked.booking.currency.clone()
                },
                public_key: tracked.public_key.clone(),
                authorization_url: tracked.authorization_url.clone(),
            }
        };

        info!("Booking {} awaiting payment", reference);

        match self.gateway.open(payment).await {
            Ok(receipt) => {
                debug!("Checkout reported {} for {}", receipt.status, reference);
                self.set_phase(reference, BookingPhase::Verifying).await;
                self.verify_booking(reference).await
            }
            Err(e) => {
                let reason = match &e {
                    GatewayError::UserCancelled => FailureReason::UserCancelled,
                    GatewayError::Provider(msg) | GatewayError::Rejected(msg) => {
                        FailureReason::ProviderFailure(msg.clone())
                    }
                };
                warn!("Payment for {} did not complete: {}", reference, e);
                self.fail_checkout(reference, reason).await;
                Err(e.into())
            }
        }
    }

    /// Ask the backend whether the payment for `reference` cleared.
    ///
    /// Repeated calls after `Confirmed` return the stored booking without a
    /// request. A reference this session has not seen (e.g. reached through the
    /// provider's redirect) is adopted and verified. On a network failure the
    /// booking stays in `Verifying` so the call can be made again.
    pub async fn verify_booking(&self, reference: &str) -> Result<Booking> {
        {
            let bookings = self.bookings.read().await;
            if let Some(tracked) = bookings.get(reference) {
                match &tracked.phase {
                    BookingPhase::Confirmed => {
                        debug!("Booking {} already confirmed", reference);
                        return Ok(tracked.booking.clone());
                    }
                    BookingPhase::Failed(FailureReason::PaymentRejected) => {
                        return Err(rejected(reference));
                    }
                    BookingPhase::Verifying => {}
                    other => return Err(illegal("verify", reference, other)),
                }
            }
        }

        let booking = match self.api.verify_booking(reference).await {
            Ok(booking) => booking,
            Err(ClientError::Validation(msg)) => {
                warn!("Backend refused payment for {}: {}", reference, msg);
                self.set_phase(reference, BookingPhase::Failed(FailureReason::PaymentRejected))
                    .await;
                return Err(GatewayError::Rejected(msg).into());
            }
            Err(e) => {
                warn!("Verification of {} failed, still verifying: {}", reference, e);
                return Err(e);
            }
        };

        let confirmed = booking.payment_status == PaymentStatus::Success;
        let phase = if confirmed {
            BookingPhase::Confirmed
        } else {
            BookingPhase::Failed(FailureReason::PaymentRejected)
        };

        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(reference) {
            Some(tracked) => {
                if tracked.phase == BookingPhase::Confirmed {
                    // A concurrent verification already concluded.
                    return Ok(tracked.booking.clone());
                }
                if !tracked.booking.payment_status.can_advance_to(booking.payment_status) {
                    return Err(regression(reference, tracked.booking.payment_status, booking.payment_status));
                }
                tracked.booking = booking.clone();
                tracked.phase = phase;
            }
            None => {
                bookings.insert(
                    reference.to_string(),
                    TrackedBooking {
                        booking: booking.clone(),
                        phase,
                        authorization_url: None,
                        public_key: None,
                    },
                );
            }
        }
        drop(bookings);

        if confirmed {
            info!("Booking {} confirmed", reference);
            Ok(booking)
        } else {
            warn!("Booking {} not paid (status {:?})", reference, booking.payment_status);
            Err(rejected(reference))
        }
    }

    /// Cancel a confirmed booking owned by the current user.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<Booking> {
        let tracked = match self.find_by_id(booking_id).await {
            Some(tracked) => tracked,
            None => self.adopt(self.api.get_booking(booking_id).await?).await,
        };
        let reference = tracked.booking.reference.clone();

        if tracked.booking.student != self.user.id {
            warn!("{} tried to cancel booking {} owned by {}", self.user.id, booking_id, tracked.booking.student);
            return Err(ClientError::Auth("only the booking's student can cancel it".into()));
        }

        // Check and claim in one critical section so a second cancel sees `Cancelled`.
        {
            let mut bookings = self.bookings.write().await;
            let current = bookings
                .get_mut(&reference)
                .ok_or_else(|| ClientError::State(format!("booking {} is no longer tracked", booking_id)))?;

            if current.phase != BookingPhase::Confirmed {
                return Err(illegal("cancel", &reference, &current.phase));
            }
            if current.booking.payment_status != PaymentStatus::Success {
                return Err(illegal("cancel", &reference, &current.phase));
            }
            current.phase = BookingPhase::Cancelled;
        }

        match self.api.cancel_booking(booking_id).await {
            Ok(booking) => {
                info!("Booking {} cancelled", reference);
                if let Some(current) = self.bookings.write().await.get_mut(&reference) {
                    current.booking = booking.clone();
                }
                Ok(booking)
            }
            Err(e) => {
                warn!("Cancelling {} failed, still confirmed: {}", reference, e);
                self.set_phase(&reference, BookingPhase::Confirmed).await;
                Err(e)
            }
        }
    }

    /// Refresh a booking from `GET /bookings/:id`.
    pub async fn fetch_booking(&self, booking_id: &str) -> Result<TrackedBooking> {
        let booking = self.api.get_booking(booking_id).await?;

        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking.reference) {
            Some(tracked) => {
                if !tracked.booking.payment_status.can_advance_to(booking.payment_status) {
                    return Err(regression(
                        &booking.reference,
                        tracked.booking.payment_status,
                        booking.payment_status,
                    ));
                }
                if booking.status == BookingStatus::Cancelled && tracked.phase == BookingPhase::Confirmed {
                    tracked.phase = BookingPhase::Cancelled;
                }
                // Settled server-side: only verification may conclude it now.
                if booking.payment_status.is_terminal()
                    && matches!(tracked.phase, BookingPhase::Initiated | BookingPhase::AwaitingPayment)
                {
                    debug!("Booking {}: {} -> {}", booking.reference, tracked.phase, BookingPhase::Verifying);
                    tracked.phase = BookingPhase::Verifying;
                }
                tracked.booking = booking;
                Ok(tracked.clone())
            }
            None => {
                let tracked = TrackedBooking::adopted(booking);
                bookings.insert(tracked.booking.reference.clone(), tracked.clone());
                Ok(tracked)
            }
        }
    }

    async fn find_by_id(&self, booking_id: &str) -> Option<TrackedBooking> {
        self.bookings
            .read()
            .await
            .values()
            .find(|t| t.booking.id == booking_id)
            .cloned()
    }

    async fn adopt(&self, booking: Booking) -> TrackedBooking {
        let mut bookings = self.bookings.write().await;
        bookings
            .entry(booking.reference.clone())
            .or_insert_with(|| TrackedBooking::adopted(booking))
            .clone()
    }

    /// Record a checkout that did not complete, unless a refresh already
    /// moved the booking on to verification.
    async fn fail_checkout(&self, reference: &str, reason: FailureReason) {
        if let Some(tracked) = self.bookings.write().await.get_mut(reference) {
            if tracked.phase == BookingPhase::AwaitingPayment {
                tracked.phase = BookingPhase::Failed(reason);
            }
        }
    }

    async fn set_phase(&self, reference: &str, phase: BookingPhase) {
        if let Some(tracked) = self.bookings.write().await.get_mut(reference) {
            debug!("Booking {}: {} -> {}", reference, tracked.phase, phase);
            tracked.phase = phase;
        }
    }
}

fn illegal(action: &str, reference: &str, phase: &BookingPhase) -> ClientError {
    warn!("Cannot {} booking {} while {}", action, reference, phase);
    ClientError::State(format!("cannot {} booking {} while {}", action, reference, phase))
}

fn rejected(reference: &str) -> ClientError {
    GatewayError::Rejected(format!("payment for {} was not confirmed", reference)).into()
}

fn regression(reference: &str, from: PaymentStatus, to: PaymentStatus) -> ClientError {
    warn!("Ignoring snapshot of {}: payment status {:?} -> {:?}", reference, from, to);
    ClientError::State(format!(
        "payment status of {} cannot move from {:?} to {:?}",
        reference, from, to
    ))
}
