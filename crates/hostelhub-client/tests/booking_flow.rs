//! Booking lifecycle through the Paystack adapter with a scripted checkout.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use hostelhub_client::{
    BookingApi, BookingPhase, BookingService, CheckoutCallbacks, CheckoutSurface, ClientConfig,
    ClientError, FailureReason, GatewayError, GatewayReceipt, PaystackGateway, PaystackSetup,
    Result,
};
use hostelhub_types::api::InitiateBookingResponse;
use hostelhub_types::models::{AuthUser, Booking, BookingStatus, PaymentStatus, Role};

/// Backend with one hostel and a room counter.
struct Backend {
    rooms: AtomicUsize,
    booking: Mutex<Option<Booking>>,
    verify_calls: AtomicUsize,
    verify_offline: AtomicBool,
}

impl Backend {
    fn with_rooms(rooms: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: AtomicUsize::new(rooms),
            booking: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
            verify_offline: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BookingApi for Backend {
    async fn initiate_booking(&self, hostel_id: &str) -> Result<InitiateBookingResponse> {
        if self.rooms.load(Ordering::SeqCst) == 0 {
            return Err(ClientError::Validation("No rooms available".into()));
        }
        let booking = Booking {
            id: "b1".into(),
            reference: "HH-1700000000-b1".into(),
            hostel: hostel_id.into(),
            student: "u1".into(),
            amount: 150_000.0,
            currency: "NGN".into(),
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        };
        *self.booking.lock().unwrap() = Some(booking.clone());
        Ok(InitiateBookingResponse {
            booking,
            payment_authorization_url: Some("https://checkout.paystack.com/xyz".into()),
            paystack_public_key: Some("pk_test_backend".into()),
        })
    }

    async fn verify_booking(&self, reference: &str) -> Result<Booking> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.verify_offline.load(Ordering::SeqCst) {
            return Err(ClientError::Network("connection reset by peer".into()));
        }
        let mut slot = self.booking.lock().unwrap();
        let booking = slot
            .as_mut()
            .filter(|b| b.reference == reference)
            .ok_or_else(|| ClientError::Validation("Booking not found".into()))?;
        booking.payment_status = PaymentStatus::Success;
        booking.status = BookingStatus::Confirmed;
        self.rooms.fetch_sub(1, Ordering::SeqCst);
        Ok(booking.clone())
    }

    async fn cancel_booking(&self, _booking_id: &str) -> Result<Booking> {
        let mut slot = self.booking.lock().unwrap();
        let booking = slot
            .as_mut()
            .ok_or_else(|| ClientError::Validation("Booking not found".into()))?;
        booking.status = BookingStatus::Cancelled;
        self.rooms.fetch_add(1, Ordering::SeqCst);
        Ok(booking.clone())
    }

    async fn get_booking(&self, _booking_id: &str) -> Result<Booking> {
        self.booking
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::Validation("Booking not found".into()))
    }
}

/// Checkout that either pays or is closed by the user.
struct ScriptedCheckout {
    pay: bool,
    opened: Mutex<Vec<PaystackSetup>>,
}

impl ScriptedCheckout {
    fn new(pay: bool) -> Arc<Self> {
        Arc::new(Self {
            pay,
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CheckoutSurface for ScriptedCheckout {
    async fn load_script(&self, _url: &str) -> std::result::Result<(), GatewayError> {
        Ok(())
    }

    fn open(&self, setup: PaystackSetup, callbacks: CheckoutCallbacks) {
        let reference = setup.reference.clone();
        self.opened.lock().unwrap().push(setup);
        if self.pay {
            callbacks.success(GatewayReceipt {
                reference,
                trans: Some("4099260516".into()),
                status: "success".into(),
                message: "Approved".into(),
            });
        } else {
            callbacks.close();
        }
    }
}

fn student() -> AuthUser {
    AuthUser {
        id: "u1".into(),
        name: "Ada".into(),
        email: "ada@uni.edu.ng".into(),
        role: Role::Student,
    }
}

fn service(backend: Arc<Backend>, checkout: Arc<ScriptedCheckout>) -> BookingService {
    let gateway = Arc::new(PaystackGateway::new(&ClientConfig::default(), checkout));
    BookingService::new(backend, gateway, student(), "NGN")
}

#[tokio::test]
async fn no_rooms_is_a_validation_error() {
    let backend = Backend::with_rooms(0);
    let svc = service(backend, ScriptedCheckout::new(true));

    let err = svc.initiate_booking("hostel-1").await.unwrap_err();
    assert_eq!(err, ClientError::Validation("No rooms available".into()));
    assert!(svc.bookings().await.is_empty());
}

#[tokio::test]
async fn paid_checkout_is_confirmed_by_the_backend() {
    let backend = Backend::with_rooms(3);
    let checkout = ScriptedCheckout::new(true);
    let svc = service(backend.clone(), checkout.clone());

    let tracked = svc.initiate_booking("hostel-1").await.unwrap();
    assert_eq!(tracked.phase, BookingPhase::Initiated);
    let reference = tracked.booking.reference;

    let booking = svc.process_payment(&reference).await.unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Success);
    assert_eq!(svc.phase(&reference).await, BookingPhase::Confirmed);
    assert_eq!(backend.rooms.load(Ordering::SeqCst), 2);

    let opened = checkout.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].amount, 15_000_000);
    assert_eq!(opened[0].key, "pk_test_backend");
    assert_eq!(opened[0].currency, "NGN");
}

#[tokio::test]
async fn closing_the_checkout_fails_without_verifying() {
    let backend = Backend::with_rooms(3);
    let svc = service(backend.clone(), ScriptedCheckout::new(false));

    let reference = svc.initiate_booking("hostel-1").await.unwrap().booking.reference;
    let err = svc.process_payment(&reference).await.unwrap_err();

    assert_eq!(err, ClientError::Gateway(GatewayError::UserCancelled));
    assert_eq!(
        svc.phase(&reference).await,
        BookingPhase::Failed(FailureReason::UserCancelled)
    );
    assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.rooms.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn network_failure_during_verify_can_be_retried() {
    let backend = Backend::with_rooms(1);
    backend.verify_offline.store(true, Ordering::SeqCst);
    let svc = service(backend.clone(), ScriptedCheckout::new(true));

    let reference = svc.initiate_booking("hostel-1").await.unwrap().booking.reference;
    let err = svc.process_payment(&reference).await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
    assert_eq!(svc.phase(&reference).await, BookingPhase::Verifying);

    backend.verify_offline.store(false, Ordering::SeqCst);
    svc.verify_booking(&reference).await.unwrap();
    assert_eq!(svc.phase(&reference).await, BookingPhase::Confirmed);
    assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_payment_attempts_are_exclusive() {
    let backend = Backend::with_rooms(3);
    let svc = service(backend.clone(), ScriptedCheckout::new(true));
    let reference = svc.initiate_booking("hostel-1").await.unwrap().booking.reference;

    let (a, b) = tokio::join!(svc.process_payment(&reference), svc.process_payment(&reference));

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(r, Err(ClientError::State(_)))));
    assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn confirmed_booking_can_be_cancelled_once() {
    let backend = Backend::with_rooms(1);
    let svc = service(backend.clone(), ScriptedCheckout::new(true));

    let tracked = svc.initiate_booking("hostel-1").await.unwrap();
    svc.process_payment(&tracked.booking.reference).await.unwrap();

    let cancelled = svc.cancel_booking(&tracked.booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(svc.phase(&tracked.booking.reference).await, BookingPhase::Cancelled);
    assert_eq!(backend.rooms.load(Ordering::SeqCst), 1);

    assert!(matches!(
        svc.cancel_booking(&tracked.booking.id).await,
        Err(ClientError::State(_))
    ));
}
