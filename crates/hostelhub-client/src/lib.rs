//! HostelHub client core.
//!
//! Headless building blocks for a HostelHub front-end:
//! - Booking lifecycle state machine with Paystack checkout and server verification
//! - Conversation cache reconciling REST history, optimistic sends and realtime pushes
//! - Realtime channel with join-on-connect and bounded reconnects
//! - REST adapter mapping backend statuses onto typed errors
//!
//! ```
//! let config = hostelhub_client::ClientConfig::default();
//! assert_eq!(config.currency, "NGN");
//! assert_eq!(hostelhub_client::to_minor_units(1500.5).unwrap(), 150_050);
//! ```

pub mod api;
pub mod booking;
pub mod config;
pub mod conversation;
pub mod error;
pub mod payment;
pub mod realtime;
pub mod session;

pub use api::{BookingApi, MessagingApi, RestClient};
pub use booking::{BookingPhase, BookingService, FailureReason, TrackedBooking};
pub use config::ClientConfig;
pub use conversation::{ConversationStore, Delivery, ThreadEntry};
pub use error::{ClientError, GatewayError, Result};
pub use payment::{
    CheckoutCallbacks, CheckoutSurface, GatewayReceipt, PaymentData, PaymentGateway,
    PaystackGateway, PaystackSetup, to_minor_units,
};
pub use realtime::{ChannelState, Connection, RealtimeChannel, Transport, WsTransport};
pub use session::Session;
