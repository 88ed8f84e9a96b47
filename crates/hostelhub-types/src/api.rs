use serde::{Deserialize, Serialize};

use crate::models::{AuthUser, Booking, Conversation, Message};

// One request/response pair per backend endpoint. Unexpected shapes fail
// deserialization here instead of leaking into callers.

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AuthUser,
}

/// `GET /auth/me`
#[derive(Debug, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: AuthUser,
}

// -- Bookings --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBookingRequest {
    pub hostel_id: String,
}

/// `POST /bookings/initiate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBookingResponse {
    pub booking: Booking,
    #[serde(default)]
    pub payment_authorization_url: Option<String>,
    #[serde(default)]
    pub paystack_public_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyBookingRequest {
    pub reference: String,
}

/// `POST /bookings/verify`, `PUT /bookings/:id/cancel`, `GET /bookings/:id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEnvelope {
    pub booking: Booking,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

// -- Errors --

/// Error body the backend attaches to non-2xx responses.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
