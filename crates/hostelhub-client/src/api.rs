use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use hostelhub_types::api::{
    BookingEnvelope, ConversationsResponse, ErrorBody, InitiateBookingRequest,
    InitiateBookingResponse, LoginRequest, LoginResponse, MessageEnvelope, MessagesResponse,
    SendMessageRequest, UserEnvelope, VerifyBookingRequest,
};
use hostelhub_types::models::{AuthUser, Booking, Conversation, Message};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Booking endpoints the state machine drives.
#[async_trait]
pub trait BookingApi: Send + Sync {
    async fn initiate_booking(&self, hostel_id: &str) -> Result<InitiateBookingResponse>;
    /// Safe to call repeatedly for the same reference.
    async fn verify_booking(&self, reference: &str) -> Result<Booking>;
    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking>;
    async fn get_booking(&self, booking_id: &str) -> Result<Booking>;
}

/// Messaging endpoints the conversation store reads and writes.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn send_message(&self, to: &str, content: &str) -> Result<Message>;
    async fn conversations(&self) -> Result<Vec<Conversation>>;
    async fn messages_with(&self, counterpart: &str) -> Result<Vec<Message>>;
}

/// HTTP adapter for the HostelHub backend.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(config: &ClientConfig, token: Option<String>) -> Result<Self> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Same connection pool, different bearer token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.into()),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let req = self.request(Method::POST, "/auth/login").json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        });
        self.send(req).await
    }

    /// Identity behind the current token.
    pub async fn me(&self) -> Result<AuthUser> {
        let envelope: UserEnvelope = self.send(self.request(Method::GET, "/auth/me")).await?;
        Ok(envelope.user)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        debug!("{} {}", status.as_u16(), resp.url().path());

        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body: ErrorBody = resp.json().await.unwrap_or_default();
        Err(error_for_status(status, body.message))
    }
}

fn error_for_status(status: StatusCode, message: String) -> ClientError {
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(message),
        s if s.is_client_error() => ClientError::Validation(message),
        s => ClientError::Network(format!("server returned {}: {}", s.as_u16(), message)),
    }
}

#[async_trait]
impl BookingApi for RestClient {
    async fn initiate_booking(&self, hostel_id: &str) -> Result<InitiateBookingResponse> {
        let req = self
            .request(Method::POST, "/bookings/initiate")
            .json(&InitiateBookingRequest {
                hostel_id: hostel_id.to_string(),
            });
        self.send(req).await
    }

    async fn verify_booking(&self, reference: &str) -> Result<Booking> {
        let req = self
            .request(Method::POST, "/bookings/verify")
            .json(&VerifyBookingRequest {
                reference: reference.to_string(),
            });
        let envelope: BookingEnvelope = self.send(req).await?;
        Ok(envelope.booking)
    }

    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking> {
        let req = self.request(Method::PUT, &format!("/bookings/{}/cancel", booking_id));
        let envelope: BookingEnvelope = self.send(req).await?;
        Ok(envelope.booking)
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Booking> {
        let req = self.request(Method::GET, &format!("/bookings/{}", booking_id));
        let envelope: BookingEnvelope = self.send(req).await?;
        Ok(envelope.booking)
    }
}

#[async_trait]
impl MessagingApi for RestClient {
    async fn send_message(&self, to: &str, content: &str) -> Result<Message> {
        let req = self.request(Method::POST, "/messages").json(&SendMessageRequest {
            to: to.to_string(),
            content: content.to_string(),
        });
        let envelope: MessageEnvelope = self.send(req).await?;
        Ok(envelope.message)
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        let req = self.request(Method::GET, "/messages/conversations");
        let resp: ConversationsResponse = self.send(req).await?;
        Ok(resp.conversations)
    }

    async fn messages_with(&self, counterpart: &str) -> Result<Vec<Message>> {
        let req = self.request(Method::GET, &format!("/messages/{}", counterpart));
        let resp: MessagesResponse = self.send(req).await?;
        Ok(resp.messages)
    }
}
