use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// -- Identity --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Owner,
    Admin,
}

/// The logged-in user as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub role: Role,
}

// -- Bookings --

/// Payment status only moves forward: pending -> processing -> success | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl PaymentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Success | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether a record in `self` may be overwritten with `next`.
    /// Re-applying the same status is allowed so refreshes stay no-ops.
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        self == next || (!self.is_terminal() && next.rank() > self.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(alias = "_id")]
    pub id: String,
    pub reference: String,
    #[serde(deserialize_with = "ref_id")]
    pub hostel: String,
    #[serde(deserialize_with = "ref_id")]
    pub student: String,
    /// Major currency units (e.g. naira, not kobo).
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "NGN".into()
}

// -- Messaging --

/// One entry per counterpart, ordered most-recently-active first by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "userId", alias = "_id")]
    pub counterpart_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    pub fn new(counterpart_id: impl Into<String>) -> Self {
        Self {
            counterpart_id: counterpart_id.into(),
            name: None,
            last_message: String::new(),
            last_message_time: None,
            unread_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(deserialize_with = "ref_id")]
    pub sender: String,
    #[serde(alias = "receiver", deserialize_with = "ref_id")]
    pub recipient: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// The other participant, seen from `me`.
    pub fn counterpart(&self, me: &str) -> &str {
        if self.sender == me { &self.recipient } else { &self.sender }
    }
}

/// Accepts either a bare id or a populated document carrying `_id`/`id`.
fn ref_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RefRepr {
        Id(String),
        Doc {
            #[serde(alias = "_id")]
            id: String,
        },
    }

    Ok(match RefRepr::deserialize(deserializer)? {
        RefRepr::Id(id) => id,
        RefRepr::Doc { id } => id,
    })
}
