use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, oneshot};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, GatewayError};

/// Everything the gateway needs to charge one booking.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentData {
    pub email: String,
    /// Minor currency units (kobo for NGN).
    pub amount_minor: u64,
    pub reference: String,
    pub currency: String,
    /// Key sent by the backend with the booking; falls back to config when absent.
    pub public_key: Option<String>,
    pub authorization_url: Option<String>,
}

/// Receipt handed back by the provider's success callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReceipt {
    pub reference: String,
    #[serde(default)]
    pub trans: Option<String>,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Convert a major-unit amount (e.g. 1500.50 NGN) into minor units (150050 kobo).
pub fn to_minor_units(amount: f64) -> Result<u64, ClientError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ClientError::Validation(format!("invalid amount {}", amount)));
    }
    Ok((amount * 100.0).round() as u64)
}

/// A hosted checkout. One `open` is one checkout attempt; there is no retry.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn open(&self, payment: PaymentData) -> Result<GatewayReceipt, GatewayError>;
}

/// Options the Paystack inline widget is set up with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaystackSetup {
    pub key: String,
    pub email: String,
    pub amount: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub currency: String,
    #[serde(skip)]
    pub authorization_url: Option<String>,
}

#[derive(Debug)]
enum CheckoutOutcome {
    Completed(GatewayReceipt),
    Closed,
    Failed(String),
}

/// Single-shot callbacks for one checkout. Dropping them without calling
/// any method counts as the user closing the checkout.
#[derive(Debug)]
pub struct CheckoutCallbacks {
    tx: oneshot::Sender<CheckoutOutcome>,
}

impl CheckoutCallbacks {
    pub fn success(self, receipt: GatewayReceipt) {
        let _ = self.tx.send(CheckoutOutcome::Completed(receipt));
    }

    pub fn close(self) {
        let _ = self.tx.send(CheckoutOutcome::Closed);
    }

    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(CheckoutOutcome::Failed(message.into()));
    }
}

/// Host-side UI that actually shows the checkout (browser, webview, terminal).
#[async_trait]
pub trait CheckoutSurface: Send + Sync {
    /// Make the provider's inline script available. Called at most once per gateway
    /// unless it fails.
    async fn load_script(&self, url: &str) -> Result<(), GatewayError>;

    /// Display the checkout and eventually resolve `callbacks`.
    fn open(&self, setup: PaystackSetup, callbacks: CheckoutCallbacks);
}

pub struct PaystackGateway {
    surface: Arc<dyn CheckoutSurface>,
    script_url: String,
    default_key: String,
    script: OnceCell<()>,
}

impl PaystackGateway {
    pub fn new(config: &ClientConfig, surface: Arc<dyn CheckoutSurface>) -> Self {
        Self {
            surface,
            script_url: config.paystack_script_url.clone(),
            default_key: config.paystack_public_key.clone(),
            script: OnceCell::new(),
        }
    }

    async fn ensure_script(&self) -> Result<(), GatewayError> {
        self.script
            .get_or_try_init(|| async {
                info!("Loading Paystack checkout script from {}", self.script_url);
                self.surface.load_script(&self.script_url).await
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn open(&self, payment: PaymentData) -> Result<GatewayReceipt, GatewayError> {
        self.ensure_script().await?;

        let key = payment
            .public_key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.default_key.clone());
        if key.is_empty() {
            return Err(GatewayError::Provider("no Paystack public key configured".into()));
        }

        let setup = PaystackSetup {
            key,
            email: payment.email,
            amount: payment.amount_minor,
            reference: payment.reference.clone(),
            currency: payment.currency,
            authorization_url: payment.authorization_url,
        };

        let (tx, rx) = oneshot::channel();
        debug!("Opening checkout for {}", payment.reference);
        self.surface.open(setup, CheckoutCallbacks { tx });

        match rx.await {
            Ok(CheckoutOutcome::Completed(receipt)) => {
                if receipt.reference != payment.reference {
                    warn!(
                        "Checkout returned reference {} for {}",
                        receipt.reference, payment.reference
                    );
                    return Err(GatewayError::Provider("checkout returned a different reference".into()));
                }
                Ok(receipt)
            }
            Ok(CheckoutOutcome::Failed(message)) => Err(GatewayError::Provider(message)),
            // Closed explicitly, or the surface dropped the callbacks.
            Ok(CheckoutOutcome::Closed) | Err(_) => Err(GatewayError::UserCancelled),
        }
    }
}
