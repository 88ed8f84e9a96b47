use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tracing::{debug, warn};

use hostelhub_client::{CheckoutCallbacks, CheckoutSurface, GatewayError, GatewayReceipt, PaystackSetup};

/// Checkout for a terminal: prints the hosted payment page and waits for the
/// user to say whether they paid. The backend still decides whether the
/// payment went through.
#[derive(Default)]
pub struct TerminalCheckout {
    http: reqwest::Client,
}

#[async_trait]
impl CheckoutSurface for TerminalCheckout {
    async fn load_script(&self, url: &str) -> Result<(), GatewayError> {
        // Nothing to inject here; only confirm the provider is reachable.
        let resp = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("Paystack unreachable: {}", e)))?;
        debug!("Paystack script {} -> {}", url, resp.status());
        Ok(())
    }

    fn open(&self, setup: PaystackSetup, callbacks: CheckoutCallbacks) {
        tokio::task::spawn_blocking(move || {
            let Some(url) = setup.authorization_url.as_deref() else {
                warn!("No authorization URL for {}", setup.reference);
                callbacks.fail("backend did not return a checkout URL");
                return;
            };

            println!();
            println!(
                "Pay {} {:.2} for booking {}:",
                setup.currency,
                setup.amount as f64 / 100.0,
                setup.reference
            );
            println!("  {}", url);
            print!("Completed the payment? [y/N] ");
            let _ = io::stdout().flush();

            let mut answer = String::new();
            if io::stdin().lock().read_line(&mut answer).is_err() {
                callbacks.close();
                return;
            }

            if matches!(answer.trim(), "y" | "Y" | "yes") {
                callbacks.success(GatewayReceipt {
                    reference: setup.reference,
                    trans: None,
                    status: "success".into(),
                    message: "confirmed in terminal".into(),
                });
            } else {
                callbacks.close();
            }
        });
    }
}
