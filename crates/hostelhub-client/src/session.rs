use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hostelhub_types::events::RealtimeEvent;
use hostelhub_types::models::{AuthUser, Message};

use crate::api::RestClient;
use crate::booking::BookingService;
use crate::config::ClientConfig;
use crate::conversation::ConversationStore;
use crate::error::Result;
use crate::payment::{CheckoutSurface, PaystackGateway};
use crate::realtime::{ChannelState, RealtimeChannel, Transport, WsTransport};

/// One logged-in user: REST client, booking state machine, conversation
/// cache and realtime channel, wired together.
pub struct Session {
    user: AuthUser,
    token: String,
    rest: RestClient,
    bookings: Arc<BookingService>,
    conversations: Arc<ConversationStore>,
    channel: RealtimeChannel,
    pump: JoinHandle<()>,
}

impl Session {
    pub async fn login(
        config: &ClientConfig,
        email: &str,
        password: &str,
        surface: Arc<dyn CheckoutSurface>,
    ) -> Result<Self> {
        let auth = RestClient::new(config, None)?.login(email, password).await?;
        info!("Logged in as {} ({:?})", auth.user.email, auth.user.role);
        Self::start(config, auth.token, auth.user, surface)
    }

    /// Start from a stored token, asking the backend who it belongs to.
    pub async fn resume(
        config: &ClientConfig,
        token: String,
        surface: Arc<dyn CheckoutSurface>,
    ) -> Result<Self> {
        let user = RestClient::new(config, Some(token.clone()))?.me().await?;
        info!("Resumed session for {}", user.email);
        Self::start(config, token, user, surface)
    }

    pub fn start(
        config: &ClientConfig,
        token: String,
        user: AuthUser,
        surface: Arc<dyn CheckoutSurface>,
    ) -> Result<Self> {
        Self::start_with_transport(config, token, user, surface, Arc::new(WsTransport))
    }

    pub fn start_with_transport(
        config: &ClientConfig,
        token: String,
        user: AuthUser,
        surface: Arc<dyn CheckoutSurface>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let rest = RestClient::new(config, Some(token.clone()))?;
        let api = Arc::new(rest.clone());
        let gateway = Arc::new(PaystackGateway::new(config, surface));

        let bookings = Arc::new(BookingService::new(
            api.clone(),
            gateway,
            user.clone(),
            config.currency.clone(),
        ));
        let conversations = Arc::new(ConversationStore::new(api, user.id.clone()));

        let channel = RealtimeChannel::connect(config, transport, token.clone(), user.id.clone());
        let pump = tokio::spawn(pump(
            conversations.clone(),
            channel.subscribe(),
            channel.watch_state(),
        ));

        Ok(Self {
            user,
            token,
            rest,
            bookings,
            conversations,
            channel,
            pump,
        })
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn bookings(&self) -> &BookingService {
        &self.bookings
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    /// Persist over REST, then relay over the realtime channel. A relay
    /// failure is logged only; the message is already stored.
    pub async fn send_message(&self, to: &str, content: &str) -> Result<Message> {
        let message = self.conversations.send_message(to, content).await?;
        if let Err(e) = self.channel.send_message(&message) {
            warn!("Realtime relay of {} failed: {}", message.id, e);
        }
        Ok(message)
    }

    pub fn logout(&self) {
        self.pump.abort();
        self.channel.close();
        info!("Logged out {}", self.user.email);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Feed realtime events into the store and backfill after every reconnect.
async fn pump(
    store: Arc<ConversationStore>,
    mut events: broadcast::Receiver<RealtimeEvent>,
    mut state: watch::Receiver<ChannelState>,
) {
    let mut connected_before = *state.borrow_and_update() == ChannelState::Connected;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RealtimeEvent::NewMessage(message)) => {
                    store.apply_inbound(message).await;
                }
                Ok(RealtimeEvent::UserOnline { user_id }) => store.set_presence(&user_id, true).await,
                Ok(RealtimeEvent::UserOffline { user_id }) => store.set_presence(&user_id, false).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Skipped {} realtime events, resyncing", n);
                    backfill(&store).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *state.borrow_and_update();
                if now == ChannelState::Connected {
                    if connected_before {
                        info!("Realtime reconnected, backfilling");
                        backfill(&store).await;
                    }
                    connected_before = true;
                }
            }
        }
    }
}

async fn backfill(store: &ConversationStore) {
    store.refresh_conversations().await;
    if let Some(open) = store.open_counterpart().await {
        if let Err(e) = store.open_conversation(&open).await {
            warn!("Reloading thread with {} failed: {}", open, e);
        }
    }
}
