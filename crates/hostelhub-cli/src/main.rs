mod checkout;

use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use hostelhub_client::{ClientConfig, Session, TrackedBooking};
use hostelhub_types::events::RealtimeEvent;

use checkout::TerminalCheckout;

const USAGE: &str = "usage:
  hostelhub book <hostel-id>
  hostelhub verify <reference>
  hostelhub booking <booking-id>
  hostelhub cancel <booking-id>
  hostelhub chat";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hostelhub=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = ClientConfig::from_env()?;
    let session = connect(&config).await?;

    let outcome = match command {
        "book" => book(&session, arg(&args, "hostel-id")?).await,
        "verify" => {
            let booking = session.bookings().verify_booking(arg(&args, "reference")?).await?;
            println!("Booking {} confirmed", booking.reference);
            Ok(())
        }
        "booking" => {
            let tracked = session.bookings().fetch_booking(arg(&args, "booking-id")?).await?;
            print_booking(&tracked);
            Ok(())
        }
        "cancel" => {
            let booking = session.bookings().cancel_booking(arg(&args, "booking-id")?).await?;
            println!("Booking {} cancelled", booking.reference);
            Ok(())
        }
        "chat" => chat(&session).await,
        other => {
            println!("{}", USAGE);
            Err(anyhow::anyhow!("unknown command '{}'", other))
        }
    };

    session.logout();
    outcome
}

fn arg<'a>(args: &'a [String], name: &str) -> anyhow::Result<&'a str> {
    args.get(1)
        .map(String::as_str)
        .with_context(|| format!("missing <{}>\n{}", name, USAGE))
}

async fn connect(config: &ClientConfig) -> anyhow::Result<Session> {
    let surface = Arc::new(TerminalCheckout::default());

    if let Ok(token) = std::env::var("HOSTELHUB_TOKEN") {
        return Ok(Session::resume(config, token, surface).await?);
    }

    let email = std::env::var("HOSTELHUB_EMAIL")
        .context("set HOSTELHUB_TOKEN, or HOSTELHUB_EMAIL and HOSTELHUB_PASSWORD")?;
    let password = std::env::var("HOSTELHUB_PASSWORD").context("HOSTELHUB_PASSWORD is not set")?;
    Ok(Session::login(config, &email, &password, surface).await?)
}

async fn book(session: &Session, hostel_id: &str) -> anyhow::Result<()> {
    let tracked = session.bookings().initiate_booking(hostel_id).await?;
    let reference = tracked.booking.reference.clone();
    print_booking(&tracked);

    match session.bookings().process_payment(&reference).await {
        Ok(booking) => {
            println!("Payment verified. Booking {} is confirmed.", booking.reference);
            Ok(())
        }
        Err(e) => {
            let phase = session.bookings().phase(&reference).await;
            warn!("Booking {} ended {}", reference, phase);
            bail!("booking {} is {}: {}", reference, phase, e)
        }
    }
}

fn print_booking(tracked: &TrackedBooking) {
    let b = &tracked.booking;
    println!("Booking {} ({})", b.id, b.reference);
    println!("  hostel:  {}", b.hostel);
    println!("  amount:  {} {:.2}", b.currency, b.amount);
    println!("  payment: {:?}", b.payment_status);
    println!("  status:  {:?} / {}", b.status, tracked.phase);
}

async fn chat(session: &Session) -> anyhow::Result<()> {
    let store = session.conversations();
    for c in store.refresh_conversations().await {
        println!(
            "{:<24} {:>3} unread  {}",
            c.name.as_deref().unwrap_or(&c.counterpart_id),
            c.unread_count,
            c.last_message
        );
    }
    if let Some(e) = store.last_error().await {
        warn!("Could not load conversations: {}", e);
    }
    println!("Type '@<user-id> <message>' to send, '/open <user-id>' to view a thread, '/quit' to leave.");

    let mut events = session.channel().subscribe();
    let me = session.user().id.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RealtimeEvent::NewMessage(m) if m.sender != me => {
                    println!("[{}] {}", m.sender, m.content);
                }
                RealtimeEvent::UserOnline { user_id } => info!("{} is online", user_id),
                RealtimeEvent::UserOffline { user_id } => info!("{} went offline", user_id),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        if let Some(user_id) = line.strip_prefix("/open ") {
            let user_id = user_id.trim();
            if let Err(e) = store.open_conversation(user_id).await {
                warn!("Could not load thread with {}: {}", user_id, e);
            }
            for entry in store.thread().await {
                println!("[{}] {}", entry.message.sender, entry.message.content);
            }
            continue;
        }

        let Some((to, content)) = line.strip_prefix('@').and_then(|rest| rest.split_once(' ')) else {
            println!("Type '@<user-id> <message>'");
            continue;
        };
        if let Err(e) = session.send_message(to, content.trim()).await {
            warn!("Message to {} not sent: {}", to, e);
        }
    }

    printer.abort();
    Ok(())
}
