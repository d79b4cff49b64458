//! Demo bridge binary: joins the configured channels, bridges them, and
//! echoes the merged event stream to the log until told to leave.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use ironbridge::chat::{self, Channel as _, Client as _};
use ironbridge::{Bridge, ChannelError, ConfigError, Event, telegram};

#[derive(Debug, Parser)]
#[command(
    name = "ironbridge",
    about = "Bridge chat channels into one logical conversation"
)]
struct Args {
    /// The bot's Telegram token.
    #[arg(long, env = "TELEGRAM_TOKEN")]
    telegram_token: Option<String>,

    /// The Telegram group chat id to bridge (base-10).
    #[arg(long)]
    telegram_group: Option<String>,

    /// Public base URL for linking media shared on bridged channels.
    #[arg(long)]
    media_base_url: Option<Url>,
}

#[tokio::main]
async fn main() -> ironbridge::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut clients = Vec::new();
    let mut channels = Vec::new();

    if let (Some(token), Some(group)) = (&args.telegram_token, &args.telegram_group) {
        let client = telegram::Client::dial(token.clone()).await?;
        if let Some(base) = &args.media_base_url {
            client.set_media_base_url(base.clone());
        }
        let channel = client.join(group).await?;
        info!("joined {} on {}", channel.name(), channel.service_name());
        channels.push(channel);
        clients.push(client);
    }

    if channels.is_empty() {
        return Err(ConfigError::MissingRequired {
            key: "telegram_token".to_string(),
            hint: "configure at least one channel to bridge".to_string(),
        }
        .into());
    }

    let bridge = Bridge::new(channels);
    info!("bridge is up and running");
    chat::say(&bridge.handle(), "Hello, World!").await?;

    loop {
        match bridge.receive().await {
            Ok(event) => {
                info!("{event:?}");
                if let Event::Message(msg) = &event
                    && msg.text == "LEAVE"
                {
                    chat::say(&bridge.handle(), "Good bye!").await?;
                    break;
                }
            }
            Err(ChannelError::Closed) => break,
            Err(err) => {
                error!("receive failed: {err}");
                break;
            }
        }
    }

    if let Err(err) = bridge.close().await {
        error!("bridge closed with error: {err}");
    }
    for client in &clients {
        client.close().await?;
    }
    Ok(())
}
