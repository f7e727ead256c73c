//! Example: Tune a station and watch the engine events on the console
//!
//! Uses a logging voice backend that counts the bytes it would have played,
//! so the whole engine can be exercised without a chat platform.
//!
//! Run with: cargo run -p pmobroadcast --example console_listener -- <catalog-url> <key>

use std::sync::Arc;

use pmobroadcast::{
    AudioSource, BroadcastManager, ChannelTarget, PlaybackEvent, PlaybackEvents, VoiceConnection,
    VoiceGateway,
};
use pmostations::{HttpStationCatalog, StationResolver};

struct ConsoleConnection {
    channel: ChannelTarget,
}

#[async_trait::async_trait]
impl VoiceConnection for ConsoleConnection {
    async fn play(&self, source: AudioSource, bitrate: u32) -> pmobroadcast::Result<PlaybackEvents> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        match source {
            AudioSource::Feed(mut feed) => {
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    let mut total = 0usize;
                    let mut started = false;
                    while let Ok(chunk) = feed.recv().await {
                        if !started {
                            started = true;
                            if tx.send(PlaybackEvent::Speaking(true)).await.is_err() {
                                return;
                            }
                        }
                        total += chunk.len();
                        if total % (64 * 1024) < chunk.len() {
                            println!("[{}] {} KiB received at {} kbps", channel, total / 1024, bitrate);
                        }
                    }
                    let _ = tx.send(PlaybackEvent::Ended).await;
                });
            }
            AudioSource::Clip(url) => {
                println!("[{}] would play clip {}", self.channel, url);
                tokio::spawn(async move {
                    let _ = tx.send(PlaybackEvent::Ended).await;
                });
            }
        }
        Ok(rx)
    }

    async fn set_volume(&self, volume: f32) -> pmobroadcast::Result<()> {
        println!("[{}] volume set to {:.0}%", self.channel, volume * 100.0);
        Ok(())
    }

    async fn leave(&self) -> pmobroadcast::Result<()> {
        println!("[{}] left the channel", self.channel);
        Ok(())
    }
}

struct ConsoleGateway;

#[async_trait::async_trait]
impl VoiceGateway for ConsoleGateway {
    async fn join(&self, target: &ChannelTarget) -> pmobroadcast::Result<Arc<dyn VoiceConnection>> {
        println!("[{}] joined the channel", target);
        Ok(Arc::new(ConsoleConnection {
            channel: target.clone(),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "https://cdn.homer.radio".to_string());
    let key = args.next().unwrap_or_else(|| "87.6".to_string());

    let catalog = HttpStationCatalog::builder().base_url(base_url).build()?;
    let resolver = StationResolver::new(Arc::new(catalog));
    let manager = BroadcastManager::builder(resolver, Arc::new(ConsoleGateway)).build();

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            println!("event: {:?}", envelope.event);
        }
    });

    let session = manager
        .tune(&key, ChannelTarget::new("console", "speakers"))
        .await?;
    println!("Tuned {} as session {}; listening for 30 s...\n", key, session.session_id);

    tokio::time::sleep(std::time::Duration::from_secs(30)).await;

    manager.detach(&session).await;
    Ok(())
}
