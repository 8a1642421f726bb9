//! ayia-watch - print change notifications from an Ayia backend.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ayia_cli::Args;
use ayia_client::{password_hash, ConnectionManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ayia_watch=info,ayia_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let topics = args.topics.clone();
    let credentials = args
        .credentials()
        .map(|(user, password)| (user.to_string(), password_hash(password)));
    let subscribe = args.subscribe;

    let config = args.into_config();
    tracing::info!(config_url = %config.config_url, "configuration loaded");

    let manager = ConnectionManager::new(config).install()?;

    let channel = manager.change_channel();
    let mut subscriptions = Vec::with_capacity(topics.len());
    for topic in &topics {
        let subscription = channel.subscribe(topic.as_str(), |data, envelope| {
            println!("{} {}", envelope.topic, serde_json::to_string(data)?);
            Ok(())
        })?;
        subscriptions.push(subscription);
    }
    tracing::info!(channel = channel.name(), topics = ?topics, "listening");

    match credentials {
        Some((user, hash)) => {
            let user = manager.auth_password(&user, &hash).await?;
            tracing::info!(user = %user.user_name, "logged in");
        }
        None if subscribe => {
            let conn = manager.get_connection().await?;
            manager.subscribe_changes(&conn).await;
        }
        None => {
            manager.get_connection().await?;
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    manager.disconnect();
    Ok(())
}
