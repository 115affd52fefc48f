//! One proxy and three backends on the in-memory hub.
//!
//! Every backend pushes its local names each second and the proxy
//! broadcasts the merged table each second. `hub` stops forwarding to
//! `creative` halfway through, so its view goes stale while the others
//! keep up. Run with `RUST_LOG=debug` to watch the frames.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use relaychat::prelude::*;

const BACKENDS: [(&str, &[(&str, Option<&str>)]); 3] = [
    ("lobby", &[("steve", Some("Steve the Brave")), ("alex", None)]),
    ("survival", &[("notch", Some("Notch"))]),
    ("creative", &[("jeb", Some("jeb_"))]),
];

fn local_names(entries: &'static [(&'static str, Option<&'static str>)]) -> NameTable {
    entries.iter().map(|&(k, v)| (k, v)).collect()
}

#[tokio::main]
async fn main() -> Result<(), RelaychatError> {
    relaychat::logging::init();

    let hub = Arc::new(MemoryHub::new());
    let proxy = ProxyMessageManager::new(
        Arc::clone(&hub),
        ProxyConfig {
            tick: TickConfig::with_period(Duration::from_secs(1)),
            ..ProxyConfig::default()
        },
    );
    let broadcast = proxy.spawn_broadcast();

    let mut backends = Vec::new();
    let mut pushes = Vec::new();
    for (label, entries) in BACKENDS {
        let link = hub.attach(label);
        proxy.set_player_count(link.id(), entries.len())?;
        let messenger = BackendMessenger::new(
            Arc::new(link.clone()),
            BackendConfig {
                push_interval: Duration::from_secs(1),
                ..BackendConfig::default()
            },
        );
        let table = Arc::new(Mutex::new(local_names(entries)));
        let source = Arc::clone(&table);
        pushes.push(messenger.spawn_push(move || {
            source.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }));
        backends.push((label, link, messenger, table));
    }

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    if let Some((_, link, _, _)) = backends.iter().find(|(label, ..)| *label == "creative") {
        hub.set_forwarding(link.id(), false);
        tracing::info!("creative stopped forwarding");
    }

    // A late joiner; only the servers still forwarding will learn about it.
    let (_, _, lobby, lobby_names) = &backends[0];
    let current = {
        let mut names = lobby_names.lock().unwrap_or_else(PoisonError::into_inner);
        names.insert("dinnerbone", Some("Dinnerbone".to_string()));
        names.clone()
    };
    lobby.update_names(&current).await?;

    let notice = proxy.send_message_to_all("Notice", &["restarting in 5 minutes"]).await?;
    tracing::info!(
        delivered = notice.delivered().count(),
        rejected = notice.rejected().count(),
        "notice sent"
    );

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    for (label, _, messenger, _) in &backends {
        let view = messenger.names().snapshot();
        let rendered: Vec<String> = view
            .iter()
            .map(|(key, name)| format!("{key}={}", name.unwrap_or(key)))
            .collect();
        println!("{label:>9}: {}", rendered.join(", "));
    }

    for push in pushes {
        push.stop().await;
    }
    let metrics = broadcast.stop().await;
    println!("broadcasts: {} (overruns {})", metrics.total_ticks, metrics.total_overruns);
    Ok(())
}
