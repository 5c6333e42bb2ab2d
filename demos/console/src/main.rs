//! Terminal chat against a Sanskara backend.
//!
//! Lines typed on stdin are sent as text; assistant replies stream to stdout.
//! Commands: `/history` loads older messages, `/reconnect` forces a fresh
//! socket, `/reset` starts the conversation over, `/quit` exits.
//!
//!   cargo run -p sanskara-example-console -- --user u1 --config client.toml
//!
//! `SANSKARA_API_BASE_URL` and friends override the config file.

use sanskara_client::{
    load_config, Coordinator, HistoryRequest, HttpHistoryClient, MessageKind, MessageStore, Role,
    WireMessage,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sanskara_client=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let user = parse_arg_string(&args, "--user").unwrap_or_else(|| "guest".to_string());
    let config_path = parse_arg_string(&args, "--config").map(PathBuf::from);

    let config = load_config(config_path.as_deref())?;
    tracing::info!("Backend: {} (socket {})", config.api_base_url, config.ws_url());

    let store = Arc::new(MessageStore::new(
        Arc::new(HttpHistoryClient::new(config.api_url())),
        config.history_page_size,
    ));
    let coordinator = Coordinator::new(config);
    coordinator.initialize_service(&user, None);

    let _traffic = {
        let store = store.clone();
        coordinator.subscribe(move |msg| render(&store, msg))?
    };

    coordinator.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/history" => {
                store.load_history(HistoryRequest::default()).await;
                let loaded = store.messages().iter().filter(|m| m.from_history).count();
                println!("[{} messages from history, more: {}]", loaded, store.has_more_history());
            }
            "/reconnect" => {
                if let Err(e) = coordinator.force_reconnect().await {
                    eprintln!("[reconnect failed: {e}]");
                }
            }
            "/reset" => {
                store.clear_messages();
                if let Err(e) = coordinator.reset_session().await {
                    eprintln!("[reset failed: {e}]");
                }
            }
            text => match coordinator.send_text(text) {
                Ok(()) => {
                    store.add_message(Role::User, text);
                }
                Err(e) => eprintln!("[not sent: {e}]"),
            },
        }
    }

    coordinator.disconnect();
    Ok(())
}

/// Feed one inbound message into the store and the terminal.
fn render(store: &MessageStore, msg: &WireMessage) {
    match msg.kind {
        MessageKind::SessionId => {
            store.set_session_id(msg.data_str("session_id").map(str::to_string));
        }
        MessageKind::Text => {
            if store.active_message().is_none() {
                store.start_streaming_message();
                print!("assistant> ");
            }
            let chunk = msg.data_str("text").unwrap_or_default();
            store.append_to_streaming_message(chunk);
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        MessageKind::TurnComplete | MessageKind::Interrupted => {
            if store.active_message().is_some() {
                store.end_streaming_message();
                println!();
            }
        }
        MessageKind::Ready => eprintln!("[connected]"),
        MessageKind::Reconnecting => eprintln!("[connection lost, retrying]"),
        MessageKind::Error => {
            eprintln!("[error: {}]", msg.error_cause().unwrap_or("unknown"));
        }
        _ => {}
    }
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
