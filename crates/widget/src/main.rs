use std::io::Write;

use chatlet::chat::{Conversation, Role};
use chatlet::{ConfigSources, global};
use snafu::{OptionExt, ResultExt, Whatever, ensure_whatever, whatever};
use tokio::sync::watch;

const USAGE: &str = "usage: chatlet [--stream | --no-stream] <message>";

/// Terminal host for the widget.
///
/// Loads overrides from the config file and `CHATLET_*` variables, mounts the
/// global widget and prints the assistant's reply as it streams in.
#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Whatever> {
    tracing_subscriber::fmt::init();

    let mut stream = None;
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--stream" => stream = Some(true),
            "--no-stream" => stream = Some(false),
            _ => words.push(arg),
        }
    }
    let prompt = words.join(" ");
    ensure_whatever!(!prompt.trim().is_empty(), "{USAGE}");

    let mut patch = ConfigSources::standard()
        .load_patch()
        .whatever_context("failed to load widget config")?;
    if stream.is_some() {
        patch.streaming_enabled = stream;
    }

    let widget = global();
    widget
        .init(&patch)
        .whatever_context("failed to mount widget")?;
    if let Some(welcome) = widget.welcome_message() {
        println!("{welcome}");
    }
    widget.open();

    let updates = widget
        .subscribe_conversation()
        .whatever_context("widget is not mounted")?;
    let printer = tokio::spawn(print_reply(updates));

    println!("> {}", prompt.trim());
    let Some(outcome) = widget.send_message(&prompt).await else {
        printer.abort();
        whatever!("message was not sent");
    };
    printer.await.whatever_context("reply printer failed")?;

    tracing::debug!(outcome = ?outcome, "demo finished");
    Ok(())
}

/// Echoes the assistant message until the cycle settles.
async fn print_reply(mut updates: watch::Receiver<Conversation>) {
    let mut shown = String::new();
    while updates.changed().await.is_ok() {
        let (content, settled) = {
            let conversation = updates.borrow_and_update();
            let content = conversation
                .messages()
                .last()
                .filter(|message| message.role == Role::Assistant)
                .map(|message| message.content.clone())
                .unwrap_or_default();
            (content, !conversation.is_empty() && !conversation.is_streaming())
        };

        match content.strip_prefix(shown.as_str()) {
            Some(delta) => print!("{delta}"),
            None => print!("\n{content}"),
        }
        let _ = std::io::stdout().flush();
        shown = content;

        if settled {
            println!();
            break;
        }
    }
}
