//! Chat command implementation.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::client::{Backend, BackendState, ChannelSink, ClientEvent};
use parley_core::model::Identity;

use super::ChatArgs;
use crate::ui::{format_message, format_peer, format_size};

const HELP: &str = "\
  /name NAME          change your display name
  /msg PEER TEXT      send a private message
  /share PATH         offer a file to everyone
  /get PEER FILE      download a file a peer shared
  /who                list who is online
  /quit               leave";

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Text(String),
    Name(String),
    Private { peer: String, text: String },
    Share(PathBuf),
    Get { peer: String, file: String },
    Who,
    Help,
    Quit,
    Usage(&'static str),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let (verb, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(v, r)| (v, r.trim()));

    match verb {
        "name" if !rest.is_empty() => Input::Name(rest.to_string()),
        "name" => Input::Usage("/name NAME"),
        "msg" => match rest.split_once(char::is_whitespace) {
            Some((peer, text)) if !text.trim().is_empty() => Input::Private {
                peer: peer.to_string(),
                text: text.trim().to_string(),
            },
            _ => Input::Usage("/msg PEER TEXT"),
        },
        "share" if !rest.is_empty() => Input::Share(PathBuf::from(rest)),
        "share" => Input::Usage("/share PATH"),
        "get" => match rest.split_once(char::is_whitespace) {
            Some((peer, file)) if !file.trim().is_empty() => Input::Get {
                peer: peer.to_string(),
                file: file.trim().to_string(),
            },
            _ => Input::Usage("/get PEER FILE"),
        },
        "who" => Input::Who,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Help,
    }
}

/// Find a peer by display name or id prefix.
fn find_peer(roster: &HashMap<String, Identity>, needle: &str) -> Result<Identity, String> {
    if let Some(peer) = roster.get(needle) {
        return Ok(peer.clone());
    }

    let by_name: Vec<&Identity> = roster
        .values()
        .filter(|p| p.name().eq_ignore_ascii_case(needle))
        .collect();
    if let [peer] = by_name.as_slice() {
        return Ok((*peer).clone());
    }

    let by_prefix: Vec<&Identity> = roster
        .values()
        .filter(|p| p.id().starts_with(needle))
        .collect();
    match by_prefix.as_slice() {
        [peer] => Ok((*peer).clone()),
        [] if by_name.is_empty() => Err(format!("nobody called '{needle}' is online")),
        _ => Err(format!("'{needle}' matches more than one peer")),
    }
}

/// Run the chat command.
pub async fn run(args: ChatArgs) -> Result<()> {
    let global_config = super::load_config();
    global_config.validate()?;

    let mut config = global_config.client_config();
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(name) = args.name {
        config.display_name = Some(name);
    }
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }

    println!();
    println!("Parley v{}", parley_core::VERSION);
    println!("{}", "-".repeat(37));
    println!("  Connecting to {}...", config.server);
    println!("  Type /help for commands");
    println!();

    let backend = Backend::new(config);
    let (sink, mut events) = ChannelSink::new();
    backend.bind_sink(sink);
    backend.start();

    let mut state = backend.subscribe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&backend, parse_input(&line)).await {
                    break;
                }
            }

            Some(event) = events.recv() => print_event(&backend, &event),

            changed = state.changed() => {
                let current = *state.borrow();
                if changed.is_err() || current == BackendState::Stopped {
                    println!("  Disconnected from relay.");
                    break;
                }
                if current == BackendState::Online {
                    if let Some(me) = backend.identity() {
                        println!("  Connected as {}", format_peer(&me));
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    backend.stop();
    backend.wait().await;
    Ok(())
}

/// Act on one line of input. Returns `false` when the user wants to leave.
async fn handle_input(backend: &Backend, input: Input) -> bool {
    match input {
        Input::Empty => {}
        Input::Text(text) => {
            backend.send_text(text);
        }
        Input::Name(name) => backend.change_name(name, true),
        Input::Private { peer, text } => match find_peer(&backend.roster(), &peer) {
            Ok(peer) => {
                backend.send_text_to(text, vec![peer]);
            }
            Err(e) => println!("  {e}"),
        },
        Input::Share(path) => match backend.share_file(&path, Vec::new()).await {
            Ok(_) => println!("  Sharing {}", path.display()),
            Err(e) => println!("  Cannot share {}: {}", path.display(), e),
        },
        Input::Get { peer, file } => match find_peer(&backend.roster(), &peer) {
            Ok(owner) => match backend.request_file_from(&owner, &file, None).await {
                Ok(true) => println!("  Requested {} from {}", file, format_peer(&owner)),
                Ok(false) => println!("  {file} is already downloading"),
                Err(e) => println!("  Cannot download {file}: {e}"),
            },
            Err(e) => println!("  {e}"),
        },
        Input::Who => {
            let me = backend.identity();
            let mut peers: Vec<Identity> = backend.roster().into_values().collect();
            peers.sort_by(|a, b| a.label().cmp(b.label()));
            println!("  {} online:", peers.len());
            for peer in peers {
                let marker = if Some(&peer) == me.as_ref() { " (you)" } else { "" };
                println!("    {}{}", format_peer(&peer), marker);
            }
        }
        Input::Help => println!("{HELP}"),
        Input::Usage(usage) => println!("  Usage: {usage}"),
        Input::Quit => return false,
    }
    true
}

fn print_event(backend: &Backend, event: &ClientEvent) {
    match event {
        ClientEvent::MessageReceived(message) => println!("{}", format_message(message)),
        ClientEvent::RosterChanged(roster) => {
            println!("  {} online", roster.len());
        }
        ClientEvent::PeerAdded(peer) => {
            if backend.identity().as_ref() != Some(peer) {
                println!("  * {} is here", format_peer(peer));
            }
        }
        ClientEvent::PeerRemoved(peer) => println!("  * {} left", format_peer(peer)),
        ClientEvent::TransferComplete { key, bytes } => {
            println!("  Downloaded {} ({})", key.file_name, format_size(*bytes));
        }
    }
}
