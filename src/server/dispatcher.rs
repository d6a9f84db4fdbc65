//! Per-connection dispatcher
//!
//! One dispatcher task owns the read half of each accepted connection. The
//! write half belongs to a separate writer task fed by the session's
//! outbound queue, so replies, fan-out copies, and file payloads are never
//! interleaved mid-frame.
//!
//! Connection lifecycle: authenticate on the first frame, register the
//! session (evicting any previous login under the same name), replay chat
//! history, drain the offline mailbox, then loop decoding commands until
//! the client quits, the connection drops, or the idle deadline passes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::format_file_size;
use crate::protocol::command::{Command, FileScope};
use crate::protocol::frame::FrameReader;
use crate::server::mailbox::UNREAD_MARKER;
use crate::server::relay_server::ServerContext;
use crate::server::session::{run_writer, Session};

/// Reply sent to acknowledge `@@quit`.
const EXIT_ACK: &str = "##exit";

pub async fn handle_connection(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Dropping connection without peer address: {}", e);
            return;
        }
    };
    debug!("Connection from {}", addr);

    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(run_writer(rx, write_half));
    let mut reader = FrameReader::with_max(read_half, ctx.config.max_frame_size);

    // 0 disables the idle deadline.
    let idle = match ctx.config.idle_timeout_secs {
        0 => Duration::from_secs(86_400 * 365),
        secs => Duration::from_secs(secs),
    };

    // Authentication: the first frame must be `username,password`.
    let session = match timeout(idle, reader.read_frame()).await {
        Ok(Ok(Some(line))) => {
            let (username, password) = match line.split_once(',') {
                Some((u, p)) if !u.is_empty() => (u.to_string(), p.to_string()),
                _ => (String::new(), String::new()),
            };
            if username.is_empty() || !ctx.users.verify(&username, &password) {
                info!("Login failed for [{}] from {}", username, addr);
                ctx.event_log
                    .append(&format!("login failed: user[{}] from {}", username, addr))
                    .await;
                let _ = tx.send(crate::server::session::Outbound::Text("fail".into()));
                let _ = tx.send(crate::server::session::Outbound::Close);
                let _ = writer_task.await;
                return;
            }
            Arc::new(Session::new(username, addr, tx))
        }
        _ => {
            debug!("Connection {} closed before authenticating", addr);
            drop(tx);
            let _ = writer_task.await;
            return;
        }
    };

    session.send("success");
    let username = session.username().to_string();
    info!("Login ok: [{}] from {}", username, addr);
    ctx.event_log
        .append(&format!("login ok: user[{}] from {}", username, addr))
        .await;

    // A second login under the same name evicts the first session.
    if let Some(displaced) = ctx.registry.register(Arc::clone(&session)).await {
        displaced.send("signed in from another location; this session is closing");
        displaced.close();
    }
    ctx.groups.set_online_all(&username, true).await;

    // History, then queued offline messages, then live traffic.
    for line in ctx.chat_log.replay(&username).await {
        session.send(format!("[history] {}", line));
    }
    let queued = ctx.mailbox.drain(&username).await;
    if !queued.is_empty() {
        session.send(UNREAD_MARKER);
        for line in queued {
            session.send(line);
        }
    }
    ctx.delivery
        .broadcast(&format!("{} joined the chat room", username))
        .await;

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            result = timeout(idle, reader.read_frame()) => match result {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!("Read error from [{}]: {}", username, e);
                    break;
                }
                Err(_) => {
                    info!("Idle deadline passed for [{}]", username);
                    break;
                }
            },
        };

        match Command::parse(&frame) {
            Command::Exit => break,
            Command::Quit => {
                session.send(EXIT_ACK);
                break;
            }
            Command::ListOnline => {
                let names = ctx.registry.online_usernames().await;
                session.send(format!("online users: {}", names.join(", ")));
            }
            Command::ListAllUsers => {
                let names = ctx.users.usernames();
                session.send(format!("all users: {}", names.join(", ")));
            }
            Command::ToggleAnonymous => {
                if session.toggle_anonymous() {
                    session.send(format!(
                        "anonymous mode enabled; you appear as {}",
                        session.display_name()
                    ));
                } else {
                    session.send("anonymous mode disabled");
                }
            }
            Command::CreateGroup { id, name } => {
                if ctx.groups.create(&id, &name).await {
                    ctx.groups.join(&id, &username).await;
                    session.send(format!("group [{}] created", id));
                    ctx.delivery
                        .group_notice(&id, &format!("{} joined the group", username))
                        .await;
                } else {
                    session.send(format!("group [{}] already exists", id));
                }
            }
            Command::JoinGroup { id } => {
                if ctx.groups.join(&id, &username).await {
                    session.send(format!("joined group [{}]", id));
                    ctx.delivery
                        .group_notice(&id, &format!("{} joined the group", username))
                        .await;
                } else {
                    session.send(format!("group [{}] does not exist", id));
                }
            }
            Command::LeaveGroup { id } => {
                if ctx.groups.leave(&id, &username).await {
                    ctx.delivery
                        .group_notice(&id, &format!("{} left the group", username))
                        .await;
                    session.send(format!("left group [{}]", id));
                } else {
                    session.send(format!("cannot leave group [{}]", id));
                }
            }
            Command::ListGroups => {
                session.send(ctx.groups.render_list().await);
            }
            Command::Voice { target } | Command::VoiceEnd { target } => {
                match ctx.registry.lookup(&target).await {
                    Some(peer) => peer.send(frame.as_str()),
                    None => session.send(format!("user [{}] is not online", target)),
                }
            }
            Command::GroupVoice { group } | Command::GroupVoiceEnd { group } => {
                if !ctx.groups.contains(&group).await {
                    session.send(format!("group [{}] does not exist", group));
                } else if !ctx.groups.is_member(&group, &username).await {
                    session.send(format!("you are not a member of group [{}]", group));
                } else {
                    for member in ctx.groups.present_members(&group).await {
                        if member == username {
                            continue;
                        }
                        if let Some(peer) = ctx.registry.lookup(&member).await {
                            peer.send(frame.as_str());
                        }
                    }
                }
            }
            Command::FileUpload {
                scope,
                target,
                name,
            } => {
                if !handle_upload(&ctx, &session, scope, &target, &name, &mut reader).await {
                    break;
                }
            }
            Command::Download { name } => match ctx.files.load(&name).await {
                Ok(Some(data)) => session.send_blob(data),
                Ok(None) => session.send_not_found(),
                Err(e) => {
                    warn!("Download of {} failed: {}", name, e);
                    session.send_not_found();
                }
            },
            Command::Private { to, text } => {
                ctx.delivery.private(&session, &to, &text).await;
            }
            Command::Group { group, text } => {
                ctx.delivery.group(&session, &group, &text).await;
            }
            Command::Broadcast(text) => {
                ctx.delivery
                    .broadcast(&format!("{}: {}", session.display_name(), text))
                    .await;
            }
            Command::Invalid { reason } => {
                session.send(format!("invalid command: {}", reason));
            }
        }
    }

    // Only the session still holding the registry slot announces departure;
    // an evicted session skips this so the relogin is not marked offline.
    // During shutdown the slot is still released, but no departure
    // broadcast or logout record is written.
    let shutting_down = *shutdown.borrow();
    if ctx.registry.deregister(&username, session.id()).await && !shutting_down {
        ctx.groups.set_online_all(&username, false).await;
        ctx.delivery
            .broadcast(&format!("{} left the chat room", username))
            .await;
        ctx.event_log
            .append(&format!("logout: user[{}]", username))
            .await;
        info!("Logout: [{}]", username);
    }
    session.close();
    let _ = writer_task.await;
}

/// Receive an announced upload. Returns false when the connection can no
/// longer be trusted to be frame-aligned and must be dropped.
async fn handle_upload(
    ctx: &ServerContext,
    session: &Session,
    scope: FileScope,
    target: &str,
    name: &str,
    reader: &mut FrameReader<tokio::net::tcp::OwnedReadHalf>,
) -> bool {
    let len = match reader.read_i64().await {
        Ok(len) => len,
        Err(e) => {
            warn!("Upload header read failed: {}", e);
            return false;
        }
    };
    if len <= 0 {
        session.send(format!("file upload failed: {} is empty", name));
        return true;
    }
    let len = len as u64;
    if len > ctx.config.max_file_size {
        // Drain the oversized body so the stream stays frame-aligned.
        let mut remaining = len;
        while remaining > 0 {
            match reader.read_chunk(remaining.min(64 * 1024) as usize).await {
                Ok(chunk) if !chunk.is_empty() => remaining -= chunk.len() as u64,
                _ => return false,
            }
        }
        session.send(format!(
            "file upload failed: {} exceeds the {} limit",
            name,
            format_file_size(ctx.config.max_file_size)
        ));
        return true;
    }

    let stored_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    if let Err(e) = ctx.files.save(&stored_name, len, reader).await {
        warn!("Upload of {} failed: {}", stored_name, e);
        session.send(format!("file upload failed: {}", stored_name));
        return false;
    }

    let size = format_file_size(len);
    match scope {
        FileScope::Group => {
            if !ctx.groups.contains(target).await {
                session.send(format!("group [{}] does not exist", target));
                return true;
            }
            if !ctx.groups.is_member(target, session.username()).await {
                session.send(format!("you are not a member of group [{}]", target));
                return true;
            }
            ctx.delivery
                .group_notice(
                    target,
                    &format!(
                        "[{}] uploaded file: {} (size: {})",
                        session.display_name(),
                        stored_name,
                        size
                    ),
                )
                .await;
        }
        FileScope::Private => {
            if !ctx.users.contains(target) {
                session.send(format!("user [{}] does not exist", target));
                return true;
            }
            let announce = format!("@@file|{}|{}|{}", session.username(), stored_name, len);
            match ctx.registry.lookup(target).await {
                Some(peer) => peer.send(announce),
                None => {
                    ctx.delivery
                        .queue_offline(
                            target,
                            &format!(
                                "[{}] sent you a file: {} (size: {})",
                                session.username(),
                                stored_name,
                                size
                            ),
                        )
                        .await;
                }
            }
            session.send(format!("file {} sent to [{}] ({})", stored_name, target, size));
        }
    }
    true
}
