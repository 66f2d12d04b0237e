//! Per-connection lifecycle: login, the command loop and teardown.
//!
//! Each accepted stream gets one task running [`run_session`]. The task
//! owns the read half through a [`FramedChannel`]; every write, its own
//! replies included, goes through the seat's [`Outbound`] handle.
//! Incoming share offers arrive over the seat's control channel and are
//! answered between reads, never concurrently with them.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chinwag_protocol::tokens::LIVENESS;
use chinwag_protocol::{MessageKind, classify, command};

use crate::channel::{ChannelConfig, FramedChannel};
use crate::error::SessionError;
use crate::events::EventLog;
use crate::negotiate::{self, ShareOffer};
use crate::registry::{Recipient, Registry};
use crate::settings::Settings;
use crate::timer::ProbeTimer;
use crate::transport::SessionStream;
use crate::writer::{Outbound, spawn_writer};

/// Pending share offers per seat before senders back off.
const CONTROL_QUEUE: usize = 4;

/// Shared handles for one session task.
pub(crate) struct SessionContext {
    pub id: Uuid,
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
    pub events: Arc<dyn EventLog>,
    pub outbound: Outbound,
    pub timer: Arc<ProbeTimer>,
    pub cancel: CancellationToken,
}

/// Wires an accepted stream into the seat table and spawns its task.
///
/// The permit, when present, is released only once the session is fully
/// torn down, so admission control tracks seats rather than accepts.
pub(crate) fn launch<S: SessionStream>(
    stream: S,
    addr: SocketAddr,
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    events: Arc<dyn EventLog>,
    cancel: CancellationToken,
    permit: Option<OwnedSemaphorePermit>,
) -> (Uuid, JoinHandle<()>) {
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, _writer) = spawn_writer(
        write_half,
        settings.buffer_size,
        settings.transmission_delay(),
        cancel.clone(),
    );
    let framed = FramedChannel::new(
        read_half,
        ChannelConfig {
            buffer_size: settings.buffer_size,
            coalesce_timeout: settings.coalesce_timeout(),
            drain_timeout: settings.transmission_delay(),
        },
    );
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
    let timer = Arc::new(ProbeTimer::new(settings.probe_interval()));
    let id = Uuid::new_v4();

    if !registry.insert(id, outbound.clone(), control_tx, timer.clone()) {
        warn!(%addr, "no free seat for accepted connection");
        return (id, tokio::spawn(async {}));
    }

    let ctx = SessionContext {
        id,
        addr,
        settings,
        registry,
        events,
        outbound,
        timer,
        cancel,
    };
    let handle = tokio::spawn(async move {
        run_session(framed, control_rx, ctx).await;
        drop(permit);
    });
    (id, handle)
}

/// Drives one session from greeting to teardown.
pub(crate) async fn run_session<R: AsyncRead + Unpin>(
    mut framed: FramedChannel<R>,
    mut offers: mpsc::Receiver<ShareOffer>,
    ctx: SessionContext,
) {
    let mut username = None;
    // Buffered bytes survive a cancelled read, so aborting mid-await
    // here cannot lose stream position.
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(SessionError::Shutdown),
        result = drive(&mut framed, &mut offers, &ctx, &mut username) => result,
    };
    teardown(result, &ctx, username.as_deref()).await;
}

async fn drive<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    offers: &mut mpsc::Receiver<ShareOffer>,
    ctx: &SessionContext,
    username: &mut Option<String>,
) -> Result<(), SessionError> {
    let name = login(framed, ctx).await?;
    *username = Some(name.clone());
    command_loop(framed, offers, ctx, &name).await
}

/// Greets the client, gates on the password when one is set and claims
/// a username. Finishes by announcing the arrival to everyone else.
async fn login<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<String, SessionError> {
    let settings = &ctx.settings;
    ctx.outbound
        .send_text(format!("\n{}\n", settings.welcome_message))
        .await?;

    if !settings.server_password.is_empty() {
        check_password(framed, ctx).await?;
    }
    let name = claim_username(framed, ctx).await?;
    ctx.outbound
        .send_text(format!(
            "Your username is {name}\n\nStart typing to have a chinwag..."
        ))
        .await?;
    ctx.outbound
        .send_text(count_line(ctx.registry.count_other_visible(ctx.id)))
        .await?;

    ctx.events
        .client_connected(&name, ctx.addr, ctx.registry.total_connected());
    deliver_to_each(
        &ctx.registry.broadcast_targets(ctx.id),
        &format!("{name} has joined the chinwag"),
    )
    .await;
    ctx.timer.restart();
    Ok(name)
}

/// One login answer: bounded wait, trimmed and cut to the character
/// limit. The flag reports whether the cut removed anything.
async fn read_login_reply<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<(String, bool), SessionError> {
    let reply = framed
        .consume(ctx.settings.buffer_size, ctx.settings.login_timeout())
        .await?;
    let Some(bytes) = reply else {
        return Err(SessionError::LoginTimeout);
    };
    let text = String::from_utf8_lossy(&bytes);
    let trimmed = text.trim();
    let limit = ctx.settings.username_char_limit;
    let cut: String = trimmed.chars().take(limit).collect();
    let was_cut = trimmed.chars().count() > limit;
    Ok((cut, was_cut))
}

async fn check_password<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<(), SessionError> {
    for _ in 0..ctx.settings.max_login_attempts {
        ctx.outbound
            .send_text("Enter the chinwag server password : ")
            .await?;
        let (reply, _) = read_login_reply(framed, ctx).await?;
        if reply == ctx.settings.server_password {
            ctx.outbound.send_text("Access granted!").await?;
            return Ok(());
        }
        ctx.events.failed_login(ctx.addr, &reply);
        ctx.outbound
            .send_text("Access denied, incorrect password provided, try again...")
            .await?;
    }
    ctx.outbound
        .send_text("Too many failed attempts, disconnecting...")
        .await?;
    Err(SessionError::LoginAttemptsExhausted)
}

async fn claim_username<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<String, SessionError> {
    let settings = &ctx.settings;
    for _ in 0..settings.max_login_attempts {
        ctx.outbound
            .send_text("Enter your username (usernames are case sensitive) :")
            .await?;
        let (name, was_cut) = read_login_reply(framed, ctx).await?;
        if was_cut {
            ctx.outbound
                .send_text(format!(
                    "Your chosen username has been truncated to '{name}' because \
                     it exceeded the maximum character limit ({})",
                    settings.username_char_limit
                ))
                .await?;
        }
        if username_allowed(settings, &name)
            && ctx
                .registry
                .claim_username(ctx.id, &name, settings.default_status())
        {
            return Ok(name);
        }
        ctx.outbound
            .send_text("Username is taken or not allowed (no spaces allowed), try again...")
            .await?;
    }
    ctx.outbound
        .send_text("Too many failed attempts, disconnecting...")
        .await?;
    Err(SessionError::LoginAttemptsExhausted)
}

fn username_allowed(settings: &Settings, name: &str) -> bool {
    let shutdown_phrase = settings.shutdown_phrase.trim();
    !name.is_empty()
        && !name.chars().any(char::is_whitespace)
        && !settings.illegal_usernames.iter().any(|n| n == name)
        && (shutdown_phrase.is_empty() || name != shutdown_phrase)
}

/// Receives and reacts until the peer drops, fails a probe or the
/// server goes down. Share offers from other sessions take priority
/// over the next read so a queued payload is never left hanging.
async fn command_loop<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    offers: &mut mpsc::Receiver<ShareOffer>,
    ctx: &SessionContext,
    username: &str,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            biased;
            offer = offers.recv() => {
                let Some(offer) = offer else {
                    return Err(SessionError::Disconnected);
                };
                negotiate::handle_offer(framed, ctx, username, offer).await?;
            }
            previewed = framed.peek(
                ctx.settings.preview_size,
                ctx.settings.transmission_delay(),
            ) => {
                match previewed? {
                    Some(preview) => {
                        ctx.timer.restart();
                        dispatch(framed, ctx, username, &preview).await?;
                    }
                    None if ctx.timer.has_expired() => probe(framed, ctx).await?,
                    None => {}
                }
            }
        }
    }
}

/// Routes one previewed burst. Most branches reply over the seat's own
/// handle; the share branch hands off to the negotiation module.
async fn dispatch<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
    username: &str,
    preview: &[u8],
) -> Result<(), SessionError> {
    let text = String::from_utf8_lossy(preview);
    match classify(&text, &ctx.settings.shutdown_phrase) {
        MessageKind::Empty | MessageKind::LivenessEcho | MessageKind::StrayShareAnswer => {
            framed.skip_pending().await;
        }
        MessageKind::CountQuery => {
            framed.skip_pending().await;
            ctx.outbound
                .send_text(count_line(ctx.registry.count_other_visible(ctx.id)))
                .await?;
        }
        MessageKind::NamesQuery => {
            framed.skip_pending().await;
            send_names(ctx, username).await?;
        }
        MessageKind::Shutdown => {
            shutdown_server(ctx, username).await;
            return Err(SessionError::Shutdown);
        }
        MessageKind::ShareSend => {
            // Offsets in the share header refer to raw stream bytes, so
            // the parser gets the longest clean prefix rather than a
            // lossy rewrite that would shift them.
            negotiate::run_sender_share(framed, ctx, username, valid_prefix(preview)).await?;
        }
        MessageKind::PrivateMessage => {
            let message = consume_text(framed, ctx).await?;
            send_private_message(ctx, username, &message).await?;
        }
        MessageKind::SearchQuery => {
            let message = consume_text(framed, ctx).await?;
            send_search_results(ctx, &message).await?;
        }
        MessageKind::PresenceUpdate => {
            let message = consume_text(framed, ctx).await?;
            update_presence(ctx, &message).await?;
        }
        MessageKind::Broadcast => {
            broadcast(framed, ctx, username).await?;
        }
    }
    Ok(())
}

/// Challenges an idle peer and insists on the exact echo.
async fn probe<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<(), SessionError> {
    debug!("probing idle session");
    ctx.outbound.send_text(LIVENESS).await?;
    let reply = framed
        .peek(ctx.settings.preview_size, ctx.settings.probe_reply_timeout())
        .await?;
    let alive = reply
        .as_deref()
        .is_some_and(|bytes| String::from_utf8_lossy(bytes).trim() == LIVENESS);
    if !alive {
        return Err(SessionError::ProbeFailed);
    }
    framed.skip_pending().await;
    ctx.timer.restart();
    Ok(())
}

/// Takes the previewed message off the stream as text.
async fn consume_text<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
) -> Result<String, SessionError> {
    let bytes = framed
        .consume(ctx.settings.buffer_size, ctx.settings.transmission_delay())
        .await?;
    Ok(bytes
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default())
}

/// Longest prefix of `bytes` that is valid UTF-8.
fn valid_prefix(bytes: &[u8]) -> &str {
    match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => std::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or(""),
    }
}

fn count_line(others: usize) -> String {
    format!("There is currently {others} other connected client(s)")
}

async fn send_names(ctx: &SessionContext, username: &str) -> Result<(), SessionError> {
    let mut others = ctx.registry.visible_others(ctx.id);
    if others.is_empty() {
        ctx.outbound
            .send_text("No other clients are connected")
            .await?;
        return Ok(());
    }
    others.sort();

    let own_status = ctx.registry.presence(ctx.id).unwrap_or_default();
    let mut line = format!("{username} (you) [{own_status}]");
    for (name, status) in others {
        line.push_str(&format!(", {name} [{status}]"));
    }
    ctx.outbound.send_text(line).await
}

async fn send_private_message(
    ctx: &SessionContext,
    username: &str,
    message: &str,
) -> Result<(), SessionError> {
    if !command::has_text_after_addressees(message) {
        return ctx
            .outbound
            .send_text("No message provided after the last username, try again...")
            .await;
    }

    let mut recipients = Vec::new();
    for name in command::leading_addressees(message) {
        match ctx.registry.resolve_recipient(ctx.id, &name) {
            Recipient::Ready(outbound) => recipients.push(outbound),
            // Mid share; pushing text at them now would corrupt the
            // payload their client is counting down.
            Recipient::Busy => {}
            Recipient::Unknown => {
                ctx.outbound
                    .send_text(format!(
                        "Your PM has not been sent to {name}, check the username (-n)..."
                    ))
                    .await?;
            }
        }
    }

    let line = format!("{username} : {}", command::text_after_addressees(message));
    deliver_to_each(&recipients, &line).await;
    Ok(())
}

async fn send_search_results(ctx: &SessionContext, message: &str) -> Result<(), SessionError> {
    let names = command::leading_addressees(command::command_argument(message));
    if names.is_empty() {
        return ctx
            .outbound
            .send_text("Username(s) not detected, use '-s @username' e.g. -s @micky @jimmy")
            .await;
    }

    let results: Vec<String> = names
        .iter()
        .map(|name| {
            if ctx.registry.is_connected(name) {
                format!("@{name} is connected")
            } else {
                format!("@{name} is NOT connected")
            }
        })
        .collect();
    ctx.outbound.send_text(results.join("\n")).await
}

async fn update_presence(ctx: &SessionContext, message: &str) -> Result<(), SessionError> {
    let status = command::command_argument(message);
    if status.is_empty() {
        return ctx
            .outbound
            .send_text("Presence status not detected, use '-p busy' etc.")
            .await;
    }
    if !ctx.settings.legal_statuses.iter().any(|s| s == status) {
        let available = ctx
            .settings
            .legal_statuses
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", ");
        return ctx
            .outbound
            .send_text(format!(
                "'{status}' is not a legal presence status, try again...\n\
                 Valid statuses include {available}\nE.g. -p busy"
            ))
            .await;
    }

    if ctx.registry.presence(ctx.id).as_deref() == Some(status) {
        ctx.outbound
            .send_text(format!("Your presence status is already '{status}'"))
            .await
    } else {
        ctx.registry.set_presence(ctx.id, status);
        ctx.outbound
            .send_text(format!(
                "Your presence status has been updated to '{status}'"
            ))
            .await
    }
}

async fn broadcast<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
    username: &str,
) -> Result<(), SessionError> {
    if ctx.registry.count_other_visible(ctx.id) == 0 {
        framed.skip_pending().await;
        return ctx
            .outbound
            .send_text("No other clients are connected")
            .await;
    }
    let message = consume_text(framed, ctx).await?;
    let line = format!("{username} : {}", message.trim());
    deliver_to_each(&ctx.registry.broadcast_targets(ctx.id), &line).await;
    Ok(())
}

async fn shutdown_server(ctx: &SessionContext, username: &str) {
    info!(username, "shutdown phrase received");
    ctx.events.server_stopped(username);
    deliver_to_each(
        &ctx.registry.all_targets(),
        "Admin has shut down this server, please re/connect",
    )
    .await;
    ctx.cancel.cancel();
}

/// Fan-out that shrugs off dead peers; their own loops notice soon
/// enough.
async fn deliver_to_each(targets: &[Outbound], line: &str) {
    for target in targets {
        let _ = target.send_text(line).await;
    }
}

async fn teardown(result: Result<(), SessionError>, ctx: &SessionContext, username: Option<&str>) {
    let error = result.err();

    if matches!(error, Some(SessionError::LoginTimeout)) {
        let _ = ctx
            .outbound
            .send_text("Your login timed out, please re-connect and try again...")
            .await;
    }
    if let (Some(name), Some(err)) = (username, error.as_ref()) {
        if err.is_transport_death() {
            deliver_to_each(
                &ctx.registry.broadcast_targets(ctx.id),
                &format!("{name} has left the chinwag"),
            )
            .await;
        }
    }

    ctx.registry.remove(ctx.id);
    if let Some(name) = username {
        ctx.events
            .client_disconnected(name, ctx.addr, ctx.registry.total_connected());
    }
    if let Some(err) = error {
        if !matches!(err, SessionError::Shutdown) {
            debug!(addr = %ctx.addr, "session closed: {err}");
        }
    }
}
