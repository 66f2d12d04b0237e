//! Data-share negotiation.
//!
//! A share involves three parties. The sender's loop validates the
//! command, buffers the payload off its own stream and spawns one
//! worker per addressee. Each worker claims its receiver, then hands
//! the job through the receiver's control channel and waits for the
//! verdict; the receiver's own loop runs the offer, the payload write
//! and the receipt wait on its stream. Nobody ever reads or writes
//! another session's socket.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tracing::debug;

use chinwag_protocol::tokens::{LIVENESS, SHARE_ACCEPT, SHARE_OFFER};
use chinwag_protocol::{ShareHeaderError, ShareKind, parse_share_header};

use crate::channel::FramedChannel;
use crate::error::SessionError;
use crate::events::{EventLog, ShareOutcome};
use crate::registry::{Registry, ShareTarget};
use crate::session::SessionContext;
use crate::timer::ProbeTimer;
use crate::writer::Outbound;

/// A job pushed through a receiver's control channel. The receiving
/// session runs the offer on its own stream and reports the verdict
/// back through `answer`.
pub(crate) struct ShareOffer {
    pub sender: String,
    pub kind: ShareKind,
    pub filename: String,
    pub payload: Bytes,
    pub sender_outbound: Outbound,
    pub answer: oneshot::Sender<OfferOutcome>,
}

/// Verdict a receiving session reports back to the share worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OfferOutcome {
    Accepted,
    Declined,
    Failed,
}

/// Runs the sender side of a share command: validation, payload intake
/// and one worker per addressee.
///
/// Recoverable problems are reported to the sender and leave the
/// session running. A payload that dies mid-intake poisons the stream
/// position, so that error ends the session.
pub(crate) async fn run_sender_share<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
    username: &str,
    preview: &str,
) -> Result<(), SessionError> {
    let header = match parse_share_header(preview) {
        Ok(header) => header,
        Err(ShareHeaderError::MissingPath) => {
            framed.skip_pending().await;
            ctx.outbound
                .send_text("No filepath provided after the last username, try again...")
                .await?;
            return Ok(());
        }
        Err(e) => {
            debug!(username, "rejected share command: {e}");
            framed.skip_pending().await;
            ctx.outbound
                .send_text("Your data share has not been sent, check the filepath, name and extension...")
                .await?;
            return Ok(());
        }
    };

    let illegal_ext = ctx
        .settings
        .illegal_extensions
        .iter()
        .any(|ext| ext.eq_ignore_ascii_case(&header.extension));
    if illegal_ext {
        framed.skip_pending().await;
        ctx.outbound
            .send_text(format!(
                ".{} is not a legal file extension, try again...",
                header.extension
            ))
            .await?;
        return Ok(());
    }

    if header.payload_len > ctx.settings.max_share_bytes {
        framed.skip_pending().await;
        ctx.outbound
            .send_text(format!(
                "The data share exceeds the size limit ({} bytes), try again...",
                ctx.settings.max_share_bytes
            ))
            .await?;
        return Ok(());
    }

    let mut targets = Vec::with_capacity(header.addressees.len());
    for name in &header.addressees {
        match ctx.registry.share_target(ctx.id, name) {
            Some(target) => targets.push(target),
            None => {
                ctx.outbound
                    .send_text(format!(
                        "Your data share has not been sent to {name}, check the username..."
                    ))
                    .await?;
            }
        }
    }
    if targets.is_empty() {
        framed.skip_pending().await;
        ctx.outbound
            .send_text("Data share failed, check the username(s)")
            .await?;
        return Ok(());
    }

    // Intake: the whole command plus payload leaves the sender's stream
    // before any receiver is approached. A worker may already have claimed
    // this seat for an inbound offer, in which case its claim stays put.
    let claimed = ctx.registry.try_mark_busy(ctx.id);
    let raw = match framed.consume_exact(header.header_len + header.payload_len).await {
        Ok(raw) => raw,
        Err(e) => {
            if claimed {
                ctx.registry.clear_busy(ctx.id);
            }
            ctx.events.share_outcome(
                ShareOutcome::FailedFromSender,
                header.kind,
                username,
                None,
                &header.filename,
                header.payload_len,
            );
            return Err(e);
        }
    };
    if claimed {
        ctx.registry.clear_busy(ctx.id);
    }
    let payload = raw.slice(header.header_len..);

    for target in targets {
        if !ctx.registry.try_mark_busy(target.id) {
            ctx.outbound
                .send_text(format!(
                    "{} is already processing a data share, try again later...",
                    target.username
                ))
                .await?;
            continue;
        }
        tokio::spawn(share_worker(ShareJob {
            target,
            sender: username.to_string(),
            sender_outbound: ctx.outbound.clone(),
            sender_timer: ctx.timer.clone(),
            registry: ctx.registry.clone(),
            events: ctx.events.clone(),
            kind: header.kind,
            filename: header.filename.clone(),
            payload: payload.clone(),
        }));
    }
    Ok(())
}

struct ShareJob {
    target: ShareTarget,
    sender: String,
    sender_outbound: Outbound,
    sender_timer: Arc<ProbeTimer>,
    registry: Arc<Registry>,
    events: Arc<dyn EventLog>,
    kind: ShareKind,
    filename: String,
    payload: Bytes,
}

/// Walks one receiver through the offer and reports how it went. The
/// receiver is already claimed; this releases it at the end.
async fn share_worker(job: ShareJob) {
    let size = job.payload.len();
    let (answer_tx, answer_rx) = oneshot::channel();
    let offer = ShareOffer {
        sender: job.sender.clone(),
        kind: job.kind,
        filename: job.filename.clone(),
        payload: job.payload,
        sender_outbound: job.sender_outbound.clone(),
        answer: answer_tx,
    };

    let outcome = if job.target.control.send(offer).await.is_err() {
        OfferOutcome::Failed
    } else {
        answer_rx.await.unwrap_or(OfferOutcome::Failed)
    };

    match outcome {
        OfferOutcome::Accepted => {
            job.events.share_outcome(
                ShareOutcome::Accepted,
                job.kind,
                &job.sender,
                Some(&job.target.username),
                &job.filename,
                size,
            );
        }
        OfferOutcome::Declined => {
            let _ = job
                .sender_outbound
                .send_text(format!("{} rejected the data share", job.target.username))
                .await;
            job.events.share_outcome(
                ShareOutcome::Rejected,
                job.kind,
                &job.sender,
                Some(&job.target.username),
                &job.filename,
                size,
            );
        }
        OfferOutcome::Failed => {
            let _ = job
                .sender_outbound
                .send_text("An error occurred, the data share was cancelled")
                .await;
            job.events.share_outcome(
                ShareOutcome::FailedToReceiver,
                job.kind,
                &job.sender,
                Some(&job.target.username),
                &job.filename,
                size,
            );
        }
    }

    job.registry.clear_busy(job.target.id);
    job.target.timer.restart();
    job.sender_timer.restart();
}

/// Runs the receiver side of an offer on the receiving session's own
/// loop: pushes the offer, awaits the answer, delivers the payload and
/// waits for the receipt echo.
///
/// Every path reports a verdict through `offer.answer`. An `Err` return
/// additionally ends the receiving session; its stream position can no
/// longer be trusted.
pub(crate) async fn handle_offer<R: AsyncRead + Unpin>(
    framed: &mut FramedChannel<R>,
    ctx: &SessionContext,
    username: &str,
    offer: ShareOffer,
) -> Result<(), SessionError> {
    let ShareOffer {
        sender,
        kind,
        filename,
        payload,
        sender_outbound,
        answer,
    } = offer;

    let text = format!(
        "{}{} wants to send you the {} '{}' ({} bytes)\nDo you wish to accept this {} transfer?\nYou have {} seconds to respond",
        SHARE_OFFER,
        sender,
        kind.label(),
        filename,
        payload.len(),
        kind.label(),
        ctx.settings.share_offer_timeout_secs
    );
    if ctx.outbound.send_text(text).await.is_err() {
        let _ = answer.send(OfferOutcome::Failed);
        return Err(SessionError::Disconnected);
    }

    let reply = match framed
        .peek(ctx.settings.preview_size, ctx.settings.share_offer_timeout())
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            let _ = answer.send(OfferOutcome::Failed);
            return Err(e);
        }
    };
    let accepted = reply
        .as_deref()
        .is_some_and(|bytes| String::from_utf8_lossy(bytes).trim() == SHARE_ACCEPT);
    if reply.is_some() {
        framed.skip_pending().await;
    }

    if !accepted {
        // Silence counts as a decline.
        let _ = answer.send(OfferOutcome::Declined);
        ctx.outbound
            .send_text("You have rejected the data share")
            .await?;
        return Ok(());
    }

    let _ = sender_outbound
        .send_text(format!(
            "Sending file to {username}... This may take a while if the file is large"
        ))
        .await;

    let mut delivery = BytesMut::with_capacity(kind.imminent_marker().len() + payload.len());
    delivery.extend_from_slice(kind.imminent_marker().as_bytes());
    delivery.extend_from_slice(&payload);
    if ctx.outbound.send(delivery.freeze()).await.is_err() {
        let _ = answer.send(OfferOutcome::Failed);
        return Err(SessionError::Disconnected);
    }

    let receipt = match framed
        .peek(ctx.settings.preview_size, ctx.settings.share_ack_timeout())
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            let _ = answer.send(OfferOutcome::Failed);
            return Err(e);
        }
    };
    let confirmed = receipt
        .as_deref()
        .is_some_and(|bytes| String::from_utf8_lossy(bytes).trim() == LIVENESS);
    if !confirmed {
        let _ = answer.send(OfferOutcome::Failed);
        return Err(SessionError::UnconfirmedShare);
    }
    framed.skip_pending().await;

    let _ = sender_outbound
        .send_text(format!(
            "The {} '{}' was successfully sent to {}",
            kind.label(),
            filename,
            username
        ))
        .await;
    let _ = answer.send(OfferOutcome::Accepted);
    Ok(())
}
