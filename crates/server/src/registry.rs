//! Active-session table.
//!
//! A fixed-capacity seat table shared by every session task. The lock
//! is a plain mutex held only for field reads and writes, never across
//! an await; anything that talks to a peer leaves the lock first and
//! goes through the seat's [`Outbound`] handle.
//!
//! A busy seat (mid data share) stays in the table but is invisible to
//! counts, listings and broadcast fan-outs. Text pushed at a busy seat
//! would land inside a payload its client is counting down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::negotiate::ShareOffer;
use crate::timer::ProbeTimer;
use crate::writer::Outbound;

struct Slot {
    id: Uuid,
    username: Option<String>,
    presence: String,
    busy: bool,
    outbound: Outbound,
    control: mpsc::Sender<ShareOffer>,
    timer: Arc<ProbeTimer>,
}

/// Everything a share worker needs to reach one receiver.
#[derive(Clone)]
pub(crate) struct ShareTarget {
    pub id: Uuid,
    pub username: String,
    pub outbound: Outbound,
    pub control: mpsc::Sender<ShareOffer>,
    pub timer: Arc<ProbeTimer>,
}

/// Result of resolving a private-message addressee.
pub(crate) enum Recipient {
    /// Connected and listening.
    Ready(Outbound),
    /// Connected but mid share; the message is silently dropped.
    Busy,
    /// Nobody by that name.
    Unknown,
}

/// Shared seat table.
pub struct Registry {
    seats: Mutex<Vec<Option<Slot>>>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        let mut seats = Vec::with_capacity(capacity);
        seats.resize_with(capacity, || None);
        Self {
            seats: Mutex::new(seats),
        }
    }

    /// Seats a new connection in the first free slot. `false` when the
    /// table is full, which the engine's admission permit prevents.
    pub(crate) fn insert(
        &self,
        id: Uuid,
        outbound: Outbound,
        control: mpsc::Sender<ShareOffer>,
        timer: Arc<ProbeTimer>,
    ) -> bool {
        let mut seats = self.lock();
        let Some(free) = seats.iter_mut().find(|seat| seat.is_none()) else {
            return false;
        };
        *free = Some(Slot {
            id,
            username: None,
            presence: String::new(),
            busy: false,
            outbound,
            control,
            timer,
        });
        true
    }

    /// Frees a seat. Safe to call for an id that is already gone.
    pub(crate) fn remove(&self, id: Uuid) {
        let mut seats = self.lock();
        for seat in seats.iter_mut() {
            if seat.as_ref().is_some_and(|s| s.id == id) {
                *seat = None;
                return;
            }
        }
    }

    /// Claims `name` for the seat, case sensitively, if no other seat
    /// holds it. Assigns the default presence on success.
    pub(crate) fn claim_username(&self, id: Uuid, name: &str, default_status: &str) -> bool {
        let mut seats = self.lock();
        let taken = seats.iter().flatten().any(|s| {
            s.id != id && s.username.as_deref() == Some(name)
        });
        if taken {
            return false;
        }
        for seat in seats.iter_mut().flatten() {
            if seat.id == id {
                seat.username = Some(name.to_string());
                seat.presence = default_status.to_string();
                return true;
            }
        }
        false
    }

    /// Logged-in sessions, busy ones included. Operational count only.
    pub fn total_connected(&self) -> usize {
        self.lock()
            .iter()
            .flatten()
            .filter(|s| s.username.is_some())
            .count()
    }

    /// Logged-in sessions other than `id` that are not mid share.
    pub(crate) fn count_other_visible(&self, id: Uuid) -> usize {
        self.lock()
            .iter()
            .flatten()
            .filter(|s| s.id != id && s.username.is_some() && !s.busy)
            .count()
    }

    /// Username and presence of every visible other session.
    pub(crate) fn visible_others(&self, id: Uuid) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .flatten()
            .filter(|s| s.id != id && !s.busy)
            .filter_map(|s| {
                s.username
                    .as_ref()
                    .map(|u| (u.clone(), s.presence.clone()))
            })
            .collect()
    }

    /// Outbound handles of every visible other session.
    pub(crate) fn broadcast_targets(&self, id: Uuid) -> Vec<Outbound> {
        self.lock()
            .iter()
            .flatten()
            .filter(|s| s.id != id && s.username.is_some() && !s.busy)
            .map(|s| s.outbound.clone())
            .collect()
    }

    /// Outbound handles of every visible session, the caller included.
    pub(crate) fn all_targets(&self) -> Vec<Outbound> {
        self.lock()
            .iter()
            .flatten()
            .filter(|s| s.username.is_some() && !s.busy)
            .map(|s| s.outbound.clone())
            .collect()
    }

    /// Resolves a private-message addressee among the other sessions.
    pub(crate) fn resolve_recipient(&self, id: Uuid, name: &str) -> Recipient {
        let seats = self.lock();
        match seats
            .iter()
            .flatten()
            .find(|s| s.id != id && s.username.as_deref() == Some(name))
        {
            Some(slot) if slot.busy => Recipient::Busy,
            Some(slot) => Recipient::Ready(slot.outbound.clone()),
            None => Recipient::Unknown,
        }
    }

    /// Whether anyone, the asker included, holds `name`.
    pub(crate) fn is_connected(&self, name: &str) -> bool {
        self.lock()
            .iter()
            .flatten()
            .any(|s| s.username.as_deref() == Some(name))
    }

    /// Looks up a share addressee among the other sessions. Busy seats
    /// resolve too; the claim step is where they get refused.
    pub(crate) fn share_target(&self, id: Uuid, name: &str) -> Option<ShareTarget> {
        self.lock()
            .iter()
            .flatten()
            .find(|s| s.id != id && s.username.as_deref() == Some(name))
            .map(|s| ShareTarget {
                id: s.id,
                username: name.to_string(),
                outbound: s.outbound.clone(),
                control: s.control.clone(),
                timer: s.timer.clone(),
            })
    }

    /// Atomically claims a session for a share. `false` when it is
    /// already mid share or gone.
    pub(crate) fn try_mark_busy(&self, id: Uuid) -> bool {
        let mut seats = self.lock();
        for seat in seats.iter_mut().flatten() {
            if seat.id == id {
                if seat.busy {
                    return false;
                }
                seat.busy = true;
                return true;
            }
        }
        false
    }

    /// Clears the share flag after a negotiation ends.
    pub(crate) fn clear_busy(&self, id: Uuid) {
        let mut seats = self.lock();
        for seat in seats.iter_mut().flatten() {
            if seat.id == id {
                seat.busy = false;
                return;
            }
        }
    }

    pub(crate) fn presence(&self, id: Uuid) -> Option<String> {
        self.lock()
            .iter()
            .flatten()
            .find(|s| s.id == id)
            .map(|s| s.presence.clone())
    }

    pub(crate) fn set_presence(&self, id: Uuid, status: &str) {
        let mut seats = self.lock();
        for seat in seats.iter_mut().flatten() {
            if seat.id == id {
                seat.presence = status.to_string();
                return;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Slot>>> {
        self.seats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
