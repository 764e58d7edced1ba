//! Readiness reactor
//!
//! Turns tokio readiness into [`TransportEvent`]s for the sans-IO engine.
//! Every transport created by a [`Reactor`] shares a slot with it; the
//! reactor only holds weak references, so dropping a transport
//! unregisters it.

use crate::error::FailureReason;
use crate::runtime::tcp::SocketOpts;
use crate::socks::{SocketId, TransportEvent};
use futures::future::poll_fn;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

pub(crate) type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// What a slot currently holds
pub(crate) enum SlotIo {
    /// Created but neither connected nor bound
    Idle,
    /// TCP connect in flight
    Connecting(ConnectFuture),
    /// Connected TCP stream
    Stream(TcpStream),
    /// Bound UDP socket
    Datagram(Arc<UdpSocket>),
    /// Closed or handed off
    Closed,
}

impl fmt::Debug for SlotIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotIo::Idle => f.write_str("Idle"),
            SlotIo::Connecting(_) => f.write_str("Connecting"),
            SlotIo::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
            SlotIo::Datagram(s) => f.debug_tuple("Datagram").field(s).finish(),
            SlotIo::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) io: SlotIo,
    pub(crate) read_interest: bool,
    pub(crate) write_interest: bool,
}

/// Per-transport state shared between a transport and the reactor
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) id: SocketId,
    pub(crate) opts: SocketOpts,
    state: Mutex<SlotState>,
}

impl Slot {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding the lock leaves nothing half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll_ready(&self, cx: &mut Context<'_>, events: &mut Vec<(SocketId, TransportEvent)>) {
        let mut state = self.lock();
        let (read, write) = (state.read_interest, state.write_interest);

        match &mut state.io {
            SlotIo::Connecting(fut) => match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(stream)) => {
                    if let Err(e) = self.opts.apply(&stream) {
                        debug!("{}: failed to apply socket options: {}", self.id, e);
                    }
                    state.io = SlotIo::Stream(stream);
                    events.push((self.id, TransportEvent::Connected));
                }
                Poll::Ready(Err(e)) => {
                    state.io = SlotIo::Idle;
                    events.push((self.id, TransportEvent::ConnectFailed(FailureReason::from(&e))));
                }
                Poll::Pending => {}
            },
            SlotIo::Stream(stream) => {
                // Errors surface through the following read or write
                if read && stream.poll_read_ready(cx).is_ready() {
                    events.push((self.id, TransportEvent::Readable));
                }
                if write && stream.poll_write_ready(cx).is_ready() {
                    events.push((self.id, TransportEvent::Writable));
                }
            }
            SlotIo::Datagram(socket) => {
                if read && socket.poll_recv_ready(cx).is_ready() {
                    events.push((self.id, TransportEvent::Readable));
                }
                if write && socket.poll_send_ready(cx).is_ready() {
                    events.push((self.id, TransportEvent::Writable));
                }
            }
            // Only a deferred connect failure asks for writes on an idle slot
            SlotIo::Idle if write => events.push((self.id, TransportEvent::Writable)),
            SlotIo::Idle | SlotIo::Closed => {}
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    slots: Mutex<Vec<Weak<Slot>>>,
    next_id: AtomicU64,
}

/// Hands out transports and reports their readiness
#[derive(Debug, Clone)]
pub struct Reactor {
    registry: Arc<Registry>,
    opts: SocketOpts,
}

impl Reactor {
    /// Reactor applying `opts` to every TCP stream it connects or adopts
    pub fn new(opts: SocketOpts) -> Self {
        Reactor {
            registry: Arc::new(Registry::default()),
            opts,
        }
    }

    pub(crate) fn register(&self, io: SlotIo) -> Arc<Slot> {
        let id = SocketId(self.registry.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let slot = Arc::new(Slot {
            id,
            opts: self.opts,
            state: Mutex::new(SlotState {
                io,
                read_interest: false,
                write_interest: false,
            }),
        });

        let mut slots = self.registry.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.push(Arc::downgrade(&slot));
        trace!("{}: registered", id);
        slot
    }

    /// Number of live transports
    pub fn len(&self) -> usize {
        let slots = self.registry.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.iter().filter(|s| s.strong_count() > 0).count()
    }

    /// Whether no live transports remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll every live transport once, collecting the events that are due
    pub fn poll_events(&self, cx: &mut Context<'_>) -> Poll<Vec<(SocketId, TransportEvent)>> {
        let live: Vec<Arc<Slot>> = {
            let mut slots = self.registry.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|s| s.strong_count() > 0);
            slots.iter().filter_map(Weak::upgrade).collect()
        };

        let mut events = Vec::new();
        for slot in &live {
            slot.poll_ready(cx, &mut events);
        }

        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    }

    /// Wait until at least one transport has an event.
    ///
    /// Interest changes and new transports take effect on the next call.
    pub async fn next_events(&self) -> Vec<(SocketId, TransportEvent)> {
        poll_fn(|cx| self.poll_events(cx)).await
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Reactor::new(SocketOpts::default())
    }
}
