//! Handshake driver
//!
//! A half-duplex byte pump shared by the client and server negotiators.
//! It owns the pending control bytes and an accumulation buffer for
//! received control data, and delegates message handling to a
//! [`ControlProtocol`]. Once the protocol marks the handshake complete the
//! driver stops interpreting events and hands them back to its owner.
//!
//! Reads are bounded by what the protocol says it needs, so no byte past
//! the final handshake message is ever pulled off the transport.

use crate::error::{FailureReason, QueueError};
use crate::socks::message::WireMessage;
use crate::socks::transport::{StreamTransport, TransportEvent};
use bytes::{Buf, BytesMut};
use std::io;
use tracing::trace;

/// What a negotiator reports after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverSignal {
    /// Nothing for the owner to do
    Pending,
    /// The handshake finished; the transport is ready for relaying
    Connected,
    /// The logical connection failed; the owner decides what to close
    ConnectFailed(FailureReason),
    /// An event that arrived after completion, for the relay layer
    Forward(TransportEvent),
}

/// Result of one `on_receive_control_data` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlProgress {
    /// At least this many more bytes are needed
    NeedMore(usize),
    /// State changed; call again with the remaining bytes
    Progressed,
    /// Stop reading until the control queue next drains
    Pause,
    /// Nothing more to receive
    Done,
}

/// Pending outbound control bytes
#[derive(Debug, Default)]
pub struct ControlQueue {
    pending: BytesMut,
    write_requested: bool,
    complete: bool,
}

impl ControlQueue {
    /// Store `data` for sending and request write readiness
    pub fn queue_control_bytes(&mut self, data: &[u8]) -> Result<(), QueueError> {
        if self.complete {
            return Err(QueueError::HandshakeComplete);
        }
        if !self.pending.is_empty() {
            return Err(QueueError::Busy);
        }
        self.pending.extend_from_slice(data);
        self.write_requested = true;
        Ok(())
    }

    /// Encode `message` and queue it
    pub fn queue_message<M: WireMessage>(&mut self, message: &M) -> Result<(), QueueError> {
        self.queue_control_bytes(&message.to_bytes())
    }

    /// Mark the handshake complete
    pub fn complete_handshake(&mut self) {
        self.complete = true;
    }

    /// Whether the handshake has completed
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether every queued byte has been written
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes still waiting to be written
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// Role-specific half of a handshake
pub trait ControlProtocol<C: ?Sized> {
    /// Called whenever the control queue is empty: queue the next message,
    /// or call [`ControlQueue::complete_handshake`] when nothing is left.
    fn on_ready_to_send_control_data(
        &mut self,
        queue: &mut ControlQueue,
        ctx: &mut C,
    ) -> Result<(), FailureReason>;

    /// Consume received control data from `inbound`
    fn on_receive_control_data(
        &mut self,
        inbound: &mut BytesMut,
        queue: &mut ControlQueue,
        ctx: &mut C,
    ) -> Result<ControlProgress, FailureReason>;
}

/// Drives a [`ControlProtocol`] over a [`StreamTransport`]
#[derive(Debug, Default)]
pub struct HandshakeDriver {
    queue: ControlQueue,
    inbound: BytesMut,
    started: bool,
    reads_paused: bool,
    deferred_failure: Option<FailureReason>,
}

impl HandshakeDriver {
    /// Create an idle driver
    pub fn new() -> Self {
        HandshakeDriver::default()
    }

    /// The control queue, for messages produced outside an event
    pub fn queue_mut(&mut self) -> &mut ControlQueue {
        &mut self.queue
    }

    /// Whether the handshake completed
    pub fn is_complete(&self) -> bool {
        self.queue.is_complete()
    }

    /// Received control bytes not yet consumed
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// Drop received control bytes not yet consumed
    pub fn clear_inbound(&mut self) {
        self.inbound.clear();
    }

    /// Report `reason` on the next event instead of handling it
    pub fn defer_failure<T: StreamTransport>(&mut self, transport: &mut T, reason: FailureReason) {
        self.deferred_failure = Some(reason);
        transport.set_write_interest(true);
    }

    /// Stop reading until the control queue next drains
    pub fn pause_reads<T: StreamTransport>(&mut self, transport: &mut T) {
        self.reads_paused = true;
        transport.set_read_interest(false);
    }

    /// Apply write interest requested by queue operations made outside an event
    pub fn sync_interest<T: StreamTransport>(&mut self, transport: &mut T) {
        if self.queue.write_requested {
            self.queue.write_requested = false;
            transport.set_write_interest(true);
        }
    }

    /// Begin the handshake on a connected transport
    pub fn start<T, P, C>(&mut self, transport: &mut T, protocol: &mut P, ctx: &mut C) -> DriverSignal
    where
        T: StreamTransport,
        P: ControlProtocol<C>,
        C: ?Sized,
    {
        if self.started {
            return DriverSignal::Pending;
        }
        self.started = true;
        transport.set_read_interest(true);
        match self.send_next(transport, protocol, ctx) {
            DriverSignal::Pending => self.receive(transport, protocol, ctx),
            signal => signal,
        }
    }

    /// Handle one transport event
    pub fn handle_event<T, P, C>(
        &mut self,
        event: TransportEvent,
        transport: &mut T,
        protocol: &mut P,
        ctx: &mut C,
    ) -> DriverSignal
    where
        T: StreamTransport,
        P: ControlProtocol<C>,
        C: ?Sized,
    {
        if let Some(reason) = self.deferred_failure.take() {
            return DriverSignal::ConnectFailed(reason);
        }
        if self.queue.is_complete() {
            return DriverSignal::Forward(event);
        }

        match event {
            TransportEvent::Connected => self.start(transport, protocol, ctx),
            TransportEvent::ConnectFailed(reason) | TransportEvent::Closed(reason) => {
                DriverSignal::ConnectFailed(reason)
            }
            TransportEvent::Writable => self.on_writable(transport, protocol, ctx),
            TransportEvent::Readable => self.receive(transport, protocol, ctx),
        }
    }

    fn on_writable<T, P, C>(&mut self, transport: &mut T, protocol: &mut P, ctx: &mut C) -> DriverSignal
    where
        T: StreamTransport,
        P: ControlProtocol<C>,
        C: ?Sized,
    {
        while !self.queue.pending.is_empty() {
            match transport.write(&self.queue.pending) {
                Ok(0) => return DriverSignal::ConnectFailed(FailureReason::ClosedByPeer),
                Ok(n) => {
                    trace!("{}: wrote {} control bytes", transport.id(), n);
                    self.queue.pending.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return DriverSignal::Pending,
                Err(e) => return DriverSignal::ConnectFailed(FailureReason::from(&e)),
            }
        }
        transport.set_write_interest(false);

        match self.send_next(transport, protocol, ctx) {
            DriverSignal::Pending if self.reads_paused && self.queue.is_empty() => {
                self.reads_paused = false;
                transport.set_read_interest(true);
                self.receive(transport, protocol, ctx)
            }
            signal => signal,
        }
    }

    /// Give the protocol a chance to queue its next message
    fn send_next<T, P, C>(&mut self, transport: &mut T, protocol: &mut P, ctx: &mut C) -> DriverSignal
    where
        T: StreamTransport,
        P: ControlProtocol<C>,
        C: ?Sized,
    {
        if let Err(reason) = protocol.on_ready_to_send_control_data(&mut self.queue, ctx) {
            return DriverSignal::ConnectFailed(reason);
        }
        self.sync_interest(transport);

        if self.queue.is_complete() && self.queue.is_empty() {
            debug_assert!(self.inbound.is_empty(), "control bytes left at completion");
            transport.set_read_interest(false);
            transport.set_write_interest(false);
            return DriverSignal::Connected;
        }
        DriverSignal::Pending
    }

    fn receive<T, P, C>(&mut self, transport: &mut T, protocol: &mut P, ctx: &mut C) -> DriverSignal
    where
        T: StreamTransport,
        P: ControlProtocol<C>,
        C: ?Sized,
    {
        while !self.reads_paused {
            let progress =
                match protocol.on_receive_control_data(&mut self.inbound, &mut self.queue, ctx) {
                    Ok(progress) => progress,
                    Err(reason) => return DriverSignal::ConnectFailed(reason),
                };
            self.sync_interest(transport);

            match progress {
                ControlProgress::NeedMore(want) => match transport.read(&mut self.inbound, want) {
                    Ok(0) => return DriverSignal::ConnectFailed(FailureReason::ClosedByPeer),
                    Ok(n) => trace!("{}: read {} control bytes", transport.id(), n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return DriverSignal::ConnectFailed(FailureReason::from(&e)),
                },
                ControlProgress::Progressed => {}
                ControlProgress::Pause => self.pause_reads(transport),
                ControlProgress::Done => break,
            }
        }

        if self.queue.is_empty() {
            return self.send_next(transport, protocol, ctx);
        }
        DriverSignal::Pending
    }
}
