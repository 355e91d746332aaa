use std::collections::VecDeque;
use std::future::poll_fn;
use std::task::{Context, Poll};
use std::time::Duration;

use revtet_packet::MAX_PACKET_LENGTH;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::PollSender;

use crate::buffer::{Ipv4PacketBuffer, StreamBuffer};
use crate::connection::{self, PacketSource};
use crate::router::Router;
use crate::{ConnectionId, RelayConfig, RelayError};

/// Capacity of the device-bound byte buffer.
pub const NETWORK_TO_CLIENT_CAPACITY: usize = 16 * MAX_PACKET_LENGTH;

/// Largest chunk handed to the device writer at once, and read from the device at once.
const DEVICE_CHUNK: usize = 16 * 1024;

/// Flows are swept at the cadence of the shortest idle timeout.
const SWEEP_PERIOD: Duration = connection::icmp::IDLE_TIMEOUT;

/// Lookup of the flows queued in a [`ClientOutput`].
pub trait PacketSources {
    fn packet_source(&mut self, id: &ConnectionId) -> Option<&mut dyn PacketSource>;
}

impl PacketSources for Router {
    fn packet_source(&mut self, id: &ConnectionId) -> Option<&mut dyn PacketSource> {
        self.get_mut(id).and_then(|conn| conn.as_packet_source())
    }
}

/// Device-bound side of a client session: the outbound byte buffer and the queue of flows
/// waiting for room in it.
pub struct ClientOutput {
    buffer: StreamBuffer,
    pending: VecDeque<ConnectionId>,
}

impl ClientOutput {
    pub fn new() -> Self {
        Self::with_capacity(NETWORK_TO_CLIENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: StreamBuffer::new(capacity),
            pending: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Appends one datagram for the device, or refuses it entirely when there is no room.
    pub fn send_to_client(&mut self, raw: &[u8]) -> bool {
        if !self.buffer.try_push(raw) {
            tracing::warn!(
                len = raw.len(),
                remaining = self.buffer.remaining(),
                "client buffer full"
            );
            return false;
        }
        true
    }

    /// Delivers the datagram held by `source`, or queues the flow until there is room.
    ///
    /// Flows are served in order: while anything is queued, a new source waits behind it even if
    /// its datagram would fit.
    pub fn consume(&mut self, id: &ConnectionId, source: &mut dyn PacketSource) {
        if !self.pending.is_empty() {
            if !self.pending.contains(id) {
                self.pending.push_back(id.clone());
            }
            return;
        }
        let Some(packet) = source.get() else {
            return;
        };
        let sent = self.send_to_client(packet.raw());
        if sent {
            source.next();
        } else {
            self.pending.push_back(id.clone());
        }
    }

    /// Retries queued flows in order, stopping at the first one that still does not fit.
    pub fn process_pending<S: PacketSources + ?Sized>(&mut self, sources: &mut S) {
        while let Some(id) = self.pending.front() {
            let Some(source) = sources.packet_source(id) else {
                self.pending.pop_front();
                continue;
            };
            let Some(packet) = source.get() else {
                self.pending.pop_front();
                continue;
            };
            let len = packet.len();
            if !self.buffer.try_push(packet.raw()) {
                tracing::debug!(%id, len, "pending packet still does not fit");
                return;
            }
            source.next();
            tracing::trace!(%id, len, "pending packet sent to client");
            self.pending.pop_front();
        }
    }

    pub fn take_chunk(&mut self, max: usize) -> Vec<u8> {
        self.buffer.take_chunk(max)
    }
}

impl Default for ClientOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// One attached device: its byte channel, its flow table, and the loop driving both.
///
/// The device channel is read and written by two helper tasks; every flow-table mutation happens
/// in [`Session::run`].
pub struct Session {
    id: u32,
    router: Router,
    output: ClientOutput,
    inbound: Ipv4PacketBuffer,
    device_rx: mpsc::Receiver<Vec<u8>>,
    device_tx: PollSender<Vec<u8>>,
    sweep: Interval,
    max_chunks_per_pass: usize,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    pub fn new<D>(id: u32, channel: D, cfg: &RelayConfig) -> Self
    where
        D: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut device_read, mut device_write) = tokio::io::split(channel);
        let (inbound_tx, device_rx) = mpsc::channel::<Vec<u8>>(cfg.device_queue);
        let (device_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(cfg.device_queue);

        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; DEVICE_CHUNK];
            loop {
                match device_read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if inbound_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(client = id, "cannot read from device: {err}");
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(chunk) = outbound_rx.recv().await {
                if let Err(err) = device_write.write_all(&chunk).await {
                    tracing::error!(client = id, "cannot write to device: {err}");
                    return;
                }
                if outbound_rx.is_empty() {
                    if let Err(err) = device_write.flush().await {
                        tracing::error!(client = id, "cannot flush device: {err}");
                        return;
                    }
                }
            }
        });

        let mut sweep = tokio::time::interval_at(Instant::now() + SWEEP_PERIOD, SWEEP_PERIOD);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            id,
            router: Router::new(cfg.probe_timeout),
            output: ClientOutput::new(),
            inbound: Ipv4PacketBuffer::new(),
            device_rx,
            device_tx: PollSender::new(device_tx),
            sweep,
            max_chunks_per_pass: cfg.device_queue,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Relays until the device goes away.
    ///
    /// Returns `Ok` when the device closed its side of the channel and `DeviceClosed` when the
    /// device stopped accepting data. Either way every flow is closed on return.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::info!(client = self.id, "client attached");
        // The device learns its id before any datagram.
        self.output.send_to_client(&self.id.to_be_bytes());

        let result = poll_fn(|cx| self.poll_pass(cx)).await;
        match &result {
            Ok(()) => tracing::info!(client = self.id, "client detached"),
            Err(err) => tracing::warn!(client = self.id, "client session ended: {err}"),
        }
        self.close();
        result
    }

    /// One pass of the event loop.
    ///
    /// Drains device-bound bytes first, so room freed by the previous pass is visible before
    /// socket readiness is dispatched, then handles device input and the idle sweep. A pass that
    /// made progress schedules another one right away.
    fn poll_pass(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), RelayError>> {
        let mut progressed = false;

        if let Err(err) = self.drain_to_device(cx, &mut progressed) {
            return Poll::Ready(Err(err));
        }

        if let Poll::Ready(events) = self.router.poll_ready(cx) {
            self.router.on_ready(events, &mut self.output);
            progressed = true;
        }

        for _ in 0..self.max_chunks_per_pass {
            match self.device_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.push_to_network(&chunk);
                    progressed = true;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => break,
            }
        }

        if self.sweep.poll_tick(cx).is_ready() {
            self.router.clean_expired_connections(Instant::now());
        }

        if progressed {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }

    fn drain_to_device(&mut self, cx: &mut Context<'_>, progressed: &mut bool) -> Result<(), RelayError> {
        while !self.output.is_empty() {
            match self.device_tx.poll_reserve(cx) {
                Poll::Ready(Ok(())) => {
                    let chunk = self.output.take_chunk(DEVICE_CHUNK);
                    self.device_tx
                        .send_item(chunk)
                        .map_err(|_| RelayError::DeviceClosed)?;
                    self.output.process_pending(&mut self.router);
                    *progressed = true;
                }
                Poll::Ready(Err(_)) => return Err(RelayError::DeviceClosed),
                Poll::Pending => break,
            }
        }
        Ok(())
    }

    /// Feeds device bytes to the datagram assembler and routes every complete datagram.
    fn push_to_network(&mut self, mut chunk: &[u8]) {
        while !chunk.is_empty() {
            let taken = self.inbound.extend(chunk);
            chunk = &chunk[taken..];
            while let Some(datagram) = self.inbound.next_datagram() {
                self.router.send_to_network(datagram, &mut self.output);
                self.inbound.advance();
            }
        }
    }

    fn close(&mut self) {
        self.router.close_all();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
