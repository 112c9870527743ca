use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::config::TransportConfig;

use super::protocol::{MAX_PACKET_SIZE, Packet, PacketError};
use super::stats::{NetworkStats, PacketLossSimulation, StatsCounters};

/// How often the receive thread wakes up to notice shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a blocking receive.
#[derive(Debug)]
pub enum Received {
    Packet(Packet),
    /// A datagram arrived but did not decode.
    Rejected { from: SocketAddr, error: PacketError },
    /// Nothing arrived within the socket timeout.
    Timeout,
    /// The worker has been shut down.
    Closed,
}

enum Inbound {
    Packet(Packet),
    Rejected { from: SocketAddr, error: PacketError },
}

/// Owns one UDP socket with independent send and receive threads.
///
/// Delivery is at most once: queued datagrams are discarded on shutdown and
/// enqueueing never blocks the caller.
pub struct TransportWorker {
    local_addr: SocketAddr,
    outbound: Mutex<Option<Sender<Packet>>>,
    inbound: Receiver<Inbound>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    receive_timeout: Duration,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportWorker {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: &TransportConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        let (out_tx, out_rx) = channel::bounded(config.outbound_capacity.max(1));
        let (in_tx, in_rx) = channel::bounded(config.inbound_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StatsCounters::default());

        let send_thread = {
            let socket = socket.try_clone()?;
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            let loss = config.packet_loss.clone();
            thread::Builder::new()
                .name(format!("huddle-send-{}", local_addr.port()))
                .spawn(move || send_loop(socket, out_rx, running, stats, loss))?
        };

        let recv_thread = {
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name(format!("huddle-recv-{}", local_addr.port()))
                .spawn(move || receive_loop(socket, in_tx, running, stats))?
        };

        log::debug!("Transport bound to {}", local_addr);

        Ok(Self {
            local_addr,
            outbound: Mutex::new(Some(out_tx)),
            inbound: in_rx,
            running,
            stats,
            receive_timeout: config.socket_timeout(),
            threads: Mutex::new(vec![send_thread, recv_thread]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.snapshot()
    }

    /// Queues a packet for transmission to `packet.addr`.
    pub fn send(&self, packet: Packet) {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            log::debug!("Dropping {:?} to {}: transport closed", packet.kind, packet.addr);
            return;
        };

        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                self.stats.record_dropped();
                log::warn!("Outbound queue full, dropping {:?} to {}", packet.kind, packet.addr);
            }
            Err(TrySendError::Disconnected(packet)) => {
                log::debug!("Dropping {:?} to {}: send loop gone", packet.kind, packet.addr);
            }
        }
    }

    /// Blocks for up to the configured socket timeout.
    pub fn receive(&self) -> Received {
        self.receive_within(self.receive_timeout)
    }

    pub fn receive_within(&self, timeout: Duration) -> Received {
        if !self.is_running() {
            return Received::Closed;
        }

        match self.inbound.recv_timeout(timeout) {
            Ok(Inbound::Packet(packet)) => Received::Packet(packet),
            Ok(Inbound::Rejected { from, error }) => Received::Rejected { from, error },
            Err(RecvTimeoutError::Timeout) => Received::Timeout,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Stops both threads. Queued packets in either direction are discarded.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.outbound.lock().take();

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        log::debug!("Transport on {} shut down", self.local_addr);
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_loop(
    socket: UdpSocket,
    outbound: Receiver<Packet>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    loss: PacketLossSimulation,
) {
    for packet in outbound.iter() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        if loss.should_drop() {
            stats.record_dropped();
            continue;
        }

        let data = match packet.serialize() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Not sending {:?} to {}: {}", packet.kind, packet.addr, e);
                continue;
            }
        };

        match socket.send_to(&data, packet.addr) {
            Ok(bytes) => stats.record_sent(bytes),
            Err(e) => log::debug!("Send to {} failed: {}", packet.addr, e),
        }
    }
}

fn receive_loop(
    socket: UdpSocket,
    inbound: Sender<Inbound>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
) {
    let mut buffer = [0u8; MAX_PACKET_SIZE];

    while running.load(Ordering::SeqCst) {
        let (size, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::debug!("Receive failed: {}", e);
                continue;
            }
        };

        stats.record_received(size);

        let item = match Packet::deserialize(&buffer[..size], from) {
            Ok(packet) => Inbound::Packet(packet),
            Err(error) => {
                stats.record_rejected();
                log::warn!(
                    "Rejected {}-byte datagram from {}: {} ({:02x?})",
                    size,
                    from,
                    error,
                    &buffer[..size.min(16)]
                );
                Inbound::Rejected { from, error }
            }
        };

        match inbound.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.record_dropped();
                log::warn!("Inbound queue full, dropping datagram from {}", from);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}
