//! J1939 dispatch engine.
//!
//! The engine owns the transmit half of the bus and routes every inbound
//! frame to the registered [`Node`]s or to its default queue. Two workers
//! drive it and must be spawned by the application on its executor:
//!
//! - [`J1939Engine::run_receiver`] reads the bus, reassembles transport
//!   protocol transfers and dispatches the resulting PDUs;
//! - [`J1939Engine::run_throttler`] paces the data frames of broadcast
//!   (BAM) transfers.
//!
//! ```rust,ignore
//! static ENGINE: StaticCell<J1939Engine<CriticalSectionRawMutex, MyTx>> = StaticCell::new();
//! let engine = &*ENGINE.init(J1939Engine::new(tx, EngineConfig::default()));
//! spawner.spawn(receiver(engine, rx))?;
//! spawner.spawn(throttler(engine, EmbassyTimer))?;
//! engine.send(&pdu).await?;
//! ```
use crate::error::{J1939Error, ProtocolViolation};
use crate::protocol::managment::node::{Node, NodeShared};
use crate::protocol::security::SeedKeyGenerator;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::tp::segmenter::TpSegmenter;
use crate::protocol::transport::tp::session::{TxSession, TxSessions};
use crate::protocol::transport::traits::can_bus::CanTx;
use crate::protocol::transport::traits::korri_timer::KorriTimer;
use crate::protocol::transport::MAX_SINGLE_FRAME_PAYLOAD;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use futures_util::future::{select, Either};
use futures_util::pin_mut;

pub mod config;
mod dispatch;
mod throttler;

pub use config::{EngineConfig, J1939Filter};

/// Capacity of the engine's default queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
/// Capacity of the BAM pacing queue: the announce and 255 data frames of
/// one full transfer.
pub const THROTTLE_QUEUE_DEPTH: usize = 256;

//==================================================================================STATS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Counters maintained by the workers.
pub struct EngineStats {
    /// Frames with a standard (11-bit) identifier.
    pub non_j1939_frames: u32,
    /// Application PDUs rejected by the filters.
    pub filtered_pdus: u32,
    /// PDUs no queue would take (no listener, or default queue disabled).
    pub undeliverable_pdus: u32,
    /// PDUs lost to a full queue.
    pub queue_overflows: u32,
    pub protocol_violations: u32,
    pub last_violation: Option<ProtocolViolation>,
    /// Frames dropped under `ignore_send_errors`.
    pub send_errors_ignored: u32,
    /// Key responses emitted.
    pub keys_sent: u32,
    /// Inbound transfers being reassembled, as last published by the receiver.
    pub rx_in_flight: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    running: bool,
    closed: bool,
    receiver_started: bool,
    throttler_started: bool,
    stats: EngineStats,
}

#[derive(Clone, Copy)]
enum Worker {
    Receiver,
    Throttler,
}

//==================================================================================ENGINE
/// J1939 protocol engine. `M` selects the mutex flavour shared by every
/// internal lock and queue; `T` is the transmit half of the CAN bus.
pub struct J1939Engine<M: RawMutex, T: CanTx> {
    tx: Mutex<M, T>,
    config: EngineConfig,
    key_generator: Option<Box<dyn SeedKeyGenerator + Send + Sync>>,
    default_queue: Channel<M, Pdu, DEFAULT_QUEUE_DEPTH>,
    listeners: BlockingMutex<M, RefCell<Vec<Arc<NodeShared<M>>>>>,
    tx_sessions: BlockingMutex<M, RefCell<TxSessions>>,
    throttle_queue: Channel<M, CanFrame, THROTTLE_QUEUE_DEPTH>,
    /// Held while one transfer is queued, so BAM frames never interleave.
    throttle_enqueue: Mutex<M, ()>,
    state: BlockingMutex<M, RefCell<EngineState>>,
    receiver_stop: Signal<M, ()>,
    receiver_done: Signal<M, ()>,
    throttler_stop: Signal<M, ()>,
    throttler_done: Signal<M, ()>,
}

impl<M: RawMutex, T: CanTx> J1939Engine<M, T> {
    pub fn new(tx: T, config: EngineConfig) -> Self {
        Self {
            tx: Mutex::new(tx),
            config,
            key_generator: None,
            default_queue: Channel::new(),
            listeners: BlockingMutex::new(RefCell::new(Vec::new())),
            tx_sessions: BlockingMutex::new(RefCell::new(TxSessions::new())),
            throttle_queue: Channel::new(),
            throttle_enqueue: Mutex::new(()),
            state: BlockingMutex::new(RefCell::new(EngineState {
                running: true,
                ..EngineState::default()
            })),
            receiver_stop: Signal::new(),
            receiver_done: Signal::new(),
            throttler_stop: Signal::new(),
            throttler_done: Signal::new(),
        }
    }

    /// Answer DM18 seed requests with keys computed by `generator`.
    pub fn with_key_generator<G>(mut self, generator: G) -> Self
    where
        G: SeedKeyGenerator + Send + Sync + 'static,
    {
        self.key_generator = Some(Box::new(generator));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.lock(|state| state.borrow().running)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> EngineStats {
        self.state.lock(|state| state.borrow().stats)
    }

    /// Transport transfers in flight in either direction: outbound RTS/CTS
    /// transfers not yet acknowledged plus inbound ones under reassembly.
    pub fn transmissions_in_progress(&self) -> usize {
        self.outbound_in_progress() + self.receptions_in_progress()
    }

    /// Outbound RTS/CTS transfers not yet acknowledged.
    pub fn outbound_in_progress(&self) -> usize {
        self.tx_sessions.lock(|sessions| sessions.borrow().len())
    }

    /// Inbound transfers under reassembly.
    pub fn receptions_in_progress(&self) -> usize {
        self.stats().rx_in_flight
    }

    //==================================================================================SEND
    /// Send a PDU. Up to eight bytes go out as a single frame; larger
    /// payloads use RTS/CTS towards a specific destination and BAM otherwise.
    ///
    /// Single frames and RTS announces are on the bus when this returns;
    /// RTS transfers continue as CTS frames arrive. A BAM transfer is queued
    /// whole, announce first, and paced by [`run_throttler`](Self::run_throttler):
    /// transfers are sent one after the other in the order they were queued.
    pub async fn send(&self, pdu: &Pdu) -> Result<(), J1939Error<T::Error>> {
        if !self.is_running() {
            return Err(J1939Error::NotRunning);
        }

        if let Some(frame) = pdu.to_frame() {
            return self.transmit(&frame).await.map_err(J1939Error::Transport);
        }
        debug_assert!(pdu.payload().len() > MAX_SINGLE_FRAME_PAYLOAD);

        let segmenter = TpSegmenter::new(pdu);
        if segmenter.is_broadcast() {
            let _order = self.throttle_enqueue.lock().await;
            self.throttle_queue.send(segmenter.announce_frame()).await;
            for frame in segmenter.frames() {
                self.throttle_queue.send(frame).await;
            }

            #[cfg(feature = "defmt")]
            defmt::debug!(
                "BAM {=u32:#x} from {=u8}: {=u8} packets queued",
                segmenter.message_pgn(),
                segmenter.source(),
                segmenter.total_packets()
            );
            return Ok(());
        }

        let (source, destination) = (segmenter.source(), segmenter.destination());
        let session = TxSession {
            frames: segmenter.frames().collect(),
            message_pgn: segmenter.message_pgn(),
            total_length: pdu.payload().len(),
        };
        let replaced = self
            .tx_sessions
            .lock(|sessions| sessions.borrow_mut().insert(source, destination, session));
        if replaced.is_some() {
            self.record_violation(ProtocolViolation::DuplicateTransfer {
                sender: source,
                receiver: destination,
            });
        }

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "RTS {=u32:#x} {=u8} -> {=u8}: {=u8} packets",
            segmenter.message_pgn(),
            source,
            destination,
            segmenter.total_packets()
        );

        if let Err(err) = self.transmit(&segmenter.announce_frame()).await {
            self.tx_sessions
                .lock(|sessions| sessions.borrow_mut().remove(source, destination));
            return Err(J1939Error::Transport(err));
        }
        Ok(())
    }

    /// Put one frame on the bus, honouring `ignore_send_errors`.
    pub(crate) async fn transmit(&self, frame: &CanFrame) -> Result<(), T::Error> {
        let result = {
            let mut tx = self.tx.lock().await;
            tx.send(frame).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(_err) if self.config.ignore_send_errors => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Send error ignored, frame {=u32:#x} dropped", frame.raw_id());

                self.update_stats(|stats| {
                    stats.send_errors_ignored = stats.send_errors_ignored.wrapping_add(1)
                });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    //==================================================================================RECEIVE
    /// Next PDU of the default queue. `None` once `timeout_ms` elapses;
    /// without a timeout the call waits indefinitely.
    pub async fn recv<K: KorriTimer>(&self, timer: &mut K, timeout_ms: Option<u32>) -> Option<Pdu> {
        let Some(timeout_ms) = timeout_ms else {
            return Some(self.default_queue.receive().await);
        };
        let next = self.default_queue.receive();
        let deadline = timer.delay_ms(timeout_ms);
        pin_mut!(next);
        pin_mut!(deadline);
        match select(next, deadline).await {
            Either::Left((pdu, _)) => Some(pdu),
            Either::Right(_) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<Pdu> {
        self.default_queue.try_receive().ok()
    }

    //==================================================================================LISTENERS
    /// Register a node's inbox. Fails when another registered node already
    /// claims one of its addresses; registering the same node twice is a no-op.
    pub fn connect(&self, node: &Node<'_, M, T>) -> Result<(), J1939Error<T::Error>> {
        let shared = node.shared();
        let addresses = shared.addresses();
        self.listeners.lock(|listeners| {
            let mut listeners = listeners.borrow_mut();
            if listeners.iter().any(|listener| Arc::ptr_eq(listener, shared)) {
                return Ok(());
            }
            for listener in listeners.iter() {
                if let Some(&address) = addresses.iter().find(|a| listener.holds(**a)) {
                    return Err(J1939Error::ConflictingClaim { address });
                }
            }
            listeners.push(Arc::clone(shared));
            Ok(())
        })
    }

    /// Remove a node's inbox from the routing table.
    pub fn disconnect(&self, node: &Node<'_, M, T>) {
        let shared = node.shared();
        self.listeners.lock(|listeners| {
            listeners
                .borrow_mut()
                .retain(|listener| !Arc::ptr_eq(listener, shared));
        });
    }

    /// Apply `claim` to `node` unless another registered node holds
    /// `address`. The check and the update happen under the listeners lock.
    pub(crate) fn reserve_address(
        &self,
        address: u8,
        node: &Arc<NodeShared<M>>,
        claim: impl FnOnce(&NodeShared<M>),
    ) -> bool {
        self.listeners.lock(|listeners| {
            let taken = listeners
                .borrow()
                .iter()
                .any(|listener| !Arc::ptr_eq(listener, node) && listener.holds(address));
            if !taken {
                claim(&**node);
            }
            !taken
        })
    }

    /// `true` when any registered node holds `address`.
    pub(crate) fn is_local_address(&self, address: u8) -> bool {
        self.listeners
            .lock(|listeners| listeners.borrow().iter().any(|listener| listener.holds(address)))
    }

    fn listeners_snapshot(&self) -> Vec<Arc<NodeShared<M>>> {
        self.listeners.lock(|listeners| listeners.borrow().clone())
    }

    //==================================================================================LIFECYCLE
    /// Stop both workers and close the transmit handle.
    ///
    /// Started workers are given `shutdown_join_ms` to acknowledge. Pending
    /// transfers are abandoned. Later calls return immediately.
    pub async fn shutdown<K: KorriTimer>(&self, timer: &mut K) {
        let workers = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.closed {
                return None;
            }
            state.closed = true;
            state.running = false;
            Some((state.receiver_started, state.throttler_started))
        });
        let Some((receiver_started, throttler_started)) = workers else {
            return;
        };

        #[cfg(feature = "defmt")]
        defmt::info!("J1939 engine shutting down");

        self.receiver_stop.signal(());
        self.throttler_stop.signal(());

        let join = async {
            if receiver_started {
                self.receiver_done.wait().await;
            }
            if throttler_started {
                self.throttler_done.wait().await;
            }
        };
        let deadline = timer.delay_ms(self.config.shutdown_join_ms);
        pin_mut!(join);
        pin_mut!(deadline);
        if let Either::Right(_) = select(join, deadline).await {
            #[cfg(feature = "defmt")]
            defmt::warn!("Workers did not stop within {=u32} ms", self.config.shutdown_join_ms);
        }

        while self.throttle_queue.try_receive().is_ok() {}
        self.tx_sessions
            .lock(|sessions| *sessions.borrow_mut() = TxSessions::new());

        self.tx.lock().await.close().await;

        #[cfg(feature = "defmt")]
        defmt::info!("J1939 engine stopped");
    }

    /// Mark a worker as started; `false` once the engine is shut down.
    fn start_worker(&self, worker: Worker) -> bool {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if !state.running {
                return false;
            }
            match worker {
                Worker::Receiver => state.receiver_started = true,
                Worker::Throttler => state.throttler_started = true,
            }
            true
        })
    }

    //==================================================================================STATS_HELPERS
    fn update_stats(&self, update: impl FnOnce(&mut EngineStats)) {
        self.state.lock(|state| update(&mut state.borrow_mut().stats));
    }

    pub(crate) fn record_violation(&self, violation: ProtocolViolation) {
        #[cfg(feature = "defmt")]
        defmt::warn!("Protocol violation: {}", violation);

        self.update_stats(|stats| {
            stats.protocol_violations = stats.protocol_violations.wrapping_add(1);
            stats.last_violation = Some(violation);
        });
    }
}
