//! Logical J1939 node: a NAME, the addresses it claims and an inbox fed by
//! the engine.
//!
//! The node is driven by the application: it pulls PDUs with
//! [`Node::recv`] and hands them to [`Node::process`], which answers the
//! network management traffic (claim contests, requests for Address
//! Claimed, Commanded Address) and returns everything else.
//!
//! ```rust,ignore
//! let node = Node::new(engine, name, &[0x80]);
//! engine.connect(&node)?;
//! node.start_address_claim().await?;
//! loop {
//!     if let Some(pdu) = node.recv(&mut timer, Some(1000)).await {
//!         if let Some(pdu) = node.process(pdu).await? {
//!             handle(pdu);
//!         }
//!     }
//! }
//! ```
use crate::error::J1939Error;
use crate::protocol::engine::J1939Engine;
use crate::protocol::managment::address_claiming::{
    arbitrary_addresses_after, build_address_claim, build_cannot_claim, build_request,
    is_acknowledgement_for, parse_commanded_address, requested_pgn, resolve_claim, ClaimContest,
};
use crate::protocol::managment::node_name::NodeName;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::{
    Pgn, PGN_ADDRESS_CLAIMED, PGN_COMMANDED_ADDRESS, PGN_REQUEST,
};
use crate::protocol::transport::traits::can_bus::CanTx;
use crate::protocol::transport::traits::korri_timer::KorriTimer;
use crate::protocol::transport::ADDRESS_GLOBAL;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use futures_util::future::{select, Either};
use futures_util::pin_mut;

/// Capacity of a node inbox.
pub const NODE_QUEUE_DEPTH: usize = 32;

//==================================================================================SHARED
/// Part of a node visible to the engine's dispatcher.
pub(crate) struct NodeShared<M: RawMutex> {
    name: NodeName,
    addresses: BlockingMutex<M, RefCell<Vec<u8>>>,
    pub(crate) inbox: Channel<M, Pdu, NODE_QUEUE_DEPTH>,
}

impl<M: RawMutex> NodeShared<M> {
    pub(crate) fn holds(&self, address: u8) -> bool {
        self.addresses
            .lock(|addresses| addresses.borrow().contains(&address))
    }

    pub(crate) fn addresses(&self) -> Vec<u8> {
        self.addresses.lock(|addresses| addresses.borrow().clone())
    }

    fn first_address(&self) -> Option<u8> {
        self.addresses
            .lock(|addresses| addresses.borrow().first().copied())
    }

    fn add(&self, address: u8) {
        self.addresses.lock(|addresses| {
            let mut addresses = addresses.borrow_mut();
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        });
    }

    /// Swap `lost` for `replacement` in place, or drop it.
    fn replace(&self, lost: u8, replacement: Option<u8>) {
        self.addresses.lock(|addresses| {
            let mut addresses = addresses.borrow_mut();
            match (addresses.iter().position(|&a| a == lost), replacement) {
                (Some(index), Some(address)) => addresses[index] = address,
                (Some(index), None) => {
                    addresses.remove(index);
                }
                (None, Some(address)) => addresses.push(address),
                (None, None) => {}
            }
        });
    }

    /// Make `address` the first claimed address, replacing the current one.
    fn move_first_to(&self, address: u8) {
        self.addresses.lock(|addresses| {
            let mut addresses = addresses.borrow_mut();
            if !addresses.is_empty() {
                addresses.remove(0);
            }
            addresses.retain(|&a| a != address);
            addresses.insert(0, address);
        });
    }
}

//==================================================================================NODE
/// Application-owned J1939 node bound to an engine. Dropping the node
/// disconnects it.
pub struct Node<'e, M: RawMutex, T: CanTx> {
    engine: &'e J1939Engine<M, T>,
    shared: Arc<NodeShared<M>>,
}

impl<'e, M: RawMutex, T: CanTx> Node<'e, M, T> {
    /// Create a node owning `addresses` (first one used as source). The node
    /// receives nothing until [`J1939Engine::connect`] registers it.
    pub fn new(engine: &'e J1939Engine<M, T>, name: NodeName, addresses: &[u8]) -> Self {
        let mut owned = Vec::with_capacity(addresses.len());
        for &address in addresses {
            if !owned.contains(&address) {
                owned.push(address);
            }
        }
        Self {
            engine,
            shared: Arc::new(NodeShared {
                name,
                addresses: BlockingMutex::new(RefCell::new(owned)),
                inbox: Channel::new(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<NodeShared<M>> {
        &self.shared
    }

    pub fn name(&self) -> NodeName {
        self.shared.name
    }

    /// Addresses currently claimed.
    pub fn addresses(&self) -> Vec<u8> {
        self.shared.addresses()
    }

    /// Source address used by [`send_pgn`](Self::send_pgn).
    pub fn address(&self) -> Option<u8> {
        self.shared.first_address()
    }

    //==================================================================================CLAIMING
    /// Broadcast Address Claimed for every address, or Cannot Claim when
    /// none is left.
    pub async fn start_address_claim(&self) -> Result<(), J1939Error<T::Error>> {
        let addresses = self.addresses();
        if addresses.is_empty() {
            return self.engine.send(&build_cannot_claim(self.name())).await;
        }
        for address in addresses {
            #[cfg(feature = "defmt")]
            defmt::info!("Claiming address {=u8}", address);

            self.engine
                .send(&build_address_claim(self.name(), address))
                .await?;
        }
        Ok(())
    }

    /// Add `address` to the claimed set and announce it. Fails with
    /// `ConflictingClaim` when another local node already holds it.
    pub async fn claim_address(&self, address: u8) -> Result<(), J1939Error<T::Error>> {
        if !self
            .engine
            .reserve_address(address, &self.shared, |node| node.add(address))
        {
            return Err(J1939Error::ConflictingClaim { address });
        }
        self.engine
            .send(&build_address_claim(self.name(), address))
            .await
    }

    //==================================================================================RECEIVE
    /// Next inbox PDU, `None` once `timeout_ms` elapses. Without a timeout
    /// the call waits indefinitely.
    pub async fn recv<K: KorriTimer>(&self, timer: &mut K, timeout_ms: Option<u32>) -> Option<Pdu> {
        let Some(timeout_ms) = timeout_ms else {
            return Some(self.shared.inbox.receive().await);
        };
        let next = self.shared.inbox.receive();
        let deadline = timer.delay_ms(timeout_ms);
        pin_mut!(next);
        pin_mut!(deadline);
        match select(next, deadline).await {
            Either::Left((pdu, _)) => Some(pdu),
            Either::Right(_) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Pdu> {
        self.shared.inbox.try_receive().ok()
    }

    /// Handle network management PDUs. Returns the PDU when it is not
    /// consumed by the node.
    pub async fn process(&self, pdu: Pdu) -> Result<Option<Pdu>, J1939Error<T::Error>> {
        match pdu.pgn() {
            PGN_ADDRESS_CLAIMED => {
                if self.contest_claim(&pdu).await? {
                    return Ok(None);
                }
            }
            PGN_REQUEST if requested_pgn(&pdu) == Some(PGN_ADDRESS_CLAIMED) => {
                let for_us = match pdu.destination() {
                    Some(destination) if destination != ADDRESS_GLOBAL => {
                        self.shared.holds(destination)
                    }
                    _ => true,
                };
                if for_us {
                    self.start_address_claim().await?;
                    return Ok(None);
                }
            }
            PGN_COMMANDED_ADDRESS => {
                if let Some((name, address)) = parse_commanded_address(&pdu) {
                    if name == self.name() {
                        self.move_to(address).await?;
                        return Ok(None);
                    }
                }
            }
            _ => {}
        }
        Ok(Some(pdu))
    }

    /// Arbitrate an Address Claimed against our addresses. `true` when it
    /// contested one of them.
    async fn contest_claim(&self, pdu: &Pdu) -> Result<bool, J1939Error<T::Error>> {
        let name = self.name();
        for address in self.addresses() {
            match resolve_claim(pdu, name, address) {
                ClaimContest::NoConflict => continue,
                ClaimContest::Defend => {
                    #[cfg(feature = "defmt")]
                    defmt::info!("Claim contest on {=u8} won, defending", address);

                    self.engine.send(&build_address_claim(name, address)).await?;
                    return Ok(true);
                }
                ClaimContest::Yield => {
                    self.yield_address(address).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Release a lost address. Arbitrary-address-capable NAMEs move to the
    /// next address of 128..=247 no local node holds; others send Cannot Claim.
    async fn yield_address(&self, lost: u8) -> Result<(), J1939Error<T::Error>> {
        let name = self.name();
        let replacement = if name.is_arbitrary_address_capable() {
            arbitrary_addresses_after(lost)
                .filter(|&address| !self.shared.holds(address))
                .find(|&address| {
                    self.engine.reserve_address(address, &self.shared, |node| {
                        node.replace(lost, Some(address))
                    })
                })
        } else {
            None
        };
        if replacement.is_none() {
            self.shared.replace(lost, None);
        }

        match replacement {
            Some(address) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Address {=u8} lost, reclaiming {=u8}", lost, address);

                self.engine.send(&build_address_claim(name, address)).await
            }
            None => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Address {=u8} lost, cannot claim", lost);

                self.engine.send(&build_cannot_claim(name)).await
            }
        }
    }

    /// Commanded Address: the first claimed address becomes `address`.
    async fn move_to(&self, address: u8) -> Result<(), J1939Error<T::Error>> {
        if !self
            .engine
            .reserve_address(address, &self.shared, |node| node.move_first_to(address))
        {
            return Err(J1939Error::ConflictingClaim { address });
        }

        #[cfg(feature = "defmt")]
        defmt::info!("Commanded to address {=u8}", address);

        self.engine
            .send(&build_address_claim(self.name(), address))
            .await
    }

    //==================================================================================SEND
    /// Send `data` as `pgn` from the node's first address. `destination`
    /// applies to destination-specific PGNs only.
    pub async fn send_pgn(
        &self,
        pgn: u32,
        data: &[u8],
        destination: Option<u8>,
    ) -> Result<(), J1939Error<T::Error>> {
        let source = self.address().ok_or(J1939Error::NoAddress)?;
        let id = ArbitrationId::builder(pgn, source)
            .with_destination(destination)
            .build()?;
        let pdu = Pdu::new(id, data)?;
        self.engine.send(&pdu).await
    }

    /// Request `pgn` from `destination` (0xFF for everyone) and wait up to
    /// `timeout_ms` for the PGN itself or an Acknowledgement, retrying
    /// `retries` times.
    ///
    /// Network management PDUs arriving meanwhile are processed; other
    /// application PDUs are discarded.
    pub async fn request_pgn<K: KorriTimer>(
        &self,
        timer: &mut K,
        pgn: u32,
        destination: u8,
        timeout_ms: u32,
        retries: u8,
    ) -> Result<Pdu, J1939Error<T::Error>> {
        for _attempt in 0..=retries {
            let source = self.address().ok_or(J1939Error::NoAddress)?;
            let request = build_request(pgn, source, destination)?;
            self.engine.send(&request).await?;

            let response = self.await_response(pgn, destination);
            let deadline = timer.delay_ms(timeout_ms);
            pin_mut!(response);
            pin_mut!(deadline);
            match select(response, deadline).await {
                Either::Left((result, _)) => return result,
                Either::Right(_) => {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("Request {=u32:#x} attempt {=u8} timed out", pgn, _attempt);
                }
            }
        }
        Err(J1939Error::NoResponse { pgn })
    }

    async fn await_response(&self, pgn: u32, destination: u8) -> Result<Pdu, J1939Error<T::Error>> {
        let expected = Pgn::from_value(pgn).broadcast_form();
        loop {
            let pdu = self.shared.inbox.receive().await;
            let from_peer = destination == ADDRESS_GLOBAL || pdu.source() == destination;
            if from_peer && (pdu.pgn() == expected || is_acknowledgement_for(&pdu, pgn)) {
                return Ok(pdu);
            }
            self.process(pdu).await?;
        }
    }
}

impl<M: RawMutex, T: CanTx> Drop for Node<'_, M, T> {
    fn drop(&mut self) {
        self.engine.disconnect(self);
    }
}
