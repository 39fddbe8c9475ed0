//! Minimal abstraction for an asynchronous CAN bus, split into its transmit
//! and receive halves so the receive worker never waits on the transmit lock.
use crate::protocol::transport::can_frame::CanFrame;
use futures_util::Future;

/// Transmit half of a CAN bus.
pub trait CanTx {
    type Error: core::fmt::Debug;
    /// Emit a frame on the bus. Asynchronous to accommodate non-blocking drivers.
    fn send<'a>(
        &'a mut self,
        frame: &'a CanFrame,
    ) -> impl Future<Output = Result<(), Self::Error>> + 'a;

    /// Release the underlying device. Called once by the engine on shutdown.
    fn close(&mut self) -> impl Future<Output = ()> + '_ {
        async {}
    }
}

/// Receive half of a CAN bus.
pub trait CanRx {
    type Error: core::fmt::Debug;
    /// Retrieve the next available frame. Asynchronously waits until data arrives.
    fn recv<'a>(&'a mut self) -> impl Future<Output = Result<CanFrame, Self::Error>> + 'a;
}
