//! Asynchronous timer abstraction providing the timing primitives required
//! by BAM pacing, receive timeouts and request retries.

/// Timer trait abstraction; must remain thread-safe when applicable.
pub trait KorriTimer {
    /// Asynchronously wait for `millis` milliseconds.
    fn delay_ms<'a>(&'a mut self, millis: u32) -> impl core::future::Future<Output = ()> + 'a;
}

#[cfg(feature = "embassy-time")]
#[derive(Debug, Default, Clone, Copy)]
/// `KorriTimer` backed by the embassy time driver.
pub struct EmbassyTimer;

#[cfg(feature = "embassy-time")]
impl KorriTimer for EmbassyTimer {
    async fn delay_ms(&mut self, millis: u32) {
        embassy_time::Timer::after(embassy_time::Duration::from_millis(millis as u64)).await;
    }
}
