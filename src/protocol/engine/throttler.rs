//! BAM pacing worker.
use super::{J1939Engine, Worker};
use crate::error::J1939Error;
use crate::protocol::transport::traits::can_bus::CanTx;
use crate::protocol::transport::traits::korri_timer::KorriTimer;
use embassy_sync::blocking_mutex::raw::RawMutex;
use futures_util::future::{select, Either};
use futures_util::pin_mut;

impl<M: RawMutex, T: CanTx> J1939Engine<M, T> {
    /// Throttle worker: sole consumer of the BAM queue. Each queued frame,
    /// BAM announce or TP.DT, is sent `bam_interval_ms` after the previous
    /// one, so receivers always see the mandated gap.
    ///
    /// Returns `Ok(())` on shutdown; a send failure stops the worker unless
    /// `ignore_send_errors` is set.
    pub async fn run_throttler<K: KorriTimer>(
        &self,
        mut timer: K,
    ) -> Result<(), J1939Error<T::Error>> {
        if !self.start_worker(Worker::Throttler) {
            return Ok(());
        }

        let result = loop {
            let frame = {
                let stop = self.throttler_stop.wait();
                let next = self.throttle_queue.receive();
                pin_mut!(stop);
                pin_mut!(next);
                match select(stop, next).await {
                    Either::Left(_) => break Ok(()),
                    Either::Right((frame, _)) => frame,
                }
            };

            {
                let stop = self.throttler_stop.wait();
                let gap = timer.delay_ms(self.config.bam_interval_ms);
                pin_mut!(stop);
                pin_mut!(gap);
                if let Either::Left(_) = select(stop, gap).await {
                    break Ok(());
                }
            }

            if let Err(err) = self.transmit(&frame).await {
                break Err(J1939Error::Transport(err));
            }
        };

        self.throttler_done.signal(());

        #[cfg(feature = "defmt")]
        defmt::info!("J1939 throttler stopped");

        result
    }
}
