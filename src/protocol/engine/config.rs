//! Engine configuration: application filters, default queue, send error
//! policy and worker timings.
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::Pgn;
use crate::protocol::transport::tp::BAM_INTERVAL_MS;
use alloc::vec::Vec;

/// Default bound on the wait for workers during shutdown.
pub const SHUTDOWN_JOIN_MS: u32 = 200;

//==================================================================================FILTER
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Accepts application PDUs by PGN and/or source. Absent fields match anything.
pub struct J1939Filter {
    /// Compared in message form (PS cleared for destination-specific PGNs).
    pub pgn: Option<u32>,
    pub source: Option<u8>,
}

impl J1939Filter {
    pub const fn pgn(pgn: u32) -> Self {
        Self {
            pgn: Some(pgn),
            source: None,
        }
    }

    pub const fn source(source: u8) -> Self {
        Self {
            pgn: None,
            source: Some(source),
        }
    }

    pub const fn with_source(mut self, source: u8) -> Self {
        self.source = Some(source);
        self
    }

    pub fn matches(&self, pdu: &Pdu) -> bool {
        let pgn_matches = self
            .pgn
            .map_or(true, |pgn| Pgn::from_value(pgn).broadcast_form() == pdu.pgn());
        let source_matches = self.source.map_or(true, |source| source == pdu.source());
        pgn_matches && source_matches
    }
}

//==================================================================================ENGINE_CONFIG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Application PDUs must match at least one filter; an empty list accepts all.
    pub filters: Vec<J1939Filter>,
    /// Deliver broadcast traffic to the engine's default queue.
    pub broadcast: bool,
    /// Drop (and count) frames the CAN layer refuses instead of failing.
    pub ignore_send_errors: bool,
    /// Gap between two BAM data frames.
    pub bam_interval_ms: u32,
    /// Upper bound on the wait for workers during shutdown.
    pub shutdown_join_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            broadcast: true,
            ignore_send_errors: false,
            bam_interval_ms: BAM_INTERVAL_MS,
            shutdown_join_ms: SHUTDOWN_JOIN_MS,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: J1939Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = J1939Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_ignore_send_errors(mut self, ignore: bool) -> Self {
        self.ignore_send_errors = ignore;
        self
    }

    pub fn with_bam_interval_ms(mut self, interval_ms: u32) -> Self {
        self.bam_interval_ms = interval_ms;
        self
    }

    pub fn with_shutdown_join_ms(mut self, join_ms: u32) -> Self {
        self.shutdown_join_ms = join_ms;
        self
    }

    /// Filter verdict for an application PDU.
    pub fn accepts(&self, pdu: &Pdu) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(pdu))
    }
}
