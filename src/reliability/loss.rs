use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::rtt::RttEstimator;

/// Packet-threshold constant: a packet three or more behind the largest
/// acknowledged is declared lost outright.
const PACKET_THRESHOLD: u64 = 3;
/// Time-threshold multiplier (9/8 RTT).
const TIME_THRESHOLD_NUMERATOR: u32 = 9;
const TIME_THRESHOLD_DENOMINATOR: u32 = 8;

#[derive(Debug, Clone)]
struct SentPacket {
    time_sent: Instant,
    size: usize,
    ack_eliciting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossEvent {
    Lost(u64),
}

/// Tracks outstanding sent packets for one packet-number space and declares
/// losses via the packet and time thresholds, plus handshake
/// retransmission / PTO alarms.
#[derive(Debug)]
pub struct LossDetector {
    sent: BTreeMap<u64, SentPacket>,
    pto_count: u32,
    time_of_last_sent_ack_eliciting: Option<Instant>,
}

impl LossDetector {
    pub fn new() -> Self {
        Self {
            sent: BTreeMap::new(),
            pto_count: 0,
            time_of_last_sent_ack_eliciting: None,
        }
    }

    pub fn on_packet_sent(&mut self, packet_number: u64, size: usize, ack_eliciting: bool) {
        let now = Instant::now();
        if ack_eliciting {
            self.time_of_last_sent_ack_eliciting = Some(now);
        }
        self.sent.insert(
            packet_number,
            SentPacket {
                time_sent: now,
                size,
                ack_eliciting,
            },
        );
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.sent.values().map(|p| p.size).sum()
    }

    /// Remove every packet number the peer just acknowledged, returning
    /// their sizes and original send times (the latter lets the caller take
    /// an RTT sample from whichever acked packet is newest).
    pub fn on_ack_received_with_times(
        &mut self,
        acked_packet_numbers: &[u64],
    ) -> Vec<(usize, Instant)> {
        self.pto_count = 0;
        acked_packet_numbers
            .iter()
            .filter_map(|pn| self.sent.remove(pn).map(|p| (p.size, p.time_sent)))
            .collect()
    }

    /// Remove every packet number the peer just acknowledged, returning
    /// their sizes (for congestion control to react to newly-acked bytes).
    pub fn on_ack_received(&mut self, acked_packet_numbers: &[u64]) -> Vec<usize> {
        self.on_ack_received_with_times(acked_packet_numbers)
            .into_iter()
            .map(|(size, _)| size)
            .collect()
    }

    /// Declare losses among packets still outstanding below `largest_acked`,
    /// using both the packet-count and time thresholds.
    pub fn detect_losses(&mut self, largest_acked: u64, rtt: &RttEstimator) -> Vec<LossEvent> {
        let loss_delay = (rtt.smoothed().max(rtt.latest()) * TIME_THRESHOLD_NUMERATOR)
            / TIME_THRESHOLD_DENOMINATOR;
        let now = Instant::now();

        let lost_pns: Vec<u64> = self
            .sent
            .iter()
            .filter(|(&pn, sent)| {
                if pn > largest_acked {
                    return false;
                }
                let by_count = largest_acked.saturating_sub(pn) >= PACKET_THRESHOLD;
                let by_time = now.saturating_duration_since(sent.time_sent) > loss_delay;
                by_count || by_time
            })
            .map(|(&pn, _)| pn)
            .collect();

        for pn in &lost_pns {
            self.sent.remove(pn);
        }

        lost_pns.into_iter().map(LossEvent::Lost).collect()
    }

    /// Probe Timeout fired: no ack-eliciting packet has been acknowledged
    /// within the RTT-derived PTO window, backed off for each consecutive
    /// PTO already fired without an intervening ack.
    pub fn pto_expired(&self, rtt: &RttEstimator) -> bool {
        match self.time_of_last_sent_ack_eliciting {
            Some(sent_at) => {
                Instant::now().saturating_duration_since(sent_at) >= rtt.pto_backoff(self.pto_count)
            }
            None => false,
        }
    }

    pub fn on_pto_fired(&mut self) -> u32 {
        self.pto_count += 1;
        self.pto_count
    }

    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }
}

impl Default for LossDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_threshold_declares_loss_without_waiting() {
        let mut detector = LossDetector::new();
        for pn in 0..=4 {
            detector.on_packet_sent(pn, 100, true);
        }
        let rtt = RttEstimator::new(Duration::from_secs(10));
        let losses = detector.detect_losses(4, &rtt);
        assert_eq!(losses, vec![LossEvent::Lost(0), LossEvent::Lost(1)]);
    }

    #[test]
    fn acked_packets_are_removed_and_reset_pto_count() {
        let mut detector = LossDetector::new();
        detector.on_packet_sent(0, 50, true);
        detector.on_pto_fired();
        assert_eq!(detector.pto_count(), 1);
        let sizes = detector.on_ack_received(&[0]);
        assert_eq!(sizes, vec![50]);
        assert_eq!(detector.pto_count(), 0);
        assert_eq!(detector.bytes_in_flight(), 0);
    }

    #[test]
    fn pto_not_expired_immediately_after_send() {
        let mut detector = LossDetector::new();
        detector.on_packet_sent(0, 50, true);
        let rtt = RttEstimator::new(Duration::from_secs(10));
        assert!(!detector.pto_expired(&rtt));
    }
}
