//! NewReno congestion control: slow start, congestion avoidance, and a
//! recovery period entered on each newly-detected loss.

use std::time::Instant;

const DEFAULT_MSS: usize = 1460;
const MINIMUM_WINDOW: usize = 2 * DEFAULT_MSS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SlowStart,
    CongestionAvoidance,
    Recovery,
}

/// Tracks the congestion window and current phase for one connection.
/// Congestion control is connection-wide, not per packet-number-space.
#[derive(Debug)]
pub struct CongestionController {
    congestion_window: usize,
    ssthresh: usize,
    bytes_in_flight: usize,
    phase: Phase,
    end_of_recovery: Option<Instant>,
}

impl CongestionController {
    pub fn new() -> Self {
        Self {
            congestion_window: 10 * DEFAULT_MSS,
            ssthresh: usize::MAX,
            bytes_in_flight: 0,
            phase: Phase::SlowStart,
            end_of_recovery: None,
        }
    }

    pub fn congestion_window(&self) -> usize {
        self.congestion_window
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn is_congestion_window_available(&self, packet_size: usize) -> bool {
        self.bytes_in_flight + packet_size <= self.congestion_window
    }

    pub fn on_packet_sent(&mut self, size: usize) {
        self.bytes_in_flight += size;
    }

    /// `newly_acked` is the total size of packets the peer just acknowledged
    /// that were sent after the start of the current recovery period (if
    /// any); packets sent before it don't end recovery.
    pub fn on_packets_acked(&mut self, newly_acked_bytes: usize, sent_times: &[Instant]) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(newly_acked_bytes);

        if self.phase == Phase::Recovery {
            if let Some(end) = self.end_of_recovery {
                if sent_times.iter().any(|&t| t > end) {
                    self.phase = Phase::CongestionAvoidance;
                }
            }
            return;
        }

        match self.phase {
            Phase::SlowStart => {
                self.congestion_window += newly_acked_bytes;
                if self.congestion_window >= self.ssthresh {
                    self.phase = Phase::CongestionAvoidance;
                }
            }
            Phase::CongestionAvoidance => {
                self.congestion_window +=
                    DEFAULT_MSS * newly_acked_bytes / self.congestion_window.max(1);
            }
            Phase::Recovery => unreachable!(),
        }
    }

    /// A loss was just detected: halve the window and enter recovery,
    /// unless already in recovery for this sending period.
    pub fn on_packets_lost(&mut self, loss_time: Instant) {
        if self.phase == Phase::Recovery && self.end_of_recovery.is_some_and(|end| loss_time <= end)
        {
            return;
        }
        self.ssthresh = (self.congestion_window / 2).max(MINIMUM_WINDOW);
        self.congestion_window = self.ssthresh;
        self.phase = Phase::Recovery;
        self.end_of_recovery = Some(Instant::now());
    }

    /// A persistent congestion signal (every outstanding packet across a
    /// sustained period was lost) resets to the minimum window.
    pub fn on_persistent_congestion(&mut self) {
        self.congestion_window = MINIMUM_WINDOW;
        self.phase = Phase::SlowStart;
        self.ssthresh = usize::MAX;
        self.end_of_recovery = None;
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_in_slow_start_with_ten_mss_window() {
        let cc = CongestionController::new();
        assert_eq!(cc.congestion_window(), 10 * DEFAULT_MSS);
    }

    #[test]
    fn slow_start_grows_window_on_ack() {
        let mut cc = CongestionController::new();
        cc.on_packet_sent(1000);
        let before = cc.congestion_window();
        cc.on_packets_acked(1000, &[Instant::now()]);
        assert!(cc.congestion_window() > before);
    }

    #[test]
    fn loss_halves_window_and_enters_recovery() {
        let mut cc = CongestionController::new();
        let before = cc.congestion_window();
        cc.on_packets_lost(Instant::now());
        assert_eq!(cc.congestion_window(), before / 2);
        assert_eq!(cc.phase, Phase::Recovery);
    }

    #[test]
    fn window_never_drops_below_minimum() {
        let mut cc = CongestionController::new();
        for _ in 0..20 {
            cc.on_packets_lost(Instant::now());
        }
        assert!(cc.congestion_window() >= MINIMUM_WINDOW);
    }

    #[test]
    fn persistent_congestion_resets_to_slow_start() {
        let mut cc = CongestionController::new();
        cc.on_packets_lost(Instant::now());
        std::thread::sleep(Duration::from_millis(1));
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), MINIMUM_WINDOW);
        assert_eq!(cc.phase, Phase::SlowStart);
    }
}
