use std::{fmt, net::Ipv4Addr};

use common::Statistics;

/// Fraction of requests without a matched reply. `None` before anything was
/// sent. Duplicate replies never push the loss below zero.
pub fn loss_fraction(sent: u64, received: u64) -> Option<f64> {
    if sent == 0 {
        return None;
    }
    Some(sent.saturating_sub(received) as f64 / sent as f64)
}

/// End of session report.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub host: String,
    pub destination: Ipv4Addr,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub loss_fraction: f64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Summary {
    pub fn new(
        host: String,
        destination: Ipv4Addr,
        packets_sent: u64,
        rtt: &Statistics,
    ) -> Self {
        let packets_received = rtt.samples() as u64;
        Self {
            host,
            destination,
            packets_sent,
            packets_received,
            loss_fraction: loss_fraction(packets_sent, packets_received)
                .unwrap_or(0.0),
            min: rtt.min(),
            avg: rtt.mean(),
            max: rtt.max(),
            stddev: rtt.standard_deviation(),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "--- {} ({}) ping statistics ---",
            self.host, self.destination
        )?;
        writeln!(
            f,
            "{} packets transmitted, {} received, {:.1}% packet loss",
            self.packets_sent,
            self.packets_received,
            self.loss_fraction * 100.0
        )?;
        write!(
            f,
            "rtt min/avg/max/stddev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            self.min, self.avg, self.max, self.stddev
        )
    }
}
