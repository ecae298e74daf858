use common::Logging;

use crate::prober::Reply;

/// One CSV row per matched reply. Timestamps are ns since the UNIX epoch.
#[derive(Debug, Logging, Clone, Default)]
pub struct PingResult {
    pub seq: u16,
    pub ttl: u8,
    pub rtt: f64,
    pub size: usize,
    pub send_timestamp: u128,
    pub recv_timestamp: u128,
    pub src_addr: String,
    pub dst_addr: String,
}

impl From<&Reply> for PingResult {
    fn from(reply: &Reply) -> Self {
        Self {
            seq: reply.sequence,
            ttl: reply.ttl,
            rtt: reply.rtt_ms,
            size: reply.size,
            send_timestamp: reply.send_timestamp.as_nanos(),
            recv_timestamp: reply.recv_timestamp.as_nanos(),
            src_addr: reply.source.to_string(),
            dst_addr: reply.destination.to_string(),
        }
    }
}
