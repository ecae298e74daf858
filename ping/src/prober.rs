use std::{
    io,
    net::Ipv4Addr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use common::{resolve_ipv4, AsyncICMPSocket, ICMPSocket, Statistics};
use tracing::{debug, warn};

use crate::{
    error::{ConstructionError, ReceiveError, SendError, Step},
    icmp,
    summary::Summary,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
// Large enough for any IPv4 datagram on an ethernet link
const RECV_BUF_LEN: usize = 1500;

/// Datagram transport used by [`Prober`].
#[allow(async_fn_in_trait)]
pub trait PingSocket {
    async fn send_to(
        &mut self,
        packet: &[u8],
        destination: Ipv4Addr,
    ) -> io::Result<usize>;
    /// Receives one datagram, IP header included.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl PingSocket for AsyncICMPSocket {
    async fn send_to(
        &mut self,
        packet: &[u8],
        destination: Ipv4Addr,
    ) -> io::Result<usize> {
        AsyncICMPSocket::send_to(self, packet, destination).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).await
    }
}

/// Wall clock source for send timestamps and RTTs.
pub trait Clock {
    /// Time elapsed since the UNIX epoch.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long a single `receive` waits for a datagram
    pub timeout: Duration,
    /// ICMP payload length, timestamp included
    pub payload_len: usize,
    /// Interface to bind to
    pub iface: Option<String>,
    /// Identifier override, the process id is used otherwise
    pub identifier: Option<u16>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            payload_len: icmp::DEFAULT_PAYLOAD_LEN,
            iface: None,
            identifier: None,
        }
    }
}

/// A matched echo reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// ICMP bytes received, IP header excluded
    pub size: usize,
    pub ttl: u8,
    pub sequence: u16,
    pub rtt_ms: f64,
    pub send_timestamp: Duration,
    pub recv_timestamp: Duration,
}

/// Identifier for echo requests of this process.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// One ping session against a single destination.
///
/// The session owns its socket until [`Prober::finish`] consumes it.
pub struct Prober<S, C = SystemClock> {
    host: String,
    destination: Ipv4Addr,
    socket: S,
    clock: C,
    identifier: u16,
    /// Sequence number of the last request, wraps
    sequence: u16,
    /// Requests issued, never wraps
    transmitted: u64,
    timeout: Duration,
    payload_len: usize,
    rtt_samples: Vec<f64>,
    rtt_stats: Statistics,
    buf: Vec<u8>,
}

impl Prober<AsyncICMPSocket> {
    /// Opens a raw ICMP socket and resolves `host`.
    ///
    /// Needs `CAP_NET_RAW` (or root) and a running tokio runtime.
    pub async fn connect(
        host: &str,
        config: ProbeConfig,
    ) -> Result<Self, ConstructionError> {
        let fail = |step: Step| {
            move |source: io::Error| ConstructionError {
                host: host.to_string(),
                step,
                source,
            }
        };

        let mut socket = ICMPSocket::new().map_err(fail(Step::Socket))?;
        if let Some(iface) = config.iface.as_deref() {
            socket = socket.bind_device(iface).map_err(fail(Step::BindDevice))?;
        }
        check_timeout(config.timeout).map_err(fail(Step::ReceiveTimeout))?;
        let socket =
            AsyncICMPSocket::new(socket).map_err(fail(Step::Register))?;
        let destination =
            resolve_ipv4(host).await.map_err(fail(Step::Resolve))?;
        debug!(%host, %destination, "resolved");

        Self::with_socket(host, destination, socket, SystemClock, &config)
    }
}

fn check_timeout(timeout: Duration) -> io::Result<()> {
    if timeout.is_zero() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "receive timeout must be greater than zero",
        ));
    }
    Ok(())
}

impl<S: PingSocket, C: Clock> Prober<S, C> {
    /// Builds a session over an already opened socket.
    pub fn with_socket(
        host: impl Into<String>,
        destination: Ipv4Addr,
        socket: S,
        clock: C,
        config: &ProbeConfig,
    ) -> Result<Self, ConstructionError> {
        let host = host.into();
        if let Err(source) = check_timeout(config.timeout) {
            return Err(ConstructionError {
                host,
                step: Step::ReceiveTimeout,
                source,
            });
        }

        Ok(Self {
            host,
            destination,
            socket,
            clock,
            identifier: config.identifier.unwrap_or_else(process_identifier),
            sequence: 0,
            transmitted: 0,
            timeout: config.timeout,
            payload_len: config.payload_len.max(icmp::MIN_PAYLOAD_LEN),
            rtt_samples: Vec::new(),
            rtt_stats: Statistics::new(),
            buf: vec![0u8; RECV_BUF_LEN],
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Sequence number carried by the most recent request.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    pub fn received(&self) -> u64 {
        self.rtt_samples.len() as u64
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// RTTs in milliseconds, in arrival order.
    pub fn rtt_samples(&self) -> &[f64] {
        &self.rtt_samples
    }

    /// Sends the next echo request and returns the number of bytes written.
    ///
    /// The sequence number advances even if the transmission fails, so a
    /// failed send shows up as loss.
    pub async fn send(&mut self) -> Result<usize, SendError> {
        self.sequence = self.sequence.wrapping_add(1);
        self.transmitted += 1;

        let packet = icmp::encode_request(
            self.identifier,
            self.sequence,
            self.clock.now(),
            self.payload_len,
        );
        match self.socket.send_to(&packet, self.destination).await {
            Ok(sent) => {
                debug!(seq = self.sequence, bytes = sent, "echo request sent");
                Ok(sent)
            }
            Err(err) => {
                warn!(seq = self.sequence, error = %err, "echo request failed");
                Err(SendError::from(err))
            }
        }
    }

    /// Waits up to the session timeout for one datagram and matches it.
    ///
    /// Datagrams that are not echo replies carrying this session's identifier
    /// are rejected, not skipped: the caller decides whether to wait again.
    /// The sequence number is not checked against the requests sent.
    pub async fn receive(&mut self) -> Result<Reply, ReceiveError> {
        let len = match tokio::time::timeout(
            self.timeout,
            self.socket.recv(&mut self.buf),
        )
        .await
        {
            Ok(res) => res.map_err(ReceiveError::Transport)?,
            Err(_elapsed) => return Err(ReceiveError::Timeout(self.timeout)),
        };
        let recv_timestamp = self.clock.now();

        let datagram = icmp::decode_reply(&self.buf[..len]).map_err(|err| {
            debug!(len, error = %err, "malformed datagram");
            err
        })?;
        let echo = &datagram.icmp;
        if echo.icmp_type != icmp::ECHO_REPLY
            || echo.identifier != self.identifier
        {
            debug!(
                icmp_type = echo.icmp_type,
                identifier = echo.identifier,
                source = %datagram.ip.source,
                "ignoring foreign datagram"
            );
            return Err(ReceiveError::Rejected {
                icmp_type: echo.icmp_type,
                identifier: echo.identifier,
            });
        }

        // A clock stepping backwards must not produce a negative RTT
        let rtt = recv_timestamp.saturating_sub(echo.send_timestamp);
        let rtt_ms = rtt.as_nanos() as f64 / 1e6;
        self.rtt_samples.push(rtt_ms);
        self.rtt_stats.update(rtt_ms);
        debug!(
            seq = echo.sequence,
            code = echo.code,
            checksum = echo.checksum,
            checksum_ok = icmp::verify(&self.buf[datagram.ip.header_len..len]),
            total_len = datagram.ip.total_len,
            protocol = datagram.ip.protocol,
            rtt_ms,
            "echo reply"
        );

        Ok(Reply {
            source: datagram.ip.source,
            destination: datagram.ip.destination,
            size: datagram.icmp_len,
            ttl: datagram.ip.ttl,
            sequence: echo.sequence,
            rtt_ms,
            send_timestamp: echo.send_timestamp,
            recv_timestamp,
        })
    }

    /// Ends the session. The socket is closed before the summary is built.
    /// Returns `None` when no reply was ever recorded.
    pub fn finish(self) -> Option<Summary> {
        drop(self.socket);
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(Summary::new(
            self.host,
            self.destination,
            self.transmitted,
            &self.rtt_stats,
        ))
    }
}
