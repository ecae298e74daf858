use std::{
    fmt,
    io::{self, Read},
    marker::PhantomData,
    net::{IpAddr, Ipv4Addr, SocketAddrV4},
    os::unix::io::{AsRawFd, RawFd},
    path::Path,
};

use anyhow::Result;
pub use logging_macro::Logging;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::{
    fs::File,
    io::{unix::AsyncFd, AsyncWriteExt, BufWriter},
};

// Strong type for raw IPv4 ICMP sockets
pub struct ICMPSocket(Socket);

impl ICMPSocket {
    pub fn new() -> io::Result<ICMPSocket> {
        let socket =
            Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;

        Ok(ICMPSocket(socket))
    }
    /// Restricts the socket to `bind_interface` (SO_BINDTODEVICE).
    pub fn bind_device(self, bind_interface: &str) -> io::Result<ICMPSocket> {
        Ok(ICMPSocket(bind_to_device(self.0, bind_interface)?))
    }
    pub fn get_mut(&mut self) -> &mut Socket {
        &mut self.0
    }
    pub fn get_ref(&self) -> &Socket {
        &self.0
    }
}

impl AsRawFd for ICMPSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Raw ICMP socket registered with the tokio reactor.
pub struct AsyncICMPSocket {
    inner: AsyncFd<ICMPSocket>,
}

impl AsyncICMPSocket {
    /// Must be called from within a tokio runtime.
    pub fn new(socket: ICMPSocket) -> io::Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub async fn send_to(
        &self,
        packet: &[u8],
        addr: Ipv4Addr,
    ) -> io::Result<usize> {
        // Raw sockets ignore the port
        let addr = SockAddr::from(SocketAddrV4::new(addr, 0));
        loop {
            let mut guard = self.inner.writable().await?;
            match guard
                .try_io(|inner| inner.get_ref().get_ref().send_to(packet, &addr))
            {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    /// Reads one datagram. For raw IPv4 sockets this includes the IP header.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref().get_ref();
                socket.read(buf)
            }) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }
}

pub fn bind_to_device(
    socket: Socket,
    bind_interface: &str,
) -> Result<Socket, std::io::Error> {
    // Socket2 bind_device does not have nice error types, so we have to handle
    // the libc errors. Keep the errno so callers can still inspect it.
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        let kind = err.kind();
        let error_msg = if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            format!("error binding to device (`{}`): {}", bind_interface, err)
        } else {
            format!("unexpected error binding device: {}", err)
        };
        return Err(std::io::Error::new(kind, error_msg));
    }

    Ok(socket)
}

/// Resolve `host` to an IPv4 address. Dotted-decimal input is used as is,
/// anything else goes through the system resolver.
pub async fn resolve_ipv4(host: &str) -> io::Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host((host, 0))
        .await?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no IPv4 address found for {}", host),
            )
        })
}

/// Types that can be written as CSV rows by [`Logger`].
pub trait Logging {
    fn header(&self) -> String;
}

/// Appends CSV rows to a file, writing the header before the first row.
pub struct Logger<T> {
    writer: BufWriter<File>,
    header_written: bool,
    _entry: PhantomData<T>,
}

impl<T: Logging + fmt::Display> Logger<T> {
    pub async fn new(file_name: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(file_name).await?;
        Ok(Self {
            writer: BufWriter::new(file),
            header_written: false,
            _entry: PhantomData,
        })
    }

    pub async fn log(&mut self, entry: &T) -> Result<()> {
        if !self.header_written {
            let header = format!("{}\n", entry.header());
            self.writer.write_all(header.as_bytes()).await?;
            self.header_written = true;
        }
        let row = format!("{}\n", entry);
        self.writer.write_all(row.as_bytes()).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Running statistics using Welford's online algorithm. The variance is the
/// population variance.
#[derive(Debug, Clone)]
pub struct Statistics {
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    samples: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mean: {:.2} variance: {:.2} standard deviation: {:.2} min: {:.2} \
             max: {:.2} samples: {}",
            self.mean(),
            self.variance(),
            self.standard_deviation(),
            self.min(),
            self.max(),
            self.samples()
        )
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            mean: f64::NAN,
            m2: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            samples: 0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }
    pub fn variance(&self) -> f64 {
        self.m2 / (self.samples as f64)
    }
    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn update(&mut self, value: f64) {
        self.samples += 1;
        if self.samples == 1 {
            self.mean = value;
            self.m2 = 0.0;
            self.min = value;
            self.max = value;
        } else {
            let old_mean = self.mean;
            self.mean = old_mean + (value - old_mean) / self.samples as f64;
            // Both factors share a sign, so m2 never decreases
            self.m2 += (value - old_mean) * (value - self.mean);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }
}
