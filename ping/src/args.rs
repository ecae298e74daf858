use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};

use crate::{icmp, prober::ProbeConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Opts {
    /// Host name or IPv4 address to ping
    pub host: String,
    #[command(flatten)]
    pub common_opts: CommonOpts,
    /// ICMP identifier to use instead of the process id
    #[arg(long)]
    pub identifier: Option<u16>,
}

#[derive(Args, Clone, Debug)]
pub struct CommonOpts {
    /// length of the payload in bytes, the first 8 carry the send timestamp
    #[arg(long, short = 's', default_value_t = icmp::DEFAULT_PAYLOAD_LEN, value_parser = parse_payload_len)]
    pub len: usize,
    /// interval between packets in milliseconds
    #[arg(long, short, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,
    /// number of packets to send, runs until Ctrl-C otherwise
    #[arg(long, short)]
    pub count: Option<u64>,
    /// time to wait for a reply in milliseconds
    #[arg(long, short = 'W', default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,
    #[arg(long, short = 'I')]
    /// Interface to bind to
    pub iface: Option<String>,
    /// Write every reply to this CSV file
    #[arg(long, short)]
    pub file: Option<PathBuf>,
}

fn parse_payload_len(s: &str) -> Result<usize, String> {
    let len: usize = s.parse().map_err(|e| format!("{}", e))?;
    if len < icmp::MIN_PAYLOAD_LEN {
        return Err(format!(
            "payload must be at least {} bytes",
            icmp::MIN_PAYLOAD_LEN
        ));
    }
    Ok(len)
}

impl Opts {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.common_opts.interval)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(self.common_opts.timeout),
            payload_len: self.common_opts.len,
            iface: self.common_opts.iface.clone(),
            identifier: self.identifier,
        }
    }
}
