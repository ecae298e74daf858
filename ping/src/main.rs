use anyhow::Result;
use clap::Parser;
mod args;
mod error;
mod icmp;
mod logger;
mod prober;
mod summary;
use common::{AsyncICMPSocket, Logger};
use tokio::{
    signal,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::{error::ReceiveError, logger::PingResult, prober::Prober};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = args::Opts::parse();
    let mut prober = Prober::connect(&args.host, args.probe_config()).await?;
    let mut logger = match args.common_opts.file.as_ref() {
        Some(file_name) => Some(Logger::<PingResult>::new(file_name).await?),
        None => None,
    };

    debug!(identifier = prober.identifier(), "session ready");
    println!(
        "PING {} ({}): {} data bytes",
        prober.host(),
        prober.destination(),
        prober.payload_len()
    );

    let mut pacing_timer = tokio::time::interval(args.interval());
    // Requests stay one interval apart after a slow reply
    pacing_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if let Some(count) = args.common_opts.count {
            if prober.transmitted() >= count {
                break;
            }
        }
        tokio::select! {
            _ = pacing_timer.tick() => {},
            _ = &mut ctrl_c => {
                // Print on a new line, because some terminals will print "^C"
                println!();
                break;
            }
        }
        tokio::select! {
            res = probe_once(&mut prober, logger.as_mut()) => res?,
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    if let Some(logger) = logger.as_mut() {
        logger.flush().await?;
    }
    debug!(
        sent = prober.transmitted(),
        received = prober.received(),
        "session finished"
    );
    if let Some(summary) = prober.finish() {
        println!("{}", summary);
    }
    Ok(())
}

/// One request and its reply. Per-packet failures are printed, not returned.
async fn probe_once(
    prober: &mut Prober<AsyncICMPSocket>,
    mut logger: Option<&mut Logger<PingResult>>,
) -> Result<()> {
    if let Err(err) = prober.send().await {
        println!("icmp_seq={} {}", prober.sequence(), err);
        warn!(code = ?err.code(), "send failed");
        return Ok(());
    }

    // Foreign datagrams (other pings, our own requests on loopback) are
    // skipped until the reply window closes
    let deadline = Instant::now() + prober.timeout();
    loop {
        match prober.receive().await {
            Ok(reply) => {
                println!(
                    "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                    reply.size,
                    reply.source,
                    reply.sequence,
                    reply.ttl,
                    reply.rtt_ms
                );
                if let Some(logger) = logger.as_deref_mut() {
                    logger.log(&PingResult::from(&reply)).await?;
                }
                return Ok(());
            }
            Err(ReceiveError::Rejected { .. }) if Instant::now() < deadline => {
                continue
            }
            Err(err) => {
                println!("icmp_seq={} {}", prober.sequence(), err);
                if let Some(code) = err.code() {
                    warn!(code, "receive failed");
                }
                return Ok(());
            }
        }
    }
}
