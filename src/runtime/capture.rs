//! Capture source adapters.
//!
//! Both adapters expose the same operation: open a handle, optionally
//! install a BPF filter, and stream packets onto a bounded channel until the
//! source is exhausted or the done signal fires. The handle is closed when
//! the capture thread exits.

use crate::config::{Options, DEFAULT_SNAP_LEN};

use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use pcap::{Activated, Capture};

/// Capacity of the packet channel between the capture and dispatch tasks.
const PACKET_CHANNEL_CAPACITY: usize = 10;

/// Poll interval for the done signal on live captures, in milliseconds.
const LIVE_READ_TIMEOUT_MS: i32 = 1000;

/// One captured frame, copied out of the capture handle's buffer.
#[derive(Debug)]
pub(crate) struct CapturedPacket {
    pub(crate) data: Vec<u8>,
    pub(crate) ts: SystemTime,
}

/// Opens the capture source described by `opts` and spawns the capture
/// thread. Errors opening the handle or compiling the filter surface here;
/// errors after that close the returned channel.
pub(crate) fn spawn_capture(
    opts: &Options,
    done: Receiver<()>,
) -> Result<Receiver<CapturedPacket>> {
    let (tx, rx) = bounded(PACKET_CHANNEL_CAPACITY);

    if opts.live {
        let mut cap = Capture::from_device(opts.reader_name.as_str())
            .with_context(|| format!("no capture device {}", opts.reader_name))?
            .snaplen(DEFAULT_SNAP_LEN)
            .promisc(true)
            .timeout(LIVE_READ_TIMEOUT_MS)
            .open()
            .with_context(|| format!("failed to open device {}", opts.reader_name))?;
        if let Some(filter) = &opts.bpf_filter {
            cap.filter(filter, true).context("failed to set BPF filter")?;
        }
        let device = opts.reader_name.clone();
        std::thread::Builder::new()
            .name("flowscope-capture".into())
            .spawn(move || capture_loop(cap, tx, done, Some(device)))
            .context("failed to spawn capture thread")?;
    } else {
        let mut cap = Capture::from_file(&opts.reader_name)
            .with_context(|| format!("failed to open capture file {}", opts.reader_name))?;
        if let Some(filter) = &opts.bpf_filter {
            cap.filter(filter, true).context("failed to set BPF filter")?;
        }
        std::thread::Builder::new()
            .name("flowscope-capture".into())
            .spawn(move || capture_loop(cap, tx, done, None))
            .context("failed to spawn capture thread")?;
    }

    Ok(rx)
}

/// Reads packets until the source ends or the done signal fires. Dropping
/// the sender closes the packet channel, which the dispatch task treats as
/// cancellation.
fn capture_loop<T: Activated>(
    mut cap: Capture<T>,
    tx: Sender<CapturedPacket>,
    done: Receiver<()>,
    device: Option<String>,
) {
    let started = SystemTime::now();
    let mut count: u64 = 0;

    loop {
        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => {
                // Live handles surface periodically so cancellation is
                // observed even on a quiet interface.
                if done.try_recv().is_ok() {
                    break;
                }
                continue;
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                log::error!("capture error: {}", e);
                break;
            }
        };

        let captured = CapturedPacket {
            data: packet.data.to_vec(),
            ts: packet_timestamp(packet.header),
        };

        if count == 0 {
            if let Some(device) = &device {
                let elapsed = started.elapsed().unwrap_or(Duration::ZERO);
                log::info!("time to first packet on {}: {:?}", device, elapsed);
            }
        }
        count += 1;

        select! {
            send(tx, captured) -> result => {
                if result.is_err() {
                    break;
                }
            }
            recv(done) -> _ => break,
        }
    }
    log::debug!("capture finished after {} packets", count);
}

/// Converts a pcap header timestamp to wall-clock time.
fn packet_timestamp(header: &pcap::PacketHeader) -> SystemTime {
    let secs = header.ts.tv_sec.max(0) as u64;
    let micros = header.ts.tv_usec.max(0) as u64;
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
}
