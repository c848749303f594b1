//! # Serial TX worker
//!
//! SiK and ELRS writes can block for the duration of a serial frame, so
//! they run on their own thread. The worker owns every serial
//! [`PacketWriter`]; the control thread only hands it packets.
//!
//! **Hot path** (packets) is an `rtrb` SPSC ring. **Control path**
//! (shutdown) is a bounded crossbeam channel. Joining the thread returns
//! the writers so the link manager can close them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::registry::{PacketWriter, TxParams};

/// An opened serial writer and the interface it belongs to.
pub type SerialWriter = (usize, Box<dyn PacketWriter>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSendError {
    Full,
    Disconnected,
}

/// Destination interface and the radio parameters to write it with.
pub type TxTarget = (usize, TxParams);

struct TxPacket {
    targets: Vec<TxTarget>,
    data: Bytes,
}

enum TxControl {
    Shutdown,
}

#[derive(Debug, Default)]
pub struct TxStats {
    pub packets_written: AtomicU64,
    pub write_errors: AtomicU64,
}

pub struct TxWorker {
    packet_tx: rtrb::Producer<TxPacket>,
    control_tx: Sender<TxControl>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<TxStats>,
    handle: Option<thread::JoinHandle<Vec<SerialWriter>>>,
}

impl TxWorker {
    pub fn start(writers: Vec<SerialWriter>, capacity: usize) -> std::io::Result<Self> {
        let (packet_tx, packet_rx) = rtrb::RingBuffer::new(capacity);
        let (control_tx, control_rx) = bounded(4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(TxStats::default());

        let shutdown_clone = shutdown.clone();
        let stats_clone = stats.clone();
        let handle = thread::Builder::new()
            .name("skylink-tx".into())
            .spawn(move || tx_worker(packet_rx, control_rx, writers, shutdown_clone, stats_clone))?;

        Ok(Self {
            packet_tx,
            control_tx,
            shutdown,
            stats,
            handle: Some(handle),
        })
    }

    /// Queues `data` for every interface in `targets`. Never blocks.
    pub fn try_send(&mut self, targets: Vec<TxTarget>, data: Bytes) -> Result<(), TxSendError> {
        if self.shutdown.load(Ordering::Relaxed) || self.handle.is_none() {
            return Err(TxSendError::Disconnected);
        }
        self.packet_tx
            .push(TxPacket { targets, data })
            .map_err(|_| TxSendError::Full)
    }

    pub fn stats(&self) -> Arc<TxStats> {
        self.stats.clone()
    }

    /// Drains queued packets, stops the thread and hands the writers back.
    /// Idempotent; later calls return an empty list.
    pub fn stop(&mut self) -> Vec<SerialWriter> {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(TxControl::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                warn!("TX worker panicked; serial writers lost");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }
}

impl Drop for TxWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tx_worker(
    mut packet_rx: rtrb::Consumer<TxPacket>,
    control_rx: Receiver<TxControl>,
    mut writers: Vec<SerialWriter>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<TxStats>,
) -> Vec<SerialWriter> {
    debug!(writers = writers.len(), "TX worker started");

    loop {
        while let Ok(packet) = packet_rx.pop() {
            for (iface, params) in &packet.targets {
                let Some((_, writer)) = writers.iter_mut().find(|(i, _)| *i == *iface) else {
                    continue;
                };
                match writer.write_packet(&packet.data, params) {
                    Ok(()) => {
                        stats.packets_written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(iface = *iface, error = %e, "serial write failed");
                    }
                }
            }
        }

        match control_rx.try_recv() {
            Ok(TxControl::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }
        if shutdown.load(Ordering::Relaxed) && packet_rx.is_empty() {
            break;
        }
        if packet_rx.is_empty() {
            thread::sleep(Duration::from_micros(200));
        }
    }

    // Flush whatever was queued before shutdown was signalled.
    while let Ok(packet) = packet_rx.pop() {
        for (iface, params) in &packet.targets {
            let Some((_, writer)) = writers.iter_mut().find(|(i, _)| *i == *iface) else {
                continue;
            };
            if writer.write_packet(&packet.data, params).is_ok() {
                stats.packets_written.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    debug!("TX worker stopped");
    writers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct SharedWriter(Arc<Mutex<Vec<Vec<u8>>>>);

    impl PacketWriter for SharedWriter {
        fn write_packet(&mut self, packet: &[u8], _params: &TxParams) -> std::io::Result<()> {
            self.0.lock().unwrap().push(packet.to_vec());
            Ok(())
        }
    }

    #[test]
    fn writes_only_to_targets_and_returns_writers() {
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let writers: Vec<SerialWriter> = vec![
            (2, Box::new(SharedWriter(a.clone()))),
            (4, Box::new(SharedWriter(b.clone()))),
        ];
        let mut worker = TxWorker::start(writers, 16).unwrap();
        let p = TxParams::default();
        worker.try_send(vec![(2, p)], Bytes::from_static(b"one")).unwrap();
        worker.try_send(vec![(2, p), (4, p)], Bytes::from_static(b"two")).unwrap();
        let stats = worker.stats();

        let returned = worker.stop();
        assert_eq!(returned.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(a.lock().unwrap().len(), 2);
        assert_eq!(b.lock().unwrap().as_slice(), &[b"two".to_vec()]);
        assert_eq!(stats.packets_written.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn send_after_stop_is_disconnected() {
        let mut worker = TxWorker::start(Vec::new(), 4).unwrap();
        assert!(worker.stop().is_empty());
        assert_eq!(
            worker.try_send(vec![(0, TxParams::default())], Bytes::from_static(b"x")),
            Err(TxSendError::Disconnected)
        );
        assert!(worker.stop().is_empty());
    }
}
