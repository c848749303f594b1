//! UDP stand-in for the radio hardware.
//!
//! Every model interface maps onto one UDP socket talking to a ground
//! simulator. Frequency, power and SiK calls are accepted and logged.
//! Used by the daemon's `--udp-peer` bench mode.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use skylink_common::band::display_khz;
use skylink_common::datarate::Datarate;
use skylink_common::flags::ChannelWidth;
use tracing::{debug, error, warn};

use crate::registry::{
    PacketWriter, RadioError, RadioInterfaceRegistry, RadioRx, SikConfig, TxParams,
};

const MAX_DATAGRAM: usize = 2048;

pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    interfaces: usize,
}

struct UdpWriter {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl PacketWriter for UdpWriter {
    fn write_packet(&mut self, packet: &[u8], _params: &TxParams) -> io::Result<()> {
        self.socket.send_to(packet, self.peer).map(|_| ())
    }
}

/// Bind `bind`, send to `peer`. Inbound datagrams arrive on the returned
/// receiver once [`UdpRx`] is started.
pub fn udp_radio(
    bind: SocketAddr,
    peer: SocketAddr,
    interfaces: usize,
    queue: usize,
) -> io::Result<(UdpRadio, UdpRx, Receiver<Bytes>)> {
    let socket = UdpSocket::bind(bind)?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    let socket = Arc::new(socket);
    let (tx, rx) = bounded(queue);
    let radio = UdpRadio {
        socket: socket.clone(),
        peer,
        interfaces,
    };
    let receiver = UdpRx {
        socket,
        tx,
        running: Arc::new(AtomicBool::new(false)),
        uplink_packets: Arc::new(AtomicU64::new(0)),
        handle: None,
    };
    Ok((radio, receiver, rx))
}

impl UdpRadio {
    fn check(&self, iface: usize) -> Result<(), RadioError> {
        if iface < self.interfaces {
            Ok(())
        } else {
            Err(RadioError::NoSuchInterface { iface })
        }
    }
}

impl RadioInterfaceRegistry for UdpRadio {
    fn interface_count(&self) -> usize {
        self.interfaces
    }

    fn set_frequency(
        &mut self,
        iface: usize,
        freq_khz: u32,
        width: ChannelWidth,
    ) -> Result<(), RadioError> {
        self.check(iface)?;
        debug!(iface, freq = %display_khz(freq_khz), ?width, "udp radio: set frequency");
        Ok(())
    }

    fn set_tx_power(&mut self, iface: usize, power_mw: i32) -> Result<(), RadioError> {
        self.check(iface)?;
        debug!(iface, power_mw, "udp radio: set tx power");
        Ok(())
    }

    fn set_legacy_datarate(&mut self, iface: usize, datarate: Datarate) -> Result<(), RadioError> {
        self.check(iface)?;
        debug!(iface, %datarate, "udp radio: set datarate");
        Ok(())
    }

    fn configure_sik(&mut self, iface: usize, config: &SikConfig) -> Result<(), RadioError> {
        self.check(iface)?;
        debug!(iface, ?config, "udp radio: configure SiK");
        Ok(())
    }

    fn open_read(&mut self, iface: usize) -> Result<(), RadioError> {
        self.check(iface)
    }

    fn close_read(&mut self, _iface: usize) {}

    fn open_write(&mut self, iface: usize) -> Result<Box<dyn PacketWriter>, RadioError> {
        self.check(iface)?;
        Ok(Box::new(UdpWriter {
            socket: self.socket.try_clone()?,
            peer: self.peer,
        }))
    }

    fn close_write(&mut self, _iface: usize) {}
}

/// Receive thread feeding inbound datagrams to the owner's queue.
pub struct UdpRx {
    socket: Arc<UdpSocket>,
    tx: Sender<Bytes>,
    running: Arc<AtomicBool>,
    uplink_packets: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl UdpRx {
    pub fn uplink_packets(&self) -> u64 {
        self.uplink_packets.load(Ordering::Relaxed)
    }
}

impl RadioRx for UdpRx {
    fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let socket = self.socket.clone();
        let tx = self.tx.clone();
        let running = self.running.clone();
        let counter = self.uplink_packets.clone();
        let spawned = thread::Builder::new()
            .name("skylink-rx".into())
            .spawn(move || rx_loop(socket, tx, running, counter));
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                error!(error = %e, "failed to spawn RX thread");
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn reset_uplink_stats(&mut self) {
        self.uplink_packets.store(0, Ordering::Relaxed);
    }
}

impl Drop for UdpRx {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rx_loop(
    socket: Arc<UdpSocket>,
    tx: Sender<Bytes>,
    running: Arc<AtomicBool>,
    counter: Arc<AtomicU64>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, _from)) => {
                counter.fetch_add(1, Ordering::Relaxed);
                match tx.try_send(Bytes::copy_from_slice(&buf[..n])) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!("RX queue full, dropping packet"),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (mut radio, mut rx, inbound) =
            udp_radio("127.0.0.1:0".parse().unwrap(), peer.local_addr().unwrap(), 2, 16).unwrap();
        let local = radio.socket.local_addr().unwrap();

        let mut writer = radio.open_write(1).unwrap();
        writer.write_packet(b"down", &TxParams::default()).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"down");

        rx.start();
        peer.send_to(b"up", local).unwrap();
        let got = inbound.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(&got[..], b"up");
        assert_eq!(rx.uplink_packets(), 1);
        rx.stop();

        assert!(matches!(radio.open_write(5), Err(RadioError::NoSuchInterface { iface: 5 })));
    }
}
