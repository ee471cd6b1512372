use log::debug;
use mvo_core::nalgebra::Point3;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// One record is three little-endian `f32` components.
const RECORD_SIZE: usize = 12;
/// Records per datagram, sized to keep the payload under 1400 bytes.
const RECORDS_PER_DATAGRAM: usize = 116;

/// Fire-and-forget landmark publisher over UDP.
///
/// The wire format is a stream of 12-byte point records. Every publication
/// starts with a marker record whose three components are NaN (a value no
/// real landmark can carry), followed by one record per landmark, split
/// across datagrams as needed. Delivery is best-effort: the socket is
/// nonblocking and every error is demoted to a debug log, so telemetry can
/// never affect the tracking outcome.
pub struct PointCloudPublisher {
    socket: UdpSocket,
    target: SocketAddr,
}

impl PointCloudPublisher {
    pub fn connect<A: ToSocketAddrs>(target: A) -> io::Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target })
    }

    /// Sends the current landmark set, preceded by the marker record.
    pub fn publish(&self, landmarks: &[Point3<f64>]) {
        let mut datagram = Vec::with_capacity(RECORDS_PER_DATAGRAM * RECORD_SIZE);
        push_record(&mut datagram, f32::NAN, f32::NAN, f32::NAN);
        for point in landmarks {
            if datagram.len() + RECORD_SIZE > RECORDS_PER_DATAGRAM * RECORD_SIZE {
                self.send(&datagram);
                datagram.clear();
            }
            push_record(&mut datagram, point.x as f32, point.y as f32, point.z as f32);
        }
        if !datagram.is_empty() {
            self.send(&datagram);
        }
    }

    fn send(&self, payload: &[u8]) {
        if let Err(error) = self.socket.send_to(payload, self.target) {
            debug!("point cloud publish to {} failed: {}", self.target, error);
        }
    }
}

fn push_record(buffer: &mut Vec<u8>, x: f32, y: f32, z: f32) {
    buffer.extend_from_slice(&x.to_le_bytes());
    buffer.extend_from_slice(&y.to_le_bytes());
    buffer.extend_from_slice(&z.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_leads_with_a_marker_record() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let publisher = PointCloudPublisher::connect(receiver.local_addr().unwrap()).unwrap();
        publisher.publish(&[Point3::new(1.0, 2.0, 3.0), Point3::new(-4.0, 5.0, -6.0)]);

        let mut buffer = [0u8; 2048];
        let received = receiver.recv(&mut buffer).unwrap();
        assert_eq!(received, 3 * RECORD_SIZE);
        let record = |ix: usize| {
            let base = ix * RECORD_SIZE;
            [
                f32::from_le_bytes(buffer[base..base + 4].try_into().unwrap()),
                f32::from_le_bytes(buffer[base + 4..base + 8].try_into().unwrap()),
                f32::from_le_bytes(buffer[base + 8..base + 12].try_into().unwrap()),
            ]
        };
        assert!(record(0).iter().all(|v| v.is_nan()));
        assert_eq!(record(1), [1.0, 2.0, 3.0]);
        assert_eq!(record(2), [-4.0, 5.0, -6.0]);
    }
}
