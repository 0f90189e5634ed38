//! UDP-broadcast datagram link: stands in for the field radio on
//! development hosts. Every frame goes out as a LAN broadcast carrying a
//! small link header; unicast destinations are filtered on the receiving
//! side, and unicast requires prior peer registration like the real link.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::{mpsc, Arc};
use std::thread;

use flood_core::{EventSink, NodeAddress, NodeRole, Transport, TransportError};
use rand::Rng;

/// Link header: destination + source hardware address.
const LINK_HEADER_LEN: usize = 12;

pub struct UdpLink {
    port: u16,
    own: NodeAddress,
    socket: Option<Arc<UdpSocket>>,
    registered: HashSet<NodeAddress>,
    completions: Option<mpsc::Sender<(NodeAddress, bool)>>,
}

impl UdpLink {
    pub fn new(port: u16) -> UdpLink {
        UdpLink {
            port,
            own: generate_address(),
            socket: None,
            registered: HashSet::new(),
            completions: None,
        }
    }
}

/// Random locally-administered hardware address for this process.
fn generate_address() -> NodeAddress {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes[0] = 0x02;
    NodeAddress::from_bytes(bytes)
}

fn encode_link_frame(dst: NodeAddress, src: NodeAddress, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LINK_HEADER_LEN + payload.len());
    buf.extend_from_slice(dst.as_bytes());
    buf.extend_from_slice(src.as_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_link_frame(buf: &[u8]) -> Option<(NodeAddress, NodeAddress, &[u8])> {
    if buf.len() < LINK_HEADER_LEN {
        return None;
    }
    let dst = NodeAddress::from_bytes(buf[0..6].try_into().ok()?);
    let src = NodeAddress::from_bytes(buf[6..12].try_into().ok()?);
    Some((dst, src, &buf[LINK_HEADER_LEN..]))
}

impl Transport for UdpLink {
    fn initialize(
        &mut self,
        role: NodeRole,
        _channel: u8,
        events: EventSink,
    ) -> Result<NodeAddress, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).map_err(|err| {
            TransportError::Init {
                reason: format!("bind port {}: {err}", self.port),
            }
        })?;
        socket
            .set_broadcast(true)
            .map_err(|err| TransportError::Init {
                reason: format!("enable broadcast: {err}"),
            })?;
        let socket = Arc::new(socket);

        let recv_socket = socket.clone();
        let recv_events = events.clone();
        let own = self.own;
        thread::Builder::new()
            .name("floodnet-link-recv".to_string())
            .spawn(move || {
                let mut buf = [0u8; 1536];
                loop {
                    match recv_socket.recv_from(&mut buf) {
                        Ok((n, _)) => {
                            if let Some((dst, src, payload)) = decode_link_frame(&buf[..n]) {
                                if src == own {
                                    continue; // our own broadcast echoed back
                                }
                                if dst == own || dst.is_broadcast() {
                                    recv_events.receive(src, payload);
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "link receive loop stopped");
                            break;
                        }
                    }
                }
            })
            .map_err(|err| TransportError::Init {
                reason: format!("spawn receive thread: {err}"),
            })?;

        // Single consumer queue: send outcomes reach the engine outside the
        // send call that produced them.
        let (tx, rx) = mpsc::channel::<(NodeAddress, bool)>();
        thread::Builder::new()
            .name("floodnet-link-result".to_string())
            .spawn(move || {
                for (dest, success) in rx {
                    events.send_result(dest, success);
                }
            })
            .map_err(|err| TransportError::Init {
                reason: format!("spawn completion thread: {err}"),
            })?;

        self.completions = Some(tx);
        self.socket = Some(socket);
        tracing::info!(port = self.port, address = %self.own, role = ?role, "udp link up");
        Ok(self.own)
    }

    fn send(&mut self, dest: NodeAddress, frame: &[u8]) -> Result<(), TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError::SendRejected {
                reason: "link not initialized".to_string(),
            })?;
        if !dest.is_broadcast() && !self.registered.contains(&dest) {
            return Err(TransportError::SendRejected {
                reason: format!("peer {dest} not registered"),
            });
        }
        let buf = encode_link_frame(dest, self.own, frame);
        let target = SocketAddrV4::new(Ipv4Addr::BROADCAST, self.port);
        match socket.send_to(&buf, target) {
            Ok(_) => {
                if let Some(tx) = &self.completions {
                    let _ = tx.send((dest, true));
                }
                Ok(())
            }
            Err(err) => Err(TransportError::SendRejected {
                reason: err.to_string(),
            }),
        }
    }

    fn register_peer(&mut self, addr: NodeAddress, _channel: u8) -> Result<(), TransportError> {
        self.registered.insert(addr);
        Ok(())
    }

    fn deregister_peer(&mut self, addr: NodeAddress) -> Result<(), TransportError> {
        if self.registered.remove(&addr) {
            Ok(())
        } else {
            Err(TransportError::Deregister {
                reason: format!("peer {addr} not registered"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> NodeAddress {
        NodeAddress::from_bytes([0x02, 0, 0, 0, 0, n])
    }

    #[test]
    fn link_frame_round_trip() {
        let payload = [7u8; 68];
        let buf = encode_link_frame(addr(1), addr(2), &payload);
        assert_eq!(buf.len(), LINK_HEADER_LEN + payload.len());
        let (dst, src, body) = decode_link_frame(&buf).unwrap();
        assert_eq!(dst, addr(1));
        assert_eq!(src, addr(2));
        assert_eq!(body, payload);
    }

    #[test]
    fn short_frames_rejected() {
        assert!(decode_link_frame(&[0u8; LINK_HEADER_LEN - 1]).is_none());
        // A bare header is a valid empty frame at link level.
        let buf = encode_link_frame(addr(1), addr(2), &[]);
        let (_, _, body) = decode_link_frame(&buf).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn generated_addresses_are_locally_administered() {
        let a = generate_address();
        let b = generate_address();
        assert_eq!(a.as_bytes()[0], 0x02);
        assert_ne!(a, b);
    }

    #[test]
    fn unicast_requires_registration() {
        // Never initialized: no socket, every send is rejected.
        let mut link = UdpLink::new(0);
        assert!(link.send(addr(1), &[0u8; 4]).is_err());

        link.register_peer(addr(1), 1).unwrap();
        assert!(link.registered.contains(&addr(1)));
        link.deregister_peer(addr(1)).unwrap();
        assert!(link.deregister_peer(addr(1)).is_err());
    }
}
