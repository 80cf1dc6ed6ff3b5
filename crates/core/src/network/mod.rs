use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::{protocol::FRAME_LEN, LightSyncError, NetworkConfig, Result};

/// Destination for encoded frames. One sink lives for exactly one session.
pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> io::Result<()>;
}

/// Opens a [`FrameSink`] bound to a local interface. Called from inside the
/// scheduler thread so that starting a session never blocks on socket setup.
pub trait ChannelFactory: Send + Sync {
    fn open(&self, interface: Ipv4Addr) -> Result<Box<dyn FrameSink>>;
}

/// UDP socket configured for multicast egress on a single interface.
///
/// The socket is closed when the channel is dropped.
#[derive(Debug)]
pub struct NetworkChannel {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl NetworkChannel {
    /// Binds to `interface` on an ephemeral port, selects it for multicast
    /// egress and applies `ttl`. Any failure is reported as
    /// [`LightSyncError::Socket`].
    pub fn open(interface: Ipv4Addr, destination: SocketAddrV4, ttl: u32) -> Result<Self> {
        let socket = Self::configure(interface, ttl).map_err(LightSyncError::Socket)?;
        info!(%interface, %destination, ttl, "multicast channel ready");
        Ok(Self {
            socket,
            destination,
        })
    }

    fn configure(interface: Ipv4Addr, ttl: u32) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(interface, 0));
        socket.bind(&bind_addr.into())?;
        socket.set_multicast_if_v4(&interface)?;
        socket.set_multicast_ttl_v4(ttl)?;
        Ok(socket.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }
}

impl FrameSink for NetworkChannel {
    fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> io::Result<()> {
        let sent = self.socket.send_to(frame, self.destination)?;
        if sent != FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {sent} of {FRAME_LEN} bytes"),
            ));
        }
        Ok(())
    }
}

impl Drop for NetworkChannel {
    fn drop(&mut self) {
        debug!(destination = %self.destination, "closing multicast channel");
    }
}

/// Default factory producing real multicast sockets.
#[derive(Debug, Clone)]
pub struct MulticastFactory {
    destination: SocketAddrV4,
    ttl: u32,
}

impl MulticastFactory {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            destination: config.destination(),
            ttl: config.ttl,
        }
    }
}

impl ChannelFactory for MulticastFactory {
    fn open(&self, interface: Ipv4Addr) -> Result<Box<dyn FrameSink>> {
        let channel = NetworkChannel::open(interface, self.destination, self.ttl)?;
        Ok(Box::new(channel))
    }
}

/// Receive-side socket joined to the multicast group, used for diagnostics.
#[derive(Debug)]
pub struct MulticastListener {
    socket: UdpSocket,
}

impl MulticastListener {
    pub fn join(interface: Ipv4Addr, config: &NetworkConfig) -> Result<Self> {
        let socket = Self::configure(interface, config).map_err(LightSyncError::Socket)?;
        info!(%interface, group = %config.multicast_group, port = config.port, "listening for frames");
        Ok(Self { socket })
    }

    fn configure(interface: Ipv4Addr, config: &NetworkConfig) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&config.multicast_group, &interface)?;
        Ok(socket.into())
    }

    /// Blocks until a datagram arrives. Returns the payload length and sender.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }
}
