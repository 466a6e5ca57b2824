use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::{io, net::SocketAddr, time::Duration};

/// Bound, listening socket configured before it is handed to tokio
#[derive(Debug)]
pub struct SocketHeld {
    socket: Socket,
}

impl SocketHeld {
    pub fn bind(address: SocketAddr) -> io::Result<SocketHeld> {
        let domain = if address.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        #[cfg(not(target_os = "windows"))]
        socket.set_reuse_port(true)?;
        socket.set_reuse_address(true)?;
        socket.set_tcp_nodelay(true)?;

        // Long-lived chat sockets: let the kernel notice dead peers too.
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
        socket.set_keepalive(true)?;
        socket.set_tcp_keepalive(&keepalive)?;

        socket.set_recv_buffer_size(256 * 1024)?;
        socket.set_send_buffer_size(256 * 1024)?;

        socket.set_nonblocking(true)?;
        socket.bind(&address.into())?;
        socket.listen(8192)?;

        Ok(SocketHeld { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an inet socket"))
    }

    /// Convert into a tokio listener; must be called inside a runtime.
    pub fn into_listener(self) -> io::Result<tokio::net::TcpListener> {
        tokio::net::TcpListener::from_std(std::net::TcpListener::from(self.socket))
    }
}
