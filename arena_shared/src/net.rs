//! Networking primitives.
//!
//! Goals:
//! - A reliable (TCP) control connection carrying newline-delimited
//!   [`ControlMessage`]s.
//! - An unreliable (UDP) channel carrying binary [`Packet`]s.
//! - Keep framing explicit; nothing here knows about game state.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};
use tracing::debug;

use crate::{
    control::ControlMessage,
    protocol::{Packet, MAX_PACKET_SIZE},
};

/// Read half of a control connection.
#[derive(Debug)]
pub struct ControlReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl ControlReader {
    /// Next well-formed message. `Ok(None)` means the peer closed the stream.
    /// Blank and malformed lines are skipped.
    ///
    /// Cancellation safe: a partially received line stays buffered.
    pub async fn recv(&mut self) -> anyhow::Result<Option<ControlMessage>> {
        loop {
            let Some(line) = self.lines.next_line().await.context("tcp read line")? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ControlMessage::parse(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => debug!(error = %e, line, "Skipping malformed control line"),
            }
        }
    }
}

/// Write half of a control connection.
#[derive(Debug)]
pub struct ControlWriter {
    writer: OwnedWriteHalf,
}

impl ControlWriter {
    pub async fn send(&mut self, msg: &ControlMessage) -> anyhow::Result<()> {
        let line = format!("{msg}\n");
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("tcp write")?;
        Ok(())
    }
}

/// Reliable control connection over TCP.
#[derive(Debug)]
pub struct ControlConn {
    reader: ControlReader,
    writer: ControlWriter,
    peer: SocketAddr,
}

impl ControlConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: ControlReader {
                lines: BufReader::new(read).lines(),
            },
            writer: ControlWriter { writer: write },
            peer,
        }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream, addr))
    }

    pub async fn send(&mut self, msg: &ControlMessage) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Option<ControlMessage>> {
        self.reader.recv().await
    }

    /// Receives within the given timeout; `Ok(None)` on timeout or EOF.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<ControlMessage>> {
        match time::timeout(timeout, self.reader.recv()).await {
            Ok(res) => res,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_split(self) -> (ControlReader, ControlWriter) {
        (self.reader, self.writer)
    }
}

/// TCP control listener.
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ControlConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ControlConn::new(stream, addr), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Unreliable channel over UDP, connected to a single peer.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, packet: &Packet) -> anyhow::Result<()> {
        self.socket
            .send(&packet.encode())
            .await
            .context("udp send")?;
        Ok(())
    }

    /// Receives one datagram within the timeout.
    ///
    /// `Ok(None)` on timeout; malformed datagrams surface as errors so the
    /// caller can count and skip them.
    pub async fn recv_timeout(&self, timeout: Duration) -> anyhow::Result<Option<Packet>> {
        let mut buf = [0u8; MAX_PACKET_SIZE + 1];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let packet = Packet::decode(&buf[..n]).context("decode udp packet")?;
                Ok(Some(packet))
            }
            Ok(Err(e)) => Err(e).context("udp recv"),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::protocol::Payload;

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn control_lines_roundtrip_over_tcp() -> anyhow::Result<()> {
        let listener = ControlListener::bind(localhost()).await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await?;
            let msg = conn.recv().await?;
            conn.send(&ControlMessage::DisconnectOk).await?;
            Ok::<_, anyhow::Error>(msg)
        });

        let mut client = ControlConn::connect(addr).await?;
        client.send(&ControlMessage::Disconnect).await?;
        let reply = client.recv_timeout(Duration::from_secs(2)).await?;
        assert_eq!(reply, Some(ControlMessage::DisconnectOk));
        assert_eq!(server.await??, Some(ControlMessage::Disconnect));
        Ok(())
    }

    #[tokio::test]
    async fn udp_packets_roundtrip() -> anyhow::Result<()> {
        let server = UdpSocket::bind(localhost()).await?;
        let server_addr = server.local_addr()?;
        let conn = UnreliableConn::connect(localhost(), server_addr).await?;

        conn.send(&Packet::new(77, Payload::Ping)).await?;
        let mut buf = [0u8; 64];
        let (n, from) = server.recv_from(&mut buf).await?;
        assert_eq!(Packet::decode(&buf[..n])?.session_token, 77);
        assert_eq!(from, conn.local_addr()?);
        assert_eq!(conn.peer_addr(), server_addr);

        server
            .send_to(&Packet::new(77, Payload::Pong).encode(), from)
            .await?;
        let got = conn.recv_timeout(Duration::from_secs(2)).await?;
        assert_eq!(got.map(|p| p.payload), Some(Payload::Pong));

        // Garbage is reported, not swallowed.
        server.send_to(&[1, 2, 3], from).await?;
        assert!(conn.recv_timeout(Duration::from_secs(2)).await.is_err());
        Ok(())
    }
}
