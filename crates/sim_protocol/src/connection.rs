use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use crate::frame::{read_packet, write_packet};
use crate::message::Message;
use crate::ProtocolError;

/// Blocking message channel over a byte stream.
pub struct Connection<S = TcpStream> {
    stream: S,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to `addr`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Returns a second handle to the same socket.
    pub fn try_clone(&self) -> Result<Self, ProtocolError> {
        Ok(Self {
            stream: self.stream.try_clone()?,
        })
    }

    /// Returns the peer address as text, for logs.
    pub fn peer(&self) -> String {
        self.stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Closes both directions of the socket.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl<S: Read + Write> Connection<S> {
    /// Wraps an already connected stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Sends one message.
    pub fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        write_packet(&mut self.stream, &message.encode())
    }

    /// Receives one message. Returns `Ok(None)` when the peer closed the
    /// connection.
    pub fn recv(&mut self) -> Result<Option<Message>, ProtocolError> {
        match read_packet(&mut self.stream)? {
            Some(packet) => Message::decode(&packet).map(Some),
            None => Ok(None),
        }
    }

    /// Sends `message` and waits for exactly one reply.
    pub fn request(&mut self, message: &Message) -> Result<Message, ProtocolError> {
        self.send(message)?;
        self.recv()?.ok_or(ProtocolError::Closed)
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn recv_decodes_queued_messages_then_reports_close() {
        let mut wire = Vec::new();
        write_packet(&mut wire, &Message::KernelOk.encode()).expect("write should succeed");
        write_packet(&mut wire, &Message::LoadOk { pid: 3 }.encode())
            .expect("write should succeed");

        let mut conn = Connection::new(Cursor::new(wire));
        assert_eq!(conn.recv(), Ok(Some(Message::KernelOk)));
        assert_eq!(conn.recv(), Ok(Some(Message::LoadOk { pid: 3 })));
        assert_eq!(conn.recv(), Ok(None));
    }

    #[test]
    fn send_writes_framed_bytes() {
        let mut conn = Connection::new(Cursor::new(Vec::new()));
        conn.send(&Message::RemoveProcess { pid: 8 })
            .expect("send should succeed");
        let wire = conn.into_inner().into_inner();
        assert_eq!(wire.len(), 8 + 4 + 4);
    }

    #[test]
    fn request_over_tcp_gets_one_reply() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("addr should resolve");
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept should succeed");
            let mut conn = Connection::new(stream);
            let request = conn.recv().expect("recv should succeed");
            assert_eq!(request, Some(Message::KernelHandshake));
            conn.send(&Message::MemoriaOk { geometry: None })
                .expect("send should succeed");
        });

        let mut client = Connection::connect(addr).expect("connect should succeed");
        let reply = client
            .request(&Message::KernelHandshake)
            .expect("request should succeed");
        assert_eq!(reply, Message::MemoriaOk { geometry: None });
        server.join().expect("server should finish");
        assert_eq!(client.recv(), Ok(None));
    }
}
