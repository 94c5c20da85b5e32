// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! TCP transport helpers for IPC.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

pub trait IpcIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> IpcIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type IpcStream = Box<dyn IpcIo>;

pub struct IpcListener {
    inner: TcpListener,
}

pub async fn bind(addr: &str) -> io::Result<IpcListener> {
    let inner = TcpListener::bind(addr).await?;
    Ok(IpcListener { inner })
}

pub async fn connect(addr: &str) -> io::Result<IpcStream> {
    let stream = TcpStream::connect(addr).await?;
    // Frames are tiny; Nagle would skew ping measurements.
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

impl IpcListener {
    pub async fn accept(&self) -> io::Result<(IpcStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().unwrap().to_string();

        let server_task = tokio::spawn(async move {
            let (mut stream, _peer) = listener.accept().await.expect("accept failed");
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.expect("read failed");
            assert_eq!(&buf, b"hello");
            stream.write_all(b"world").await.expect("write failed");
            stream.flush().await.expect("flush failed");
        });

        let mut client = connect(&addr).await.expect("connect failed");
        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(connect(&addr).await.is_err());
    }
}
