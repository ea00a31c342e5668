//! Pieces shared by both halves of a session: the outbound queue, its
//! writer task, buffered frame reads, and the diagnostic packet ring.

use std::collections::VecDeque;
use std::fmt;

use anyhow::Context;
use arrayvec::ArrayVec;
use bytes::{Bytes, BytesMut};
use tether_protocol::{Frame, FrameDecoder, FrameEncoder};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use tracing::{debug, trace};

/// Frames queued per half before the producer blocks. A full queue is the
/// backpressure boundary of the whole pipeline.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 512;

/// Payloads drained per wakeup of a writer task, so small packets coalesce
/// into one syscall.
const WRITE_BATCH: usize = 16;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Message on a half's outbound queue. The queue also carries the
/// compression switch so the encoder flips between frames already queued
/// ahead of it and those behind.
#[derive(Clone, Debug)]
pub enum Outbound {
    /// One `{id, body}` payload to frame and send.
    Frame(Bytes),
    /// Toggle the encoder's compression threshold from the next frame on.
    SetCompression(i32),
    /// Flush everything queued ahead of this marker, shut the socket down,
    /// and finish. Anything queued behind it is dropped.
    Shutdown,
}

/// Producer side of a half's outbound queue.
#[derive(Clone)]
pub struct Outgoing {
    tx: kanal::AsyncSender<Outbound>,
}

impl Outgoing {
    pub async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        self.tx
            .send(Outbound::Frame(payload))
            .await
            .context("outbound queue closed")
    }

    pub async fn set_compression(&self, threshold: i32) -> anyhow::Result<()> {
        self.tx
            .send(Outbound::SetCompression(threshold))
            .await
            .context("outbound queue closed")
    }

    /// Closing the queue is how a half's writer is told to finish. Pending
    /// writes behind the close are dropped.
    pub fn close(&self) {
        let _ = self.tx.close();
    }

    /// Graceful variant of [`Self::close`]: everything already queued is
    /// written out, then the socket is shut down. The writer dropping its
    /// end closes the channel for any later senders.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Outbound::Shutdown).await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawns the writer task for one half. It blocks on the queue, drains
/// opportunistically up to [`WRITE_BATCH`] payloads, and writes the batch
/// as one frame run.
pub fn spawn_writer<W>(
    mut writer: W,
    mut encoder: FrameEncoder,
    label: &'static str,
) -> (Outgoing, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = kanal::bounded_async::<Outbound>(OUTBOUND_QUEUE_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut wire = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut done = false;

        while !done {
            let Ok(first) = rx.recv().await else { break };

            let mut batch = ArrayVec::<Outbound, WRITE_BATCH>::new();
            batch.push(first);
            while batch.remaining_capacity() > 0 {
                let Ok(Some(next)) = rx.try_recv() else { break };
                batch.push(next);
            }

            for message in batch {
                match message {
                    Outbound::Frame(payload) => {
                        if let Err(e) = encoder.encode_frame(&payload, &mut wire) {
                            debug!("{label}: dropping unencodable frame: {e}");
                        }
                    }
                    Outbound::SetCompression(threshold) => {
                        encoder.set_compression(threshold);
                    }
                    Outbound::Shutdown => {
                        done = true;
                        break;
                    }
                }
            }

            if !wire.is_empty() {
                if let Err(e) = writer.write_all(&wire).await {
                    debug!("{label}: write failed, stopping writer: {e}");
                    return;
                }
                if let Err(e) = writer.flush().await {
                    debug!("{label}: flush failed, stopping writer: {e}");
                    return;
                }
                wire.clear();
            }
        }

        if let Err(e) = writer.shutdown().await {
            trace!("{label}: socket shutdown failed: {e}");
        }
        trace!("{label}: outbound queue closed, writer finished");
    });

    (Outgoing { tx }, handle)
}

/// Builds one `{id, body}` payload for a fixed-id (pre-play) packet.
pub(crate) fn encode_fixed(
    version: tether_protocol::ProtocolVersion,
    id: i32,
    write: impl FnOnce(&mut tether_protocol::PacketBuf) -> Result<(), tether_protocol::ProtocolError>,
) -> anyhow::Result<Bytes> {
    let mut buf = tether_protocol::PacketBuf::new(id, version);
    write(&mut buf)?;
    Ok(buf.finish())
}

/// Frames one payload and writes it straight to the socket. Used during
/// the synchronous pre-play phases, before a half has a writer task.
pub async fn write_now<W>(
    writer: &mut W,
    encoder: &mut FrameEncoder,
    payload: Bytes,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let wire = encoder.encode_to_bytes(&payload)?;
    writer.write_all(&wire).await?;
    writer.flush().await?;
    Ok(())
}

/// Scratch buffer for one read loop; hand the same one to every
/// [`read_frame`] call so the allocation is reused.
#[must_use]
pub fn read_scratch() -> BytesMut {
    BytesMut::with_capacity(READ_BUFFER_SIZE)
}

/// Reads until the decoder yields one complete frame. `Ok(None)` is a
/// clean EOF on a frame boundary.
pub async fn read_frame<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    scratch: &mut BytesMut,
) -> anyhow::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decoder.try_next_frame()? {
            return Ok(Some(frame));
        }

        scratch.clear();
        let bytes_read = reader.read_buf(scratch).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        decoder.queue_bytes(scratch);
    }
}

/// Bounded trail of recent (id, length) pairs, logged when a half closes.
pub struct PacketRing {
    entries: VecDeque<(i32, usize)>,
}

impl PacketRing {
    const CAPACITY: usize = 10;

    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(Self::CAPACITY),
        }
    }

    pub fn push(&mut self, id: i32, len: usize) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((id, len));
    }
}

impl Default for PacketRing {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PacketRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (id, len) in &self.entries {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "0x{id:02X}({len})")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_the_last_ten() {
        let mut ring = PacketRing::new();
        for i in 0..25 {
            ring.push(i, i as usize);
        }
        let rendered = ring.to_string();
        assert!(rendered.starts_with("0x0F(15)"));
        assert!(rendered.ends_with("0x18(24)"));
        assert_eq!(rendered.split(' ').count(), 10);
    }

    #[tokio::test]
    async fn writer_respects_queued_compression_switch() {
        use tether_protocol::FrameDecoder;

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (outgoing, handle) = spawn_writer(client, FrameEncoder::new(), "test");

        outgoing.send(Bytes::from_static(&[0x01, 0xAA])).await.unwrap();
        outgoing.set_compression(8).await.unwrap();
        outgoing
            .send(Bytes::copy_from_slice(&[0x02; 64]))
            .await
            .unwrap();
        outgoing.shutdown().await;
        handle.await.unwrap();

        let mut wire = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut wire)
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.queue_bytes(&wire);
        let first = decoder.try_next_frame().unwrap().unwrap();
        assert_eq!(first.id, 0x01);

        decoder.set_compression(8);
        let second = decoder.try_next_frame().unwrap().unwrap();
        assert_eq!(second.id, 0x02);
        assert_eq!(second.raw.len(), 64);
        assert!(decoder.try_next_frame().unwrap().is_none());
    }
}
