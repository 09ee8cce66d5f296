//! Framed TCP transport between feeder and player.
//!
//! One feeder at a time. Wire framing in both directions: a one-byte kind
//! tag (`t` text, `b` binary), a big-endian u32 payload length, then the
//! payload. Text carries control messages inbound and diagnostics outbound;
//! binary carries encoded access units and is inbound only.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use vigil_core::pipeline::PipelineEvent;
use vigil_core::protocol::{self, HostEvent, InboundMessage};

const KIND_TEXT: u8 = b't';
const KIND_BINARY: u8 = b'b';

/// Upper bound on a single frame. A 4K intra frame is around 2 MiB; this
/// leaves a wide margin while still catching garbage lengths.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Accept feeders one at a time, forever. Host reports produced while no
/// feeder is connected are discarded.
pub async fn serve(
    listener: TcpListener,
    events: mpsc::UnboundedSender<PipelineEvent>,
    mut host_rx: mpsc::UnboundedReceiver<HostEvent>,
) -> io::Result<()> {
    loop {
        let stream = loop {
            tokio::select! {
                conn = listener.accept() => {
                    let (stream, peer) = conn?;
                    tracing::info!(%peer, "feeder connected");
                    break stream;
                }
                discarded = host_rx.recv() => match discarded {
                    Some(event) => {
                        tracing::trace!(wire = %event.to_wire(), "no feeder, report discarded")
                    }
                    None => return Ok(()),
                },
            }
        };

        match drive_connection(stream, events.clone(), &mut host_rx).await {
            Ok(()) => tracing::info!("feeder disconnected"),
            Err(e) => tracing::warn!(error = %e, "feeder connection closed"),
        }
        if events.is_closed() {
            return Ok(());
        }
    }
}

/// Run one feeder connection until either side goes away. The stream state
/// survives the connection; only a `reset` command clears it.
async fn drive_connection<S>(
    stream: S,
    events: mpsc::UnboundedSender<PipelineEvent>,
    host_rx: &mut mpsc::UnboundedReceiver<HostEvent>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut inbound = tokio::spawn(read_loop(reader, events));

    let result = loop {
        tokio::select! {
            done = &mut inbound => {
                break done.unwrap_or_else(|e| Err(io::Error::other(e)));
            }
            outbound = host_rx.recv() => match outbound {
                Some(event) => {
                    if let Err(e) = write_text(&mut writer, &event.to_wire()).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
        }
    };
    inbound.abort();
    result
}

/// Read wire frames and hand them to the pipeline until EOF or a framing
/// violation.
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<PipelineEvent>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut kind = [0u8; 1];
        match reader.read_exact(&mut kind).await {
            Ok(_) => {}
            // EOF on a frame boundary is an orderly disconnect.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            tracing::warn!(len, "frame length over limit, dropping feeder");
            return Err(io::Error::other("frame length over limit"));
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        let message = match kind[0] {
            KIND_TEXT => {
                let text = String::from_utf8_lossy(&payload);
                protocol::parse_control(&text)
            }
            KIND_BINARY => InboundMessage::Payload(Bytes::from(payload)),
            other => {
                tracing::warn!(kind = other, "unknown frame kind, dropping feeder");
                return Err(io::Error::other("unknown frame kind"));
            }
        };
        if events.send(PipelineEvent::Message(message)).is_err() {
            // Pipeline is gone; nothing left to feed.
            return Ok(());
        }
    }
}

async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(5 + text.len());
    frame.push(KIND_TEXT);
    frame.extend_from_slice(&(text.len() as u32).to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    writer.write_all(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_frame(text: &str) -> Vec<u8> {
        let mut frame = vec![KIND_TEXT];
        frame.extend_from_slice(&(text.len() as u32).to_be_bytes());
        frame.extend_from_slice(text.as_bytes());
        frame
    }

    fn binary_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![KIND_BINARY];
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_wire_frames_become_pipeline_messages() {
        let mut script = Vec::new();
        script.extend_from_slice(&text_frame("f 1000"));
        script.extend_from_slice(&binary_frame(&[0, 0, 0, 1, 0x65, 0xaa]));
        script.extend_from_slice(&text_frame("reset"));
        script.extend_from_slice(&text_frame("bogus"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        read_loop(script.as_slice(), tx).await.expect("read loop");

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let PipelineEvent::Message(message) = event else {
                panic!("transport only produces messages");
            };
            messages.push(message);
        }
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], InboundMessage::FrameTimestamp(1000));
        assert_eq!(
            messages[1],
            InboundMessage::Payload(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xaa]))
        );
        assert_eq!(messages[2], InboundMessage::Reset);
        assert_eq!(messages[3], InboundMessage::Unrecognized("bogus".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_kind_closes_the_connection() {
        let mut script = vec![b'x'];
        script.extend_from_slice(&4u32.to_be_bytes());
        script.extend_from_slice(&[1, 2, 3, 4]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = read_loop(script.as_slice(), tx).await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_closes_the_connection() {
        let mut script = vec![KIND_BINARY];
        script.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = read_loop(script.as_slice(), tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let mut script = vec![KIND_BINARY];
        script.extend_from_slice(&100u32.to_be_bytes());
        script.extend_from_slice(&[0xab; 10]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = read_loop(script.as_slice(), tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_host_events_are_framed_for_the_feeder() {
        let (near, far) = tokio::io::duplex(4096);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        let conn = tokio::spawn(async move {
            let mut host_rx = host_rx;
            drive_connection(near, events_tx, &mut host_rx).await
        });

        host_tx.send(HostEvent::Initializing).expect("send");
        host_tx
            .send(HostEvent::ViewportResized {
                width: 640,
                height: 360,
            })
            .expect("send");

        let (mut far_read, _far_write) = tokio::io::split(far);
        let mut read_wire = Vec::new();
        for expected in ["initializing", "vr {\"w\":640,\"h\":360 }"] {
            let mut kind = [0u8; 1];
            far_read.read_exact(&mut kind).await.expect("kind");
            assert_eq!(kind[0], KIND_TEXT);
            let mut len_buf = [0u8; 4];
            far_read.read_exact(&mut len_buf).await.expect("len");
            let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
            far_read.read_exact(&mut payload).await.expect("payload");
            read_wire.push(String::from_utf8(payload).expect("utf8"));
            assert_eq!(read_wire.last().map(String::as_str), Some(expected));
        }

        // Closing the host channel ends the connection cleanly.
        drop(host_tx);
        conn.await.expect("join").expect("connection");
    }
}
