//! Pump between a byte stream and a [`TermIo`].
//!
//! Shared by the telnet and local-socket transports: inbound bytes are
//! decoded with [`TermCodec`] and forwarded as events, shell output is
//! written back verbatim, and [`TermOutput::Close`] shuts the write half.

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use super::codec::TermCodec;
use super::{TermEvent, TermIo, TermOutput};

/// Drive one connection until either side closes it.
pub async fn pump<R, W>(reader: R, mut writer: W, io: TermIo)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let TermIo {
        events,
        mut output,
        closed,
    } = io;

    let inbound = async {
        let mut framed = FramedRead::new(reader, TermCodec::new());
        loop {
            tokio::select! {
                biased;

                () = closed.cancelled() => break,

                item = framed.next() => {
                    let event = match item {
                        Some(Ok(event)) => event,
                        Some(Err(err)) => {
                            warn!(%err, "terminal read failed");
                            TermEvent::Eof
                        }
                        None => {
                            debug!("terminal reached end of input");
                            TermEvent::Eof
                        }
                    };
                    let eof = event == TermEvent::Eof;
                    if events.send(event).await.is_err() || eof {
                        break;
                    }
                }
            }
        }
    };

    let outbound = async {
        loop {
            tokio::select! {
                biased;

                out = output.recv() => {
                    let bytes = match out {
                        Some(TermOutput::Text(text) | TermOutput::Prompt(text)) => text,
                        Some(TermOutput::Close) | None => break,
                    };
                    let written = async {
                        writer.write_all(bytes.as_bytes()).await?;
                        writer.flush().await
                    };
                    if let Err(err) = written.await {
                        debug!(%err, "terminal write failed");
                        closed.cancel();
                        break;
                    }
                }

                () = closed.cancelled() => break,
            }
        }
        let _ = writer.shutdown().await;
    };

    tokio::join!(inbound, outbound);
}
