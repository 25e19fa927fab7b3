//! Runner log routing.

use bollard::container::LogOutput;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::engine::LogStream;

/// Route an engine log stream to the given sinks until it ends.
///
/// The engine hands us frames already split by stream id; stdout and
/// console frames go to `out`, stderr to `err`. Empty payloads are legal
/// and skipped. End-of-stream is clean; a stream error is not.
pub(crate) async fn demux<O, W>(mut stream: LogStream, mut out: O, mut err: W) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(std::io::Error::other)?;
        match frame {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                if !message.is_empty() {
                    out.write_all(&message).await?;
                }
            }
            LogOutput::StdErr { message } => {
                if !message.is_empty() {
                    err.write_all(&message).await?;
                }
            }
            LogOutput::StdIn { .. } => {}
        }
    }

    out.flush().await?;
    err.flush().await?;
    Ok(())
}
