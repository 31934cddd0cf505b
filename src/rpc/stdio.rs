//! Newline-delimited JSON-RPC over a byte stream (child process stdio).

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::Transport;

/// Bridge a reader/writer pair to a [`Transport`]. One message per line.
pub fn line_transport<R, W>(label: &str, reader: R, writer: W) -> Transport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

    let write_label = label.to_string();
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = out_rx.recv().await {
            let mut line = message.replace('\n', " ");
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                log::debug!("[{}] stdin closed: {}", write_label, e);
                break;
            }
            if let Err(e) = writer.flush().await {
                log::debug!("[{}] stdin flush failed: {}", write_label, e);
                break;
            }
        }
    });

    let read_label = label.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if in_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("[{}] stdout read failed: {}", read_label, e);
                    break;
                }
            }
        }
    });

    Transport {
        outgoing: out_tx,
        incoming: in_rx,
    }
}
