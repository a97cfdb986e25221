use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ExecError;

#[derive(Debug)]
pub struct LineTap {
    pub line: String,
    pub stream: LineStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStream {
    Stdout,
    Stderr,
}

impl LineStream {
    fn label(self) -> &'static str {
        match self {
            LineStream::Stdout => "stdout",
            LineStream::Stderr => "stderr",
        }
    }
}

/// Lines that must never reach consumers or logs.
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    secret: Option<String>,
}

impl LineFilter {
    pub fn hiding(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    fn keeps(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        match self.secret.as_deref() {
            Some(secret) => line.trim() != secret,
            None => true,
        }
    }
}

/// Reads `rd` to EOF and forwards complete lines on `line_tx`.
///
/// A trailing partial line is flushed at EOF, so nothing buffered is lost
/// when the channel closes.
pub fn pump<R>(
    mut rd: R,
    stream: LineStream,
    filter: LineFilter,
    line_tx: mpsc::Sender<LineTap>,
) -> JoinHandle<Result<u64, ExecError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        let mut line_buf: Vec<u8> = Vec::with_capacity(8 * 1024);

        loop {
            let n = rd.read(&mut buf).await.map_err(|e| ExecError::StreamIo {
                stream: stream.label(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;

            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let mut one = line_buf.drain(..=pos).collect::<Vec<u8>>();
                trim_newline(&mut one);
                let line = String::from_utf8_lossy(&one).to_string();
                if filter.keeps(&line) {
                    let _ = line_tx.send(LineTap { line, stream }).await;
                }
            }
        }

        if !line_buf.is_empty() {
            trim_newline(&mut line_buf);
            let line = String::from_utf8_lossy(&line_buf).to_string();
            if filter.keeps(&line) {
                let _ = line_tx.send(LineTap { line, stream }).await;
            }
        }

        Ok(total)
    })
}

fn trim_newline(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn flushes_last_line_without_newline_on_eof() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel::<LineTap>(8);

        let task = pump(rd, LineStream::Stdout, LineFilter::default(), tx);

        wr.write_all(b"hello").await.unwrap();
        drop(wr);

        let tap = rx.recv().await.expect("expected one line");
        assert_eq!(tap.line, "hello");
        assert_eq!(tap.stream, LineStream::Stdout);

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drops_password_echo_and_blank_lines() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel::<LineTap>(8);

        let task = pump(
            rd,
            LineStream::Stdout,
            LineFilter::hiding(Some("s3cret".into())),
            tx,
        );

        wr.write_all(b"s3cret\r\n\nfirst\n  s3cret  \nsecond\n")
            .await
            .unwrap();
        drop(wr);

        let mut lines = Vec::new();
        while let Some(tap) = rx.recv().await {
            lines.push(tap.line);
        }
        assert_eq!(lines, vec!["first", "second"]);
        task.await.unwrap().unwrap();
    }
}
