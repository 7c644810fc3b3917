//! Chunked reader for the listener's stdout.

use std::sync::Weak;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Receiver of stream chunks, usually the listener session.
pub trait ChunkSink: Send + Sync + 'static {
  /// Forward one non-empty chunk produced by `generation`.
  /// Returning `false` detaches the consumer.
  fn forward(&self, generation: u64, chunk: Vec<u8>) -> bool;
}

/// Why a consumer stopped reading.
#[derive(Debug)]
pub enum StreamEnd {
  /// The helper closed its output.
  Eof,
  /// The sink is gone or no longer wants chunks from this generation.
  Detached,
  /// Reading failed; treated like end of stream.
  Failed(std::io::Error),
}

/// Forwards every read from the helper's output verbatim, in order.
pub struct StreamConsumer<S> {
  sink: Weak<S>,
  generation: u64,
  buffer_size: usize,
}

impl<S: ChunkSink> StreamConsumer<S> {
  pub fn new(sink: Weak<S>, generation: u64, buffer_size: usize) -> Self {
    Self {
      sink,
      generation,
      buffer_size: buffer_size.max(1),
    }
  }

  /// Read until end of stream or until the sink detaches.
  pub async fn run<R: AsyncRead + Unpin>(self, mut reader: R) -> StreamEnd {
    let mut buf = vec![0u8; self.buffer_size];

    loop {
      match reader.read(&mut buf).await {
        Ok(0) => {
          log::debug!("Listener output closed (generation {})", self.generation);
          return StreamEnd::Eof;
        }
        Ok(n) => {
          let Some(sink) = self.sink.upgrade() else {
            return StreamEnd::Detached;
          };
          log::trace!("Listener chunk of {} bytes", n);
          if !sink.forward(self.generation, buf[..n].to_vec()) {
            log::debug!("Listener consumer detached (generation {})", self.generation);
            return StreamEnd::Detached;
          }
        }
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          log::warn!("Listener output read error: {}", e);
          return StreamEnd::Failed(e);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::io::AsyncWriteExt;

  #[derive(Default)]
  struct Recorder {
    chunks: Mutex<Vec<(u64, Vec<u8>)>>,
    accept_limit: Option<usize>,
  }

  impl ChunkSink for Recorder {
    fn forward(&self, generation: u64, chunk: Vec<u8>) -> bool {
      let mut chunks = self.chunks.lock();
      if self.accept_limit.is_some_and(|limit| chunks.len() >= limit) {
        return false;
      }
      chunks.push((generation, chunk));
      true
    }
  }

  #[tokio::test]
  async fn test_forwards_chunks_in_order_and_stops_at_eof() {
    let sink = Arc::new(Recorder::default());
    let (mut writer, reader) = tokio::io::duplex(64);

    let consumer = StreamConsumer::new(Arc::downgrade(&sink), 7, 16);
    let task = tokio::spawn(consumer.run(reader));

    for part in [&b"A"[..], &b"B"[..], &b"C"[..]] {
      writer.write_all(part).await.unwrap();
      writer.flush().await.unwrap();
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(writer);

    assert!(matches!(task.await.unwrap(), StreamEnd::Eof));
    let chunks = sink.chunks.lock();
    assert!(chunks.iter().all(|(generation, chunk)| *generation == 7 && !chunk.is_empty()));
    let joined: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.clone()).collect();
    assert_eq!(joined, b"ABC");
  }

  #[tokio::test]
  async fn test_empty_stream_forwards_nothing() {
    let sink = Arc::new(Recorder::default());
    let consumer = StreamConsumer::new(Arc::downgrade(&sink), 1, 16);
    let end = consumer.run(&b""[..]).await;
    assert!(matches!(end, StreamEnd::Eof));
    assert!(sink.chunks.lock().is_empty());
  }

  #[tokio::test]
  async fn test_chunks_are_bounded_by_buffer_size() {
    let sink = Arc::new(Recorder::default());
    let consumer = StreamConsumer::new(Arc::downgrade(&sink), 1, 4);
    consumer.run(&b"0123456789"[..]).await;

    let chunks = sink.chunks.lock();
    assert!(chunks.iter().all(|(_, c)| c.len() <= 4));
    let joined: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.clone()).collect();
    assert_eq!(joined, b"0123456789");
  }

  #[tokio::test]
  async fn test_detaches_when_sink_is_dropped() {
    let sink = Arc::new(Recorder::default());
    let consumer = StreamConsumer::new(Arc::downgrade(&sink), 1, 16);
    drop(sink);

    let end = consumer.run(&b"late data"[..]).await;
    assert!(matches!(end, StreamEnd::Detached));
  }

  #[tokio::test]
  async fn test_detaches_when_sink_refuses() {
    let sink = Arc::new(Recorder {
      accept_limit: Some(1),
      ..Recorder::default()
    });
    let consumer = StreamConsumer::new(Arc::downgrade(&sink), 1, 2);
    let end = consumer.run(&b"aabbcc"[..]).await;

    assert!(matches!(end, StreamEnd::Detached));
    assert_eq!(sink.chunks.lock().len(), 1);
  }
}
