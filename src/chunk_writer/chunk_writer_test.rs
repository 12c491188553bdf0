use std::io::Write;
use std::sync::Mutex as SyncMutex;

use super::*;

fn collecting_handler() -> (OnChunkHdlrFn, Arc<SyncMutex<Vec<Bytes>>>) {
    let chunks = Arc::new(SyncMutex::new(vec![]));
    let chunks2 = Arc::clone(&chunks);
    let handler: OnChunkHdlrFn = Box::new(move |chunk: Bytes| {
        let chunks3 = Arc::clone(&chunks2);
        Box::pin(async move {
            chunks3.lock().unwrap().push(chunk);
        })
    });
    (handler, chunks)
}

#[tokio::test(start_paused = true)]
async fn test_chunk_writer_flushes_on_interval() {
    let (handler, chunks) = collecting_handler();
    let mut w = ChunkWriter::builder()
        .with_interval(Duration::from_millis(100))
        .build(handler);

    w.write_all(b"hello ").unwrap();
    w.write_all(b"world").unwrap();
    assert!(chunks.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    {
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..], b"hello world");
    }

    // idle ticks never produce empty chunks
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(chunks.lock().unwrap().len(), 1);

    w.close().await;
    assert_eq!(chunks.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_writer_flush_completeness() {
    let (handler, chunks) = collecting_handler();
    let mut w = ChunkWriter::builder()
        .with_interval(Duration::from_millis(20))
        .build(handler);

    let mut expected = vec![];
    for i in 0..200u32 {
        let data: Vec<u8> = (0..(i % 17)).map(|j| (i + j) as u8).collect();
        w.write_all(&data).unwrap();
        expected.extend_from_slice(&data);
        if i % 7 == 0 {
            tokio::time::sleep(Duration::from_millis(13)).await;
        }
    }
    w.close().await;

    let chunks = chunks.lock().unwrap();
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| !c.is_empty()));
    let got: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(got, expected);
    assert_eq!(w.bytes_flushed(), expected.len());
    assert_eq!(w.chunks_flushed(), chunks.len());
}

#[tokio::test(start_paused = true)]
async fn test_chunk_writer_close_drains_partial_chunk() {
    let (handler, chunks) = collecting_handler();
    let mut w = ChunkWriter::builder()
        .with_interval(Duration::from_secs(60))
        .build(handler);

    w.write_all(b"tail").unwrap();
    w.close().await;

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0][..], b"tail");
}

#[tokio::test]
async fn test_chunk_writer_double_close() {
    let (handler, chunks) = collecting_handler();
    let mut w = ChunkWriter::builder().build(handler);

    w.write_all(b"once").unwrap();
    w.close().await;
    w.close().await;
    assert!(w.is_closed());

    let err = w.write(b"late").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0][..], b"once");
}

#[tokio::test]
async fn test_chunk_writer_clones_share_buffer() {
    let (handler, chunks) = collecting_handler();
    let w = ChunkWriter::builder().build(handler);
    let mut a = w.clone();
    let mut b = w.clone();

    a.write_all(b"ab").unwrap();
    b.write_all(b"cd").unwrap();
    w.close().await;

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0][..], b"abcd");
}
