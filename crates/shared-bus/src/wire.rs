//! # Wire Protocol
//!
//! One request per connection, answered by one response (`GetSnapshot`) or
//! a stream of responses (`Subscribe`). Every message is a bincode frame:
//!
//! ```text
//! [length:4 BE][crc32:4 BE][payload:length]
//! ```
//!
//! A `Subscribe` stream ends when the server closes the connection.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::BusError;
use crate::events::Event;

/// Metadata key carrying the subscriber's stable client id.
pub const CLIENT_ID_KEY: &str = "client-id";

/// Key/value metadata sent with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn with_client_id(client_id: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(CLIENT_ID_KEY.to_string(), client_id.to_string());
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get(CLIENT_ID_KEY).filter(|id| !id.is_empty())
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Open an event stream for a topic.
    Subscribe { topic: String, metadata: Metadata },
    /// Fetch the full state once.
    GetSnapshot { metadata: Metadata },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Event(Event),
    Error(String),
}

const HEADER_LEN: usize = 8;

/// Largest request frame a server reads from a connecting peer.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Payload buffer reserved up front; larger frames grow as bytes arrive.
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

/// Writes one frame and flushes.
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_len: usize) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > max_len {
        return Err(BusError::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let len = u32::try_from(payload.len()).map_err(|_| BusError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` if the peer closed the connection before a new frame
/// started.
pub async fn read_frame<R, T>(reader: &mut R, max_len: usize) -> Result<Option<T>, BusError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let [l0, l1, l2, l3, c0, c1, c2, c3] = header;
    let len = u32::from_be_bytes([l0, l1, l2, l3]) as usize;
    let expected = u32::from_be_bytes([c0, c1, c2, c3]);
    if len > max_len {
        return Err(BusError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY));
    let read = (&mut *reader).take(len as u64).read_to_end(&mut payload).await?;
    if read < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame truncated after {read} of {len} bytes"),
        )
        .into());
    }

    let actual = crc32fast::hash(&payload);
    if actual != expected {
        return Err(BusError::ChecksumMismatch { expected, actual });
    }
    Ok(Some(bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BusMessage;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let mut frame = Vec::new();
        frame.extend_from_slice(&(512 * 1024u32).to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&[1; 16]);
        a.write_all(&frame).await.unwrap();
        drop(a);

        let err = read_frame::<_, Request>(&mut b, MAX).await.unwrap_err();
        assert!(matches!(err, BusError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let request = Request::Subscribe {
            topic: "changes".into(),
            metadata: Metadata::with_client_id("client-1"),
        };
        write_frame(&mut a, &request, MAX).await.unwrap();
        let event = Event::encode(&BusMessage::Snapshot(vec![7; 32]))
            .unwrap()
            .unwrap();
        write_frame(&mut a, &Response::Event(event.clone()), MAX)
            .await
            .unwrap();
        drop(a);

        let got: Request = read_frame(&mut b, MAX).await.unwrap().unwrap();
        assert_eq!(got, request);
        match got {
            Request::Subscribe { metadata, .. } => assert_eq!(metadata.client_id(), Some("client-1")),
            other => panic!("unexpected {other:?}"),
        }
        let got: Response = read_frame(&mut b, MAX).await.unwrap().unwrap();
        assert_eq!(got, Response::Event(event));
        let end: Option<Response> = read_frame(&mut b, MAX).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let mut frame = Vec::new();
        write_frame(&mut frame, &Response::Error("boom".into()), MAX)
            .await
            .unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        a.write_all(&frame).await.unwrap();

        let result: Result<Option<Response>, _> = read_frame(&mut b, MAX).await;
        assert!(matches!(result, Err(BusError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let mut header = Vec::new();
        header.extend_from_slice(&(MAX as u32 + 1).to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        a.write_all(&header).await.unwrap();

        let result: Result<Option<Response>, _> = read_frame(&mut b, MAX).await;
        assert!(matches!(result, Err(BusError::FrameTooLarge { .. })));

        let mut sink = Vec::new();
        let big = Response::Error("x".repeat(64));
        assert!(matches!(
            write_frame(&mut sink, &big, 16).await,
            Err(BusError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_missing_client_id() {
        assert_eq!(Metadata::default().client_id(), None);
        assert_eq!(Metadata::with_client_id("").client_id(), None);
    }
}
