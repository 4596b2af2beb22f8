//! Frame codec shared by the coordinator and the workers.
//!
//! A frame is the compact JSON encoding of one value followed by a single
//! `\n`. Compact JSON escapes every newline inside strings, so the terminator
//! can never appear inside the payload and frames need no length prefix.
//!
//! Both directions of the shard RPC use the same codec:
//!
//! - request: `[Record, ...]`
//! - response: `{"centroids": [Record, ...]}`
//!
//! [`read_frame`] refuses to buffer more than `max_bytes` of payload, so a
//! misbehaving peer cannot make the reader allocate without bound.

use crate::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte terminating every frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Default upper bound for a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Compact JSON formatter that refuses to write `null`.
///
/// serde_json writes NaN and infinities as `null`. No wire type has a
/// nullable field, so a `null` can only come from a non-finite float.
struct FiniteFormatter;

impl serde_json::ser::Formatter for FiniteFormatter {
    fn write_null<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "non-finite float cannot be encoded",
        ))
    }
}

/// Encodes `value` as one frame, terminator included.
///
/// # Errors
///
/// Returns [`Error::Codec`] if `value` cannot be serialized or contains a
/// non-finite float.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, FiniteFormatter);
    value.serialize(&mut serializer)?;
    buf.push(FRAME_TERMINATOR);
    Ok(buf)
}

/// Decodes one frame payload. A trailing terminator is accepted.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the payload is not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    let payload = frame.strip_suffix(&[FRAME_TERMINATOR]).unwrap_or(frame);
    Ok(serde_json::from_slice(payload)?)
}

/// Writes `value` as one frame and flushes the writer.
///
/// # Errors
///
/// Returns [`Error::Codec`] on encoding or I/O failure.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let buf = encode(value)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame from `reader` and decodes it.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if the payload exceeds `max_bytes` before a
///   terminator is seen.
/// - [`Error::Codec`] if the stream ends before a complete frame, on I/O
///   failure, or if the payload does not decode.
pub async fn read_frame<R, T>(reader: &mut R, max_bytes: usize) -> Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut buf = Vec::new();
    // One extra byte leaves room for the terminator of a maximum-size frame.
    let limit = max_bytes.saturating_add(1) as u64;
    let read = (&mut *reader)
        .take(limit)
        .read_until(FRAME_TERMINATOR, &mut buf)
        .await?;

    match buf.last() {
        Some(&FRAME_TERMINATOR) => decode(&buf),
        _ if read as u64 >= limit => Err(Error::FrameTooLarge { limit: max_bytes }),
        _ if read == 0 => Err(Error::Codec {
            context: "connection closed before a frame was received".to_string(),
        }),
        _ => Err(Error::Codec {
            context: format!("connection closed after {read} bytes of an incomplete frame"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterResult, Record};
    use tokio::io::{AsyncWriteExt, BufReader, duplex};

    fn shard() -> Vec<Record> {
        vec![
            Record::new(19.432_608, -99.133_208, "robbery", "2024-03-01 10:15:00"),
            Record::new(0.1 + 0.2, -180.0, "assault\nwith newline", "2024-03-01 10:16:00"),
            Record::new(f64::MIN_POSITIVE, f64::MAX, "\"quoted\", comma", ""),
        ]
    }

    #[tokio::test]
    async fn shard_survives_the_wire_unchanged() {
        let (mut client, server) = duplex(64 * 1024);
        let sent = shard();
        write_frame(&mut client, &sent).await.unwrap();

        let mut reader = BufReader::new(server);
        let received: Vec<Record> = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        assert_eq!(received.len(), sent.len());
        for (a, b) in received.iter().zip(&sent) {
            assert_eq!(a.latitude.to_bits(), b.latitude.to_bits());
            assert_eq!(a.longitude.to_bits(), b.longitude.to_bits());
            assert_eq!(a.category, b.category);
            assert_eq!(a.timestamp, b.timestamp);
        }
    }

    #[test]
    fn wire_field_names_are_stable() {
        let frame = encode(&ClusterResult::new(vec![Record::new(1.5, 2.5, "c", "t")])).unwrap();
        assert_eq!(
            frame,
            b"{\"centroids\":[{\"latitude\":1.5,\"longitude\":2.5,\"category\":\"c\",\"timestamp\":\"t\"}]}\n"
        );
    }

    #[test]
    fn non_finite_coordinates_are_refused_by_the_encoder() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = ClusterResult::new(vec![Record::new(value, 0.0, "c", "t")]);
            let err = encode(&result).unwrap_err();
            assert!(
                matches!(&err, Error::Codec { context } if context.contains("non-finite")),
                "{err}"
            );
        }
    }

    #[tokio::test]
    async fn failed_encode_writes_nothing() {
        let (mut client, server) = duplex(1024);
        let bad = vec![Record::new(0.0, f64::INFINITY, "c", "t")];
        assert!(write_frame(&mut client, &bad).await.is_err());
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_frame::<_, Vec<Record>>(&mut reader, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Codec { context } if context.contains("before a frame")));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, server) = duplex(64 * 1024);
        write_frame(&mut client, &shard()).await.unwrap();

        let mut reader = BufReader::new(server);
        let err = read_frame::<_, Vec<Record>>(&mut reader, 16)
            .await
            .unwrap_err();
        assert_eq!(err, Error::FrameTooLarge { limit: 16 });
    }

    #[tokio::test]
    async fn closed_stream_is_a_codec_error() {
        let (client, server) = duplex(1024);
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_frame::<_, ClusterResult>(&mut reader, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[tokio::test]
    async fn truncated_frame_is_a_codec_error() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"{\"centroids\":[").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_frame::<_, ClusterResult>(&mut reader, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Codec { context } if context.contains("incomplete")));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_codec_error() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"not json\n").await.unwrap();

        let mut reader = BufReader::new(server);
        let err = read_frame::<_, Vec<Record>>(&mut reader, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }
}
