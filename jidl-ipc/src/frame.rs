//! Frame codec for the jidl protocol.
//!
//! A frame is `MAGIC | status | length (u16 LE) | JSON body`. The body is
//! always a JSON object; requests use the `method` and `payload` keys,
//! responses the `payload` or `message` keys.
//!
//! Decoder failures map onto the bad-response status codes: a wrong magic
//! is [`StatusCode::UnrecognizedProtocol`], a short read
//! [`StatusCode::IncompleteData`], an unknown status byte
//! [`StatusCode::InvalidStatusCode`] and a body that is not a JSON object
//! [`StatusCode::InvalidBody`]. The encoder refuses bodies larger than
//! [`MAX_SIZE`] with [`StatusCode::BufferOverflow`].

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::status::StatusCode;

/// The four identification bytes opening every frame.
pub const MAGIC: [u8; 4] = *b"jidl";

/// Maximum size of an encoded body in bytes.
pub const MAX_SIZE: usize = 64 * 1024;

/// Body object type used throughout the protocol.
pub type Body = Map<String, Value>;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub status: StatusCode,
    pub body: Body,
}

/// Reads one frame from `reader`.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Frame>
where
    R: AsyncRead + Unpin,
{
    // Bytes 1-4: magic. A stream that does not open with it is not
    // speaking this protocol at all, truncation included.
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Status(StatusCode::UnrecognizedProtocol));
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    if magic != MAGIC {
        return Err(ProtocolError::Status(StatusCode::UnrecognizedProtocol));
    }

    // Byte 5: status code.
    let raw = read_or_incomplete(reader, 1).await?[0];
    let status = StatusCode::from_raw(raw)
        .ok_or(ProtocolError::Status(StatusCode::InvalidStatusCode))?;

    // Bytes 6-7: body length, little endian.
    let len_bytes = read_or_incomplete(reader, 2).await?;
    let body_len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;

    // Bytes 8-: JSON body.
    let raw_body = read_or_incomplete(reader, body_len).await?;
    let value: Value = serde_json::from_slice(&raw_body)
        .map_err(|_| ProtocolError::Status(StatusCode::InvalidBody))?;
    let body = match value {
        Value::Object(map) => map,
        _ => return Err(ProtocolError::Status(StatusCode::InvalidBody)),
    };

    Ok(Frame { status, body })
}

/// Writes one frame to `writer` and flushes it.
pub async fn write_frame<W>(
    writer: &mut W,
    status: StatusCode,
    body: &Body,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = serde_json::to_vec(body)
        .map_err(|_| ProtocolError::Status(StatusCode::InvalidBody))?;
    if encoded.len() > MAX_SIZE {
        return Err(ProtocolError::Status(StatusCode::BufferOverflow));
    }
    let len = u16::try_from(encoded.len())
        .map_err(|_| ProtocolError::Status(StatusCode::BufferOverflow))?;

    writer.write_all(&MAGIC).await?;
    writer.write_all(&[status.raw()]).await?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a request frame. The status sub-code records which of the two
/// body fields are present.
pub async fn write_request<W>(
    writer: &mut W,
    method: Option<&str>,
    payload: Option<&Value>,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Body::new();
    if let Some(method) = method {
        body.insert("method".to_string(), Value::String(method.to_string()));
    }
    if let Some(payload) = payload {
        body.insert("payload".to_string(), payload.clone());
    }
    let status = StatusCode::request(method.is_some(), payload.is_some());
    write_frame(writer, status, &body).await
}

/// Reads a request frame and splits it into method and payload.
///
/// A frame whose status byte is not a request code fails with
/// [`StatusCode::InvalidStatusCode`].
pub async fn read_request<R>(reader: &mut R) -> ProtocolResult<(Option<String>, Body)>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    if !frame.status.is_request() {
        return Err(ProtocolError::Status(StatusCode::InvalidStatusCode));
    }

    let method = frame
        .body
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let payload = match frame.body.get("payload") {
        Some(Value::Object(map)) => map.clone(),
        _ => Body::new(),
    };
    Ok((method, payload))
}

/// Writes a good response. `Some(payload)` sends it under the `payload`
/// key; `None` sends a bare `OK`. An oversized payload degrades into the
/// buffer-overflow bad response instead of failing the connection.
pub async fn write_payload_response<W>(
    writer: &mut W,
    payload: Option<Value>,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    match payload {
        Some(payload) => {
            let mut body = Body::new();
            body.insert("payload".to_string(), payload);
            match write_frame(writer, StatusCode::GoodResponseWithPayload, &body).await {
                Err(ProtocolError::Status(code)) => {
                    write_status_response(writer, code).await
                }
                other => other,
            }
        }
        None => write_status_response(writer, StatusCode::GoodResponse).await,
    }
}

/// Writes a response that carries only a status code; the body holds the
/// code's text message.
pub async fn write_status_response<W>(
    writer: &mut W,
    status: StatusCode,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Body::new();
    body.insert(
        "message".to_string(),
        Value::String(status.text_message().to_string()),
    );
    write_frame(writer, status, &body).await
}

/// Reads a response frame.
///
/// Good responses yield the status and the payload object (empty for a
/// payload-less `OK`). Bad responses are surfaced as
/// [`ProtocolError::Status`]; request codes in response position fail with
/// [`StatusCode::InvalidStatusCode`].
pub async fn read_response<R>(reader: &mut R) -> ProtocolResult<(StatusCode, Body)>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    if frame.status.is_good() {
        let payload = match frame.body.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            _ => Body::new(),
        };
        Ok((frame.status, payload))
    } else if frame.status.is_bad() {
        Err(ProtocolError::Status(frame.status))
    } else {
        Err(ProtocolError::Status(StatusCode::InvalidStatusCode))
    }
}

async fn read_or_incomplete<R>(reader: &mut R, len: usize) -> ProtocolResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Status(StatusCode::IncompleteData))
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn encode(status: StatusCode, body: &Body) -> Vec<u8> {
        let mut buf = Vec::new();
        write_frame(&mut buf, status, body).await.unwrap();
        buf
    }

    fn decode_err(bytes: &[u8]) -> StatusCode {
        let mut slice = bytes;
        let err = futures_block_on(read_frame(&mut slice)).unwrap_err();
        match err {
            ProtocolError::Status(code) => code,
            other => panic!("expected a status error, got {other:?}"),
        }
    }

    // Small helper so the decode tests do not all need #[tokio::test].
    fn futures_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[tokio::test]
    async fn round_trip_preserves_status_and_body() {
        let mut body = Body::new();
        body.insert("payload".to_string(), json!({"a": 1}));
        let bytes = encode(StatusCode::GoodResponseWithPayload, &body).await;

        let mut slice = bytes.as_slice();
        let frame = read_frame(&mut slice).await.unwrap();
        assert_eq!(frame.status, StatusCode::GoodResponseWithPayload);
        assert_eq!(frame.body, body);
    }

    #[tokio::test]
    async fn encoded_frame_layout() {
        let mut body = Body::new();
        body.insert("payload".to_string(), json!({"a": 1}));
        let bytes = encode(StatusCode::GoodResponseWithPayload, &body).await;

        // "jidl", status 0x41, then the little-endian body length.
        assert_eq!(&bytes[..5], &[0x6A, 0x69, 0x64, 0x6C, 0x41]);
        let json = serde_json::to_vec(&body).unwrap();
        assert_eq!(
            u16::from_le_bytes([bytes[5], bytes[6]]) as usize,
            json.len()
        );
        assert_eq!(&bytes[7..], json.as_slice());
    }

    #[test]
    fn bad_magic_is_unrecognized_protocol() {
        let bytes = [0u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_err(&bytes), StatusCode::UnrecognizedProtocol);
    }

    #[test]
    fn empty_stream_is_unrecognized_protocol() {
        assert_eq!(decode_err(&[]), StatusCode::UnrecognizedProtocol);
    }

    #[test]
    fn truncated_body_is_incomplete_data() {
        // Claims a 16-byte body but delivers 2.
        let mut bytes = MAGIC.to_vec();
        bytes.push(StatusCode::GoodResponse.raw());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"{}");
        assert_eq!(decode_err(&bytes), StatusCode::IncompleteData);
    }

    #[test]
    fn missing_length_is_incomplete_data() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(StatusCode::GoodResponse.raw());
        assert_eq!(decode_err(&bytes), StatusCode::IncompleteData);
    }

    #[test]
    fn unknown_status_byte_is_invalid_status_code() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[63, 2, 0]);
        bytes.extend_from_slice(b"{}");
        assert_eq!(decode_err(&bytes), StatusCode::InvalidStatusCode);
    }

    #[test]
    fn non_json_body_is_invalid_body() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(StatusCode::GoodResponse.raw());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(b"!!!!");
        assert_eq!(decode_err(&bytes), StatusCode::InvalidBody);
    }

    #[test]
    fn non_object_body_is_invalid_body() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(StatusCode::GoodResponse.raw());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(b"1234");
        assert_eq!(decode_err(&bytes), StatusCode::InvalidBody);
    }

    #[tokio::test]
    async fn oversized_body_fails_with_buffer_overflow() {
        let mut body = Body::new();
        body.insert("blob".to_string(), Value::String("x".repeat(MAX_SIZE)));
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, StatusCode::GoodResponse, &body)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Status(StatusCode::BufferOverflow)
        ));
        assert!(buf.is_empty(), "nothing must be written on overflow");
    }

    #[tokio::test]
    async fn request_round_trip() {
        let payload = json!({"c": ["a", "b"]});
        let mut buf = Vec::new();
        write_request(&mut buf, Some("values"), Some(&payload))
            .await
            .unwrap();
        assert_eq!(buf[4], StatusCode::RequestWithMethodAndPayload.raw());

        let mut slice = buf.as_slice();
        let (method, body) = read_request(&mut slice).await.unwrap();
        assert_eq!(method.as_deref(), Some("values"));
        assert_eq!(Value::Object(body), payload);
    }

    #[tokio::test]
    async fn bare_request_has_no_fields() {
        let mut buf = Vec::new();
        write_request(&mut buf, None, None).await.unwrap();
        assert_eq!(buf[4], StatusCode::Request.raw());

        let mut slice = buf.as_slice();
        let (method, payload) = read_request(&mut slice).await.unwrap();
        assert_eq!(method, None);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn response_in_request_position_is_rejected() {
        let mut buf = Vec::new();
        write_status_response(&mut buf, StatusCode::GoodResponse)
            .await
            .unwrap();
        let mut slice = buf.as_slice();
        let err = read_request(&mut slice).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Status(StatusCode::InvalidStatusCode)
        ));
    }

    #[tokio::test]
    async fn bad_response_surfaces_its_status() {
        let mut buf = Vec::new();
        write_status_response(&mut buf, StatusCode::FailedRequestHandling)
            .await
            .unwrap();
        let mut slice = buf.as_slice();
        let err = read_response(&mut slice).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Status(StatusCode::FailedRequestHandling)
        ));
    }

    #[tokio::test]
    async fn good_response_without_payload_yields_empty_map() {
        let mut buf = Vec::new();
        write_payload_response(&mut buf, None).await.unwrap();
        let mut slice = buf.as_slice();
        let (status, payload) = read_response(&mut slice).await.unwrap();
        assert_eq!(status, StatusCode::GoodResponse);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_response_degrades_to_bad_response() {
        let huge = json!({"blob": "x".repeat(MAX_SIZE)});
        let mut buf = Vec::new();
        write_payload_response(&mut buf, Some(huge)).await.unwrap();
        let mut slice = buf.as_slice();
        let err = read_response(&mut slice).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Status(StatusCode::BufferOverflow)
        ));
    }
}
