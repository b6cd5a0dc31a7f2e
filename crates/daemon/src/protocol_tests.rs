// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol unit tests

use super::*;
use serde_json::json;

#[test]
fn frames_are_tagged_json() {
    let frame = Frame::Send {
        target: WorkerId::new("coordinator"),
        topic: "rwgate:request".to_string(),
        payload: json!({ "request_id": "r1" }),
    };

    let encoded = encode(&frame).expect("encode failed");
    let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

    assert_eq!(value["type"], "Send");
    assert_eq!(value["target"], "coordinator");
    assert_eq!(decode::<Frame>(&encoded).unwrap(), frame);
}

#[test]
fn hello_carries_worker_and_version() {
    let encoded = br#"{"type":"Hello","worker":"w1","version":"0.1.0"}"#;
    let frame: Frame = decode(encoded).unwrap();

    assert_eq!(
        frame,
        Frame::Hello {
            worker: WorkerId::new("w1"),
            version: "0.1.0".to_string(),
        }
    );
}

#[test]
fn unknown_frame_type_is_rejected() {
    let result = decode::<Frame>(br#"{"type":"Shout"}"#);
    assert!(matches!(result, Err(ProtocolError::Json(_))));
}

#[tokio::test]
async fn read_write_message_roundtrip() {
    let original = b"hello world";

    let mut buffer = Vec::new();
    write_message(&mut buffer, original)
        .await
        .expect("write failed");

    // write_message adds 4-byte length prefix
    assert_eq!(buffer.len(), 4 + original.len());

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_message(&mut cursor).await.expect("read failed");

    assert_eq!(read_back, original);
}

#[tokio::test]
async fn write_message_adds_length_prefix() {
    let data = b"test data";

    let mut buffer = Vec::new();
    write_message(&mut buffer, data)
        .await
        .expect("write failed");

    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;

    assert_eq!(len, data.len());
    assert_eq!(&buffer[4..], data);
}

#[tokio::test]
async fn frames_stream_back_to_back() {
    let mut buffer = Vec::new();
    let first = Frame::Welcome {
        version: PROTOCOL_VERSION.to_string(),
    };
    let second = Frame::Broadcast {
        topic: "rwgate:clean-worker".to_string(),
        payload: json!({}),
    };
    write_frame(&mut buffer, &first).await.unwrap();
    write_frame(&mut buffer, &second).await.unwrap();

    let mut cursor = std::io::Cursor::new(buffer);
    assert_eq!(read_frame(&mut cursor).await.unwrap(), first);
    assert_eq!(read_frame(&mut cursor).await.unwrap(), second);
    assert!(matches!(
        read_frame(&mut cursor).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn oversized_length_prefix_is_refused() {
    let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
    let mut cursor = std::io::Cursor::new(len.to_vec());

    assert!(matches!(
        read_message(&mut cursor).await,
        Err(ProtocolError::TooLarge(_))
    ));
}

#[tokio::test]
async fn read_times_out_on_silent_peer() {
    let (mut reader, _writer) = tokio::io::duplex(64);

    let result = read_frame_timeout(&mut reader, Duration::from_millis(20)).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}
