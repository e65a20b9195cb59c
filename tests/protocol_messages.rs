// tests/protocol_messages.rs

use std::path::PathBuf;

use tokio::net::UnixStream;

use forktree::errors::SupervisorError;
use forktree::protocol::{ControlSocket, MAX_FRAME_LEN, Message, MessageError};

#[test]
fn test_parse_each_message_kind() {
    assert_eq!(Message::parse("P:4242:app"), Ok(Message::pid(4242, "app")));
    assert_eq!(Message::parse("S:web"), Ok(Message::spawn("web")));
    assert_eq!(Message::parse("R:OK"), Ok(Message::BootResult(Ok(()))));
    assert_eq!(
        Message::parse("R:LoadError: cannot load such file"),
        Ok(Message::BootResult(Err(
            "LoadError: cannot load such file".to_string()
        )))
    );
    assert_eq!(
        Message::parse("F:/srv/app/config/boot.rb"),
        Ok(Message::Feature(PathBuf::from("/srv/app/config/boot.rb")))
    );
}

#[test]
fn test_identifier_may_contain_colons() {
    assert_eq!(
        Message::parse("P:7:worker:high"),
        Ok(Message::pid(7, "worker:high"))
    );
}

#[test]
fn test_encode_matches_wire_text() {
    assert_eq!(Message::pid(12, "boot").encode(), "P:12:boot");
    assert_eq!(Message::spawn("test").encode(), "S:test");
    assert_eq!(Message::BootResult(Ok(())).encode(), "R:OK");
    assert_eq!(Message::BootResult(Err("boom".into())).encode(), "R:boom");
}

#[test]
fn test_malformed_messages_are_rejected() {
    assert_eq!(Message::parse(""), Err(MessageError::Empty));
    assert!(matches!(
        Message::parse("X:1"),
        Err(MessageError::UnknownKind(kind)) if kind == "X"
    ));
    assert!(matches!(
        Message::parse("no separator"),
        Err(MessageError::UnknownKind(_))
    ));
    assert!(matches!(
        Message::parse("P:abc:app"),
        Err(MessageError::Malformed { kind: "pid", .. })
    ));
    assert!(matches!(
        Message::parse("P:12"),
        Err(MessageError::Malformed { kind: "pid", .. })
    ));
    assert!(matches!(
        Message::parse("P:12:"),
        Err(MessageError::Malformed { kind: "pid", .. })
    ));
    assert!(matches!(
        Message::parse("S:"),
        Err(MessageError::Malformed { kind: "spawn", .. })
    ));
}

#[tokio::test]
async fn test_frames_are_nul_delimited_on_the_socket() {
    let (a, b) = UnixStream::pair().unwrap();
    let sender = ControlSocket::from_stream(a);
    let (mut reader, _writer) = ControlSocket::from_stream(b).into_split();

    sender.send(&Message::pid(99, "boot")).await.unwrap();
    sender.send(&Message::BootResult(Ok(()))).await.unwrap();

    assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("P:99:boot"));
    assert_eq!(
        reader.read_message().await.unwrap(),
        Some(Message::BootResult(Ok(())))
    );

    drop(sender);
    assert_eq!(reader.read_frame().await.unwrap(), None);
}

#[tokio::test]
async fn test_undecodable_frame_is_a_protocol_error_and_reading_continues() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, b) = UnixStream::pair().unwrap();
    let mut socket = ControlSocket::from_stream(b);

    raw.write_all(b"Z:what\0S:app\0").await.unwrap();

    assert!(matches!(
        socket.read_message().await,
        Err(SupervisorError::Protocol(MessageError::UnknownKind(_)))
    ));
    assert_eq!(
        socket.read_message().await.unwrap(),
        Some(Message::spawn("app"))
    );
}

#[tokio::test]
async fn test_non_utf8_frame_is_a_protocol_error_and_reading_continues() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, b) = UnixStream::pair().unwrap();
    let mut socket = ControlSocket::from_stream(b);

    raw.write_all(b"R:\xff\xfe\0R:OK\0").await.unwrap();

    assert!(matches!(
        socket.read_message().await,
        Err(SupervisorError::Protocol(MessageError::InvalidUtf8))
    ));
    assert_eq!(
        socket.read_message().await.unwrap(),
        Some(Message::BootResult(Ok(())))
    );
}

#[tokio::test]
async fn test_oversize_frame_is_skipped_whole() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, b) = UnixStream::pair().unwrap();
    let (mut reader, _writer) = ControlSocket::from_stream(b).into_split();

    let mut bytes = vec![b'a'; MAX_FRAME_LEN + 100];
    bytes.push(0);
    bytes.extend_from_slice(b"S:app\0");
    let writer = tokio::spawn(async move {
        raw.write_all(&bytes).await.unwrap();
        raw
    });

    assert!(matches!(
        reader.read_message().await,
        Err(SupervisorError::Protocol(MessageError::TooLong { limit })) if limit == MAX_FRAME_LEN
    ));
    assert_eq!(
        reader.read_message().await.unwrap(),
        Some(Message::spawn("app"))
    );
    let _raw = writer.await.unwrap();
}

#[tokio::test]
async fn test_frame_at_the_limit_is_accepted() {
    use tokio::io::AsyncWriteExt;

    let (mut raw, b) = UnixStream::pair().unwrap();
    let (mut reader, _writer) = ControlSocket::from_stream(b).into_split();

    let mut bytes = b"F:/".to_vec();
    bytes.resize(MAX_FRAME_LEN - 1, b'x');
    bytes.push(0);
    let writer = tokio::spawn(async move {
        raw.write_all(&bytes).await.unwrap();
        raw
    });

    let frame = reader.read_frame().await.unwrap().unwrap();
    assert_eq!(frame.len(), MAX_FRAME_LEN - 1);
    let _raw = writer.await.unwrap();
}
