//! Replication wire protocol.
//!
//! Every message is one frame: a 4-byte big-endian length followed by that
//! many bytes of JSON. The JSON is an object tagged by `type`:
//!
//! ```text
//! {"type":"hello_from_client"}
//! {"type":"hello_from_server"}
//! {"type":"begin_init"}
//! {"type":"init_done"}
//! {"type":"status","action":"mount_status","properties":{...}}
//! ```

use rigsync_state::StatusRecord;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ReplicationError, ReplicationResult};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    HelloFromClient,
    HelloFromServer,
    BeginInit,
    InitDone,
    Status(StatusRecord),
}

impl Message {
    pub fn encode(&self) -> ReplicationResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> ReplicationResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> ReplicationResult<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(ReplicationError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> ReplicationResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(ReplicationError::FrameTooLarge(len));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use rigsync_state::{Action, AlignmentSolution, Properties};
    use serde_json::json;

    use super::*;

    #[test]
    fn control_messages_are_tagged() {
        let body = Message::HelloFromServer.encode().unwrap();
        assert_eq!(body, br#"{"type":"hello_from_server"}"#);
        assert_eq!(
            Message::decode(br#"{"type":"begin_init"}"#).unwrap(),
            Message::BeginInit
        );
    }

    #[test]
    fn status_record_fields_sit_beside_the_tag() {
        let mut properties = Properties::new();
        properties.insert("status".into(), json!(1));
        let record = StatusRecord::new(Action::AlignStatus, properties)
            .with_solution(Some(AlignmentSolution::new(182.4, 150.0, -5.0)));

        let value = serde_json::to_value(Message::Status(record.clone())).unwrap();
        assert_eq!(value["type"], json!("status"));
        assert_eq!(value["action"], json!("align_status"));
        assert_eq!(value["solution"]["position_angle"], json!(2.4));

        let decoded = Message::decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(decoded, Message::Status(record));
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(matches!(
            Message::decode(br#"{"type":"reboot"}"#),
            Err(ReplicationError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn frames_are_length_prefixed() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"{}").await.unwrap();
        assert_eq!(wire, [0, 0, 0, 2, b'{', b'}']);

        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"{}");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let wire = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ReplicationError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let wire = [0, 0, 0, 8, b'{'];
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ReplicationError::Io(_))
        ));
    }
}
