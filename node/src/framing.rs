use evg_core::errors::ProtocolError;
use evg_core::protocols::{Message, MAX_FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one length-prefixed frame from an authenticated stream. `Ok(None)`
/// means the peer closed cleanly between frames.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Message>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }
    if len < 3 {
        return Err(ProtocolError::FrameTooShort(len));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Message::decode(&body).map(Some)
}

/// Writes one frame and flushes it.
pub async fn write_frame<S>(stream: &mut S, message: &Message) -> Result<(), ProtocolError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&message.frame()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evg_core::protocols::full_node::NewTransaction;
    use evg_core::blockchain::sized_bytes::Bytes32;
    use evg_core::protocols::ProtocolMessageTypes;

    #[tokio::test]
    async fn test_frame_round_trip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = Message::new(
            ProtocolMessageTypes::NewTransaction,
            0,
            &NewTransaction {
                transaction_id: Bytes32::new([9u8; 32]),
                cost: 100,
                fees: 10,
            },
        );
        write_frame(&mut client, &sent).await.unwrap();
        let received = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received, sent);
        let body: NewTransaction = received.parse_as().unwrap();
        assert_eq!(body.cost, 100);
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        client.write_all(&huge).await.unwrap();
        client.flush().await.unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
