//! CRLF framing for [`Message`] on a byte stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MessageError;
use crate::network::messages::Message;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChordCodec;

impl Decoder for ChordCodec {
    type Item = Message;
    type Error = MessageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, MessageError> {
        Message::parse(src)
    }
}

impl Encoder<Message> for ChordCodec {
    type Error = MessageError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), MessageError> {
        item.write_to(dst);
        Ok(())
    }
}
