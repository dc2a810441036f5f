/* NEW_CONNECTION_ID and RETIRE_CONNECTION_ID frames (RFC 9000 19.15,
   19.16). */
use crate::cid::{ConnectionId, StatelessResetToken};
use crate::common::{Error, FrameType};

use octets::{Octets, OctetsMut};

/// NEW_CONNECTION_ID: announces a connection ID the peer may route to us
/// with, together with its stateless reset token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence_number: u64,
    pub retire_prior_to: u64,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: StatelessResetToken,
}

impl NewConnectionIdFrame {
    pub fn parse(b: &mut Octets) -> Result<NewConnectionIdFrame, Error> {
        if b.get_varint()? != FrameType::NewConnectionId.wire() {
            return Err(Error::UnexpectedType);
        }
        let sequence_number = b.get_varint()?;
        let retire_prior_to = b.get_varint()?;
        let len = b.get_u8()?;
        let connection_id = b.get_bytes(len as usize)?.to_vec();
        let token = b.get_bytes(16)?.to_vec();

        Ok(NewConnectionIdFrame {
            sequence_number,
            retire_prior_to,
            connection_id: connection_id.into(),
            stateless_reset_token: StatelessResetToken::from_slice(&token)?,
        })
    }

    /// Encoded size of the frame.
    pub fn wire_len(&self) -> usize {
        1 + octets::varint_len(self.sequence_number)
            + octets::varint_len(self.retire_prior_to)
            + 1
            + self.connection_id.len()
            + 16
    }

    pub fn render(&self, w: &mut OctetsMut) -> Result<(), Error> {
        if self.connection_id.len() > 0xff {
            return Err(Error::LargeInput);
        }
        w.put_varint(FrameType::NewConnectionId.wire())?;
        w.put_varint(self.sequence_number)?;
        w.put_varint(self.retire_prior_to)?;
        w.put_u8(self.connection_id.len() as u8)?;
        w.put_bytes(self.connection_id.as_ref())?;
        w.put_bytes(self.stateless_reset_token.as_ref())?;
        Ok(())
    }
}

/// RETIRE_CONNECTION_ID: tells the peer one of its issued IDs will no
/// longer be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetireConnectionIdFrame {
    pub sequence_number: u64,
}

impl RetireConnectionIdFrame {
    pub fn parse(b: &mut Octets) -> Result<RetireConnectionIdFrame, Error> {
        if b.get_varint()? != FrameType::RetireConnectionId.wire() {
            return Err(Error::UnexpectedType);
        }
        Ok(RetireConnectionIdFrame {
            sequence_number: b.get_varint()?,
        })
    }

    pub fn wire_len(&self) -> usize {
        1 + octets::varint_len(self.sequence_number)
    }

    pub fn render(&self, w: &mut OctetsMut) -> Result<(), Error> {
        w.put_varint(FrameType::RetireConnectionId.wire())?;
        w.put_varint(self.sequence_number)?;
        Ok(())
    }
}
