//! Authenticated classical channel.
//!
//! The reliable, ordered transport between Alice and Bob is an external
//! collaborator behind [`Transport`]. [`AuthenticatedChannel`] wraps it so that
//! every outgoing message carries a Wegman–Carter tag over
//! `header ‖ "|" ‖ payload`, and every incoming frame is checked before its
//! payload is decoded.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, trace};
use serde::{Deserialize, Serialize};

use crate::auth::wegman_carter::{AuthKey, ToeplitzAuthenticator};
use crate::errors::{AuthError, QkdError, Result};
use crate::protocol::message::Message;

/// One authenticated envelope as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub header: String,
    pub payload: String,
    pub tag: Vec<u8>,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Anything that does not parse as an envelope is a security failure,
    /// not a codec error.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Frame, AuthError> {
        serde_json::from_slice(bytes).map_err(|e| AuthError::Security(format!("undecodable envelope: {e}")))
    }

    fn signed_bytes(header: &str, payload: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(header.len() + payload.len() + 1);
        data.extend_from_slice(header.as_bytes());
        data.push(b'|');
        data.extend_from_slice(payload.as_bytes());
        data
    }
}

/// Reliable, ordered, blocking message delivery to the peer.
pub trait Transport {
    fn send(&mut self, frame: Frame) -> Result<()>;
    fn receive(&mut self) -> Result<Frame>;
}

/// One end of an in-process duplex link.
#[derive(Debug)]
pub struct MemoryLink {
    outgoing: Sender<Frame>,
    incoming: Receiver<Frame>,
}

impl MemoryLink {
    /// Two connected endpoints: whatever one sends, the other receives.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (
            MemoryLink {
                outgoing: a_tx,
                incoming: a_rx,
            },
            MemoryLink {
                outgoing: b_tx,
                incoming: b_rx,
            },
        )
    }

    /// Frames already delivered and not yet received.
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for MemoryLink {
    fn send(&mut self, frame: Frame) -> Result<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| QkdError::Channel("peer endpoint dropped".into()))
    }

    fn receive(&mut self) -> Result<Frame> {
        self.incoming
            .recv()
            .map_err(|_| QkdError::Channel("peer endpoint dropped".into()))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, frame: Frame) -> Result<()> {
        (**self).send(frame)
    }

    fn receive(&mut self) -> Result<Frame> {
        (**self).receive()
    }
}

pub struct AuthenticatedChannel<T> {
    transport: T,
    authenticator: ToeplitzAuthenticator,
}

impl<T: Transport> AuthenticatedChannel<T> {
    pub fn new(transport: T, key: AuthKey, tag_bits: usize) -> Result<Self> {
        Ok(AuthenticatedChannel {
            transport,
            authenticator: ToeplitzAuthenticator::new(key, tag_bits)?,
        })
    }

    /// Tags and sends one message.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let frame = self.seal(message)?;
        trace!("send {} ({} payload bytes)", frame.header, frame.payload.len());
        self.transport.send(frame)
    }

    /// Receives one frame, authenticates it and decodes it.
    pub fn receive(&mut self) -> Result<Message> {
        let frame = self.transport.receive()?;
        trace!("recv {} ({} payload bytes)", frame.header, frame.payload.len());
        self.open(&frame)
    }

    pub fn seal(&mut self, message: &Message) -> Result<Frame> {
        let (header, payload) = message.encode()?;
        let tag = self
            .authenticator
            .authenticate(&Frame::signed_bytes(&header, &payload))?;
        Ok(Frame { header, payload, tag })
    }

    /// Checks envelope shape, then the tag, and only then the header and payload.
    pub fn open(&mut self, frame: &Frame) -> Result<Message> {
        let expected_len = self.authenticator.tag_len_bytes();
        if frame.tag.len() != expected_len {
            error!(
                "rejecting {}: tag is {} bytes, expected {}",
                frame.header,
                frame.tag.len(),
                expected_len
            );
            return Err(AuthError::Security(format!(
                "tag for '{}' is {} bytes, expected {}",
                frame.header,
                frame.tag.len(),
                expected_len
            ))
            .into());
        }

        let signed = Frame::signed_bytes(&frame.header, &frame.payload);
        if !self.authenticator.verify(&signed, &frame.tag)? {
            error!("authentication tag mismatch on {}", frame.header);
            return Err(AuthError::Integrity {
                header: frame.header.clone(),
            }
            .into());
        }

        Message::decode(&frame.header, &frame.payload)
    }

    pub fn messages_processed(&self) -> u64 {
        self.authenticator.message_counter()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> (AuthenticatedChannel<MemoryLink>, AuthenticatedChannel<MemoryLink>) {
        let (a, b) = MemoryLink::pair();
        let key = AuthKey::new(b"channel test key".to_vec()).unwrap();
        (
            AuthenticatedChannel::new(a, key.clone(), 64).unwrap(),
            AuthenticatedChannel::new(b, key, 64).unwrap(),
        )
    }

    #[test]
    fn messages_round_trip_through_the_link() {
        let (mut alice, mut bob) = channels();
        let msg = Message::CascadeSync { pass: 1 };
        alice.send(&msg).unwrap();
        assert_eq!(bob.transport().pending(), 1);
        assert_eq!(bob.receive().unwrap(), msg);
    }

    #[test]
    fn tampered_payload_fails_integrity() {
        let (mut alice, mut bob) = channels();
        let mut frame = alice.seal(&Message::VerifyResult { matched: false }).unwrap();
        frame.payload = r#"{"matched":true}"#.to_string();
        let err = bob.open(&frame).unwrap_err();
        assert!(matches!(err, QkdError::Auth(AuthError::Integrity { .. })));
    }

    #[test]
    fn tampered_header_fails_integrity() {
        let (mut alice, mut bob) = channels();
        let mut frame = alice.seal(&Message::CascadeSync { pass: 0 }).unwrap();
        frame.header = "CASCADE_DONE".to_string();
        let err = bob.open(&frame).unwrap_err();
        assert!(matches!(err, QkdError::Auth(AuthError::Integrity { .. })));
    }

    #[test]
    fn wrong_tag_shape_is_a_security_error() {
        let (mut alice, mut bob) = channels();
        let mut frame = alice.seal(&Message::CascadeSync { pass: 0 }).unwrap();
        frame.tag.pop();
        let err = bob.open(&frame).unwrap_err();
        assert!(matches!(err, QkdError::Auth(AuthError::Security(_))));
    }

    #[test]
    fn garbage_bytes_are_a_security_error() {
        assert!(matches!(Frame::from_bytes(b"not json"), Err(AuthError::Security(_))));
    }

    #[test]
    fn different_keys_cannot_talk() {
        let (a, b) = MemoryLink::pair();
        let mut alice = AuthenticatedChannel::new(a, AuthKey::new(b"alice".to_vec()).unwrap(), 64).unwrap();
        let mut bob = AuthenticatedChannel::new(b, AuthKey::new(b"bob".to_vec()).unwrap(), 64).unwrap();
        alice.send(&Message::CascadeSync { pass: 0 }).unwrap();
        assert!(bob.receive().unwrap_err().is_security_failure());
    }

    #[test]
    fn dropped_peer_is_a_channel_error() {
        let (mut alice, bob) = channels();
        drop(bob);
        assert!(matches!(alice.receive(), Err(QkdError::Channel(_))));
    }

    #[test]
    fn frames_serialize_to_bytes() {
        let (mut alice, mut bob) = channels();
        let frame = alice.seal(&Message::CascadeDone { index: 7 }).unwrap();
        let decoded = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(bob.open(&decoded).unwrap(), Message::CascadeDone { index: 7 });
    }
}
