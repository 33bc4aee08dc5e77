use rocket::serde::json::serde_json;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::model::VoteTally;

/// Failure to turn a received datagram back into a tally.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Frame decrypted but is not a tally: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encode one tally as an encrypted broadcast frame.
pub fn encode_frame(tally: &VoteTally) -> Result<Vec<u8>, serde_json::Error> {
    let plaintext = serde_json::to_vec(tally)?;
    Ok(codec::encrypt(&plaintext))
}

/// Decode a broadcast frame back into a tally.
pub fn decode_frame(frame: &[u8]) -> Result<VoteTally, FrameError> {
    let plaintext = codec::decrypt(frame)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_is_the_tally_json() {
        let tally = VoteTally {
            id: "A".to_string(),
            name: "Ana".to_string(),
            votes: 3,
        };
        let frame = encode_frame(&tally).unwrap();
        assert_eq!(
            codec::decrypt(&frame).unwrap(),
            br#"{"id":"A","name":"Ana","votes":3}"#
        );
        assert_eq!(decode_frame(&frame).unwrap(), tally);
    }

    #[test]
    fn rejects_non_tallies() {
        assert!(matches!(
            decode_frame(&[0; 8]),
            Err(FrameError::Codec(CodecError::MalformedFrame(8)))
        ));
        let frame = codec::encrypt(br#"{"hello":"world"}"#);
        assert!(matches!(decode_frame(&frame), Err(FrameError::Payload(_))));
    }
}
