// Decode failures at the transport boundary.
//
// The relay treats every variant the same way: the frame is logged and
// dropped, the connection stays open, and nothing is sent back.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has neither `messageType` nor `id` to name its kind")]
    MissingKind,

    #[error("`{kind}` frame is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("`binaryImage` is not valid base64: {0}")]
    InvalidImage(#[from] crate::image::DecodeError),
}
