// Base64 codec for camera frames.
//
// Cameras cannot put raw bytes into a JSON text frame, so they base64-encode
// each JPEG into the `binaryImage` field. The relay decodes it once, at the
// transport boundary, and forwards the raw bytes upstream as a binary
// websocket frame. The round trip must be byte-exact.
//
// Decoding is lenient in the same two ways camera firmware tends to need:
// trailing `=` padding may be present or absent, and embedded ASCII
// whitespace (line-wrapped encoders) is ignored.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

pub use base64::DecodeError;

const IMAGE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode raw image bytes for the `binaryImage` field.
pub fn encode_image(bytes: &[u8]) -> String {
    IMAGE_ENGINE.encode(bytes)
}

/// Decode a `binaryImage` field back to raw bytes.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    if encoded.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        IMAGE_ENGINE.decode(compact)
    } else {
        IMAGE_ENGINE.decode(encoded)
    }
}
