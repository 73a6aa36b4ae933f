//! Image codec seam.
//!
//! The transport never looks inside a compressed frame; it only needs
//! `compress(frame, quality) -> bytes` and `decompress(bytes) -> frame`.
//! Real deployments plug a JPEG implementation in here.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::MediaError;
use crate::types::VideoFrame;

pub trait FrameCodec: Send + Sync {
    /// Compress `frame`; `quality` is a 1..=100 JPEG-style knob.
    fn compress(&self, frame: &VideoFrame, quality: u8) -> Result<Bytes, MediaError>;

    fn decompress(&self, data: &[u8]) -> Result<VideoFrame, MediaError>;
}

/// Passthrough codec: `[width u32 BE][height u32 BE][pixels]`.
///
/// Ignores `quality`. Used by the headless client and the tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

const RAW_HEADER: usize = 8;

impl FrameCodec for RawCodec {
    fn compress(&self, frame: &VideoFrame, _quality: u8) -> Result<Bytes, MediaError> {
        let mut out = BytesMut::with_capacity(RAW_HEADER + frame.data.len());
        out.put_u32(frame.width);
        out.put_u32(frame.height);
        out.put_slice(&frame.data);
        Ok(out.freeze())
    }

    fn decompress(&self, mut data: &[u8]) -> Result<VideoFrame, MediaError> {
        if data.len() < RAW_HEADER {
            return Err(MediaError::Codec {
                reason: format!("raw frame too short ({} bytes)", data.len()),
            });
        }
        let width = data.get_u32();
        let height = data.get_u32();
        Ok(VideoFrame::new(Bytes::copy_from_slice(data), width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codec_keeps_dimensions() {
        let frame = VideoFrame::new(vec![7u8; 12], 2, 2);
        let packed = RawCodec.compress(&frame, 50).unwrap();
        assert_eq!(packed.len(), 8 + 12);
        let back = RawCodec.decompress(&packed).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn raw_codec_rejects_truncated_input() {
        assert!(matches!(
            RawCodec.decompress(&[0, 0, 1]),
            Err(MediaError::Codec { .. })
        ));
    }
}
