//! 多帧信封的长度前缀编码。
//!
//! # 教案式说明
//! - **意图 (Why)**：TCP 是字节流，需要显式边界才能还原“帧序列”；
//! - **契约 (What)**：
//!   - [`encode`] 追加写入目标缓冲，不清空已有内容；
//!   - [`decode`] 在数据不完整时返回 `Ok(None)` 且不消费任何字节，完整时恰好消费一个信封；
//! - **执行逻辑 (How)**：先在不移动游标的情况下扫描全部长度前缀，确认完整后再 `split_to` 切出各帧，
//!   切出的 [`Bytes`] 与读缓冲共享底层内存。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tessera_core::Envelope;
use thiserror::Error;

/// 单个信封允许的最大帧数。
pub const MAX_FRAMES: usize = 1024;

const PREFIX: usize = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("envelope must contain at least one frame")]
    EmptyEnvelope,

    #[error("envelope declares {count} frames, more than the supported maximum")]
    TooManyFrames { count: usize },

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
}

/// 编码一个信封。
///
/// # Errors
/// 空信封、帧数超限或帧长度超出 `u32` 时返回错误。
pub fn encode(envelope: &Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
    let count = envelope.len();
    if count == 0 {
        return Err(CodecError::EmptyEnvelope);
    }
    if count > MAX_FRAMES {
        return Err(CodecError::TooManyFrames { count });
    }
    let body: usize = envelope.frames().map(|frame| PREFIX + frame.len()).sum();
    dst.reserve(PREFIX + body);
    dst.put_u32(count as u32);
    for frame in envelope.frames() {
        let len = u32::try_from(frame.len()).map_err(|_| CodecError::FrameTooLarge {
            len: frame.len(),
            max: u32::MAX as usize,
        })?;
        dst.put_u32(len);
        dst.put_slice(frame);
    }
    Ok(())
}

/// 尝试从缓冲头部解码一个信封。
///
/// # Errors
/// 帧数为 0、帧数超限或单帧超过 `max_frame_len` 时返回错误，此时连接应被关闭。
pub fn decode(src: &mut BytesMut, max_frame_len: usize) -> Result<Option<Envelope>, CodecError> {
    if src.len() < PREFIX {
        return Ok(None);
    }
    let count = read_u32(src, 0);
    if count == 0 {
        return Err(CodecError::EmptyEnvelope);
    }
    if count > MAX_FRAMES {
        return Err(CodecError::TooManyFrames { count });
    }

    let mut cursor = PREFIX;
    for _ in 0..count {
        if src.len() < cursor + PREFIX {
            return Ok(None);
        }
        let len = read_u32(src, cursor);
        if len > max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: max_frame_len,
            });
        }
        cursor += PREFIX + len;
        if src.len() < cursor {
            return Ok(None);
        }
    }

    src.advance(PREFIX);
    let mut envelope = Envelope::new();
    for _ in 0..count {
        let len = src.get_u32() as usize;
        let frame: Bytes = src.split_to(len).freeze();
        envelope.push_back(frame);
    }
    Ok(Some(envelope))
}

fn read_u32(src: &BytesMut, at: usize) -> usize {
    let mut raw = [0_u8; PREFIX];
    raw.copy_from_slice(&src[at..at + PREFIX]);
    u32::from_be_bytes(raw) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::from_frames([
            Bytes::from_static(b"id"),
            Bytes::new(),
            Bytes::from_static(b"payload"),
        ])
    }

    #[test]
    fn partial_input_consumes_nothing() {
        let mut full = BytesMut::new();
        encode(&sample(), &mut full).expect("编码成功");
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert_eq!(decode(&mut partial, 64), Ok(None), "截断于 {cut} 字节时不应产出信封");
            assert_eq!(partial.len(), cut, "不完整时不得消费字节");
        }
    }

    #[test]
    fn back_to_back_envelopes_decode_in_order() {
        let mut buf = BytesMut::new();
        encode(&sample(), &mut buf).expect("编码成功");
        encode(&Envelope::from_frames([Bytes::from_static(b"second")]), &mut buf)
            .expect("编码成功");
        assert_eq!(decode(&mut buf, 64), Ok(Some(sample())));
        assert_eq!(
            decode(&mut buf, 64).map(|env| env.map(Envelope::into_frames)),
            Ok(Some(vec![Bytes::from_static(b"second")]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected_before_buffering() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u32(1_000);
        assert_eq!(
            decode(&mut buf, 512),
            Err(CodecError::FrameTooLarge { len: 1_000, max: 512 })
        );
    }

    #[test]
    fn zero_frame_count_is_a_protocol_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert_eq!(decode(&mut buf, 512), Err(CodecError::EmptyEnvelope));
        assert_eq!(
            encode(&Envelope::new(), &mut BytesMut::new()),
            Err(CodecError::EmptyEnvelope)
        );
    }
}
