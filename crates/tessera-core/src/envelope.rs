//! 多帧信封。
//!
//! # 教案式说明
//! - **意图 (Why)**：路由层只关心信封的“骨架”：若干身份帧、一个空分隔帧、紧随其后的路由标识帧，
//!   其余负载帧原样透传；
//! - **契约 (What)**：
//!   - 帧使用 [`Bytes`] 保存，克隆与转发都是引用计数操作；
//!   - [`Envelope::take_route_id`] 只移除分隔帧之后的那一帧，其他帧的内容与顺序保持不变；
//!   - 结构非法时返回 [`EnvelopeError`]，且信封保持原状，调用方仍可读取身份帧用于关闭连接。
//! - **执行逻辑 (How)**：内部使用 `VecDeque`，传输层在头部压入/弹出身份帧都是 O(1)。

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::EnvelopeError;
use crate::route::RouteId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    frames: VecDeque<Bytes>,
}

impl Envelope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// 构造客户端请求信封：`[identity...] [""] [route] [payload...]`。
    #[must_use]
    pub fn routed<I, P>(identities: I, route: RouteId, payload: P) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        P: IntoIterator<Item = Bytes>,
    {
        let mut frames: VecDeque<Bytes> = identities.into_iter().collect();
        frames.push_back(Bytes::new());
        frames.push_back(route.to_frame());
        frames.extend(payload);
        Self { frames }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push_front(&mut self, frame: Bytes) {
        self.frames.push_front(frame);
    }

    pub fn push_back(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    #[must_use]
    pub fn front(&self) -> Option<&Bytes> {
        self.frames.front()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }

    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames.into()
    }

    /// 第一个空帧的位置。
    #[must_use]
    pub fn delimiter_index(&self) -> Option<usize> {
        self.frames.iter().position(Bytes::is_empty)
    }

    /// 分隔帧之后的负载帧（不含路由帧）。信封不含分隔帧时返回空迭代器。
    pub fn payload(&self) -> impl Iterator<Item = &Bytes> {
        let start = self
            .delimiter_index()
            .map_or(self.frames.len(), |index| index + 1);
        self.frames.iter().skip(start)
    }

    /// 移除并解析分隔帧之后的路由标识帧。
    ///
    /// # Errors
    /// - 不存在空帧：[`EnvelopeError::MissingDelimiter`]；
    /// - 空帧是最后一帧：[`EnvelopeError::MissingRouteFrame`]；
    /// - 路由帧宽度不是 16 字节：[`EnvelopeError::InvalidRouteFrame`]。
    ///
    /// 任一错误发生时信封不被修改。
    pub fn take_route_id(&mut self) -> Result<RouteId, EnvelopeError> {
        let delimiter = self
            .delimiter_index()
            .ok_or(EnvelopeError::MissingDelimiter {
                frames: self.frames.len(),
            })?;
        let frame = self
            .frames
            .get(delimiter + 1)
            .ok_or(EnvelopeError::MissingRouteFrame { delimiter })?;
        let route = RouteId::from_frame(frame)?;
        self.frames.remove(delimiter + 1);
        Ok(route)
    }
}

impl From<Vec<Bytes>> for Envelope {
    fn from(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}
