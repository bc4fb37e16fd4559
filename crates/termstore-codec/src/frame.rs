//! Length-prefixed record frames.
//!
//! A frame is `[4B total length][body]`, where the length counts its own
//! prefix. A zero length terminates a frame list. Writers reserve the prefix
//! with [`DataBuffer::begin_frame`] and backpatch it with
//! [`DataBuffer::end_frame`].

use crate::buffer::DataBuffer;
use crate::error::CodecError;

const PREFIX: usize = 4;

/// Bounds of one frame inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    start: usize,
    length: usize,
}

impl Frame {
    /// Read the frame starting at the cursor, leaving the cursor on its body.
    ///
    /// Returns `None` on the terminator.
    pub fn next(buffer: &mut DataBuffer) -> Result<Option<Frame>, CodecError> {
        let start = buffer.position();
        let length = buffer.get_length()?;
        if length == 0 {
            return Ok(None);
        }
        if length < PREFIX {
            return Err(CodecError::InvalidLength {
                position: start,
                length: length as i32,
            });
        }
        if start + length > buffer.limit() {
            return Err(CodecError::OutOfBounds {
                position: start,
                requested: length,
                limit: buffer.limit(),
            });
        }
        Ok(Some(Frame { start, length }))
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == PREFIX
    }

    pub fn body_start(&self) -> usize {
        self.start + PREFIX
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Position the cursor on the frame body.
    pub fn seek_body(&self, buffer: &mut DataBuffer) -> Result<(), CodecError> {
        buffer.set_position(self.body_start())
    }

    /// Position the cursor after the frame.
    pub fn skip(&self, buffer: &mut DataBuffer) -> Result<(), CodecError> {
        buffer.set_position(self.end())
    }

    /// Check that a reader consumed exactly the frame body.
    pub fn finish(&self, buffer: &DataBuffer) -> Result<(), CodecError> {
        if buffer.position() != self.end() {
            return Err(CodecError::RecordBoundary {
                start: self.start,
                declared: self.length,
                consumed: buffer.position().saturating_sub(self.start),
            });
        }
        Ok(())
    }
}

/// Prefix reserved by [`DataBuffer::begin_frame`].
#[derive(Debug)]
#[must_use = "an open frame must be closed with end_frame"]
pub struct OpenFrame {
    start: usize,
}

impl DataBuffer {
    pub fn begin_frame(&mut self) -> OpenFrame {
        let start = self.position();
        self.put_i32(0);
        OpenFrame { start }
    }

    pub fn end_frame(&mut self, frame: OpenFrame) -> Result<(), CodecError> {
        let length = self.position() - frame.start;
        self.put_i32_at(frame.start, length as i32)
    }

    /// Append a whole frame of `source` unchanged.
    pub fn append_frame(&mut self, source: &DataBuffer, frame: &Frame) -> Result<(), CodecError> {
        self.append(source, frame.start(), frame.len())
    }

    pub fn put_terminator(&mut self) {
        self.put_i32(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_frames() -> Vec<u8> {
        let mut buffer = DataBuffer::with_capacity(0, false);
        let first = buffer.begin_frame();
        buffer.put_i64(11);
        buffer.end_frame(first).expect("first frame");
        let second = buffer.begin_frame();
        buffer.put_utf("two");
        buffer.end_frame(second).expect("second frame");
        buffer.put_terminator();
        buffer.into_bytes()
    }

    #[test]
    fn frames_are_walked_until_terminator() {
        let mut reader = DataBuffer::wrap(two_frames(), false);
        let mut lengths = Vec::new();
        while let Some(frame) = Frame::next(&mut reader).expect("frame") {
            lengths.push(frame.len());
            frame.skip(&mut reader).expect("skip");
        }
        assert_eq!(lengths, vec![12, 11]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reading_short_of_the_boundary_is_reported() {
        let mut reader = DataBuffer::wrap(two_frames(), false);
        let frame = Frame::next(&mut reader).expect("frame").expect("present");
        reader.get_i32().expect("half of the body");
        assert!(matches!(
            frame.finish(&reader),
            Err(CodecError::RecordBoundary {
                declared: 12,
                consumed: 8,
                ..
            })
        ));
    }

    #[test]
    fn frame_longer_than_buffer_is_rejected() {
        let mut buffer = DataBuffer::with_capacity(0, false);
        buffer.put_i32(40);
        buffer.put_i32(1);
        let mut reader = DataBuffer::wrap(buffer.into_bytes(), false);
        assert!(matches!(
            Frame::next(&mut reader),
            Err(CodecError::OutOfBounds { requested: 40, .. })
        ));
    }

    #[test]
    fn frames_copy_verbatim() {
        let source = DataBuffer::wrap(two_frames(), false);
        let mut reader = source.clone();
        let frame = Frame::next(&mut reader).expect("frame").expect("present");

        let mut target = DataBuffer::with_capacity(0, false);
        target.append_frame(&source, &frame).expect("append");
        assert_eq!(target.as_slice(), &source.as_slice()[..12]);
    }
}
