//! View Factory
//!
//! Derives the binding view of a view-backed buffer from its declared element
//! layout. The view is computed once, at buffer creation, and never changes.
//!
//! - **Raw** views address the buffer as 32-bit words; the byte width must be
//!   a non-zero multiple of 4.
//! - **Structured** views address whole elements; the element size must be
//!   non-zero and divide the byte width.

use crate::buffer::ElementLayout;

/// Size of one raw-view word in bytes.
pub const RAW_WORD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Byte-addressed view over 32-bit words.
    Raw,
    /// Element-addressed view.
    Structured,
}

/// Access granted to a kernel through a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewAccess {
    ReadOnly,
    ReadWrite,
}

/// Everything a backend needs to create a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub access: ViewAccess,
    pub first_element: usize,
    pub element_count: usize,
    /// Bytes per addressed element (4 for raw views).
    pub stride: usize,
}

impl ViewDesc {
    /// Derives the view for a buffer of `byte_width` bytes.
    ///
    /// Returns `None` when the layout cannot be viewed; buffer creation treats
    /// that as a view-creation failure.
    #[must_use]
    pub fn derive(byte_width: usize, layout: &ElementLayout, read_write: bool) -> Option<Self> {
        let access = if read_write {
            ViewAccess::ReadWrite
        } else {
            ViewAccess::ReadOnly
        };

        let (kind, stride) = if layout.raw_view {
            (ViewKind::Raw, RAW_WORD_SIZE)
        } else {
            (ViewKind::Structured, layout.size)
        };

        if stride == 0 || byte_width == 0 || byte_width % stride != 0 {
            return None;
        }

        Some(Self {
            kind,
            access,
            first_element: 0,
            element_count: byte_width / stride,
            stride,
        })
    }

    /// Bytes covered by the view.
    #[inline]
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.element_count * self.stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_view_counts_elements() {
        let desc = ViewDesc::derive(96, &ElementLayout::structured(12), false).unwrap();
        assert_eq!(desc.kind, ViewKind::Structured);
        assert_eq!(desc.access, ViewAccess::ReadOnly);
        assert_eq!(desc.element_count, 8);
        assert_eq!(desc.stride, 12);
    }

    #[test]
    fn raw_view_counts_words() {
        let desc = ViewDesc::derive(96, &ElementLayout::raw(12), true).unwrap();
        assert_eq!(desc.kind, ViewKind::Raw);
        assert_eq!(desc.access, ViewAccess::ReadWrite);
        assert_eq!(desc.element_count, 24);
        assert_eq!(desc.byte_len(), 96);
    }

    #[test]
    fn raw_view_rejects_unaligned_width() {
        assert!(ViewDesc::derive(6, &ElementLayout::raw(2), false).is_none());
    }

    #[test]
    fn empty_or_zero_stride_is_rejected() {
        assert!(ViewDesc::derive(0, &ElementLayout::structured(4), false).is_none());
        assert!(ViewDesc::derive(16, &ElementLayout::structured(0), false).is_none());
    }
}
