/// Fixed canvas dimensions in pixels. The canvas is sized once at session
/// start and never reallocated; source frames of a different size are
/// clamped against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The rect covering the whole canvas.
    pub fn full_rect(self) -> DiffRect {
        DiffRect {
            left: 0,
            top: 0,
            right: self.width,
            bottom: self.height,
        }
    }
}

/// Bounding box of changed pixels between two canvas states.
///
/// `right`/`bottom` hold the maximum differing pixel coordinate as written
/// by the GPU reduction; after inflation they become exclusive bounds.
/// Validity is `right >= left && bottom >= top`, so the sentinel produced
/// by [`DiffRect::sentinel`] is invalid until a differing pixel expands it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiffRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl DiffRect {
    /// Initial value of the GPU result slot: left/top start at the canvas
    /// extent and right/bottom at zero, so any real differing pixel strictly
    /// shrinks/grows them through the atomic min/max expand.
    pub fn sentinel(size: CanvasSize) -> Self {
        Self {
            left: size.width,
            top: size.height,
            right: 0,
            bottom: 0,
        }
    }

    pub fn is_valid(self) -> bool {
        self.right >= self.left && self.bottom >= self.top
    }

    pub fn width(self) -> u32 {
        self.right - self.left
    }

    pub fn height(self) -> u32 {
        self.bottom - self.top
    }

    /// Grow the rect by `amount` pixels on every side, clamped to the canvas
    /// bounds. Compensates for compression artifacts at hard edges.
    pub fn inflated(self, amount: u32, bounds: CanvasSize) -> Self {
        Self {
            left: self.left.saturating_sub(amount),
            top: self.top.saturating_sub(amount),
            right: (self.right + amount).min(bounds.width),
            bottom: (self.bottom + amount).min(bounds.height),
        }
    }

    /// True if `other` lies fully inside `self`.
    pub fn contains(self, other: DiffRect) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.left.to_le_bytes());
        out[4..8].copy_from_slice(&self.top.to_le_bytes());
        out[8..12].copy_from_slice(&self.right.to_le_bytes());
        out[12..16].copy_from_slice(&self.bottom.to_le_bytes());
        out
    }

    pub(crate) fn from_le_bytes(bytes: &[u8]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 4];
            w.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_le_bytes(w)
        };
        Self {
            left: word(0),
            top: word(1),
            right: word(2),
            bottom: word(3),
        }
    }
}
