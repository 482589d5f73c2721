//! Mapping from scene orientation and image flip to display-layer transforms.
//!
//! The display controller accepts a single transform per layer. Scene content
//! carries a rotation (on the rectangle) and a mirror (on the image); the two
//! compose into one of the eight wire transforms, with the flip applied first
//! and the rotation after.

/// Counter-clockwise rotation of a rectangle's content, in multiples of 90°.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// No rotation.
    #[default]
    Deg0,
    /// 90° counter-clockwise.
    Deg90,
    /// 180°.
    Deg180,
    /// 270° counter-clockwise.
    Deg270,
}

/// Mirroring applied to an image before its rectangle's orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Flip {
    /// No mirroring.
    #[default]
    None,
    /// Left-right mirror (reflection across the vertical axis).
    Horizontal,
    /// Up-down mirror (reflection across the horizontal axis).
    Vertical,
}

/// The display controller's layer transform.
///
/// Composite variants name the flip-then-rotate order: `Rot90ReflectX` is a
/// reflection across the X axis followed by a 90° rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DisplayTransform {
    /// No transform.
    #[default]
    Identity,
    /// Reflection across the X axis (up-down mirror).
    ReflectX,
    /// Reflection across the Y axis (left-right mirror).
    ReflectY,
    /// 90° rotation.
    Rot90,
    /// 180° rotation.
    Rot180,
    /// 270° rotation.
    Rot270,
    /// Reflect across X, then rotate 90°.
    Rot90ReflectX,
    /// Reflect across Y, then rotate 90°.
    Rot90ReflectY,
}

/// Composes a rectangle orientation with an image flip into the single
/// transform the display hardware applies at scanout.
pub fn display_transform(orientation: Orientation, flip: Flip) -> DisplayTransform {
    use DisplayTransform::*;
    match (orientation, flip) {
        (Orientation::Deg0, Flip::None) => Identity,
        (Orientation::Deg0, Flip::Horizontal) => ReflectY,
        (Orientation::Deg0, Flip::Vertical) => ReflectX,
        (Orientation::Deg90, Flip::None) => Rot90,
        (Orientation::Deg90, Flip::Horizontal) => Rot90ReflectY,
        (Orientation::Deg90, Flip::Vertical) => Rot90ReflectX,
        (Orientation::Deg180, Flip::None) => Rot180,
        (Orientation::Deg180, Flip::Horizontal) => ReflectX,
        (Orientation::Deg180, Flip::Vertical) => ReflectY,
        (Orientation::Deg270, Flip::None) => Rot270,
        (Orientation::Deg270, Flip::Horizontal) => Rot90ReflectX,
        (Orientation::Deg270, Flip::Vertical) => Rot90ReflectY,
    }
}
