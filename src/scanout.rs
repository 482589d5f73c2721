//! Direct scanout planning: mapping one frame's rectangles and images onto a
//! display's hardware layers, or rejecting the scene so the caller falls
//! back to GPU composition.

use log::debug;

use crate::buffers::BufferRegistry;
use crate::controller::{AlphaMode, DisplayController, EventId, Frame, ImageConfig, LayerId};
use crate::error::CompositorError;
use crate::fence::FenceRegistry;
use crate::targets::DisplayEngineData;
use crate::transform::display_transform;
use crate::types::{
    BlendMode, DisplayInfo, ImageId, ImageMetadata, ImageRect, PixelFormat, PixelFormatKind,
    RenderData,
};

/// Stages `data` onto the display's layers.
///
/// Errors here are planning rejections, not API failures: the caller
/// discards the staged state and routes the frame to the GPU path.
///
/// On success, the IDs of all participating images have been appended to
/// `pending_images`; their signal events are cleared by the caller only once
/// the surrounding configuration passes `check_config`.
pub(crate) fn assign_render_data(
    controller: &mut dyn DisplayController,
    buffers: &BufferRegistry,
    fences: &mut FenceRegistry,
    engine: &DisplayEngineData,
    display_info: &DisplayInfo,
    data: &RenderData,
    pending_images: &mut Vec<ImageId>,
) -> Result<(), CompositorError> {
    debug_assert_eq!(data.rectangles.len(), data.images.len());
    let num_images = data.images.len();

    // One image maps to one layer; more images than layers cannot be
    // composited in hardware.
    if engine.layers.len() < num_images {
        return Err(CompositorError::LayersExhausted {
            needed: num_images,
            available: engine.layers.len(),
        });
    }

    // Reserve every participating image up front; an image with a frame
    // still in flight rejects the whole scene.
    let mut signal_ids = vec![EventId::INVALID; num_images];
    for (i, image) in data.images.iter().enumerate() {
        if !image.identifier.is_valid() {
            continue; // Solid-color rectangles carry no fence.
        }
        match fences.prepare_image(controller, image.identifier) {
            Ok(Some(signal_id)) => signal_ids[i] = signal_id,
            Ok(None) => return Err(CompositorError::ImageInUse(image.identifier)),
            Err(error) => return Err(CompositorError::ControllerTransportFailed(error)),
        }
        pending_images.push(image.identifier);
    }

    // Only as many layers as the scene has images.
    controller
        .set_display_layers(data.display_id, &engine.layers[..num_images])
        .map_err(CompositorError::ControllerTransportFailed)?;

    for (i, (rect, image)) in data.rectangles.iter().zip(&data.images).enumerate() {
        let layer = engine.layers[i];
        if image.identifier.is_valid() {
            let config = buffers.image_config(image).ok_or_else(|| {
                CompositorError::DisplayImportFailed {
                    reason: format!("collection {:?} is not display-compatible", image.collection_id),
                }
            })?;
            apply_layer_image(controller, layer, rect, image, config, EventId::INVALID, signal_ids[i])
                .map_err(CompositorError::ControllerTransportFailed)?;
        } else {
            // Display hardware restricts color layers to the backmost,
            // display-covering position; anything else is composited by the
            // GPU instead.
            let display_size = display_info.dimensions;
            let covers_display = rect.origin == [0.0, 0.0]
                && rect.extent == [display_size.width as f32, display_size.height as f32];
            if i != 0 || !covers_display {
                debug!("solid color rect at index {i} with origin {:?} rejected", rect.origin);
                return Err(CompositorError::UnsupportedSolidColorGeometry);
            }
            apply_layer_color(controller, layer, image)
                .map_err(CompositorError::ControllerTransportFailed)?;
        }
    }

    Ok(())
}

/// Programs a primary layer with an image, its position/transform, alpha
/// behavior and fences.
pub(crate) fn apply_layer_image(
    controller: &mut dyn DisplayController,
    layer: LayerId,
    rect: &ImageRect,
    image: &ImageMetadata,
    config: ImageConfig,
    wait: EventId,
    signal: EventId,
) -> anyhow::Result<()> {
    let (src, dst) = src_dst_frames(rect, image);
    debug_assert!(src.width > 0 && src.height > 0, "source frame cannot be empty");
    debug_assert!(dst.width > 0 && dst.height > 0, "destination frame cannot be empty");
    let transform = display_transform(rect.orientation, image.flip);
    let alpha_mode = alpha_mode_for(image.blend_mode);

    controller.set_layer_primary_config(layer, config)?;
    controller.set_layer_primary_position(layer, transform, src, dst)?;
    controller.set_layer_primary_alpha(layer, alpha_mode, image.multiply_color[3])?;
    controller.set_layer_image(layer, image.identifier, wait, signal)
}

/// Programs a layer as a solid fill of the image's multiply color.
///
/// Position and alpha are deliberately not programmed: hardware support for
/// positioned color layers is inconsistent, so only the backmost
/// display-covering fill ever reaches this point.
fn apply_layer_color(
    controller: &mut dyn DisplayController,
    layer: LayerId,
    image: &ImageMetadata,
) -> anyhow::Result<()> {
    let rgba = [
        quantize_channel(image.multiply_color[0]),
        quantize_channel(image.multiply_color[1]),
        quantize_channel(image.multiply_color[2]),
        quantize_channel(image.multiply_color[3]),
    ];
    controller.set_layer_color_config(layer, PixelFormat::linear(PixelFormatKind::Bgra32), rgba)
}

/// Quantizes a normalized color channel to 8 bits.
pub(crate) fn quantize_channel(value: f32) -> u8 {
    (255.0 * value.clamp(0.0, 1.0)).floor() as u8
}

/// Source and destination frames for a layer: the full image, mapped onto
/// the rectangle's display-space footprint.
fn src_dst_frames(rect: &ImageRect, image: &ImageMetadata) -> (Frame, Frame) {
    let src = Frame { x: 0, y: 0, width: image.width, height: image.height };
    let dst = Frame {
        x: rect.origin[0] as u32,
        y: rect.origin[1] as u32,
        width: rect.extent[0] as u32,
        height: rect.extent[1] as u32,
    };
    (src, dst)
}

/// Blend modes map onto the display controller's two alpha modes.
pub(crate) fn alpha_mode_for(blend_mode: BlendMode) -> AlphaMode {
    match blend_mode {
        BlendMode::Src => AlphaMode::Disable,
        BlendMode::SrcOver => AlphaMode::Premultiplied,
    }
}
