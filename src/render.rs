//! Reference overlay renderer.
//!
//! Draws what a display surface would show: the source image fit into the
//! surface with letterbox margins, and an unfilled rectangle per detection.
//! Labels are not drawn; callers get them alongside the geometry.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::config::OverlayConfig;
use crate::overlay::{Letterbox, OverlayItem, PixelRect, Size};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle {
    pub color: Rgba<u8>,
    pub stroke_width: u32,
    pub background: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from_config(&OverlayConfig::default())
    }
}

impl OverlayStyle {
    pub fn from_config(cfg: &OverlayConfig) -> Self {
        let [r, g, b] = cfg.overlay.color;
        let [br, bg, bb] = cfg.render.background;
        Self {
            color: Rgba([r, g, b, 255]),
            stroke_width: cfg.overlay.stroke_width,
            background: Rgba([br, bg, bb, 255]),
        }
    }
}

/// Compose `image` onto a `surface_width` x `surface_height` canvas and stroke
/// every overlay rectangle. `items` must have been mapped for this surface.
pub fn render_overlay(
    image: &DynamicImage,
    surface_width: u32,
    surface_height: u32,
    items: &[OverlayItem],
    style: &OverlayStyle,
) -> Result<RgbaImage> {
    let (width, height) = image.dimensions();
    let letterbox = Letterbox::fit(
        Size::from_pixels(width, height),
        Size::from_pixels(surface_width, surface_height),
    )
    .map_err(|e| anyhow!("cannot render overlay: {}", e))?;

    let mut canvas = RgbaImage::from_pixel(surface_width, surface_height, style.background);
    let drawn = letterbox.image_rect();
    let drawn_w = (drawn.width.round() as u32).max(1);
    let drawn_h = (drawn.height.round() as u32).max(1);
    let scaled = image
        .resize_exact(drawn_w, drawn_h, FilterType::Triangle)
        .to_rgba8();
    imageops::overlay(
        &mut canvas,
        &scaled,
        drawn.x.round() as i64,
        drawn.y.round() as i64,
    );

    for item in items {
        if !stroke_rect(&mut canvas, &item.rect, style) {
            log::debug!("skipped off-canvas or degenerate box '{}' {:?}", item.label, item.rect);
        }
    }
    Ok(canvas)
}

/// Stroke `rect` inward `stroke_width` pixels. Returns false when the
/// rectangle is not finite, has no positive extent after rounding, or lies
/// entirely off the canvas.
fn stroke_rect(canvas: &mut RgbaImage, rect: &PixelRect, style: &OverlayStyle) -> bool {
    let left = rect.x.round();
    let top = rect.y.round();
    let width = rect.width.round();
    let height = rect.height.round();
    if !(width >= 1.0 && height >= 1.0) {
        return false;
    }
    let right = left + width;
    let bottom = top + height;
    if ![left, top, right, bottom].iter().all(|v| v.is_finite()) {
        return false;
    }
    let (canvas_w, canvas_h) = canvas.dimensions();
    let (cw, ch) = (canvas_w as f32, canvas_h as f32);
    if right <= 0.0 || bottom <= 0.0 || left >= cw || top >= ch {
        return false;
    }

    // Edges past the canvas are pulled in only as far as the outermost ring,
    // so they stay off-canvas and every coordinate fits in i32.
    let stroke = style.stroke_width.min(canvas_w.max(canvas_h));
    let pad = stroke as f32 + 1.0;
    let left = left.max(-pad) as i32;
    let top = top.max(-pad) as i32;
    let right = right.min(cw + pad) as i32;
    let bottom = bottom.min(ch + pad) as i32;
    let (w, h) = ((right - left) as u32, (bottom - top) as u32);

    for inset in 0..stroke {
        let shrink = inset.saturating_mul(2);
        if w <= shrink || h <= shrink {
            break;
        }
        let ring = Rect::at(left + inset as i32, top + inset as i32).of_size(w - shrink, h - shrink);
        draw_hollow_rect_mut(canvas, ring, style.color);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gray_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128])))
    }

    fn item(x: f32, y: f32, width: f32, height: f32) -> OverlayItem {
        OverlayItem {
            label: "car".to_string(),
            rect: PixelRect {
                x,
                y,
                width,
                height,
            },
        }
    }

    #[test]
    fn letterbox_margins_keep_background() {
        let style = OverlayStyle::default();
        let canvas = render_overlay(&gray_image(20, 10), 10, 10, &[], &style).unwrap();
        assert_eq!(canvas.dimensions(), (10, 10));
        assert_eq!(*canvas.get_pixel(5, 0), style.background);
        assert_eq!(*canvas.get_pixel(5, 9), style.background);
        assert_ne!(*canvas.get_pixel(5, 5), style.background);
    }

    #[test]
    fn rectangle_is_stroked_not_filled() {
        let style = OverlayStyle::default();
        let canvas =
            render_overlay(&gray_image(20, 20), 20, 20, &[item(2.0, 2.0, 12.0, 12.0)], &style)
                .unwrap();
        assert_eq!(*canvas.get_pixel(2, 2), style.color);
        assert_eq!(*canvas.get_pixel(3, 3), style.color);
        assert_eq!(*canvas.get_pixel(13, 8), style.color);
        assert_ne!(*canvas.get_pixel(8, 8), style.color);
    }

    #[test]
    fn degenerate_rectangles_are_skipped() {
        let style = OverlayStyle::default();
        let mut canvas = RgbaImage::from_pixel(10, 10, style.background);
        assert!(!stroke_rect(&mut canvas, &item(1.0, 1.0, -4.0, 3.0).rect, &style));
        assert!(!stroke_rect(&mut canvas, &item(1.0, 1.0, 0.2, 3.0).rect, &style));
        assert!(canvas.pixels().all(|p| *p == style.background));
    }

    #[test]
    fn rectangles_past_the_edge_are_clipped() {
        let style = OverlayStyle::default();
        let canvas =
            render_overlay(&gray_image(8, 8), 8, 8, &[item(-4.0, -4.0, 20.0, 20.0)], &style)
                .unwrap();
        assert_eq!(canvas.dimensions(), (8, 8));
    }

    #[test]
    fn far_out_of_range_boxes_are_skipped() {
        let style = OverlayStyle::default();
        let items = [
            item(5.0e9, 0.0, 1.0e9, 10.0),
            item(0.0, -3.0e38, 10.0, 1.0e38),
            item(f32::INFINITY, 0.0, 10.0, 10.0),
            item(0.0, 0.0, f32::INFINITY, 10.0),
            item(f32::NAN, 0.0, 10.0, 10.0),
            item(3.0e38, 3.0e38, 3.0e38, 3.0e38),
        ];
        let canvas = render_overlay(&gray_image(10, 10), 10, 10, &items, &style).unwrap();
        assert!(canvas.pixels().all(|p| *p != style.color));
    }

    #[test]
    fn huge_box_around_canvas_keeps_edges_off_canvas() {
        let style = OverlayStyle::default();
        let canvas = render_overlay(
            &gray_image(10, 10),
            10,
            10,
            &[item(-1.0e30, -1.0e30, 2.0e30, 2.0e30)],
            &style,
        )
        .unwrap();
        assert!(canvas.pixels().all(|p| *p != style.color));
    }

    #[test]
    fn box_crossing_the_edge_draws_visible_sides() {
        let style = OverlayStyle::default();
        let canvas =
            render_overlay(&gray_image(10, 10), 10, 10, &[item(4.0, 4.0, 1.0e9, 1.0e9)], &style)
                .unwrap();
        assert_eq!(*canvas.get_pixel(4, 4), style.color);
        assert_eq!(*canvas.get_pixel(9, 4), style.color);
        assert_eq!(*canvas.get_pixel(4, 9), style.color);
        assert_ne!(*canvas.get_pixel(9, 9), style.color);
    }

    #[test]
    fn overflowing_reply_coordinates_render_without_panic() {
        let reply = r#"[
            {"label":"far","boundingBox":{"x_min":5e7,"y_min":0.1,"x_max":6e7,"y_max":0.5}},
            {"label":"inf","boundingBox":{"x_min":0.1,"y_min":0.1,"x_max":1e39,"y_max":0.5}}
        ]"#;
        let detections = crate::detect::parse_detections(reply).unwrap();
        let items = crate::overlay::map_overlay(
            Size::from_pixels(20, 10),
            Size::from_pixels(100, 100),
            &detections,
            crate::overlay::BoxPolicy::Raw,
        )
        .unwrap();
        let style = OverlayStyle::default();
        let canvas = render_overlay(&gray_image(20, 10), 100, 100, &items, &style).unwrap();
        assert_eq!(canvas.dimensions(), (100, 100));
    }

    #[test]
    fn zero_surface_is_an_error() {
        let style = OverlayStyle::default();
        assert!(render_overlay(&gray_image(8, 8), 0, 8, &[], &style).is_err());
    }
}
