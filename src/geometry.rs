#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeExtent {
    pub width: u32,
    pub height: u32,
}

impl NativeExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl RenderedRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    fn is_positive(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

pub fn scale_factors(native: NativeExtent, rendered: RenderedRect) -> Option<ScaleFactors> {
    if native.is_empty() || !rendered.is_positive() {
        return None;
    }
    Some(ScaleFactors {
        x: rendered.width / native.width as f32,
        y: rendered.height / native.height as f32,
    })
}

/// Pointer position in rendered space to a native pixel coordinate.
///
/// No clamping happens here: a pointer outside the image maps to a coordinate
/// outside the native grid and the ROI engine rejects it.
pub fn pointer_to_native(
    pointer_x: f32,
    pointer_y: f32,
    native: NativeExtent,
    rendered: RenderedRect,
) -> Option<(i64, i64)> {
    if native.is_empty() || !rendered.is_positive() {
        return None;
    }
    let x = (pointer_x - rendered.left) * native.width as f32 / rendered.width;
    let y = (pointer_y - rendered.top) * native.height as f32 / rendered.height;
    Some((round_half_up(x), round_half_up(y)))
}

pub fn native_rect_to_rendered(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    native: NativeExtent,
    rendered: RenderedRect,
) -> Option<RenderedRect> {
    let scale = scale_factors(native, rendered)?;
    Some(RenderedRect {
        left: rendered.left + x as f32 * scale.x,
        top: rendered.top + y as f32 * scale.y,
        width: width as f32 * scale.x,
        height: height as f32 * scale.y,
    })
}

pub fn fit_rendered_rect(native: NativeExtent, available: RenderedRect) -> Option<RenderedRect> {
    if native.is_empty() || !available.is_positive() {
        return None;
    }
    let scale = (available.width / native.width as f32)
        .min(available.height / native.height as f32)
        .max(0.01);
    let width = native.width as f32 * scale;
    let height = native.height as f32 * scale;
    Some(RenderedRect {
        left: available.left + (available.width - width) / 2.0,
        top: available.top + (available.height - height) / 2.0,
        width,
        height,
    })
}

// Halves round toward positive infinity, so -0.5 lands on 0 and 2.5 on 3.
fn round_half_up(value: f32) -> i64 {
    (value + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_maps_through_scale() {
        let native = NativeExtent::new(512, 512);
        let rendered = RenderedRect::new(10.0, 20.0, 256.0, 256.0);
        assert_eq!(
            pointer_to_native(10.0 + 50.0, 20.0 + 50.0, native, rendered),
            Some((100, 100))
        );
    }

    #[test]
    fn pointer_left_of_image_maps_negative() {
        let native = NativeExtent::new(100, 100);
        let rendered = RenderedRect::new(0.0, 0.0, 50.0, 50.0);
        assert_eq!(pointer_to_native(-5.0, 3.0, native, rendered), Some((-10, 6)));
    }

    #[test]
    fn pointer_rounds_to_nearest() {
        let native = NativeExtent::new(300, 300);
        let rendered = RenderedRect::new(0.0, 0.0, 200.0, 200.0);
        // 33.0 * 1.5 = 49.5 -> 50, 33.2 * 1.5 = 49.8 -> 50, 32.9 * 1.5 = 49.35 -> 49
        assert_eq!(pointer_to_native(33.0, 32.9, native, rendered), Some((50, 49)));
    }

    #[test]
    fn mapping_unavailable_without_area() {
        let rendered = RenderedRect::new(0.0, 0.0, 100.0, 100.0);
        assert!(pointer_to_native(1.0, 1.0, NativeExtent::default(), rendered).is_none());
        let flat = RenderedRect::new(0.0, 0.0, 0.0, 100.0);
        assert!(scale_factors(NativeExtent::new(10, 10), flat).is_none());
    }

    #[test]
    fn native_rect_scales_per_axis() {
        let native = NativeExtent::new(200, 100);
        let rendered = RenderedRect::new(5.0, 7.0, 100.0, 100.0);
        let rect = native_rect_to_rendered(20, 10, 10, 10, native, rendered).expect("has area");
        assert_eq!(rect, RenderedRect::new(15.0, 17.0, 5.0, 10.0));
    }

    #[test]
    fn fit_keeps_aspect_and_centres() {
        let native = NativeExtent::new(200, 100);
        let available = RenderedRect::new(0.0, 0.0, 100.0, 100.0);
        let fitted = fit_rendered_rect(native, available).expect("has area");
        assert_eq!(fitted, RenderedRect::new(0.0, 25.0, 100.0, 50.0));
    }
}
