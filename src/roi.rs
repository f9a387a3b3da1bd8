use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::NativeExtent;

pub const ROI_SIZE_MIN: u32 = 3;
pub const ROI_SIZE_MAX: u32 = 200;
pub const DEFAULT_ROI_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiSize {
    pub width: u32,
    pub height: u32,
}

impl RoiSize {
    pub fn clamped(width: i64, height: i64) -> Self {
        Self {
            width: clamp_dimension(width),
            height: clamp_dimension(height),
        }
    }
}

impl Default for RoiSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_ROI_SIZE,
            height: DEFAULT_ROI_SIZE,
        }
    }
}

impl fmt::Display for RoiSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn clamp_dimension(value: i64) -> u32 {
    value.clamp(ROI_SIZE_MIN as i64, ROI_SIZE_MAX as i64) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    #[default]
    Synchronized,
    Independent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropagationPolicy {
    #[default]
    Unchecked,
    Checked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ROI color {0:?}: expected #rrggbb")]
pub struct ColorParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoiColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RoiColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for RoiColor {
    fn default() -> Self {
        Self::rgb(255, 0, 0)
    }
}

impl fmt::Display for RoiColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for RoiColor {
    type Err = ColorParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| ColorParseError(value.to_string()))?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ColorParseError(value.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ColorParseError(value.to_string()))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl TryFrom<String> for RoiColor {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoiColor> for String {
    fn from(color: RoiColor) -> Self {
        color.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ROI is outside the image bounds: ({x}, {y}) + {width}x{height} does not fit in {native_width}x{native_height}")]
pub struct OutOfBounds {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub native_width: u32,
    pub native_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputChannel {
    Pointer { at: [f32; 2] },
    Fields,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresentationHint {
    Transient { at: [f32; 2] },
    Blocking,
}

impl InputChannel {
    pub fn presentation_hint(self) -> PresentationHint {
        match self {
            InputChannel::Pointer { at } => PresentationHint::Transient { at },
            InputChannel::Fields => PresentationHint::Blocking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub roi: Roi,
    pub updated: Vec<usize>,
    pub skipped: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(Placement),
    Rejected {
        error: OutOfBounds,
        hint: PresentationHint,
    },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

pub fn validate(x: i64, y: i64, size: RoiSize, extent: NativeExtent) -> Result<Roi, OutOfBounds> {
    let fits_axis = |origin: i64, length: u32, limit: u32| {
        origin >= 0
            && origin
                .checked_add(i64::from(length))
                .is_some_and(|end| end <= i64::from(limit))
    };
    let origin = if fits_axis(x, size.width, extent.width) && fits_axis(y, size.height, extent.height)
    {
        u32::try_from(x).ok().zip(u32::try_from(y).ok())
    } else {
        None
    };
    let Some((x_u32, y_u32)) = origin else {
        return Err(OutOfBounds {
            x,
            y,
            width: size.width,
            height: size.height,
            native_width: extent.width,
            native_height: extent.height,
        });
    };
    Ok(Roi { x: x_u32, y: y_u32 })
}

pub struct RoiEngine {
    slots: Vec<Option<Roi>>,
    size: RoiSize,
    mode: SyncMode,
    color: RoiColor,
    propagation: PropagationPolicy,
}

impl RoiEngine {
    pub fn new(series_count: usize) -> Self {
        Self {
            slots: vec![None; series_count],
            size: RoiSize::default(),
            mode: SyncMode::default(),
            color: RoiColor::default(),
            propagation: PropagationPolicy::default(),
        }
    }

    pub fn with_settings(
        mut self,
        size: RoiSize,
        mode: SyncMode,
        color: RoiColor,
        propagation: PropagationPolicy,
    ) -> Self {
        self.size = size;
        self.mode = mode;
        self.color = color;
        self.propagation = propagation;
        self
    }

    pub fn slot(&self, series: usize) -> Option<Roi> {
        self.slots.get(series).copied().flatten()
    }

    pub fn slots(&self) -> &[Option<Roi>] {
        &self.slots
    }

    pub fn size(&self) -> RoiSize {
        self.size
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn color(&self) -> RoiColor {
        self.color
    }

    pub fn propagation(&self) -> PropagationPolicy {
        self.propagation
    }

    /// Validate against the placing series' extent and, on success, write the
    /// slot(s) the current mode calls for. A rejected attempt mutates nothing.
    pub fn place(
        &mut self,
        series: usize,
        x: i64,
        y: i64,
        extents: &[NativeExtent],
        channel: InputChannel,
    ) -> ValidationOutcome {
        let extent = extents.get(series).copied().unwrap_or_default();
        let roi = match validate(x, y, self.size, extent) {
            Ok(roi) if series < self.slots.len() => roi,
            Ok(_) => {
                return ValidationOutcome::Rejected {
                    error: OutOfBounds {
                        x,
                        y,
                        width: self.size.width,
                        height: self.size.height,
                        native_width: 0,
                        native_height: 0,
                    },
                    hint: channel.presentation_hint(),
                }
            }
            Err(error) => {
                return ValidationOutcome::Rejected {
                    error,
                    hint: channel.presentation_hint(),
                }
            }
        };

        let size = self.size;
        let propagation = self.propagation;
        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        match self.mode {
            SyncMode::Independent => {
                self.slots[series] = Some(roi);
                updated.push(series);
            }
            SyncMode::Synchronized => {
                for (index, slot) in self.slots.iter_mut().enumerate() {
                    let allowed = index == series
                        || propagation == PropagationPolicy::Unchecked
                        || extents
                            .get(index)
                            .is_some_and(|extent| validate(x, y, size, *extent).is_ok());
                    if allowed {
                        *slot = Some(roi);
                        updated.push(index);
                    } else {
                        skipped.push(index);
                    }
                }
            }
        }

        ValidationOutcome::Accepted(Placement {
            roi,
            updated,
            skipped,
        })
    }

    /// Placed ROIs are not re-validated against the new size.
    pub fn set_size(&mut self, width: i64, height: i64) -> RoiSize {
        self.size = RoiSize::clamped(width, height);
        self.size
    }

    pub fn reset_all(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn set_color(&mut self, color: RoiColor) -> bool {
        let changed = self.color != color;
        self.color = color;
        changed
    }

    /// Switching never re-synchronizes existing ROIs; that waits for the next
    /// placement.
    pub fn set_mode(&mut self, mode: SyncMode) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        true
    }

    #[cfg(test)]
    pub fn placed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extents(sizes: &[(u32, u32)]) -> Vec<NativeExtent> {
        sizes
            .iter()
            .map(|(width, height)| NativeExtent::new(*width, *height))
            .collect()
    }

    #[test]
    fn validate_accepts_exactly_when_rect_fits() {
        let extent = NativeExtent::new(64, 32);
        for (width, height) in [(3, 3), (10, 10), (32, 32), (64, 3)] {
            let size = RoiSize::clamped(width, height);
            for x in -2i64..70 {
                for y in -2i64..40 {
                    let expected = x >= 0
                        && y >= 0
                        && x + size.width as i64 <= 64
                        && y + size.height as i64 <= 32;
                    assert_eq!(
                        validate(x, y, size, extent).is_ok(),
                        expected,
                        "x={x} y={y} size={size}"
                    );
                }
            }
        }
    }

    #[test]
    fn huge_field_coordinates_are_rejected_without_wrapping() {
        let mut engine = RoiEngine::new(1);
        let native = extents(&[(512, 512)]);
        for x in [i64::MAX, i64::from(u32::MAX) + 1, i64::from(u32::MAX)] {
            let outcome = engine.place(0, x, 0, &native, InputChannel::Fields);
            assert!(
                matches!(outcome, ValidationOutcome::Rejected { .. }),
                "x={x} accepted: {outcome:?}"
            );
        }
        let outcome = engine.place(0, 0, i64::MAX, &native, InputChannel::Fields);
        assert!(!outcome.is_accepted());
        assert_eq!(engine.slot(0), None);
    }

    #[test]
    fn rejected_placement_leaves_slots_untouched() {
        let extents = extents(&[(100, 100), (100, 100)]);
        let mut engine = RoiEngine::new(2);
        assert!(engine
            .place(0, 5, 5, &extents, InputChannel::Fields)
            .is_accepted());
        let before = engine.slots().to_vec();

        let outcome = engine.place(1, 95, 0, &extents, InputChannel::Pointer { at: [1.0, 2.0] });
        match outcome {
            ValidationOutcome::Rejected { error, hint } => {
                assert_eq!(error.x, 95);
                assert_eq!(hint, PresentationHint::Transient { at: [1.0, 2.0] });
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(engine.slots(), before.as_slice());
    }

    #[test]
    fn fields_channel_hints_blocking() {
        let mut engine = RoiEngine::new(1);
        let outcome = engine.place(0, -1, 0, &extents(&[(50, 50)]), InputChannel::Fields);
        assert!(matches!(
            outcome,
            ValidationOutcome::Rejected {
                hint: PresentationHint::Blocking,
                ..
            }
        ));
    }

    #[test]
    fn synchronized_writes_every_slot_regardless_of_extent() {
        let extents = extents(&[(512, 512), (256, 256), (64, 64)]);
        let mut engine = RoiEngine::new(3);
        let outcome = engine.place(0, 100, 100, &extents, InputChannel::Fields);
        let ValidationOutcome::Accepted(placement) = outcome else {
            panic!("placement should succeed");
        };
        assert_eq!(placement.updated, vec![0, 1, 2]);
        assert!(placement.skipped.is_empty());
        for slot in engine.slots() {
            assert_eq!(*slot, Some(Roi { x: 100, y: 100 }));
        }
    }

    #[test]
    fn checked_propagation_skips_series_that_cannot_hold_the_roi() {
        let extents = extents(&[(512, 512), (256, 256), (64, 64)]);
        let mut engine = RoiEngine::new(3).with_settings(
            RoiSize::default(),
            SyncMode::Synchronized,
            RoiColor::default(),
            PropagationPolicy::Checked,
        );
        let ValidationOutcome::Accepted(placement) =
            engine.place(0, 100, 100, &extents, InputChannel::Fields)
        else {
            panic!("placement should succeed");
        };
        assert_eq!(placement.updated, vec![0, 1]);
        assert_eq!(placement.skipped, vec![2]);
        assert_eq!(engine.slot(2), None);
    }

    #[test]
    fn independent_writes_only_its_slot() {
        let extents = extents(&[(100, 100), (100, 100), (100, 100)]);
        let mut engine = RoiEngine::new(3);
        engine.set_mode(SyncMode::Independent);
        engine.place(0, 1, 1, &extents, InputChannel::Fields);
        engine.place(2, 7, 8, &extents, InputChannel::Fields);

        let outcome = engine.place(1, 20, 30, &extents, InputChannel::Fields);
        let ValidationOutcome::Accepted(placement) = outcome else {
            panic!("placement should succeed");
        };
        assert_eq!(placement.updated, vec![1]);
        assert_eq!(engine.slot(0), Some(Roi { x: 1, y: 1 }));
        assert_eq!(engine.slot(1), Some(Roi { x: 20, y: 30 }));
        assert_eq!(engine.slot(2), Some(Roi { x: 7, y: 8 }));
    }

    #[test]
    fn switching_mode_does_not_resynchronize() {
        let extents = extents(&[(100, 100), (100, 100)]);
        let mut engine = RoiEngine::new(2);
        engine.set_mode(SyncMode::Independent);
        engine.place(0, 1, 1, &extents, InputChannel::Fields);
        assert!(engine.set_mode(SyncMode::Synchronized));
        assert!(!engine.set_mode(SyncMode::Synchronized));
        assert_eq!(engine.slot(0), Some(Roi { x: 1, y: 1 }));
        assert_eq!(engine.slot(1), None);
    }

    #[test]
    fn size_is_clamped_and_not_revalidated() {
        let extents = extents(&[(20, 20)]);
        let mut engine = RoiEngine::new(1);
        engine.place(0, 5, 5, &extents, InputChannel::Fields);
        assert_eq!(engine.set_size(1, 500), RoiSize::clamped(3, 200));
        assert_eq!(engine.slot(0), Some(Roi { x: 5, y: 5 }));
    }

    #[test]
    fn reset_is_idempotent() {
        let extents = extents(&[(100, 100), (100, 100)]);
        let mut engine = RoiEngine::new(2);
        engine.place(0, 1, 1, &extents, InputChannel::Fields);
        engine.reset_all();
        let once = engine.slots().to_vec();
        engine.reset_all();
        assert_eq!(engine.slots(), once.as_slice());
        assert_eq!(engine.placed_count(), 0);
    }

    #[test]
    fn color_parses_and_formats_hex() {
        let color: RoiColor = "#1A2b3c".parse().expect("valid color");
        assert_eq!(color, RoiColor::rgb(0x1a, 0x2b, 0x3c));
        assert_eq!(color.to_string(), "#1a2b3c");
        assert!("1a2b3c".parse::<RoiColor>().is_err());
        assert!("#12345".parse::<RoiColor>().is_err());
        assert!("#zzzzzz".parse::<RoiColor>().is_err());
    }

    #[test]
    fn color_change_reports_whether_it_changed() {
        let mut engine = RoiEngine::new(1);
        assert!(!engine.set_color(RoiColor::default()));
        assert!(engine.set_color(RoiColor::rgb(0, 255, 0)));
    }
}
