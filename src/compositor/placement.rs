use super::Surface;
use std::fmt;
use std::str::FromStr;

/// Where the foreground is drawn, as fractions of the background size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementSpec {
    pub start_x: f64,
    pub start_y: f64,
    pub width: f64,
    pub height: f64,
}

/// The three fixed picture-in-picture layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPreset {
    Full,
    Intermediate,
    #[default]
    Small,
}

impl PlacementPreset {
    pub fn spec(self) -> PlacementSpec {
        match self {
            Self::Full => PlacementSpec {
                start_x: 0.0,
                start_y: 0.0,
                width: 1.0,
                height: 1.0,
            },
            Self::Intermediate => PlacementSpec {
                start_x: 0.5,
                start_y: 0.5,
                width: 0.5,
                height: 0.5,
            },
            Self::Small => PlacementSpec {
                start_x: 0.75,
                start_y: 0.75,
                width: 0.25,
                height: 0.25,
            },
        }
    }
}

impl fmt::Display for PlacementPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Intermediate => "intermediate",
            Self::Small => "small",
        };
        f.write_str(name)
    }
}

impl FromStr for PlacementPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "intermediate" => Ok(Self::Intermediate),
            "small" => Ok(Self::Small),
            other => Err(format!("unknown video size '{other}'")),
        }
    }
}

/// Destination rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Compute where the matte lands.
///
/// Each reference dimension comes from the screen share when it reports a
/// non-zero value, otherwise from the raw webcam frame. The foreground width
/// is derived from the reference *height* times the webcam aspect ratio so
/// the webcam image keeps its proportions over a screen of any shape.
pub fn placement_rect(spec: PlacementSpec, screen: Option<(u32, u32)>, raw: (u32, u32)) -> Rect {
    let (raw_w, raw_h) = (raw.0 as f64, raw.1 as f64);
    let (screen_w, screen_h) = screen
        .map(|(w, h)| (w as f64, h as f64))
        .unwrap_or((0.0, 0.0));

    let ref_w = or_fallback(screen_w, raw_w);
    let ref_h = or_fallback(screen_h, raw_h);
    let aspect = if raw_h > 0.0 { raw_w / raw_h } else { 0.0 };
    let fg_w = or_fallback(screen_h * aspect, raw_w);

    Rect {
        x: spec.start_x * ref_w,
        y: spec.start_y * ref_h,
        width: spec.width * fg_w,
        height: spec.height * ref_h,
    }
}

fn or_fallback(value: f64, fallback: f64) -> f64 {
    if value == 0.0 || value.is_nan() {
        fallback
    } else {
        value
    }
}

/// Draw the matte onto the output at `rect`.
pub fn place(output: &mut Surface, matte: &Surface, rect: Rect) {
    let _span = tracing::debug_span!("place").entered();
    output.draw(matte.image(), rect.x, rect.y, rect.width, rect.height);
}
