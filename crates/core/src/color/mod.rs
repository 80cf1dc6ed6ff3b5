use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// 8-bit colour as carried in a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a colour from loosely typed request components, rejecting
    /// anything outside `0..=255`.
    pub fn from_components(r: i64, g: i64, b: i64) -> Option<Self> {
        let channel = |value: i64| u8::try_from(value).ok();
        Some(Self::new(channel(r)?, channel(g)?, channel(b)?))
    }
}

/// Saturated hues cycled by the blink effect.
pub const BLINK_PALETTE: [Rgb; 8] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 128, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 255, 255),
    Rgb::new(0, 0, 255),
    Rgb::new(128, 0, 255),
    Rgb::new(255, 0, 255),
];

/// Six-sector HSV to RGB conversion. Channels are truncated, not rounded.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
    let hue = hue.rem_euclid(1.0);
    let saturation = saturation.clamp(0.0, 1.0);
    let value = value.clamp(0.0, 1.0);

    let scaled = hue * 6.0;
    let sector = scaled.floor();
    let f = scaled - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - f * saturation);
    let t = value * (1.0 - (1.0 - f) * saturation);

    let (r, g, b) = match sector as u8 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };

    Rgb::new(to_channel(r), to_channel(g), to_channel(b))
}

fn to_channel(component: f64) -> u8 {
    (component * 255.0) as u8
}

/// Maps a normalised beat intensity onto the HSV value channel, keeping quiet
/// beats visible at `min_intensity`.
pub fn beat_value(intensity: f64, min_intensity: f64) -> f64 {
    let intensity = intensity.clamp(0.0, 1.0);
    min_intensity + (1.0 - min_intensity) * intensity
}

/// Supplies the hue for each beat.
pub trait HueSource: Send {
    /// Returns a hue in `[0, 1)`.
    fn next_hue(&mut self) -> f64;
}

/// Uniformly random hue per beat.
#[derive(Debug)]
pub struct RandomHue {
    rng: StdRng,
}

impl RandomHue {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomHue {
    fn default() -> Self {
        Self::new()
    }
}

impl HueSource for RandomHue {
    fn next_hue(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Always returns the same hue.
#[derive(Debug, Clone, Copy)]
pub struct FixedHue(pub f64);

impl HueSource for FixedHue {
    fn next_hue(&mut self) -> f64 {
        self.0
    }
}
