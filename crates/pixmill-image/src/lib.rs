//! Dependency-free size math: human-readable byte counts, RGBA byte
//! estimation, and resolution of resize targets (pixels, percentages, named
//! presets) into final integer dimensions.

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Render a byte count with binary (1024-based) units and one decimal place.
/// Whole values drop the decimal: 1024 -> "1 KB", 1536 -> "1.5 KB".
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exponent = (((bytes as f64).ln() / 1024f64.ln()).floor() as usize).min(SIZE_UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, SIZE_UNITS[exponent])
    } else {
        format!("{:.1} {}", rounded, SIZE_UNITS[exponent])
    }
}

/// Bytes a decoded RGBA grid of these dimensions occupies.
pub fn estimate_rgba_bytes(width: u32, height: u32) -> u64 {
    (width as u64)
        .saturating_mul(height as u64)
        .saturating_mul(4)
}

/// A resize target before it is resolved against the original dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeSpec {
    Pixels { width: u32, height: u32 },
    /// Percentages of the original upload's dimensions, never of an
    /// intermediate result.
    Percent { width_pct: f32, height_pct: f32 },
}

impl SizeSpec {
    /// Resolve to final integer dimensions. Non-positive results are clamped
    /// to 1, matching the reference behavior for percent-derived sizes.
    pub fn resolve(&self, original_width: u32, original_height: u32) -> (u32, u32) {
        match *self {
            SizeSpec::Pixels { width, height } => (width.max(1), height.max(1)),
            SizeSpec::Percent {
                width_pct,
                height_pct,
            } => (
                scale_dimension(original_width, width_pct),
                scale_dimension(original_height, height_pct),
            ),
        }
    }
}

fn scale_dimension(original: u32, pct: f32) -> u32 {
    let scaled = (original as f32 * (pct / 100.0)).round();
    if scaled < 1.0 {
        1
    } else {
        scaled as u32
    }
}

/// A named fixed-dimension resize target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub category: &'static str,
}

pub const RESIZE_PRESETS: [ResizePreset; 5] = [
    ResizePreset {
        id: "instagram-square",
        name: "Instagram Square",
        width: 1080,
        height: 1080,
        category: "Social Media",
    },
    ResizePreset {
        id: "instagram-portrait",
        name: "Instagram Portrait",
        width: 1080,
        height: 1350,
        category: "Social Media",
    },
    ResizePreset {
        id: "facebook-cover",
        name: "Facebook Cover",
        width: 820,
        height: 312,
        category: "Social Media",
    },
    ResizePreset {
        id: "twitter-post",
        name: "Twitter Post",
        width: 1200,
        height: 675,
        category: "Social Media",
    },
    ResizePreset {
        id: "full-hd",
        name: "Full HD (1080p)",
        width: 1920,
        height: 1080,
        category: "Standard",
    },
];

impl ResizePreset {
    /// Look up a preset by id or display name, case-insensitively.
    pub fn get(name: &str) -> Option<&'static ResizePreset> {
        RESIZE_PRESETS
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(name) || p.name.eq_ignore_ascii_case(name))
    }

    pub fn size_spec(&self) -> SizeSpec {
        SizeSpec::Pixels {
            width: self.width,
            height: self.height,
        }
    }
}
