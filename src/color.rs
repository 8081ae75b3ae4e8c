//! Color parsing and the two string formats the grid uses.
//!
//! * Storage format: fully-opaque lowercase hex, `#rrggbb`.
//! * Transport format: `rgba(r,g,b,a)` with `a` in `[0, 1]`, as produced
//!   when rasterizing an upload.
//!
//! Claims may carry either hex (`#rgb`, `#rrggbb`, `#rrggbbaa`) or
//! `rgb()` / `rgba()` strings; everything is normalized to the storage
//! format before it reaches the store. Alpha is dropped, not composited.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unrecognized color '{0}'")]
pub struct ColorParseError(pub String);

/// Parse any accepted color string into straight RGBA.
pub fn parse_rgba(input: &str) -> Result<[u8; 4], ColorParseError> {
    let s = input.trim();
    let err = || ColorParseError(input.to_string());

    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(err);
    }

    let lower = s.to_ascii_lowercase();
    let (body, with_alpha) = if let Some(rest) = lower.strip_prefix("rgba(") {
        (rest, true)
    } else if let Some(rest) = lower.strip_prefix("rgb(") {
        (rest, false)
    } else {
        return Err(err());
    };
    let body = body.strip_suffix(')').ok_or_else(err)?;

    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    let expected = if with_alpha { 4 } else { 3 };
    if parts.len() != expected {
        return Err(err());
    }
    let r = parts[0].parse::<u8>().map_err(|_| err())?;
    let g = parts[1].parse::<u8>().map_err(|_| err())?;
    let b = parts[2].parse::<u8>().map_err(|_| err())?;
    let a = if with_alpha {
        let alpha = parts[3].parse::<f32>().map_err(|_| err())?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(err());
        }
        (alpha * 255.0).round() as u8
    } else {
        255
    };
    Ok([r, g, b, a])
}

fn parse_hex(hex: &str) -> Option<[u8; 4]> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => {
            let val = u16::from_str_radix(hex, 16).ok()?;
            let expand = |n: u16| (n as u8 & 0xF) * 0x11;
            Some([expand(val >> 8), expand(val >> 4), expand(val), 255])
        }
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

/// `#rrggbb`, lowercase.
pub fn to_hex([r, g, b]: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// Convert any accepted color to the storage format.
pub fn normalize(input: &str) -> Result<String, ColorParseError> {
    let [r, g, b, _] = parse_rgba(input)?;
    Ok(to_hex([r, g, b]))
}

/// Transport form of one image sample.
pub fn transport([r, g, b, a]: [u8; 4]) -> String {
    format!("rgba({},{},{},{})", r, g, b, a as f32 / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_forms_normalize() {
        assert_eq!(normalize("#FF8800").unwrap(), "#ff8800");
        assert_eq!(normalize("#f80").unwrap(), "#ff8800");
        assert_eq!(normalize("#ff880080").unwrap(), "#ff8800");
        assert_eq!(normalize("  #00aa11 ").unwrap(), "#00aa11");
    }

    #[test]
    fn rgba_strings_become_opaque_hex() {
        assert_eq!(normalize("rgba(255,0,0,1)").unwrap(), "#ff0000");
        assert_eq!(normalize("rgba(12, 34, 56, 0.5)").unwrap(), "#0c2238");
        assert_eq!(normalize("RGB(1,2,3)").unwrap(), "#010203");
        assert_eq!(normalize("rgba(0,0,0,0)").unwrap(), "#000000");
    }

    #[test]
    fn malformed_colors_are_rejected() {
        for bad in [
            "gray",
            "",
            "#12",
            "#gggggg",
            "rgba(1,2,3)",
            "rgb(1,2,3,4)",
            "rgba(256,0,0,1)",
            "rgba(0,0,0,1.5)",
            "rgba(0,0,0,1",
            "hsl(0,0%,0%)",
        ] {
            assert!(parse_rgba(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn transport_alpha_survives_parse() {
        let s = transport([10, 20, 30, 128]);
        assert_eq!(s, format!("rgba(10,20,30,{})", 128.0f32 / 255.0));
        assert_eq!(parse_rgba(&s).unwrap(), [10, 20, 30, 128]);
        assert_eq!(transport([1, 2, 3, 255]), "rgba(1,2,3,1)");
    }
}
