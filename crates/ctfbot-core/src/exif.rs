//! Parsing of `exiftool` text output.

use std::sync::OnceLock;

use regex::Regex;

/// exiftool tag name → display name, in display order.
pub const IMPORTANT_FIELDS: &[(&str, &str)] = &[
    ("File Size", "File Size"),
    ("Make", "Camera Make"),
    ("Camera Model Name", "Camera Model"),
    ("Create Date", "Creation Date"),
    ("GPS Position", "GPS Location"),
    ("Image Size", "Image Dimensions"),
    ("Megapixels", "Megapixels"),
    ("Copyright Notice", "Copyright"),
    ("Exposure Time", "Exposure Time"),
    ("Shutter Speed", "Shutter Speed"),
];

pub const GPS_FIELD: &str = "GPS Location";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn openstreetmap_url(&self) -> String {
        format!(
            "https://www.openstreetmap.org/?mlat={:.6}&mlon={:.6}&zoom=15",
            self.lat, self.lon
        )
    }

    pub fn static_map_url(&self) -> String {
        format!(
            "https://staticmap.openstreetmap.de/staticmap.php?center={lat:.6},{lon:.6}&zoom=15&size=600x400&markers={lat:.6},{lon:.6},red-pushpin&maptype=mapnik",
            lat = self.lat,
            lon = self.lon
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExifReport {
    /// (display name, value) for every allow-listed tag present.
    pub fields: Vec<(String, String)>,
    pub gps: Option<Coordinates>,
}

impl ExifReport {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, display_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == display_name)
            .map(|(_, v)| v.as_str())
    }
}

/// Extract the allow-listed tags from `Key : Value` lines.
///
/// Fields keep the order in which exiftool printed them; a repeated tag keeps
/// its last value.
pub fn parse_exiftool_output(stdout: &str) -> ExifReport {
    let mut report = ExifReport::default();

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        let Some(&(_, display)) = IMPORTANT_FIELDS.iter().find(|(tag, _)| *tag == key) else {
            continue;
        };

        if let Some(slot) = report.fields.iter_mut().find(|(k, _)| k == display) {
            slot.1 = value.to_string();
        } else {
            report.fields.push((display.to_string(), value.to_string()));
        }

        if display == GPS_FIELD {
            report.gps = parse_gps_position(value);
            if report.gps.is_none() {
                tracing::debug!(value, "unparseable GPS position");
            }
        }
    }

    report
}

fn dms_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(\d+(?:\.\d+)?)\s*deg\s*(\d+(?:\.\d+)?)\s*'\s*(\d+(?:\.\d+)?)\s*"\s*([NSEW])?\s*$"#,
        )
        .expect("valid regex")
    })
}

/// Parse `D deg M' S" H, D deg M' S" H` into decimal degrees.
///
/// South and west hemispheres are negative. Anything malformed yields `None`.
pub fn parse_gps_position(value: &str) -> Option<Coordinates> {
    let (lat_part, lon_part) = value.split_once(',')?;
    let (lat, lat_hemi) = parse_dms(lat_part)?;
    let (lon, lon_hemi) = parse_dms(lon_part)?;

    let lat = if lat_hemi == Some('S') { -lat } else { lat };
    let lon = if lon_hemi == Some('W') { -lon } else { lon };
    Some(Coordinates { lat, lon })
}

fn parse_dms(part: &str) -> Option<(f64, Option<char>)> {
    let caps = dms_re().captures(part)?;
    let deg: f64 = caps.get(1)?.as_str().parse().ok()?;
    let min: f64 = caps.get(2)?.as_str().parse().ok()?;
    let sec: f64 = caps.get(3)?.as_str().parse().ok()?;
    let hemi = caps.get(4).and_then(|m| m.as_str().chars().next());
    Some((deg + min / 60.0 + sec / 3600.0, hemi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn parses_north_east_position() {
        let c = parse_gps_position("39 deg 52' 30.00\" N, 20 deg 0' 36.00\" E").unwrap();
        assert!(close(c.lat, 39.875), "{c:?}");
        assert!(close(c.lon, 20.01), "{c:?}");
    }

    #[test]
    fn south_and_west_flip_signs() {
        let c = parse_gps_position("33 deg 51' 54.00\" S, 151 deg 12' 36.00\" W").unwrap();
        assert!(c.lat < 0.0 && c.lon < 0.0);
        assert!(close(c.lat, -(33.0 + 51.0 / 60.0 + 54.0 / 3600.0)));
        assert!(close(c.lon, -(151.0 + 12.0 / 60.0 + 36.0 / 3600.0)));
    }

    #[test]
    fn malformed_positions_yield_none() {
        assert_eq!(parse_gps_position(""), None);
        assert_eq!(parse_gps_position("39.875, 20.01"), None);
        assert_eq!(parse_gps_position("39 deg 52' 30.00\" N"), None);
        assert_eq!(parse_gps_position("north, south"), None);
    }

    #[test]
    fn keeps_only_allow_listed_fields_under_display_names() {
        let out = "ExifTool Version Number         : 12.76\n\
                   File Name                       : photo.jpg\n\
                   File Size                       : 2.1 MB\n\
                   Make                            : Canon\n\
                   Camera Model Name               : Canon EOS 80D\n\
                   Create Date                     : 2023:07:14 10:22:03\n\
                   GPS Position                    : 39 deg 52' 30.00\" N, 20 deg 0' 36.00\" E\n";

        let r = parse_exiftool_output(out);
        assert_eq!(
            r.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec![
                "File Size",
                "Camera Make",
                "Camera Model",
                "Creation Date",
                "GPS Location"
            ]
        );
        // Values may contain colons themselves.
        assert_eq!(r.get("Creation Date"), Some("2023:07:14 10:22:03"));
        assert!(r.gps.is_some());
    }

    #[test]
    fn bad_gps_value_is_kept_as_text_without_coordinates() {
        let r = parse_exiftool_output("GPS Position : somewhere over the rainbow\n");
        assert_eq!(r.get(GPS_FIELD), Some("somewhere over the rainbow"));
        assert_eq!(r.gps, None);
    }

    #[test]
    fn map_urls_use_six_decimals() {
        let c = Coordinates {
            lat: 39.875,
            lon: -20.01,
        };
        assert_eq!(
            c.openstreetmap_url(),
            "https://www.openstreetmap.org/?mlat=39.875000&mlon=-20.010000&zoom=15"
        );
        assert!(c
            .static_map_url()
            .contains("markers=39.875000,-20.010000,red-pushpin"));
    }
}
