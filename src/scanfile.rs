//! Canonical scan-file codec.
//!
//! A scan file is a whitespace-separated decimal grid under a
//! self-describing filename:
//!
//! ```text
//! {prefix}_xs-{xs}_ys-{ys}_xe-{xe}_ye-{ye}_step-{step}_dw-{dwell}_{YYYYMMDD}_{HHMMSS}.txt
//! ```
//!
//! with `_z-{z}` inserted before the timestamp for volumetric planes. The
//! two variants are structurally distinct grammars: a z-tagged name never
//! parses as 2D and vice versa. Encoding a spec and parsing the result
//! recovers every field, timestamp included.
//!
//! Persistence is write-once and post-assembly only: [`autosave`] runs
//! after a frame exists, so failed sessions leave no partial artifacts.

use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, Grid};
use crate::plan::ScanRegion;
use chrono::{Local, NaiveDateTime};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static FILENAME_2D: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<prefix>.*?)_xs-(?P<xs>[-+]?[0-9]*\.?[0-9]+)_ys-(?P<ys>[-+]?[0-9]*\.?[0-9]+)_xe-(?P<xe>[-+]?[0-9]*\.?[0-9]+)_ye-(?P<ye>[-+]?[0-9]*\.?[0-9]+)_step-(?P<step>[0-9]+)_dw-(?P<dw>[-+]?[0-9]*\.?[0-9]+)_(?P<ts>[0-9]{8}_[0-9]{6})\.txt$",
    )
    .expect("2D filename pattern is valid")
});

static FILENAME_3D: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<prefix>.*?)_xs-(?P<xs>[-+]?[0-9]*\.?[0-9]+)_ys-(?P<ys>[-+]?[0-9]*\.?[0-9]+)_xe-(?P<xe>[-+]?[0-9]*\.?[0-9]+)_ye-(?P<ye>[-+]?[0-9]*\.?[0-9]+)_step-(?P<step>[0-9]+)_dw-(?P<dw>[-+]?[0-9]*\.?[0-9]+)_z-(?P<z>[-+]?[0-9]*\.?[0-9]+)_(?P<ts>[0-9]{8}_[0-9]{6})\.txt$",
    )
    .expect("3D filename pattern is valid")
});

/// Parsed form of a canonical scan filename.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanFileName {
    pub prefix: String,
    pub region: ScanRegion,
    /// Grid edge length in pixels
    pub step: u32,
    /// Dwell per pixel in milliseconds
    pub dwell_ms: f64,
    /// Z-plane position; present only in the 3D grammar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    pub timestamp: NaiveDateTime,
}

impl ScanFileName {
    /// Render the canonical filename.
    pub fn encode(&self) -> String {
        let mut name = format!(
            "{}_xs-{}_ys-{}_xe-{}_ye-{}_step-{}_dw-{}",
            self.prefix,
            self.region.x_start,
            self.region.y_start,
            self.region.x_end,
            self.region.y_end,
            self.step,
            self.dwell_ms,
        );
        if let Some(z) = self.z {
            let _ = write!(name, "_z-{z}");
        }
        let _ = write!(name, "_{}.txt", self.timestamp.format(TIMESTAMP_FORMAT));
        name
    }

    /// Parse a filename against the matching grammar.
    ///
    /// Non-matching names yield `None`: they are simply not scan files.
    pub fn parse(name: &str) -> Option<ScanFileName> {
        let is_3d = name.contains("_z-");
        let pattern: &Regex = if is_3d { &FILENAME_3D } else { &FILENAME_2D };
        let caps = pattern.captures(name)?;

        let field = |key: &str| caps.name(key).map(|m| m.as_str());
        let number = |key: &str| field(key).and_then(|s| s.parse::<f64>().ok());

        Some(ScanFileName {
            prefix: field("prefix")?.to_string(),
            region: ScanRegion {
                x_start: number("xs")?,
                y_start: number("ys")?,
                x_end: number("xe")?,
                y_end: number("ye")?,
            },
            step: field("step")?.parse().ok()?,
            dwell_ms: number("dw")?,
            z: if is_3d { Some(number("z")?) } else { None },
            timestamp: NaiveDateTime::parse_from_str(field("ts")?, TIMESTAMP_FORMAT).ok()?,
        })
    }
}

/// Write a grid as canonical scan-file text: one row per line, six decimal
/// places, space separated.
pub fn write_grid(path: &Path, grid: &Grid) -> ScanResult<()> {
    let mut text = String::new();
    for r in 0..grid.rows() {
        let row = grid
            .row(r)
            .iter()
            .map(|v| format!("{v:.6}"))
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&row);
        text.push('\n');
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// Read a whitespace-delimited float grid from a saved scan file.
pub fn read_grid(path: &Path) -> ScanResult<Grid> {
    let text = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    ScanError::Decode(format!("non-numeric token '{t}' in {}", path.display()))
                })
            })
            .collect::<ScanResult<Vec<f64>>>()?;
        rows.push(row);
    }
    Grid::from_rows(rows)
}

/// Persist a completed frame's as-acquired grid under its canonical name.
///
/// Returns the written path. The filename timestamp is the acquisition
/// time in local time.
pub fn autosave(frame: &Frame, output_dir: &Path, prefix: &str) -> ScanResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let name = ScanFileName {
        prefix: prefix.to_string(),
        region: frame.spec.region,
        step: frame.spec.pixels,
        dwell_ms: frame.spec.dwell_ms,
        z: frame.z,
        timestamp: frame.acquired_at.with_timezone(&Local).naive_local(),
    };
    let path = output_dir.join(name.encode());
    write_grid(&path, frame.original())?;
    info!("scan autosaved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ScanSpec;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 4, 14)
            .unwrap()
            .and_hms_opt(11, 2, 3)
            .unwrap()
    }

    fn name_2d() -> ScanFileName {
        ScanFileName {
            prefix: "scan".to_string(),
            region: ScanRegion {
                x_start: 1.0,
                y_start: 1.0,
                x_end: -1.0,
                y_end: -1.0,
            },
            step: 100,
            dwell_ms: 1.0,
            z: None,
            timestamp: timestamp(),
        }
    }

    #[test]
    fn filename_round_trip_recovers_all_fields() {
        let name = name_2d();
        let encoded = name.encode();
        assert!(encoded.ends_with("_20230414_110203.txt"));
        let parsed = ScanFileName::parse(&encoded).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn z_tagged_round_trip() {
        let mut name = name_2d();
        name.z = Some(-0.5);
        let encoded = name.encode();
        assert!(encoded.contains("_z--0.5_"));
        let parsed = ScanFileName::parse(&encoded).unwrap();
        assert_eq!(parsed.z, Some(-0.5));
        assert_eq!(parsed, name);
    }

    #[test]
    fn grammars_are_disjoint() {
        let flat = name_2d().encode();
        let mut volumetric = name_2d();
        volumetric.z = Some(2.0);
        let tagged = volumetric.encode();

        assert!(ScanFileName::parse(&flat).unwrap().z.is_none());
        assert!(ScanFileName::parse(&tagged).unwrap().z.is_some());
        // a 3D name never satisfies the 2D grammar
        assert!(!FILENAME_2D.is_match(&tagged));
        assert!(!FILENAME_3D.is_match(&flat));
    }

    #[test]
    fn unrelated_names_do_not_parse() {
        assert!(ScanFileName::parse("notes.txt").is_none());
        assert!(ScanFileName::parse("scan_xs-1_ys-1_xe-1_ye-1.txt").is_none());
        assert!(ScanFileName::parse("scan_xs-a_ys-1_xe-1_ye-1_step-10_dw-1_20230414_110203.txt").is_none());
    }

    #[test]
    fn grid_text_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.txt");
        let grid = Grid::from_rows(vec![vec![0.0, 1.5], vec![2.25, 3.0]]).unwrap();
        write_grid(&path, &grid).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), "0.000000 1.500000");

        let loaded = read_grid(&path).unwrap();
        assert_eq!(loaded, grid);
    }

    #[test]
    fn autosave_writes_the_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ScanSpec {
            region: ScanRegion {
                x_start: 1.0,
                y_start: 1.0,
                x_end: -1.0,
                y_end: -1.0,
            },
            pixels: 2,
            dwell_ms: 1.0,
            z_sweep: None,
        };
        let grid = Grid::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let frame = Frame::new(spec, None, grid);

        let path = autosave(&frame, dir.path(), "scan").unwrap();
        let parsed =
            ScanFileName::parse(path.file_name().unwrap().to_str().unwrap()).unwrap();
        assert_eq!(parsed.step, 2);
        assert_eq!(parsed.prefix, "scan");
        assert_eq!(read_grid(&path).unwrap(), *frame.original());
    }
}
