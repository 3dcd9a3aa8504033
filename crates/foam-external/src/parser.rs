//! Sphere-tree result file parser.
//!
//! The fitting tools write a plain-text `.sph` file.  Two kinds of line are
//! significant:
//!
//! | line | meaning |
//! |---|---|
//! | `Num: <n>` / `Mean: <e>` / `Best: <e>` / `Worst: <e>` | per-level header, one of each per level, in level order |
//! | `x y z r <ignored>` | one sphere, five numeric columns |
//!
//! Sphere lines are assigned to levels in declared order: the first `Num`
//! spheres belong to level 0, the next to level 1, and so on.  Any other line
//! (for example the leading `<levels> <branch>` summary) is skipped.
//!
//! Parsing is strict: unequal header counts, a non-numeric or non-finite
//! value, or a total sphere line count that differs from the sum of the `Num`
//! headers is a [`FoamError::MalformedResult`].  Spheres with radius ≤ 0 are dropped
//! after counting, so a level may legitimately hold fewer spheres than
//! declared.

use std::path::Path;

use foam_types::{FoamError, Result, Sphere, SphereLevel, SpherizationResult, Vec3};

#[derive(Debug, Default)]
struct Headers {
    num: Vec<usize>,
    mean: Vec<f64>,
    best: Vec<f64>,
    worst: Vec<f64>,
}

/// Read and parse the result file at `path`, translating every sphere
/// center by `offset`.
pub fn parse_result_file(path: &Path, offset: Vec3) -> Result<SpherizationResult> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| FoamError::io(format!("reading {}", path.display()), e))?;
    parse_result_str(&text, offset, path)
}

/// Parse result-file `text`.  `path` is only used in error messages.
pub fn parse_result_str(text: &str, offset: Vec3, path: &Path) -> Result<SpherizationResult> {
    let malformed = |reason: String| FoamError::MalformedResult {
        path: path.to_path_buf(),
        reason,
    };

    let mut headers = Headers::default();
    let mut rows: Vec<[f64; 4]> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((label, value)) = line.split_once(':') {
            let value = value.split_whitespace().next().unwrap_or_default();
            let label = label.trim();
            let bad_value =
                |e: &dyn std::fmt::Display| malformed(format!("line {}: {label}: {e}", lineno + 1));
            let error_value = || match value.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                Ok(v) => Err(bad_value(&format!("{v} is not a finite error value"))),
                Err(e) => Err(bad_value(&e)),
            };
            if label.starts_with("Num") {
                headers.num.push(value.parse::<usize>().map_err(|e| bad_value(&e))?);
            } else if label.starts_with("Mean") {
                headers.mean.push(error_value()?);
            } else if label.starts_with("Best") {
                headers.best.push(error_value()?);
            } else if label.starts_with("Worst") {
                headers.worst.push(error_value()?);
            }
            continue;
        }

        let Ok(values) = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<f64>, _>>()
        else {
            continue;
        };
        match values.len() {
            5 if values[..4].iter().all(|v| v.is_finite()) => {
                rows.push([values[0], values[1], values[2], values[3]])
            }
            5 => {
                return Err(malformed(format!(
                    "line {}: sphere has a non-finite center or radius",
                    lineno + 1
                )));
            }
            // Short numeric lines are level/branch summaries, not spheres.
            0..=3 => {}
            n => {
                return Err(malformed(format!(
                    "line {}: expected 5 columns per sphere, found {n}",
                    lineno + 1
                )));
            }
        }
    }

    let levels = headers.num.len();
    if levels == 0 {
        return Err(malformed("missing Num: header".to_string()));
    }
    for (label, count) in [
        ("Mean", headers.mean.len()),
        ("Best", headers.best.len()),
        ("Worst", headers.worst.len()),
    ] {
        if count != levels {
            return Err(malformed(format!(
                "{levels} Num: headers but {count} {label}: headers"
            )));
        }
    }

    let declared = headers
        .num
        .iter()
        .try_fold(0usize, |total, &n| total.checked_add(n))
        .ok_or_else(|| malformed("declared sphere count overflows".to_string()))?;
    if declared != rows.len() {
        return Err(malformed(format!(
            "headers declare {declared} spheres but {} sphere lines are present",
            rows.len()
        )));
    }

    let mut remaining = rows.as_slice();
    let mut output = Vec::with_capacity(levels);
    for level in 0..levels {
        let (chunk, rest) = remaining.split_at(headers.num[level]);
        remaining = rest;
        let spheres = chunk
            .iter()
            .map(|&[x, y, z, r]| Sphere::new(Vec3::new(x, y, z).add(offset), r))
            .collect();
        output.push(SphereLevel::new(
            spheres,
            headers.mean[level],
            headers.best[level],
            headers.worst[level],
        ));
    }

    Ok(SpherizationResult::new(output))
}
