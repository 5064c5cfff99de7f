/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::num::ParseIntError;

use thiserror::Error;

/// Marker the layout tool prints for paths that carry no stripe record.
pub const NO_STRIPE_MARKER: &str = "has no stripe info";

type Result<T> = std::result::Result<T, StripeInfoError>;

#[derive(Error, Debug, PartialEq)]
pub enum StripeInfoError {
    #[error("invalid stripe info, must not be empty")]
    Empty,
    #[error("too few input lines, expected 8 or more, got {0}")]
    TooFewLines(usize),
    #[error("invalid directory stripe line '{0}'")]
    InvalidDirLine(String),
    #[error("invalid object index line '{0}'")]
    InvalidIndexLine(String),
    #[error("invalid integer format")]
    IntParse(#[from] ParseIntError),
}

/// One row of the per-object index table of a striped file.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ObjectIndex {
    pub obdidx: u64,
    pub objid: u64,
    pub group: u64,
}

/// How a file's data is spread across storage targets: `count` targets,
/// `size` bytes per target before wrapping, starting at target `offset`
/// (-1 means "any"). The all-zero layout is the canonical "no stripe
/// information" value and is never written back to the filesystem.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct StripeLayout {
    pub count: u64,
    pub size: u64,
    pub offset: i64,
    pub pattern: u64,
    pub generation: u64,
    pub index: Vec<ObjectIndex>,
}

impl StripeLayout {
    pub fn null() -> StripeLayout {
        StripeLayout::default()
    }

    pub fn is_null(&self) -> bool {
        self.count == 0 && self.size == 0
    }

    /// Parse the layout tool's `getstripe` output. The first line echoes the
    /// queried path; a leading `stripe_count:` line after it means the
    /// directory form, anything else is the labeled file form with its
    /// object index table.
    pub fn try_parse(output: &str) -> Result<StripeLayout> {
        let lines: Vec<&str> = output.lines().collect();
        if lines.len() <= 1 {
            return Err(StripeInfoError::Empty);
        }
        let lines = &lines[1..];
        if lines[0].trim_start().starts_with("stripe_count") {
            Self::parse_dir_line(lines[0])
        } else if lines.len() < 8 {
            Err(StripeInfoError::TooFewLines(lines.len()))
        } else {
            Self::parse_file_lines(lines)
        }
    }

    fn parse_dir_line(line: &str) -> Result<StripeLayout> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            return Err(StripeInfoError::InvalidDirLine(line.to_owned()));
        }
        Ok(StripeLayout {
            count: parse_signed_count(parts[1])?,
            size: parts[3].parse()?,
            offset: parts[5].parse()?,
            ..StripeLayout::default()
        })
    }

    fn parse_file_lines(lines: &[&str]) -> Result<StripeLayout> {
        let mut layout = StripeLayout::default();
        let mut in_index = false;
        for line in lines {
            if let Some(v) = labeled_value(line, "lmm_stripe_count") {
                layout.count = parse_signed_count(v)?;
                continue;
            }
            if let Some(v) = labeled_value(line, "lmm_stripe_size") {
                layout.size = v.parse()?;
                continue;
            }
            if let Some(v) = labeled_value(line, "lmm_stripe_offset") {
                layout.offset = v.parse()?;
                continue;
            }
            if let Some(v) = labeled_value(line, "lmm_pattern") {
                layout.pattern = v.parse()?;
                continue;
            }
            if let Some(v) = labeled_value(line, "lmm_layout_gen") {
                layout.generation = v.parse()?;
                continue;
            }
            if line.starts_with("\tobdidx") {
                in_index = true;
                continue;
            }
            if in_index {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.is_empty() {
                    break;
                }
                if parts.len() != 4 {
                    return Err(StripeInfoError::InvalidIndexLine((*line).to_owned()));
                }
                // third column repeats objid in hex, drop it
                layout.index.push(ObjectIndex {
                    obdidx: parts[0].parse()?,
                    objid: parts[1].parse()?,
                    group: parts[3].parse()?,
                });
            }
        }
        Ok(layout)
    }
}

fn labeled_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    if line.starts_with(label) {
        line.split_whitespace().last()
    } else {
        None
    }
}

/// `getstripe` reports -1 for "unset" counts on directories; fold that into
/// the null value.
fn parse_signed_count(v: &str) -> Result<u64> {
    let n: i64 = v.parse()?;
    Ok(if n < 0 { 0 } else { n as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output() {
        assert_eq!(Err(StripeInfoError::Empty), StripeLayout::try_parse(""));
        assert_eq!(
            Err(StripeInfoError::Empty),
            StripeLayout::try_parse("/mnt/a/f1\n")
        );
    }

    #[test]
    fn test_dir_form() {
        let output = "/mnt/a/d1\nstripe_count:  2 stripe_size:   1048576 stripe_offset: -1\n";
        let layout = StripeLayout::try_parse(output).unwrap();
        assert_eq!(layout.count, 2);
        assert_eq!(layout.size, 1048576);
        assert_eq!(layout.offset, -1);
        assert!(layout.index.is_empty());
    }

    #[test]
    fn test_dir_form_unset_count() {
        let output = "/mnt/a/d1\nstripe_count:  -1 stripe_size:   0 stripe_offset: -1\n";
        let layout = StripeLayout::try_parse(output).unwrap();
        assert_eq!(layout.count, 0);
        assert!(layout.is_null());
    }

    #[test]
    fn test_file_form() {
        let output = "/mnt/a/f1\n\
lmm_stripe_count:  2\n\
lmm_stripe_size:   1048576\n\
lmm_pattern:       1\n\
lmm_layout_gen:    0\n\
lmm_stripe_offset: 1\n\
\tobdidx\t\t objid\t\t objid\t\t group\n\
\t     1\t       3820177\t     0x3a4a91\t             0\n\
\t     2\t       3808964\t     0x3a1ec4\t             0\n\
\n";
        let layout = StripeLayout::try_parse(output).unwrap();
        assert_eq!(layout.count, 2);
        assert_eq!(layout.size, 1048576);
        assert_eq!(layout.offset, 1);
        assert_eq!(layout.pattern, 1);
        assert_eq!(layout.generation, 0);
        assert_eq!(
            layout.index,
            vec![
                ObjectIndex {
                    obdidx: 1,
                    objid: 3820177,
                    group: 0
                },
                ObjectIndex {
                    obdidx: 2,
                    objid: 3808964,
                    group: 0
                },
            ]
        );
    }

    #[test]
    fn test_file_form_too_short() {
        let output = "/mnt/a/f1\nlmm_stripe_count: 1\nlmm_stripe_size: 524288\n";
        assert_eq!(
            Err(StripeInfoError::TooFewLines(2)),
            StripeLayout::try_parse(output)
        );
    }

    #[test]
    fn test_file_form_bad_index_row() {
        let output = "/mnt/a/f1\n\
lmm_stripe_count:  1\n\
lmm_stripe_size:   524288\n\
lmm_pattern:       1\n\
lmm_layout_gen:    0\n\
lmm_stripe_offset: 0\n\
\tobdidx\t\t objid\t\t objid\t\t group\n\
\t     1\t       3820177\t     0x3a4a91\n\
\n";
        assert!(matches!(
            StripeLayout::try_parse(output),
            Err(StripeInfoError::InvalidIndexLine(_))
        ));
    }

    #[test]
    fn test_null_layout() {
        let layout = StripeLayout::null();
        assert!(layout.is_null());
        assert_eq!(layout.offset, 0);
        let striped = StripeLayout {
            count: 1,
            size: 524288,
            ..StripeLayout::default()
        };
        assert!(!striped.is_null());
    }
}
