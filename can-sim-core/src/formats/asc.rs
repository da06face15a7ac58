//! ASC (Vector ASCII log) reader
//!
//! Reads the classic header, follows `previous log file` chains of split
//! recordings and collects every data frame in file order.
//!
//! ```text
//! date Mon Jan 8 10:00:00 am 2024
//! base hex  timestamps absolute
//! internal events logged
//! // version 8.0.0
//!    2.501 1  128             Rx   d 8 00 01 02 03 04 05 06 07
//!    2.503 1  a8x             Rx   d 8 0A 09 08 07 06 05 04 03
//! ```

use crate::types::{CanFrame, Result, SimulatorError, CAN_EFF_FLAG, CAN_MAX_DLEN};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One frame of a replay log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AscItem {
    /// Milliseconds since the start of the recording
    pub timestamp_ms: u64,
    /// Frame was received (`Rx`) rather than transmitted
    pub incoming: bool,
    pub frame: CanFrame,
}

/// Parsed ASC recording
#[derive(Debug)]
pub struct AscReader {
    path: PathBuf,
    items: Vec<AscItem>,
    // Cumulative seconds for relative timestamps
    last_timestamp: f64,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    hex_ids: bool,
    absolute: bool,
}

impl AscReader {
    /// Parse an ASC file, including any previous files it chains to
    pub fn parse(path: &Path) -> Result<Self> {
        log::info!("Parsing ASC file: {:?}", path);

        let mut reader = Self {
            path: path.to_path_buf(),
            items: Vec::new(),
            last_timestamp: 0.0,
        };
        reader.parse_file(path)?;

        log::info!("Loaded {} frames from {:?}", reader.items.len(), path);
        Ok(reader)
    }

    fn parse_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read(path).map_err(|e| {
            SimulatorError::AscParseError(format!("Unable to open ASC file {:?}: {}", path, e))
        })?;
        let content = String::from_utf8_lossy(&content);
        let mut lines = content.lines().peekable();

        // First line carries the recording date
        lines.next();
        let header = parse_header(lines.next().unwrap_or_default())?;
        lines.next();
        lines.next();

        if let Some(line) = lines.peek() {
            if line.trim_start().starts_with('/') {
                if line.contains("previous log file") {
                    let previous = previous_log(path, line)?;
                    self.parse_file(&previous).map_err(|e| {
                        SimulatorError::AscParseError(format!(
                            "Previous log file {:?} could not be read: {}",
                            previous, e
                        ))
                    })?;
                    if let Some(last) = self.items.last() {
                        self.last_timestamp = last.timestamp_ms as f64 / 1000.0;
                    }
                }
                lines.next();
            }
        }

        for line in lines {
            if let Some((seconds, incoming, frame)) = parse_message(line, header) {
                let seconds = if header.absolute {
                    seconds
                } else {
                    self.last_timestamp += seconds;
                    self.last_timestamp
                };
                self.items.push(AscItem {
                    timestamp_ms: (seconds * 1000.0).round().max(0.0) as u64,
                    incoming,
                    frame,
                });
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames in file order
    pub fn items(&self) -> &[AscItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<AscItem> {
        self.items
    }

    /// Every CAN identifier found in the recording
    pub fn create_filter_list(&self) -> BTreeSet<u32> {
        self.items.iter().map(|item| item.frame.id).collect()
    }
}

fn parse_header(line: &str) -> Result<Header> {
    let mut tokens = line.split_whitespace();
    let hex_ids = match (tokens.next(), tokens.next()) {
        (Some("base"), Some("hex")) => true,
        (Some("base"), Some("dec")) => false,
        _ => {
            return Err(SimulatorError::AscParseError(
                "Failed to parse CAN ID number base from ASC file header".to_string(),
            ))
        }
    };
    let absolute = match (tokens.next(), tokens.next()) {
        (Some("timestamps"), Some("absolute")) => true,
        (Some("timestamps"), Some("relative")) => false,
        _ => {
            return Err(SimulatorError::AscParseError(
                "Failed to parse timestamp format from ASC file header".to_string(),
            ))
        }
    };
    Ok(Header { hex_ids, absolute })
}

/// Resolve the file named at the end of a `previous log file` comment
fn previous_log(current: &Path, line: &str) -> Result<PathBuf> {
    let name = line
        .split_whitespace()
        .last()
        .filter(|name| !name.contains("file"))
        .ok_or_else(|| {
            SimulatorError::AscParseError("Unable to find filename of previous log".to_string())
        })?;
    Ok(match current.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    })
}

/// Parse `TIMESTAMP BUS ID[x] Rx|Tx d DLC B0 .. Bn`; other lines yield `None`
fn parse_message(line: &str, header: Header) -> Option<(f64, bool, CanFrame)> {
    let mut tokens = line.split_whitespace();
    let seconds: f64 = tokens.next()?.parse().ok()?;
    let _bus: u32 = tokens.next()?.parse().ok()?;

    let id_token = tokens.next()?;
    let (digits, extended) = match id_token.strip_suffix('x') {
        Some(digits) => (digits, true),
        None => (id_token, false),
    };
    let radix = if header.hex_ids { 16 } else { 10 };
    let mut id = u32::from_str_radix(digits, radix).ok()?;
    if extended {
        id |= CAN_EFF_FLAG;
    }

    let incoming = tokens.next()? == "Rx";
    if tokens.next()? != "d" {
        return None;
    }

    let dlc: usize = tokens.next()?.parse().ok()?;
    if dlc > CAN_MAX_DLEN {
        log::debug!("Skipping ASC frame with length {}", dlc);
        return None;
    }
    let mut data = [0u8; CAN_MAX_DLEN];
    for byte in data.iter_mut().take(dlc) {
        *byte = u8::from_str_radix(tokens.next()?, 16).ok()?;
    }

    Some((seconds, incoming, CanFrame::new(id, &data[..dlc])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "date Mon Jan 8 10:00:00 am 2024\n";

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn absolute_log() -> String {
        format!(
            "{}base hex  timestamps absolute\ninternal events logged\n// version 8.0.0\n\
             Begin Triggerblock Mon Jan 8 10:00:00 am 2024\n\
             \x20  2.501 1  128             Rx   d 8 00 01 02 03 04 05 06 07\n\
             \x20  2.502 1  129             Rx   d 2 10 20\n\
             \x20  2.503 1  a8x             Rx   d 8 0A 09 08 07 06 05 04 03\n\
             End TriggerBlock\n",
            HEADER
        )
    }

    #[test]
    fn test_absolute_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "tests.asc", &absolute_log());
        let reader = AscReader::parse(&path).unwrap();
        let items = reader.items();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].timestamp_ms, 2501);
        assert!(items[0].incoming);
        assert_eq!(items[0].frame.id, 0x128);
        assert_eq!(items[0].frame.payload(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(items[1].timestamp_ms, 2502);
        assert_eq!(items[1].frame.id, 0x129);
        assert_eq!(items[1].frame.data, [0x10, 0x20, 0, 0, 0, 0, 0, 0]);

        assert_eq!(items[2].timestamp_ms, 2503);
        assert_eq!(items[2].frame.id, 0x8000_00a8);
        assert_eq!(items[2].frame.payload(), &[0xA, 9, 8, 7, 6, 5, 4, 3]);

        let ids = reader.create_filter_list();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![0x128, 0x129, 0x8000_00a8]);
    }

    #[test]
    fn test_relative_timestamps_with_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "first.asc",
            &format!(
                "{}base dec  timestamps relative\ninternal events logged\n// version 8.0.0\n\
                 \x20  2.501 1  296             Rx   d 8 00 01 02 03 04 05 06 07\n\
                 \x20  2.502 1  297             Tx   d 2 10 20\n",
                HEADER
            ),
        );
        let second = write(
            dir.path(),
            "second.asc",
            &format!(
                "{}base dec  timestamps relative\ninternal events logged\n// version 8.0.0\n\
                 // previous log file: first.asc\n\
                 \x20  2.701 1  296             Rx   d 8 00 01 02 03 04 05 06 07\n\
                 \x20  2.702 1  297             Rx   d 2 10 20\n",
                HEADER
            ),
        );

        let reader = AscReader::parse(&second).unwrap();
        let stamps: Vec<u64> = reader.items().iter().map(|i| i.timestamp_ms).collect();
        assert_eq!(stamps, vec![2501, 5003, 7704, 10406]);
        assert!(!reader.items()[1].incoming);
        assert_eq!(reader.items()[1].frame.id, 0x129);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AscReader::parse(&dir.path().join("missing.asc")).is_err());

        let path = write(
            dir.path(),
            "chained.asc",
            &format!(
                "{}base hex  timestamps absolute\n\n\n// previous log file: gone.asc\n",
                HEADER
            ),
        );
        assert!(matches!(
            AscReader::parse(&path),
            Err(SimulatorError::AscParseError(_))
        ));
    }

    #[test]
    fn test_invalid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.asc", &format!("{}base oct timestamps absolute\n", HEADER));
        assert!(AscReader::parse(&path).is_err());
    }
}
