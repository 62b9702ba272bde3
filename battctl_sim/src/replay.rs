//! Replay recorded telemetry from CSV, one row per poll.
//!
//! Columns are matched by header name: `cell1`..`cellN` and `current` are
//! required; `temp1`..`temp4`, `mosfet_temp`, `soc`, `charge_fet` and
//! `discharge_fet` are optional. An empty field is an absent reading. A row
//! whose cell fields are all empty replays as a missed poll.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use battctl_traits::{Clock, MAX_TEMPERATURE_CHANNELS, MonotonicClock, Snapshot, TelemetrySource};

use crate::error::{Result, SimError};

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    cells: Vec<f64>,
    current: f64,
    temperatures: [Option<f64>; MAX_TEMPERATURE_CHANNELS],
    mosfet_temperature: Option<f64>,
    soc: Option<f64>,
    charge_fet: Option<bool>,
    discharge_fet: Option<bool>,
}

#[derive(Debug, Default)]
struct Columns {
    cells: Vec<usize>,
    current: usize,
    temps: [Option<usize>; MAX_TEMPERATURE_CHANNELS],
    mosfet: Option<usize>,
    soc: Option<usize>,
    charge_fet: Option<usize>,
    discharge_fet: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let mut cols = Self::default();
        let mut cells: Vec<(usize, usize)> = Vec::new();
        let mut current = None;
        for (idx, name) in headers.iter().enumerate() {
            let name = name.trim().to_ascii_lowercase();
            if let Some(n) = name.strip_prefix("cell").and_then(|n| n.parse::<usize>().ok()) {
                cells.push((n, idx));
            } else if let Some(n) = name.strip_prefix("temp").and_then(|n| n.parse::<usize>().ok()) {
                match n.checked_sub(1).and_then(|i| cols.temps.get_mut(i)) {
                    Some(slot) => *slot = Some(idx),
                    None => return Err(SimError::Header(format!("unsupported column {name}"))),
                }
            } else {
                match name.as_str() {
                    "current" => current = Some(idx),
                    "mosfet_temp" => cols.mosfet = Some(idx),
                    "soc" => cols.soc = Some(idx),
                    "charge_fet" => cols.charge_fet = Some(idx),
                    "discharge_fet" => cols.discharge_fet = Some(idx),
                    // Extra columns (timestamps, notes) are ignored.
                    _ => {}
                }
            }
        }
        cells.sort_unstable();
        for (want, (n, _)) in (1..).zip(&cells) {
            if *n != want {
                return Err(SimError::Header(format!("cell columns must run cell1..cellN, missing cell{want}")));
            }
        }
        if cells.is_empty() {
            return Err(SimError::Header("no cell columns".into()));
        }
        cols.cells = cells.into_iter().map(|(_, idx)| idx).collect();
        cols.current = current.ok_or_else(|| SimError::Header("missing current column".into()))?;
        Ok(cols)
    }

    fn frame(&self, rec: &csv::StringRecord, line: u64) -> Result<Option<Frame>> {
        let cells = self
            .cells
            .iter()
            .map(|&i| number(rec, i, line))
            .collect::<Result<Vec<_>>>()?;
        if cells.iter().all(Option::is_none) {
            return Ok(None);
        }
        let cells = cells
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SimError::Row {
                line,
                msg: "partially empty cell voltages".into(),
            })?;
        let current = number(rec, self.current, line)?.ok_or(SimError::Row {
            line,
            msg: "missing current".into(),
        })?;
        let mut temperatures = [None; MAX_TEMPERATURE_CHANNELS];
        for (slot, col) in temperatures.iter_mut().zip(self.temps) {
            if let Some(c) = col {
                *slot = number(rec, c, line)?;
            }
        }
        Ok(Some(Frame {
            cells,
            current,
            temperatures,
            mosfet_temperature: optional(rec, self.mosfet, line)?,
            soc: optional(rec, self.soc, line)?,
            charge_fet: flag(rec, self.charge_fet, line)?,
            discharge_fet: flag(rec, self.discharge_fet, line)?,
        }))
    }
}

fn field(rec: &csv::StringRecord, idx: usize) -> Option<&str> {
    rec.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn number(rec: &csv::StringRecord, idx: usize, line: u64) -> Result<Option<f64>> {
    field(rec, idx)
        .map(|s| {
            s.parse::<f64>().map_err(|e| SimError::Row {
                line,
                msg: format!("{s:?}: {e}"),
            })
        })
        .transpose()
}

fn optional(rec: &csv::StringRecord, idx: Option<usize>, line: u64) -> Result<Option<f64>> {
    idx.map_or(Ok(None), |i| number(rec, i, line))
}

fn flag(rec: &csv::StringRecord, idx: Option<usize>, line: u64) -> Result<Option<bool>> {
    let Some(s) = idx.and_then(|i| field(rec, i)) else {
        return Ok(None);
    };
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Ok(Some(true)),
        "0" | "false" | "off" => Ok(Some(false)),
        other => Err(SimError::Row {
            line,
            msg: format!("invalid flag {other:?}"),
        }),
    }
}

/// Telemetry source that plays back a recorded CSV log.
///
/// Rows are parsed up front so a malformed file fails at open time, not in
/// the middle of a run. Each snapshot is stamped with the clock's `now()`.
pub struct CsvReplaySource {
    clock: Arc<dyn Clock + Send + Sync>,
    frames: Vec<(u64, Option<Frame>)>,
    cells: usize,
    next: usize,
}

impl std::fmt::Debug for CsvReplaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvReplaySource")
            .field("rows", &self.frames.len())
            .field("cells", &self.cells)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl CsvReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        Self::parse(rdr)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self::parse(rdr)
    }

    fn parse<R: Read>(mut rdr: csv::Reader<R>) -> Result<Self> {
        let cols = Columns::from_headers(rdr.headers()?)?;
        let mut frames = Vec::new();
        for rec in rdr.records() {
            let rec = rec?;
            let line = rec.position().map_or(0, csv::Position::line);
            frames.push((line, cols.frame(&rec, line)?));
        }
        tracing::debug!(rows = frames.len(), cells = cols.cells.len(), "replay loaded");
        Ok(Self {
            clock: Arc::new(MonotonicClock::new()),
            cells: cols.cells.len(),
            frames,
            next: 0,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Total number of rows, including missed-poll rows.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.frames.len().saturating_sub(self.next)
    }
}

impl TelemetrySource for CsvReplaySource {
    fn poll(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        let Some((line, frame)) = self.frames.get(self.next) else {
            return Err(Box::new(SimError::Exhausted {
                rows: self.frames.len(),
            }));
        };
        self.next += 1;
        let Some(f) = frame else {
            return Err(Box::new(SimError::EmptyRow { line: *line }));
        };
        let mut snap = Snapshot::new(f.cells.clone(), f.current, self.clock.now());
        snap.temperatures = f.temperatures;
        snap.mosfet_temperature = f.mosfet_temperature;
        snap.soc = f.soc;
        snap.charge_fet = f.charge_fet;
        snap.discharge_fet = f.discharge_fet;
        Ok(snap)
    }

    fn cell_count(&self) -> usize {
        self.cells
    }
}
