// Interpolation tables: build, persist, reload and share.
//
// A `TableSet` is immutable once built and shared as `Arc<TableSet>`. Sets are
// looked up in an in-process registry first, then on disk, and only built
// when neither has them. Persisting is best effort: a failed write is logged
// and the set stays in memory.
//
// Tables are tabulated over x = ln(E - offset), where the offset is the
// particle mass when Low lies above it and zero otherwise. The first decade
// of E - offset above Low is sampled more densely than the rest of the axis.
//
// Binary layout (all little-endian):
//   [MAGIC "YAPC"] [VERSION u8] [fingerprint u64] [low f64] [upper f64]
//   [offset f64] [nodes u32] [x axis: nodes x f64]
//   4 x ( [present u8] and, when present,
//         [direction u8] [value at Low f64]
//         [integral values] [integral slopes] [kernel values] [kernel slopes] )

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TableEncoding;
use crate::error::PropagationError;
use crate::fingerprint::{Fingerprint, TableKey};
use crate::integral::Integral;
use crate::interpolant::Interpolant;
use crate::tracking::{Kernel, ProcessSet};

pub const MAGIC: [u8; 4] = *b"YAPC";
pub const FORMAT_VERSION: u8 = 2;
const TEXT_FORMAT: &str = "yapc-tables";

type Slot = Arc<OnceCell<Arc<TableSet>>>;

// Global registry of built or loaded table sets, one slot per fingerprint
static TABLE_REGISTRY: Lazy<Mutex<HashMap<Fingerprint, Slot>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Node density of the first axis decade relative to the rest
const LOW_DECADE_REFINEMENT: f64 = 2.0;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Which end of the axis a table's integral is anchored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `T(E) = ∫_Low^E k`, increasing
    Up,
    /// `T(E) = ∫_E^upper k`, decreasing
    Down,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

/// Integral and kernel tables of one kernel, both over `ln(E - offset)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelTable {
    direction: Direction,
    offset: f64,
    integral: Interpolant,
    kernel: Interpolant,
    at_low: f64,
}

impl KernelTable {
    #[inline]
    fn coordinate(&self, energy: f64) -> f64 {
        (energy - self.offset).max(0.0).ln()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sign(&self) -> f64 {
        self.direction.sign()
    }

    /// Tabulated integral at `energy`
    pub fn value(&self, energy: f64) -> f64 {
        self.integral.value(self.coordinate(energy))
    }

    /// Tabulated kernel at `energy`, never negative
    pub fn kernel(&self, energy: f64) -> f64 {
        self.kernel.value(self.coordinate(energy)).max(0.0)
    }

    /// Tabulated integral at Low
    pub fn at_low(&self) -> f64 {
        self.at_low
    }

    /// Energy at which the tabulated integral equals `value`
    pub fn energy_at(&self, value: f64) -> f64 {
        self.offset + self.integral.find_limit(value).exp()
    }
}

/// All tables belonging to one fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSet {
    fingerprint: Fingerprint,
    low: f64,
    upper: f64,
    offset: f64,
    axis: Vec<f64>,
    tables: [Option<KernelTable>; 4],
}

impl TableSet {
    /// Sample every kernel of `set` on a logarithmic axis from Low to `upper`.
    pub fn build(
        set: &ProcessSet,
        fingerprint: Fingerprint,
        nodes: usize,
        upper: f64,
    ) -> Result<Self, PropagationError> {
        let low = set.low();
        if nodes < 4 {
            return Err(PropagationError::InvalidConfiguration(format!(
                "interpolation needs at least 4 nodes, got {}",
                nodes
            )));
        }
        if !(upper > 10.0 * low) || !upper.is_finite() {
            return Err(PropagationError::InvalidConfiguration(format!(
                "table upper energy {} must exceed ten times Low ({})",
                upper, low
            )));
        }

        let offset = axis_offset(set);
        let axis = axis_nodes((low - offset).ln(), (upper - offset).ln(), nodes);
        let mut energies: Vec<f64> = axis.iter().map(|x| offset + x.exp()).collect();
        energies[0] = low;
        energies[nodes - 1] = upper;

        let integral = Integral::default();
        let mut tables: [Option<KernelTable>; 4] = Default::default();
        for kernel in Kernel::ALL {
            if set.has_kernel(kernel) {
                tables[kernel.index()] = Some(build_kernel_table(
                    set, kernel, offset, &axis, &energies, &integral,
                )?);
                log::debug!("built {} table for {}", kernel.name(), fingerprint);
            }
        }

        Ok(TableSet {
            fingerprint,
            low,
            upper,
            offset,
            axis,
            tables,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn upper_energy(&self) -> f64 {
        self.upper
    }

    /// Energy subtracted before taking the logarithm of the axis
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn nodes(&self) -> usize {
        self.axis.len()
    }

    /// Node energies of the axis
    pub fn energies(&self) -> Vec<f64> {
        self.axis.iter().map(|x| self.offset + x.exp()).collect()
    }

    pub fn get(&self, kernel: Kernel) -> Option<&KernelTable> {
        self.tables[kernel.index()].as_ref()
    }

    /// Encode into `w` with the given encoding.
    pub fn encode(&self, w: &mut dyn Write, encoding: TableEncoding) -> io::Result<()> {
        match encoding {
            TableEncoding::Binary => self.encode_binary(w),
            TableEncoding::Text => {
                serde_json::to_writer_pretty(&mut *w, &self.to_file())?;
                Ok(())
            }
        }
    }

    /// Decode from `bytes`, checking the embedded fingerprint.
    pub fn decode(
        bytes: &[u8],
        encoding: TableEncoding,
        expected: Fingerprint,
    ) -> Result<Self, String> {
        let tables = match encoding {
            TableEncoding::Binary => Self::decode_binary(bytes)?,
            TableEncoding::Text => {
                let file: TableFile = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
                Self::from_file(file)?
            }
        };
        if tables.fingerprint != expected {
            return Err(format!(
                "fingerprint mismatch: file has {}, expected {}",
                tables.fingerprint, expected
            ));
        }
        Ok(tables)
    }

    fn encode_binary(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        write_u8(w, FORMAT_VERSION)?;
        write_u64_le(w, self.fingerprint.0)?;
        write_f64_le(w, self.low)?;
        write_f64_le(w, self.upper)?;
        write_f64_le(w, self.offset)?;
        write_u32_le(w, self.axis.len() as u32)?;
        write_f64_slice(w, &self.axis)?;
        for table in &self.tables {
            match table {
                None => write_u8(w, 0)?,
                Some(table) => {
                    write_u8(w, 1)?;
                    write_u8(
                        w,
                        match table.direction {
                            Direction::Up => 0,
                            Direction::Down => 1,
                        },
                    )?;
                    write_f64_le(w, table.at_low)?;
                    write_f64_slice(w, table.integral.values())?;
                    write_f64_slice(w, table.integral.slopes())?;
                    write_f64_slice(w, table.kernel.values())?;
                    write_f64_slice(w, table.kernel.slopes())?;
                }
            }
        }
        Ok(())
    }

    fn decode_binary(bytes: &[u8]) -> Result<Self, String> {
        let mut r: &[u8] = bytes;
        let r = &mut r;
        let io_detail = |e: io::Error| format!("truncated table: {}", e);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(io_detail)?;
        if magic != MAGIC {
            return Err(format!("bad magic {:?}", magic));
        }
        let version = read_u8(r).map_err(io_detail)?;
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }
        let fingerprint = Fingerprint(read_u64_le(r).map_err(io_detail)?);
        let low = read_f64_le(r).map_err(io_detail)?;
        let upper = read_f64_le(r).map_err(io_detail)?;
        let offset = read_f64_le(r).map_err(io_detail)?;
        if !(offset >= 0.0 && offset < low) {
            return Err(format!("axis offset {} outside [0, {})", offset, low));
        }
        let nodes = read_u32_le(r).map_err(io_detail)? as usize;
        if nodes < 2 || nodes * 8 > r.len() {
            return Err(format!("implausible node count {}", nodes));
        }
        let axis = read_f64_vec(r, nodes).map_err(io_detail)?;

        let mut tables: [Option<KernelTable>; 4] = Default::default();
        for slot in tables.iter_mut() {
            match read_u8(r).map_err(io_detail)? {
                0 => {}
                1 => {
                    let direction = match read_u8(r).map_err(io_detail)? {
                        0 => Direction::Up,
                        1 => Direction::Down,
                        other => return Err(format!("bad direction flag {}", other)),
                    };
                    let record = KernelRecord {
                        direction,
                        at_low: read_f64_le(r).map_err(io_detail)?,
                        values: read_f64_vec(r, nodes).map_err(io_detail)?,
                        slopes: read_f64_vec(r, nodes).map_err(io_detail)?,
                        kernel_values: read_f64_vec(r, nodes).map_err(io_detail)?,
                        kernel_slopes: read_f64_vec(r, nodes).map_err(io_detail)?,
                    };
                    *slot = Some(record.into_table(&axis, offset)?);
                }
                other => return Err(format!("bad presence flag {}", other)),
            }
        }
        if !r.is_empty() {
            return Err(format!("{} trailing bytes", r.len()));
        }

        Ok(TableSet {
            fingerprint,
            low,
            upper,
            offset,
            axis,
            tables,
        })
    }

    fn to_file(&self) -> TableFile {
        TableFile {
            format: TEXT_FORMAT.to_string(),
            version: FORMAT_VERSION,
            fingerprint: self.fingerprint.to_hex(),
            low: self.low,
            upper: self.upper,
            offset: self.offset,
            axis: self.axis.clone(),
            kernels: self
                .tables
                .iter()
                .map(|t| {
                    t.as_ref().map(|t| KernelRecord {
                        direction: t.direction,
                        at_low: t.at_low,
                        values: t.integral.values().to_vec(),
                        slopes: t.integral.slopes().to_vec(),
                        kernel_values: t.kernel.values().to_vec(),
                        kernel_slopes: t.kernel.slopes().to_vec(),
                    })
                })
                .collect(),
        }
    }

    fn from_file(file: TableFile) -> Result<Self, String> {
        if file.format != TEXT_FORMAT || file.version != FORMAT_VERSION {
            return Err(format!(
                "unsupported table format {} version {}",
                file.format, file.version
            ));
        }
        let fingerprint = Fingerprint::from_hex(&file.fingerprint).map_err(|e| e.to_string())?;
        if !(file.offset >= 0.0 && file.offset < file.low) {
            return Err(format!("axis offset {} outside [0, {})", file.offset, file.low));
        }
        if file.kernels.len() != 4 {
            return Err(format!("expected 4 kernel slots, found {}", file.kernels.len()));
        }
        let mut tables: [Option<KernelTable>; 4] = Default::default();
        for (slot, record) in tables.iter_mut().zip(file.kernels) {
            if let Some(record) = record {
                *slot = Some(record.into_table(&file.axis, file.offset)?);
            }
        }
        Ok(TableSet {
            fingerprint,
            low: file.low,
            upper: file.upper,
            offset: file.offset,
            axis: file.axis,
            tables,
        })
    }
}

/// Axis offset for `set`: the mass when Low lies above it.
fn axis_offset(set: &ProcessSet) -> f64 {
    let (low, mass) = (set.low(), set.particle.mass);
    if low > mass {
        mass
    } else {
        0.0
    }
}

/// `nodes` strictly increasing positions from `x_low` to `x_upper`.
///
/// Two uniform pieces: the first decade above `x_low` gets spacing
/// `LOW_DECADE_REFINEMENT` times finer than the remainder.
fn axis_nodes(x_low: f64, x_upper: f64, nodes: usize) -> Vec<f64> {
    let segments = nodes - 1;
    let length = x_upper - x_low;
    let dense = std::f64::consts::LN_10.min(0.5 * length);
    let weight = LOW_DECADE_REFINEMENT * dense;
    let share = segments as f64 * weight / (weight + length - dense);
    let m = (share.round() as usize).clamp(1, segments - 1);

    let mut axis = Vec::with_capacity(nodes);
    for i in 0..m {
        axis.push(x_low + dense * i as f64 / m as f64);
    }
    let rest = segments - m;
    for j in 0..rest {
        axis.push(x_low + dense + (length - dense) * j as f64 / rest as f64);
    }
    axis.push(x_upper);
    axis
}

fn build_kernel_table(
    set: &ProcessSet,
    kernel: Kernel,
    offset: f64,
    axis: &[f64],
    energies: &[f64],
    integral: &Integral,
) -> Result<KernelTable, PropagationError> {
    let k = |e: f64| set.kernel(kernel, e);
    let n = energies.len();
    let (low, upper) = (energies[0], energies[n - 1]);

    let kernel_values: Vec<f64> = energies.iter().map(|&e| k(e)).collect();
    if let Some(i) = kernel_values.iter().position(|v| !v.is_finite()) {
        return Err(PropagationError::integration(
            energies[i],
            energies[i],
            format!("degenerate {} kernel ({})", kernel.name(), kernel_values[i]),
        ));
    }

    let low_piece = integral.integrate_log(&k, low, 10.0 * low)?;
    let high_piece = integral.integrate_log(&k, upper / 10.0, upper)?;
    let direction = if low_piece.abs() < high_piece.abs() {
        Direction::Up
    } else {
        Direction::Down
    };

    let mut segments = Vec::with_capacity(n - 1);
    for w in energies.windows(2) {
        segments.push(integral.integrate_log(&k, w[0], w[1])?);
    }

    let mut values = vec![0.0; n];
    match direction {
        Direction::Up => {
            for i in 0..n - 1 {
                values[i + 1] = values[i] + segments[i];
            }
        }
        Direction::Down => {
            for i in (0..n - 1).rev() {
                values[i] = values[i + 1] + segments[i];
            }
        }
    }
    let sign = direction.sign();
    let slopes: Vec<f64> = kernel_values
        .iter()
        .zip(energies)
        .map(|(kv, e)| sign * kv * (e - offset))
        .collect();

    let at_low = values[0];
    Ok(KernelTable {
        direction,
        offset,
        integral: Interpolant::hermite(axis.to_vec(), values, slopes)?,
        kernel: Interpolant::pchip(axis.to_vec(), kernel_values)?,
        at_low,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    format: String,
    version: u8,
    fingerprint: String,
    low: f64,
    upper: f64,
    offset: f64,
    axis: Vec<f64>,
    kernels: Vec<Option<KernelRecord>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KernelRecord {
    direction: Direction,
    at_low: f64,
    values: Vec<f64>,
    slopes: Vec<f64>,
    kernel_values: Vec<f64>,
    kernel_slopes: Vec<f64>,
}

impl KernelRecord {
    fn into_table(self, axis: &[f64], offset: f64) -> Result<KernelTable, String> {
        let integral = Interpolant::from_parts(axis.to_vec(), self.values, self.slopes)
            .map_err(|e| e.to_string())?;
        let kernel = Interpolant::from_parts(axis.to_vec(), self.kernel_values, self.kernel_slopes)
            .map_err(|e| e.to_string())?;
        Ok(KernelTable {
            direction: self.direction,
            offset,
            integral,
            kernel,
            at_low: self.at_low,
        })
    }
}

// ── Primitive writers and readers ───────────────────────────────

fn write_u8(w: &mut dyn Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u32_le(w: &mut dyn Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64_le(w: &mut dyn Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64_le(w: &mut dyn Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64_slice(w: &mut dyn Write, values: &[f64]) -> io::Result<()> {
    for &v in values {
        write_f64_le(w, v)?;
    }
    Ok(())
}

fn read_u8(r: &mut dyn Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32_le(r: &mut dyn Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le(r: &mut dyn Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64_le(r: &mut dyn Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_f64_vec(r: &mut dyn Read, len: usize) -> io::Result<Vec<f64>> {
    (0..len).map(|_| read_f64_le(r)).collect()
}

// ── Store, load and the registry ────────────────────────────────

/// Path of the table file for `key` inside `directory`.
pub fn table_path(directory: &Path, key: &TableKey<'_>, encoding: TableEncoding) -> PathBuf {
    directory.join(format!("{}.{}", key.file_stem(), encoding.extension()))
}

/// Encoding implied by the file extension (`.json` is text, anything else binary).
pub fn encoding_of(path: &Path) -> TableEncoding {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => TableEncoding::Text,
        _ => TableEncoding::Binary,
    }
}

/// Read and validate the table file at `path`.
pub fn load_tables(path: &Path, expected: Fingerprint) -> Result<TableSet, PropagationError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PropagationError::TableMiss(path.to_path_buf()))
        }
        Err(e) => return Err(PropagationError::Io(e)),
    };
    TableSet::decode(&bytes, encoding_of(path), expected).map_err(|detail| {
        PropagationError::TableCorrupted {
            path: path.to_path_buf(),
            detail,
        }
    })
}

/// What a store left at the destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    /// Our file was published at the path
    Written,
    /// Another writer's file was already there and was kept
    Existing,
}

/// Write `tables` to `path` through a temporary file published without
/// clobbering: the first complete file at `path` wins.
pub fn store_tables(
    path: &Path,
    tables: &TableSet,
    encoding: TableEncoding,
) -> Result<Stored, PropagationError> {
    let tmp = path.with_extension(format!(
        "{}.{}-{}.tmp",
        encoding.extension(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let write = || -> io::Result<Stored> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = BufWriter::new(fs::File::create(&tmp)?);
        tables.encode(&mut file, encoding)?;
        file.flush()?;
        drop(file);
        match fs::hard_link(&tmp, path) {
            Ok(()) => {
                fs::remove_file(&tmp)?;
                Ok(Stored::Written)
            }
            // someone else finished the same table first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs::remove_file(&tmp)?;
                Ok(Stored::Existing)
            }
            // no hard links on this filesystem
            Err(_) => {
                fs::rename(&tmp, path)?;
                Ok(Stored::Written)
            }
        }
    };
    write().map_err(|source| {
        let _ = fs::remove_file(&tmp);
        PropagationError::TableWriteFailure {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn registry() -> std::sync::MutexGuard<'static, HashMap<Fingerprint, Slot>> {
    TABLE_REGISTRY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Get the table set for `key`, from the registry, the store, or by building it.
///
/// Concurrent callers with the same fingerprint wait for a single load or
/// build. A failed attempt leaves the slot empty for the next caller.
pub fn obtain_tables(
    set: &ProcessSet,
    key: &TableKey<'_>,
    directory: Option<&Path>,
    encoding: TableEncoding,
) -> Result<Arc<TableSet>, PropagationError> {
    let fingerprint = key.fingerprint();
    let slot = Arc::clone(registry().entry(fingerprint).or_default());
    if let Some(tables) = slot.get() {
        log::debug!("interpolation tables {} found in registry", fingerprint);
        return Ok(Arc::clone(tables));
    }
    let tables = slot.get_or_try_init(|| {
        load_or_build(set, key, fingerprint, directory, encoding).map(Arc::new)
    })?;
    Ok(Arc::clone(tables))
}

fn load_or_build(
    set: &ProcessSet,
    key: &TableKey<'_>,
    fingerprint: Fingerprint,
    directory: Option<&Path>,
    encoding: TableEncoding,
) -> Result<TableSet, PropagationError> {
    let path = directory.map(|dir| table_path(dir, key, encoding));

    if let Some(path) = &path {
        match load_tables(path, fingerprint) {
            Ok(tables) => {
                log::info!("loaded interpolation tables from {}", path.display());
                return Ok(tables);
            }
            Err(PropagationError::TableMiss(_)) => {
                log::info!("no interpolation tables at {}", path.display());
            }
            Err(e @ PropagationError::TableCorrupted { .. }) => {
                log::warn!("{}; replacing it", e);
                let _ = fs::remove_file(path);
            }
            Err(e) => log::warn!("{}; rebuilding", e),
        }
    }

    log::info!(
        "building interpolation tables {} for {} ({} nodes)",
        fingerprint,
        set.particle.name,
        key.nodes
    );
    let tables = TableSet::build(set, fingerprint, key.nodes, key.upper_energy)?;
    Ok(match &path {
        Some(path) => publish(path, tables, encoding),
        None => tables,
    })
}

/// Persist freshly built `tables`; when another writer got there first, use
/// its file instead so every reader sees the same set.
fn publish(path: &Path, tables: TableSet, encoding: TableEncoding) -> TableSet {
    match store_tables(path, &tables, encoding) {
        Ok(Stored::Written) => {
            log::info!("stored interpolation tables at {}", path.display());
            tables
        }
        Ok(Stored::Existing) => match load_tables(path, tables.fingerprint) {
            Ok(winner) => {
                log::info!("reloaded interpolation tables from {}", path.display());
                winner
            }
            Err(e) => {
                log::warn!("{}; keeping the tables built here", e);
                tables
            }
        },
        Err(e) => {
            log::warn!("{}; keeping tables in memory only", e);
            tables
        }
    }
}

/// Drop every registered table set.
pub fn clear_table_registry() {
    registry().clear();
}

/// Whether a set with this fingerprint is registered.
pub fn is_registered(fingerprint: Fingerprint) -> bool {
    registry()
        .get(&fingerprint)
        .map_or(false, |slot| slot.get().is_some())
}
