// Canonical fingerprint of everything an interpolation table depends on.
//
// FNV-1a over an ordered record of particle, medium, cuts, processes and the
// table axis. Floats are hashed through their bit patterns and strings are
// length prefixed, so field boundaries cannot alias. The fingerprint is
// independent of the on-disk encoding.

use std::fmt;
use std::sync::Arc;

use crate::cuts::EnergyCutSettings;
use crate::decay::DecayProvider;
use crate::error::PropagationError;
use crate::medium::Medium;
use crate::particle::ParticleDef;
use crate::process::{CrossSectionProcess, ProcessDescriptor};

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x00000100000001B3;
/// Bumped whenever the table contents change meaning
const TABLE_LAYOUT_VERSION: u32 = 1;

/// Identity of an interpolation table set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Fixed width, lower case, 16 hex digits.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, PropagationError> {
        if text.len() != 16 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PropagationError::MalformedFingerprint(text.to_string()));
        }
        u64::from_str_radix(text, 16)
            .map(Fingerprint)
            .map_err(|_| PropagationError::MalformedFingerprint(text.to_string()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Fnv1a(FNV_OFFSET)
    }

    #[inline]
    fn byte(&mut self, byte: u8) {
        self.0 = (self.0 ^ byte as u64).wrapping_mul(FNV_PRIME);
    }

    fn u32(&mut self, v: u32) {
        for &b in &v.to_le_bytes() {
            self.byte(b);
        }
    }

    fn u64(&mut self, v: u64) {
        for &b in &v.to_le_bytes() {
            self.byte(b);
        }
    }

    fn f64(&mut self, v: f64) {
        self.u64(v.to_bits());
    }

    fn bool(&mut self, v: bool) {
        self.byte(v as u8);
    }

    fn str(&mut self, s: &str) {
        self.u64(s.len() as u64);
        for &b in s.as_bytes() {
            self.byte(b);
        }
    }

    fn cuts(&mut self, cuts: &EnergyCutSettings) {
        self.f64(cuts.ecut);
        self.f64(cuts.vcut);
    }

    fn descriptor(&mut self, descriptor: &ProcessDescriptor) {
        self.str(descriptor.kind.tag());
        self.str(&descriptor.parametrization);
        self.u64(descriptor.parameters.len() as u64);
        for &p in &descriptor.parameters {
            self.f64(p);
        }
        self.f64(descriptor.multiplier);
        self.cuts(&descriptor.cuts);
        self.bool(descriptor.lpm);
    }
}

/// Everything a table set is built from.
#[derive(Debug, Clone, Copy)]
pub struct TableKey<'a> {
    pub particle: &'a ParticleDef,
    pub medium: &'a Medium,
    pub cuts: &'a EnergyCutSettings,
    pub processes: &'a [Arc<dyn CrossSectionProcess>],
    pub decay: Option<&'a dyn DecayProvider>,
    pub nodes: usize,
    pub upper_energy: f64,
}

impl<'a> TableKey<'a> {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = Fnv1a::new();
        h.u32(TABLE_LAYOUT_VERSION);

        h.str(&self.particle.name);
        h.f64(self.particle.mass);
        h.f64(self.particle.charge);
        match self.particle.lifetime {
            Some(t) => {
                h.bool(true);
                h.f64(t);
            }
            None => h.bool(false),
        }
        h.f64(self.particle.low);

        // density correction only rescales distances, tables stay valid
        h.str(&self.medium.name);
        h.f64(self.medium.mass_density);

        h.cuts(self.cuts);

        h.u64(self.processes.len() as u64);
        for process in self.processes {
            h.descriptor(process.descriptor());
        }

        match self.decay {
            Some(decay) => {
                h.bool(true);
                h.str(&decay.signature());
            }
            None => h.bool(false),
        }

        h.u64(self.nodes as u64);
        h.f64(self.upper_energy);
        Fingerprint(h.0)
    }

    /// `<particle>_<medium>_<fingerprint>`, without extension
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize(&self.particle.name),
            sanitize(&self.medium.name),
            self.fingerprint().to_hex()
        )
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
