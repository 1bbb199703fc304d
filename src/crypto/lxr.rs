//! LXR lookup-XOR hash engine.
//!
//! The hash walks its input through a large shuffled byte map. Building the map
//! is expensive (tens of megabytes, several shuffle passes), so the engine is
//! created empty and initialized once; after that it is read-only and shared by
//! every mining run.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::{info, warn};

use super::{Digest, HashError, PowHasher};

/// Digest length in bytes
pub const HASH_SIZE: usize = 32;

/// Shuffle keystream is read in chunks of this many bytes
const KEYSTREAM_CHUNK: usize = 8 * 1024;

/// Parameters that fully determine the byte map
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LxrParams {
    /// Arbitrary seed mixed into the map and every hash
    pub seed: u64,
    /// The map holds `2^map_size_bits` bytes
    pub map_size_bits: u32,
    /// Number of shuffle passes over the map
    pub passes: u32,
}

impl LxrParams {
    /// Parameters every production miner must agree on
    pub const PRODUCTION: Self = Self {
        seed: 0xfafa_ecec_fafa_ecec,
        map_size_bits: 25,
        passes: 5,
    };

    /// Smallest map accepted (one byte per value)
    pub const MIN_MAP_BITS: u32 = 8;
    /// Largest map accepted (1 GiB)
    pub const MAX_MAP_BITS: u32 = 30;

    /// Cheap parameters for tests and local development
    #[must_use]
    pub const fn small(seed: u64) -> Self {
        Self {
            seed,
            map_size_bits: 12,
            passes: 2,
        }
    }

    /// Check the parameters describe a buildable map
    ///
    /// # Errors
    /// Returns error if the map size or pass count is out of range
    pub fn validate(&self) -> Result<(), HashError> {
        if !(Self::MIN_MAP_BITS..=Self::MAX_MAP_BITS).contains(&self.map_size_bits) {
            return Err(HashError::InvalidParams(format!(
                "map_size_bits must be in {}..={}, got {}",
                Self::MIN_MAP_BITS,
                Self::MAX_MAP_BITS,
                self.map_size_bits
            )));
        }
        if self.passes == 0 {
            return Err(HashError::InvalidParams("passes must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Size of the byte map in bytes
    #[must_use]
    pub const fn map_size(&self) -> usize {
        1usize << self.map_size_bits
    }

    fn keystream_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&self.seed.to_be_bytes());
        key[8..12].copy_from_slice(&self.map_size_bits.to_be_bytes());
        key[12..16].copy_from_slice(&self.passes.to_be_bytes());
        key[16..24].copy_from_slice(&(HASH_SIZE as u64).to_be_bytes());
        key
    }
}

impl Default for LxrParams {
    fn default() -> Self {
        Self::PRODUCTION
    }
}

/// A generated byte map, ready to hash
pub struct LxrTable {
    params: LxrParams,
    map: Vec<u8>,
    mask: u64,
}

impl fmt::Debug for LxrTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LxrTable")
            .field("params", &self.params)
            .field("map_len", &self.map.len())
            .finish()
    }
}

/// Rolling state threaded through every step of a hash
struct State {
    acc: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    hs: [u64; HASH_SIZE],
}

impl State {
    fn rotate(&mut self) {
        (self.s1, self.s2, self.s3) = (self.s3, self.s1, self.s2);
    }
}

impl LxrTable {
    /// Build the byte map. This is the expensive part.
    #[must_use]
    pub fn generate(params: LxrParams) -> Self {
        let size = params.map_size();
        let mask = (size - 1) as u64;

        // Every byte value appears equally often as long as size is a multiple of 256
        let mut map: Vec<u8> = (0..size).map(|i| (i & 0xff) as u8).collect();

        let mut hasher = blake3::Hasher::new_keyed(&params.keystream_key());
        hasher.update(b"lxr byte map");
        let mut keystream = hasher.finalize_xof();
        let mut chunk = [0u8; KEYSTREAM_CHUNK];
        let mut cursor = KEYSTREAM_CHUNK;

        for _ in 0..params.passes {
            for i in 0..size {
                if cursor == KEYSTREAM_CHUNK {
                    keystream.fill(&mut chunk);
                    cursor = 0;
                }
                let mut word = [0u8; 8];
                word.copy_from_slice(&chunk[cursor..cursor + 8]);
                cursor += 8;

                let j = (u64::from_le_bytes(word) & mask) as usize;
                map.swap(i, j);
            }
        }

        Self { params, map, mask }
    }

    /// Parameters this table was built from
    #[must_use]
    pub const fn params(&self) -> LxrParams {
        self.params
    }

    #[inline]
    fn lookup(&self, v: u64) -> u64 {
        u64::from(self.map[(v & self.mask) as usize])
    }

    /// Hash arbitrary data
    #[must_use]
    pub fn hash(&self, src: &[u8]) -> Digest {
        let mut st = State {
            acc: self.params.seed,
            s1: 0,
            s2: 0,
            s3: 0,
            hs: [0u64; HASH_SIZE],
        };

        // Fast spin so the serial pass never starts from a predictable state
        for (i, &byte) in src.iter().enumerate() {
            self.fast_step(&mut st, u64::from(byte), i % HASH_SIZE);
        }

        for (i, &byte) in src.iter().enumerate() {
            self.step(&mut st, u64::from(byte), i % HASH_SIZE);
        }

        // Reduce each 64-bit lane to one output byte through the map
        let mut out = [0u8; HASH_SIZE];
        for i in (0..HASH_SIZE).rev() {
            let lane = st.hs[i];
            self.step(&mut st, lane, i);
            out[i] = (self.lookup(st.acc) ^ self.lookup(st.hs[i])) as u8;
        }
        out
    }

    #[inline]
    fn fast_step(&self, st: &mut State, v: u64, idx: usize) {
        let b = self.lookup(st.acc ^ v);
        st.acc = st.acc << 7 ^ st.acc >> 5 ^ v << 20 ^ v << 16 ^ v ^ b << 20 ^ b << 12 ^ b << 4;
        st.s1 = st.s1 << 9 ^ st.s1 >> 3 ^ st.hs[idx];
        st.hs[idx] = st.s1 ^ st.acc;
        st.rotate();
    }

    // Each line depends on the one before, forcing byte-by-byte serial work.
    #[inline]
    fn step(&self, st: &mut State, v: u64, idx: usize) {
        st.s1 = st.s1 << 9 ^ st.s1 >> 1 ^ st.acc ^ self.lookup(st.acc >> 5 ^ v) << 3;
        st.s1 = st.s1 << 5 ^ st.s1 >> 3 ^ self.lookup(st.s1 ^ v) << 7;
        st.s1 = st.s1 << 7 ^ st.s1 >> 7 ^ self.lookup(st.acc ^ st.s1 >> 7) << 5;
        st.s1 = st.s1 << 11 ^ st.s1 >> 5 ^ self.lookup(v ^ st.acc >> 11 ^ st.s1) << 27;

        st.hs[idx] = st.s1 ^ st.acc ^ st.hs[idx] << 7 ^ st.hs[idx] >> 13;

        st.acc = st.acc << 17 ^ st.acc >> 5 ^ st.s1 ^ self.lookup(st.acc ^ st.s1 >> 27 ^ v) << 3;
        st.acc = st.acc << 13 ^ st.acc >> 3 ^ st.hs[idx];
        st.acc = st.acc << 15 ^ st.acc >> 7 ^ self.lookup(st.acc >> 7 ^ v) << 11;
        st.acc = st.acc << 9 ^ st.acc >> 11 ^ self.lookup(v ^ st.acc ^ st.s1) << 3;

        st.s1 = st.s1 << 7 ^ st.s1 >> 27 ^ st.acc ^ self.lookup(st.acc >> 3) << 13;
        st.s1 = st.s1 << 3 ^ st.s1 >> 13 ^ self.lookup(st.s1 ^ v) << 11;
        st.s1 = st.s1 << 8 ^ st.s1 >> 11 ^ self.lookup(st.acc ^ st.s1 >> 11) << 9;
        st.s1 = st.s1 << 6 ^ st.s1 >> 9 ^ self.lookup(v ^ st.acc ^ st.s1) << 3;

        st.acc = st.acc << 23 ^ st.acc >> 3 ^ st.s1 ^ self.lookup(st.acc ^ v ^ st.s1 >> 3) << 7;
        st.acc = st.acc << 17 ^ st.acc >> 7 ^ st.hs[idx];
        st.acc = st.acc << 13 ^ st.acc >> 5 ^ self.lookup(st.acc >> 5 ^ v) << 3;
        st.acc = st.acc << 9 ^ st.acc >> 11 ^ self.lookup(v ^ st.acc ^ st.s1) << 3;

        st.rotate();
    }
}

/// Shared, lazily initialized hash engine.
///
/// `init` builds the table at most once no matter how many tasks race to call
/// it; losers block until the winner finishes and then see the same table.
#[derive(Debug, Default)]
pub struct HashEngine {
    table: OnceLock<LxrTable>,
}

impl HashEngine {
    /// Create an engine with no table yet
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: OnceLock::new(),
        }
    }

    /// Build the table if it does not exist yet.
    ///
    /// Repeated calls are cheap. A call with parameters different from the ones
    /// the table was built with is ignored (and logged); the first wins.
    ///
    /// # Errors
    /// Returns error if `params` are out of range
    pub fn init(&self, params: LxrParams) -> Result<&LxrTable, HashError> {
        params.validate()?;

        let table = self.table.get_or_init(|| {
            let start = Instant::now();
            info!(
                map_size = params.map_size(),
                passes = params.passes,
                "Building LXR byte map"
            );
            let table = LxrTable::generate(params);
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "LXR byte map ready");
            table
        });

        if table.params != params {
            warn!(
                requested = ?params,
                active = ?table.params,
                "Hash engine already initialized with different parameters"
            );
        }
        Ok(table)
    }

    /// Whether `init` has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.table.get().is_some()
    }

    /// Parameters of the active table, if any
    #[must_use]
    pub fn params(&self) -> Option<LxrParams> {
        self.table.get().map(LxrTable::params)
    }
}

impl PowHasher for HashEngine {
    fn hash(&self, data: &[u8]) -> Result<Digest, HashError> {
        self.table
            .get()
            .map(|table| table.hash(data))
            .ok_or(HashError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn engine() -> HashEngine {
        let engine = HashEngine::new();
        engine.init(LxrParams::small(0xfafa_ecec_fafa_ecec)).unwrap();
        engine
    }

    #[test]
    fn test_hash_before_init_fails() {
        let engine = HashEngine::new();
        assert_eq!(engine.hash(b"data"), Err(HashError::NotInitialized));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_hash_deterministic() {
        let engine = engine();
        let h1 = engine.hash(b"test data").unwrap();
        let h2 = engine.hash(b"test data").unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_data() {
        let engine = engine();
        assert_ne!(engine.hash(b"data1").unwrap(), engine.hash(b"data2").unwrap());
        assert_ne!(engine.hash(b"").unwrap(), engine.hash(&[0]).unwrap());
    }

    #[test]
    fn test_tables_agree_across_engines() {
        let a = engine();
        let b = engine();
        assert_eq!(a.hash(b"same").unwrap(), b.hash(b"same").unwrap());
    }

    #[test]
    fn test_seed_changes_digest() {
        let a = LxrTable::generate(LxrParams::small(1));
        let b = LxrTable::generate(LxrParams::small(2));
        assert_ne!(a.hash(b"seeded"), b.hash(b"seeded"));
    }

    #[test]
    fn test_map_is_permutation_of_counts() {
        let table = LxrTable::generate(LxrParams::small(7));
        let mut counts = [0usize; 256];
        for &b in &table.map {
            counts[b as usize] += 1;
        }
        let expected = table.map.len() / 256;
        assert!(counts.iter().all(|&c| c == expected));
    }

    #[test]
    fn test_init_is_idempotent() {
        let engine = HashEngine::new();
        let first = engine.init(LxrParams::small(9)).unwrap() as *const LxrTable;
        let second = engine.init(LxrParams::small(9)).unwrap() as *const LxrTable;
        assert_eq!(first, second);

        // Different parameters do not rebuild the table
        engine.init(LxrParams::small(10)).unwrap();
        assert_eq!(engine.params(), Some(LxrParams::small(9)));
    }

    #[test]
    fn test_concurrent_init_builds_once() {
        let engine = Arc::new(HashEngine::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.init(LxrParams::small(11)).unwrap();
                    engine.hash(b"race").unwrap()
                })
            })
            .collect();

        let digests: Vec<Digest> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let engine = HashEngine::new();
        let mut params = LxrParams::small(1);
        params.map_size_bits = 4;
        assert!(matches!(engine.init(params), Err(HashError::InvalidParams(_))));

        params.map_size_bits = 12;
        params.passes = 0;
        assert!(matches!(engine.init(params), Err(HashError::InvalidParams(_))));
        assert!(!engine.is_initialized());
    }
}
