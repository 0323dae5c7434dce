//! Content-defined chunking with a Rabin rolling hash.
//!
//! The splitter slides a 64-byte window over the input and cuts a chunk
//! boundary whenever the low `avg_bits` bits of the window fingerprint are
//! all zero, subject to minimum and maximum chunk sizes. The fingerprint is
//! arithmetic over GF(2) modulo an irreducible polynomial; every replica
//! must use the same polynomial or deduplication breaks across them.
//!
//! Boundary detection is a pure function of the input bytes and the
//! parameters: how the underlying reader batches its bytes has no effect.

use std::io::Read;

use bytes::Bytes;

use blobpack_store::DEFAULT_CHUNKER_POLYNOMIAL;

/// Width of the rolling window in bytes.
pub const WINDOW_SIZE: usize = 64;

/// Default minimum chunk size: 512 KiB.
pub const DEFAULT_MIN_SIZE: usize = 512 * 1024;

/// Default maximum chunk size: 8 MiB.
pub const DEFAULT_MAX_SIZE: usize = 8 * 1024 * 1024;

/// Default number of fingerprint bits compared at a boundary; 20 bits gives
/// a 1 MiB target chunk size.
pub const DEFAULT_AVG_BITS: u32 = 20;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Errors from chunker parameter validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkerError {
    /// The polynomial was zero.
    #[error("chunker polynomial must not be zero")]
    ZeroPolynomial,
    /// The polynomial's degree is outside the supported range.
    #[error("chunker polynomial degree {0} outside supported range 9..=56")]
    UnsupportedDegree(i32),
    /// The polynomial is not irreducible over GF(2).
    #[error("chunker polynomial {0:#x} is reducible")]
    ReduciblePolynomial(u64),
    /// min/max/avg sizes are inconsistent.
    #[error("invalid chunk sizes: min {min}, max {max}, avg_bits {avg_bits}")]
    InvalidSizes {
        /// Configured minimum chunk size.
        min: usize,
        /// Configured maximum chunk size.
        max: usize,
        /// Configured boundary mask width.
        avg_bits: u32,
    },
}

/// A polynomial over GF(2), one coefficient per bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pol(pub u64);

impl Pol {
    /// Degree of the polynomial; -1 for the zero polynomial.
    pub fn deg(self) -> i32 {
        63 - self.0.leading_zeros() as i32
    }

    /// Remainder of `self` divided by `m`.
    pub fn modulo(self, m: Pol) -> Pol {
        Pol(mod128(self.0 as u128, m) as u64)
    }

    /// `self * y mod m`.
    pub fn mulmod(self, y: Pol, m: Pol) -> Pol {
        let mut prod: u128 = 0;
        let a = self.0 as u128;
        for i in 0..64 {
            if (y.0 >> i) & 1 == 1 {
                prod ^= a << i;
            }
        }
        Pol(mod128(prod, m) as u64)
    }

    /// Polynomial GCD.
    pub fn gcd(self, other: Pol) -> Pol {
        let (mut a, mut b) = (self, other);
        while b.0 != 0 {
            let r = a.modulo(b);
            a = b;
            b = r;
        }
        a
    }

    /// Irreducibility over GF(2), by Rabin's test: `self` is irreducible
    /// iff `gcd(x^(2^i) - x mod self, self) == 1` for every
    /// `i <= deg(self)/2`.
    pub fn irreducible(self) -> bool {
        for i in 1..=self.deg() / 2 {
            if self.gcd(qp(i as u32, self)).0 != 1 {
                return false;
            }
        }
        true
    }
}

fn deg128(x: u128) -> i32 {
    127 - x.leading_zeros() as i32
}

fn mod128(mut x: u128, m: Pol) -> u128 {
    let md = m.deg();
    while deg128(x) >= md {
        x ^= (m.0 as u128) << (deg128(x) - md);
    }
    x
}

/// `(x^(2^p) + x) mod g`.
fn qp(p: u32, g: Pol) -> Pol {
    let mut res = Pol(2); // x
    for _ in 0..p {
        res = res.mulmod(res, g);
    }
    Pol(res.0 ^ 2).modulo(g)
}

/// Chunker parameters. Fixed for the lifetime of a store: boundaries (and
/// therefore deduplication between replicas) depend on every field.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerParams {
    /// Irreducible modulus polynomial.
    pub pol: Pol,
    /// Minimum chunk size in bytes.
    pub min_size: usize,
    /// Maximum chunk size in bytes.
    pub max_size: usize,
    /// Number of low fingerprint bits that must be zero at a boundary.
    pub avg_bits: u32,
}

impl ChunkerParams {
    /// Parameters with the default sizes for the given polynomial.
    pub fn new(pol: u64) -> Self {
        ChunkerParams {
            pol: Pol(pol),
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            avg_bits: DEFAULT_AVG_BITS,
        }
    }

    fn validate(&self) -> Result<(), ChunkerError> {
        if self.pol.0 == 0 {
            return Err(ChunkerError::ZeroPolynomial);
        }
        let deg = self.pol.deg();
        if !(9..=56).contains(&deg) {
            return Err(ChunkerError::UnsupportedDegree(deg));
        }
        if !self.pol.irreducible() {
            return Err(ChunkerError::ReduciblePolynomial(self.pol.0));
        }
        if self.min_size < WINDOW_SIZE
            || self.min_size > self.max_size
            || self.avg_bits == 0
            || self.avg_bits > 32
        {
            return Err(ChunkerError::InvalidSizes {
                min: self.min_size,
                max: self.max_size,
                avg_bits: self.avg_bits,
            });
        }
        Ok(())
    }
}

impl Default for ChunkerParams {
    fn default() -> Self {
        ChunkerParams::new(DEFAULT_CHUNKER_POLYNOMIAL)
    }
}

/// One content-defined chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk bytes.
    pub data: Bytes,
    /// Byte offset of the chunk's first byte in the input stream.
    pub offset: u64,
}

impl Chunk {
    /// Chunk length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length chunk (never produced by the splitter).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Streaming splitter over any byte source.
///
/// Yields chunks lazily; iteration drives the underlying reader on the
/// caller's thread. Concatenating every yielded chunk reproduces the input
/// exactly.
pub struct ChunkSplitter<R> {
    reader: R,
    out_table: [u64; 256],
    mod_table: [u64; 256],
    pol_shift: u32,
    split_mask: u64,
    min_size: usize,
    max_size: usize,

    window: [u8; WINDOW_SIZE],
    wpos: usize,
    digest: u64,

    buf: Vec<u8>,
    bpos: usize,
    bmax: usize,
    offset: u64,
    eof: bool,
}

impl<R: Read> ChunkSplitter<R> {
    /// Build a splitter, validating the parameters.
    pub fn new(reader: R, params: ChunkerParams) -> Result<Self, ChunkerError> {
        params.validate()?;
        let (out_table, mod_table) = fill_tables(params.pol);
        Ok(ChunkSplitter {
            reader,
            out_table,
            mod_table,
            pol_shift: (params.pol.deg() - 8) as u32,
            split_mask: (1u64 << params.avg_bits) - 1,
            min_size: params.min_size,
            max_size: params.max_size,
            window: [0u8; WINDOW_SIZE],
            wpos: 0,
            digest: 0,
            buf: vec![0u8; READ_BUF_SIZE],
            bpos: 0,
            bmax: 0,
            offset: 0,
            eof: false,
        })
    }

    fn reset_window(&mut self) {
        self.window = [0u8; WINDOW_SIZE];
        self.wpos = 0;
        self.digest = 0;
        self.slide(1);
    }

    fn slide(&mut self, b: u8) {
        let out = self.window[self.wpos] as usize;
        self.window[self.wpos] = b;
        self.digest ^= self.out_table[out];
        self.wpos = (self.wpos + 1) % WINDOW_SIZE;

        let index = (self.digest >> self.pol_shift) as usize;
        self.digest <<= 8;
        self.digest |= b as u64;
        self.digest ^= self.mod_table[index];
    }

    fn fill(&mut self) -> std::io::Result<()> {
        self.bpos = 0;
        self.bmax = 0;
        while !self.eof && self.bmax == 0 {
            match self.reader.read(&mut self.buf) {
                Ok(0) => self.eof = true,
                Ok(n) => self.bmax = n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Produce the next chunk, or `None` at end of stream.
    pub fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        let start = self.offset;
        let mut data: Vec<u8> = Vec::new();
        self.reset_window();

        // The first min_size - WINDOW_SIZE bytes of a chunk cannot contain
        // a boundary, so they bypass the rolling hash entirely.
        let pre = self.min_size - WINDOW_SIZE;
        while data.len() < pre {
            if self.bpos == self.bmax {
                self.fill()?;
                if self.bpos == self.bmax {
                    break;
                }
            }
            let take = (pre - data.len()).min(self.bmax - self.bpos);
            data.extend_from_slice(&self.buf[self.bpos..self.bpos + take]);
            self.bpos += take;
        }

        loop {
            if self.bpos == self.bmax {
                self.fill()?;
                if self.bpos == self.bmax {
                    break;
                }
            }
            let b = self.buf[self.bpos];
            self.bpos += 1;
            self.slide(b);
            data.push(b);

            if data.len() >= self.min_size
                && ((self.digest & self.split_mask) == 0 || data.len() >= self.max_size)
            {
                break;
            }
        }

        if data.is_empty() {
            return Ok(None);
        }
        self.offset = start + data.len() as u64;
        Ok(Some(Chunk {
            data: Bytes::from(data),
            offset: start,
        }))
    }
}

impl<R: Read> Iterator for ChunkSplitter<R> {
    type Item = std::io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

fn fill_tables(pol: Pol) -> ([u64; 256], [u64; 256]) {
    let mut out = [0u64; 256];
    let mut modt = [0u64; 256];

    // out[b]: the fingerprint contribution of byte b as it leaves the
    // window, i.e. b * x^(8*(WINDOW_SIZE-1)) mod pol.
    for b in 0..256usize {
        let mut h = append_byte(Pol(0), b as u8, pol);
        for _ in 0..WINDOW_SIZE - 1 {
            h = append_byte(h, 0, pol);
        }
        out[b] = h.0;
    }

    // mod[b]: the reduction step for the top byte of the digest. The
    // (b << k) term cancels the shifted-out bits so the digest stays below
    // 2^deg(pol).
    let k = pol.deg() as u32;
    for b in 0..256usize {
        let reduced = mod128((b as u128) << k, pol) as u64;
        modt[b] = reduced | ((b as u64) << k);
    }

    (out, modt)
}

fn append_byte(h: Pol, b: u8, pol: Pol) -> Pol {
    let shifted = ((h.0 as u128) << 8) | b as u128;
    Pol(mod128(shifted, pol) as u64)
}
