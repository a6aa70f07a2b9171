//! Sampled Shannon entropy, used as a packing/encryption signal.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use rand::Rng;
use serde::Serialize;

/// Shannon entropy of `data` in bits per byte (0.0..=8.0).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0usize; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    let len = data.len() as f64;
    freq.iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntropyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub samples: usize,
}

impl fmt::Display for EntropyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min={:.3}, max={:.3}, avg={:.3}", self.min, self.max, self.avg)
    }
}

/// Entropy of `samples` windows of `window` bytes at random offsets.
///
/// Files no larger than one window are sampled from offset 0. Returns `None`
/// for an empty file.
pub fn sample_entropy<R: Rng>(
    path: &Path,
    window: usize,
    samples: usize,
    rng: &mut R,
) -> io::Result<Option<EntropyStats>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let window = window.max(1);
    let mut values = Vec::with_capacity(samples);
    let mut buf = vec![0u8; window];

    for _ in 0..samples {
        let offset = if size > window as u64 { rng.gen_range(0..=size - window as u64) } else { 0 };
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < window {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        if read == 0 {
            break;
        }
        values.push(shannon_entropy(&buf[..read]));
    }

    if values.is_empty() {
        return Ok(None);
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Ok(Some(EntropyStats { min, max, avg, samples: values.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_and_constant_extremes() {
        assert_eq!(shannon_entropy(&[0u8; 64]), 0.0);
        let all: Vec<u8> = (0..=255u8).collect();
        assert!((shannon_entropy(&all) - 8.0).abs() < 1e-9);
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn samples_small_file_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, [0xAAu8, 0x55, 0xAA, 0x55]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let stats = sample_entropy(&path, 65536, 4, &mut rng).unwrap().unwrap();
        assert_eq!(stats.samples, 4);
        assert!((stats.avg - 1.0).abs() < 1e-9);
        assert_eq!(stats.to_string(), "min=1.000, max=1.000, avg=1.000");
    }

    #[test]
    fn empty_file_has_no_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sample_entropy(&path, 16, 4, &mut rng).unwrap().is_none());
    }
}
