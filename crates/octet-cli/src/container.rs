//! On-disk format for quantized tensors.
//!
//! ```text
//! "OCT1" | header_len: u32 LE | header: JSON | absmax: f32 LE * blocks | codes: u8 * n
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context};
use octet_core::BlockSize;
use octet_quant::{Codebook, Codec, QuantScheme, QuantizedBuffer};
use serde::{Deserialize, Serialize};

/// File magic.
pub const MAGIC: &[u8; 4] = b"OCT1";

/// JSON header describing the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// Number of elements.
    pub n: usize,
    /// Elements per absmax block.
    pub block_size: usize,
    /// Codec used for the codes.
    pub scheme: QuantScheme,
    /// Codebook for static schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebook: Option<Vec<f32>>,
}

impl ContainerHeader {
    fn for_buffer(buffer: &QuantizedBuffer) -> Self {
        Self {
            n: buffer.len(),
            block_size: buffer.block_size.get(),
            scheme: buffer.scheme(),
            codebook: buffer.codec.codebook().map(|cb| cb.values().to_vec()),
        }
    }

    fn codec(&self) -> anyhow::Result<Codec> {
        Ok(match self.scheme {
            QuantScheme::DynamicSigned => Codec::dynamic(true),
            QuantScheme::DynamicUnsigned => Codec::dynamic(false),
            QuantScheme::Static => {
                let values = self
                    .codebook
                    .clone()
                    .context("static scheme without a codebook")?;
                Codec::Static(Codebook::from_values(values)?)
            }
        })
    }
}

/// Serialize a buffer to bytes.
pub fn encode(buffer: &QuantizedBuffer) -> anyhow::Result<Vec<u8>> {
    let header = serde_json::to_vec(&ContainerHeader::for_buffer(buffer))?;
    let header_len = u32::try_from(header.len()).context("header too large")?;

    let mut out =
        Vec::with_capacity(8 + header.len() + 4 * buffer.absmax.len() + buffer.codes.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header);
    for a in &buffer.absmax {
        out.extend_from_slice(&a.to_le_bytes());
    }
    out.extend_from_slice(&buffer.codes);
    Ok(out)
}

/// Parse bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> anyhow::Result<QuantizedBuffer> {
    ensure!(bytes.len() >= 8, "file too short for a container header");
    if &bytes[..4] != MAGIC {
        bail!("not an octet container (bad magic)");
    }
    let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = &bytes[8..];
    ensure!(
        body.len() >= header_len,
        "truncated header: need {header_len} bytes, have {}",
        body.len()
    );
    let header: ContainerHeader =
        serde_json::from_slice(&body[..header_len]).context("invalid container header")?;

    let block_size = BlockSize::new(header.block_size)?;
    let blocks = block_size.num_blocks(header.n);
    let payload = &body[header_len..];
    let Some(expected) = blocks.checked_mul(4).and_then(|b| b.checked_add(header.n)) else {
        bail!("header describes an impossibly large payload ({} elements)", header.n);
    };
    ensure!(
        payload.len() == expected,
        "payload is {} bytes, expected {expected} for {} elements",
        payload.len(),
        header.n
    );

    let (absmax_bytes, codes) = payload.split_at(4 * blocks);
    let absmax = absmax_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(QuantizedBuffer::from_parts(
        codes.to_vec(),
        absmax,
        block_size,
        header.codec()?,
    )?)
}

/// Write a buffer to `path`.
pub fn write(path: &Path, buffer: &QuantizedBuffer) -> anyhow::Result<()> {
    let bytes = encode(buffer)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

/// Read a buffer from `path`.
pub fn read(path: &Path) -> anyhow::Result<QuantizedBuffer> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

/// Read a headerless little-endian `f32` file.
pub fn read_raw_f32(path: &Path) -> anyhow::Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    ensure!(
        bytes.len() % 4 == 0,
        "{} is {} bytes, not a whole number of f32 values",
        path.display(),
        bytes.len()
    );
    let mut words = vec![0u32; bytes.len() / 4];
    bytemuck::cast_slice_mut::<u32, u8>(&mut words).copy_from_slice(&bytes);
    Ok(words
        .into_iter()
        .map(|w| f32::from_bits(u32::from_le(w)))
        .collect())
}

/// Write a headerless little-endian `f32` file.
pub fn write_raw_f32(path: &Path, values: &[f32]) -> anyhow::Result<()> {
    let words: Vec<u32> = values.iter().map(|v| v.to_bits().to_le()).collect();
    fs::write(path, bytemuck::cast_slice::<u32, u8>(&words))
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use octet_quant::{quantize_blockwise, quantize_dynamic, Rounding};

    #[test]
    fn test_dynamic_container_roundtrip() {
        let x: Vec<f32> = (0..5000).map(|i| (i as f32 * 0.37).sin()).collect();
        let q = quantize_dynamic(&x, BlockSize::new(1024).unwrap(), true, Rounding::Nearest).unwrap();
        let bytes = encode(&q).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(decode(&bytes).unwrap(), q);
    }

    #[test]
    fn test_static_container_keeps_codebook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.oct");
        let cb = Codebook::linear(true);
        let x = vec![0.5f32, -0.25, 1.0, 0.0, 0.75];
        let q = quantize_blockwise(&x, &cb, BlockSize::new(4).unwrap(), Rounding::Nearest).unwrap();
        write(&path, &q).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.codec.codebook(), Some(&cb));
        assert_eq!(back, q);
    }

    #[test]
    fn test_rejects_corrupt_files() {
        assert!(decode(b"OCT").is_err());
        assert!(decode(b"NOPE\0\0\0\0").is_err());

        let q = quantize_dynamic(&[1.0f32; 8], BlockSize::new(4).unwrap(), true, Rounding::Nearest)
            .unwrap();
        let mut bytes = encode(&q).unwrap();
        bytes.pop();
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn test_rejects_overflowing_header() {
        let header = format!(
            r#"{{"n":{},"block_size":2,"scheme":"dynamic_signed"}}"#,
            usize::MAX - 1
        );
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("impossibly large"));
    }

    #[test]
    fn test_raw_f32_is_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("le.f32");
        write_raw_f32(&path, &[1.0f32, -2.5]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());

        std::fs::write(&path, 0.75f32.to_le_bytes()).unwrap();
        assert_eq!(read_raw_f32(&path).unwrap(), vec![0.75]);
    }

    #[test]
    fn test_raw_f32_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.f32");
        let x = vec![1.5f32, -2.0, 0.0, 3.25];
        write_raw_f32(&path, &x).unwrap();
        assert_eq!(read_raw_f32(&path).unwrap(), x);

        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(read_raw_f32(&path).is_err());
    }
}
