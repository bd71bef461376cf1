//! Quantized storage and borrowed views over it.

use octet_core::{BlockSize, OctetError, Result};

use crate::{BlockCodec, Codec, QuantScheme};

/// Owned quantized tensor: one code per element and one absmax per block.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedBuffer {
    /// One byte per element.
    pub codes: Vec<u8>,
    /// Per-block absolute maximum values for dequantization.
    pub absmax: Vec<f32>,
    /// Elements per block.
    pub block_size: BlockSize,
    /// Codec the codes were produced with.
    pub codec: Codec,
}

impl QuantizedBuffer {
    /// All-zero buffer for `n` elements (decodes to zeros).
    #[must_use]
    pub fn zeros(n: usize, block_size: BlockSize, codec: Codec) -> Self {
        Self {
            codes: vec![0; n],
            absmax: vec![0.0; block_size.num_blocks(n)],
            block_size,
            codec,
        }
    }

    /// Wrap existing storage, checking the absmax length.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidShape`] if `absmax` does not have one
    /// entry per block.
    pub fn from_parts(
        codes: Vec<u8>,
        absmax: Vec<f32>,
        block_size: BlockSize,
        codec: Codec,
    ) -> Result<Self> {
        check_absmax_len(codes.len(), absmax.len(), block_size)?;
        Ok(Self {
            codes,
            absmax,
            block_size,
            codec,
        })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.absmax.len()
    }

    /// Scheme of the codec.
    #[must_use]
    pub fn scheme(&self) -> QuantScheme {
        self.codec.scheme()
    }

    /// Bytes held by codes and absmax.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.codes.len() + self.absmax.len() * std::mem::size_of::<f32>()
    }

    /// Read-only view.
    #[must_use]
    pub fn view(&self) -> QuantizedView<'_> {
        QuantizedView {
            codes: &self.codes,
            absmax: &self.absmax,
            block_size: self.block_size,
        }
    }

    /// Mutable view.
    pub fn view_mut(&mut self) -> QuantizedViewMut<'_> {
        QuantizedViewMut {
            codes: &mut self.codes,
            absmax: &mut self.absmax,
            block_size: self.block_size,
        }
    }

    /// Mutable view together with the codec, borrowed disjointly.
    pub fn parts_mut(&mut self) -> (QuantizedViewMut<'_>, &Codec) {
        (
            QuantizedViewMut {
                codes: &mut self.codes,
                absmax: &mut self.absmax,
                block_size: self.block_size,
            },
            &self.codec,
        )
    }
}

/// Borrowed read-only quantized tensor.
#[derive(Debug, Clone, Copy)]
pub struct QuantizedView<'a> {
    /// Codes.
    pub codes: &'a [u8],
    /// Per-block absmax.
    pub absmax: &'a [f32],
    /// Elements per block.
    pub block_size: BlockSize,
}

impl<'a> QuantizedView<'a> {
    /// Create a view, checking the absmax length.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidShape`] on a length mismatch.
    pub fn new(codes: &'a [u8], absmax: &'a [f32], block_size: BlockSize) -> Result<Self> {
        check_absmax_len(codes.len(), absmax.len(), block_size)?;
        Ok(Self {
            codes,
            absmax,
            block_size,
        })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Borrowed mutable quantized tensor; caller-owned storage is never
/// reallocated.
#[derive(Debug)]
pub struct QuantizedViewMut<'a> {
    /// Codes.
    pub codes: &'a mut [u8],
    /// Per-block absmax.
    pub absmax: &'a mut [f32],
    /// Elements per block.
    pub block_size: BlockSize,
}

impl<'a> QuantizedViewMut<'a> {
    /// Create a mutable view, checking the absmax length.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidShape`] on a length mismatch.
    pub fn new(codes: &'a mut [u8], absmax: &'a mut [f32], block_size: BlockSize) -> Result<Self> {
        check_absmax_len(codes.len(), absmax.len(), block_size)?;
        Ok(Self {
            codes,
            absmax,
            block_size,
        })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Reborrow as read-only.
    #[must_use]
    pub fn as_view(&self) -> QuantizedView<'_> {
        QuantizedView {
            codes: &*self.codes,
            absmax: &*self.absmax,
            block_size: self.block_size,
        }
    }

    /// Reborrow mutably for a shorter lifetime.
    pub fn reborrow(&mut self) -> QuantizedViewMut<'_> {
        QuantizedViewMut {
            codes: &mut *self.codes,
            absmax: &mut *self.absmax,
            block_size: self.block_size,
        }
    }
}

pub(crate) fn check_absmax_len(n: usize, absmax_len: usize, block_size: BlockSize) -> Result<()> {
    let expected = block_size.num_blocks(n);
    if absmax_len != expected {
        return Err(OctetError::shape("absmax", expected, absmax_len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_layout() {
        let buf = QuantizedBuffer::zeros(5000, BlockSize::B2048, Codec::dynamic(true));
        assert_eq!(buf.len(), 5000);
        assert_eq!(buf.num_blocks(), 3);
        assert_eq!(buf.memory_bytes(), 5000 + 12);
        assert_eq!(buf.scheme(), QuantScheme::DynamicSigned);
    }

    #[test]
    fn test_view_shape_checked() {
        let codes = [0u8; 10];
        let absmax = [0.0f32; 2];
        let block = BlockSize::new(4).unwrap();
        assert!(matches!(
            QuantizedView::new(&codes, &absmax, block),
            Err(OctetError::InvalidShape {
                what: "absmax",
                expected: 3,
                actual: 2
            })
        ));
        let absmax = [0.0f32; 3];
        assert_eq!(QuantizedView::new(&codes, &absmax, block).unwrap().len(), 10);
    }

    #[test]
    fn test_from_parts() {
        let block = BlockSize::new(4).unwrap();
        assert!(QuantizedBuffer::from_parts(vec![0; 8], vec![1.0], block, Codec::dynamic(false)).is_err());
        assert!(QuantizedBuffer::from_parts(vec![0; 8], vec![1.0; 2], block, Codec::dynamic(false)).is_ok());
    }
}
