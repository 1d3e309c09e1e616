//! The binary layout of a package.
//!
//! ```text
//! u32 sender | u32 code | u32 tensor_count
//! tensor_count * (u32 ndim | u32 dim * ndim | u32 element_count)
//! tensor_count * (element_count * f32)
//! ```
//!
//! Header integers are big endian, the payload is written as raw `f32`s.

use crate::{
    Rank,
    code::MessageCode,
    error::{CommsErr, Result},
    tensor::Tensor,
};

type Word = u32;
const WORD_SIZE: usize = size_of::<Word>();
const ELEM_SIZE: usize = size_of::<f32>();

/// A tagged, ordered list of tensors sent between two ranks.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    sender: Rank,
    code: MessageCode,
    tensors: Vec<Tensor>,
}

impl Package {
    /// Creates an empty `Package`.
    ///
    /// # Arguments
    /// * `code` - The tag of the package.
    pub fn new(code: MessageCode) -> Self {
        Self {
            sender: 0,
            code,
            tensors: Vec::new(),
        }
    }

    /// Appends a tensor, the receiving side gets them in the same order.
    pub fn append_tensor(&mut self, tensor: Tensor) -> &mut Self {
        self.tensors.push(tensor);
        self
    }

    /// Appends every tensor in `tensors`, keeping their order.
    pub fn append_tensors<I>(&mut self, tensors: I) -> &mut Self
    where
        I: IntoIterator<Item = Tensor>,
    {
        self.tensors.extend(tensors);
        self
    }

    /// The rank this package was received from, `0` for packages built locally.
    pub fn sender(&self) -> Rank {
        self.sender
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Splits the package into it's parts.
    pub fn into_parts(self) -> (Rank, MessageCode, Vec<Tensor>) {
        (self.sender, self.code, self.tensors)
    }

    /// The size in bytes of the header once encoded.
    pub fn header_len(&self) -> usize {
        let descriptors: usize = self
            .tensors
            .iter()
            .map(|t| (t.shape().len() + 2) * WORD_SIZE)
            .sum();

        3 * WORD_SIZE + descriptors
    }

    /// The size in bytes of every payload once encoded.
    pub fn payload_len(&self) -> usize {
        self.tensors.iter().map(|t| t.numel() * ELEM_SIZE).sum()
    }

    /// Writes the header of this package into `buf`.
    ///
    /// # Arguments
    /// * `sender` - The rank to stamp as the origin of the package.
    /// * `buf` - Where to append the header bytes.
    ///
    /// # Returns
    /// `HeaderOverflow` if the sender, a dimension or a count doesn't fit in a header word.
    pub fn write_header(&self, sender: Rank, buf: &mut Vec<u8>) -> Result<()> {
        let mut put = |value: usize| -> Result<()> {
            let word = Word::try_from(value).map_err(|_| CommsErr::HeaderOverflow { value })?;
            buf.extend_from_slice(&word.to_be_bytes());
            Ok(())
        };

        put(sender)?;
        put(u32::from(self.code) as usize)?;
        put(self.tensors.len())?;

        for tensor in &self.tensors {
            put(tensor.shape().len())?;
            for &dim in tensor.shape() {
                put(dim)?;
            }
            put(tensor.numel())?;
        }

        Ok(())
    }

    /// Iterates over the raw payload of every tensor, in order.
    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.tensors
            .iter()
            .map(|t| bytemuck::cast_slice::<f32, u8>(t.data()))
    }

    /// Encodes the whole package into a single contiguous buffer.
    pub fn encode(&self, sender: Rank) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header_len() + self.payload_len());
        self.write_header(sender, &mut buf)?;
        self.payloads().for_each(|p| buf.extend_from_slice(p));
        Ok(buf)
    }

    /// Decodes a package from `buf`.
    ///
    /// Every read is bounds checked, a header describing more data than present
    /// fails with `TruncatedPackage` instead of reading past the buffer.
    ///
    /// # Arguments
    /// * `buf` - The encoded package, without the frame length prefix.
    ///
    /// # Returns
    /// The decoded package or the reason why it couldn't be decoded.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);

        let sender = cursor.word()? as Rank;
        let code = MessageCode::from(cursor.word()?);
        let count = cursor.word()? as usize;

        // Each descriptor takes at least two words.
        cursor.ensure(count.saturating_mul(2 * WORD_SIZE))?;

        let mut shapes = Vec::with_capacity(count);
        for _ in 0..count {
            let ndim = cursor.word()? as usize;
            cursor.ensure(ndim.saturating_mul(WORD_SIZE))?;

            let shape = (0..ndim)
                .map(|_| cursor.word().map(|dim| dim as usize))
                .collect::<Result<Vec<_>>>()?;

            let elements = cursor.word()? as usize;
            if shape.iter().product::<usize>() != elements {
                return Err(CommsErr::InvalidShape { shape, elements });
            }

            shapes.push((shape, elements));
        }

        let mut tensors = Vec::with_capacity(count);
        for (shape, elements) in shapes {
            let bytes = cursor.take(elements.saturating_mul(ELEM_SIZE))?;
            let data: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
            tensors.push(Tensor::new(shape, data)?);
        }

        if cursor.remaining() > 0 {
            return Err(CommsErr::TrailingBytes {
                left: cursor.remaining(),
            });
        }

        Ok(Self {
            sender,
            code,
            tensors,
        })
    }
}

/// Bounds checked reads over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();

        if needed > available {
            return Err(CommsErr::TruncatedPackage { needed, available });
        }

        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn word(&mut self) -> Result<Word> {
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(self.take(WORD_SIZE)?);
        Ok(Word::from_be_bytes(word))
    }
}
