use serde::{Deserialize, Serialize};




/**
 * Floating point storage precision of a field.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Single,
    Double,
    /// IEEE binary128. Values are stored and exchanged as raw bytes only;
    /// there is no native arithmetic type for them.
    Quadruple,
}

impl Precision {

    /**
     * Size of one value in bytes.
     */
    pub fn size(self) -> usize {
        match self {
            Precision::Single    => 4,
            Precision::Double    => 8,
            Precision::Quadruple => 16,
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::Double
    }
}




/**
 * A native floating point type that field bytes can be read as.
 */
pub trait Element: Copy + Send + Sync + 'static {
    const PRECISION: Precision;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    fn to_f64(self) -> f64;
    fn from_f64(x: f64) -> Self;
}

impl Element for f32 {
    const PRECISION: Precision = Precision::Single;

    fn read(bytes: &[u8]) -> Self {
        let mut b = [0; 4];
        b.copy_from_slice(bytes);
        f32::from_ne_bytes(b)
    }

    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_ne_bytes())
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(x: f64) -> Self {
        x as f32
    }
}

impl Element for f64 {
    const PRECISION: Precision = Precision::Double;

    fn read(bytes: &[u8]) -> Self {
        let mut b = [0; 8];
        b.copy_from_slice(bytes);
        f64::from_ne_bytes(b)
    }

    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_ne_bytes())
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(x: f64) -> Self {
        x
    }
}




/**
 * Decode a byte slice holding consecutive values of type `T`.
 */
pub fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::PRECISION.size()).map(T::read).collect()
}




/**
 * Encode values of type `T` into a byte slice of exactly matching length.
 */
pub fn encode<T: Element>(values: &[T], bytes: &mut [u8]) {
    assert!(values.len() * T::PRECISION.size() == bytes.len(), "encoded length does not match buffer");

    for (x, b) in values.iter().zip(bytes.chunks_exact_mut(T::PRECISION.size())) {
        x.write(b)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{decode, encode, Element, Precision};

    #[test]
    fn element_sizes_match_precision() {
        assert_eq!(<f32 as Element>::PRECISION.size(), std::mem::size_of::<f32>());
        assert_eq!(<f64 as Element>::PRECISION.size(), std::mem::size_of::<f64>());
        assert_eq!(Precision::Quadruple.size(), 16);
    }

    #[test]
    fn values_survive_encoding_exactly() {
        let values = vec![0.1f32, -3.5, f32::MIN_POSITIVE];
        let mut bytes = vec![0; 12];
        encode(&values, &mut bytes);
        assert_eq!(decode::<f32>(&bytes), values);
    }
}
