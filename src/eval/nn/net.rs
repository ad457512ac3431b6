//! Quantised network data and the layer forward pass.
//!
//! Topology: 20480 sparse inputs (32 king buckets x 10 piece types x 64
//! squares) -> 256 per perspective (i16) -> concatenated 512 -> 32 -> 32
//! -> 1, with shift-and-clip activations between layers and int8 weights
//! from layer 2 on. The output is scaled to centipawns.

use std::sync::Arc;

use super::simd;
use crate::types::{Piece, Square};

/// Input feature count: 32 king buckets x 10 piece types x 64 squares.
pub const IN_FEATURES: usize = 32 * 10 * 64;
/// First-layer width per perspective.
pub const N1: usize = 256;
pub const N2: usize = 32;
pub const N3: usize = 32;

/// Serialized size of the network in bytes.
pub const NET_DATA_SIZE: usize = IN_FEATURES * N1 * 2
    + N1 * 2
    + (2 * N1 * N2 + N2 * 4)
    + (N2 * N3 + N3 * 4)
    + (N3 + 4);

/// Dense int8 layer: row-major weights `[n_out][n_in]` and i32 biases.
pub struct LayerData {
    weight: Box<[i8]>,
    bias: Box<[i32]>,
    n_in: usize,
    n_out: usize,
}

impl LayerData {
    fn read(reader: &mut ByteReader<'_>, n_in: usize, n_out: usize) -> Self {
        let weight = reader.read_i8_vec(n_in * n_out);
        let bias = reader.read_i32_vec(n_out);
        LayerData {
            weight,
            bias,
            n_in,
            n_out,
        }
    }

    /// Linear part: `out[i] = bias[i] + sum_j w[i][j] * in[j]`.
    fn eval_linear(&self, input: &[i8], lin_out: &mut [i32]) {
        debug_assert_eq!(input.len(), self.n_in);
        debug_assert_eq!(lin_out.len(), self.n_out);
        for (i, out) in lin_out.iter_mut().enumerate() {
            let row = &self.weight[i * self.n_in..(i + 1) * self.n_in];
            *out = self.bias[i] + simd::dot_i8(input, row);
        }
    }

    /// Full forward step: linear, shift, clipped ReLU, narrow to i8.
    fn forward(&self, input: &[i8], lin_out: &mut [i32], out: &mut [i8]) {
        self.eval_linear(input, lin_out);
        for (o, &lin) in out.iter_mut().zip(lin_out.iter()) {
            *o = ((lin >> simd::OUT_SHIFT).clamp(0, 127)) as i8;
        }
    }
}

/// All network weights, shared read-only between workers.
pub struct NetData {
    /// First-layer weights, row-major `[IN_FEATURES][N1]`, i16.
    pub(crate) weight1: Box<[i16]>,
    pub(crate) bias1: Box<[i16]>,
    lin2: LayerData,
    lin3: LayerData,
    lin4: LayerData,
}

impl NetData {
    /// Parse a serialized network. The blob must be exactly
    /// [`NET_DATA_SIZE`] bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Arc<NetData>, NetDataError> {
        if data.len() != NET_DATA_SIZE {
            return Err(NetDataError::BadSize {
                expected: NET_DATA_SIZE,
                actual: data.len(),
            });
        }
        let mut reader = ByteReader { data, offset: 0 };
        let weight1 = reader.read_i16_vec(IN_FEATURES * N1);
        let bias1 = reader.read_i16_vec(N1);
        let lin2 = LayerData::read(&mut reader, 2 * N1, N2);
        let lin3 = LayerData::read(&mut reader, N2, N3);
        let lin4 = LayerData::read(&mut reader, N3, 1);
        debug_assert_eq!(reader.offset, data.len());
        Ok(Arc::new(NetData {
            weight1,
            bias1,
            lin2,
            lin3,
            lin4,
        }))
    }

    /// Decompress and parse the network blob embedded in the binary.
    /// Failure here is fatal: the engine cannot evaluate without weights.
    #[cfg(feature = "embedded_net")]
    #[must_use]
    pub fn from_embedded() -> Arc<NetData> {
        static BLOB: &[u8] = include_bytes!("sable.nnue.lzma");
        let mut decompressed = Vec::with_capacity(NET_DATA_SIZE);
        let mut cursor = std::io::Cursor::new(BLOB);
        lzma_rs::lzma_decompress(&mut cursor, &mut decompressed)
            .unwrap_or_else(|e| panic!("failed to decompress network data: {e}"));
        NetData::from_bytes(&decompressed)
            .unwrap_or_else(|e| panic!("embedded network data is invalid: {e}"))
    }

    /// Evaluate the back half of the network from the clipped first-layer
    /// output (side to move first). Returns centipawns from the side to
    /// move's point of view.
    #[must_use]
    pub(crate) fn eval_layers(&self, l1_clipped: &[i8; 2 * N1], scratch: &mut LayerScratch) -> i32 {
        self.lin2
            .forward(l1_clipped, &mut scratch.lin2, &mut scratch.out2);
        self.lin3
            .forward(&scratch.out2, &mut scratch.lin3, &mut scratch.out3);
        let mut lin4 = [0i32; 1];
        self.lin4.eval_linear(&scratch.out3, &mut lin4);
        lin4[0] * (100 * 2) / (127 * 64)
    }
}

/// Reusable buffers for the dense layers.
pub(crate) struct LayerScratch {
    lin2: [i32; N2],
    out2: [i8; N2],
    lin3: [i32; N3],
    out3: [i8; N3],
}

impl Default for LayerScratch {
    fn default() -> Self {
        LayerScratch {
            lin2: [0; N2],
            out2: [0; N2],
            lin3: [0; N3],
            out3: [0; N3],
        }
    }
}

#[derive(Debug)]
pub enum NetDataError {
    BadSize { expected: usize, actual: usize },
}

impl std::fmt::Display for NetDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetDataError::BadSize { expected, actual } => {
                write!(f, "network blob has {actual} bytes, expected {expected}")
            }
        }
    }
}

impl std::error::Error for NetDataError {}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl ByteReader<'_> {
    fn read_i16_vec(&mut self, n: usize) -> Box<[i16]> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let b = [self.data[self.offset], self.data[self.offset + 1]];
            out.push(i16::from_le_bytes(b));
            self.offset += 2;
        }
        out.into_boxed_slice()
    }

    fn read_i8_vec(&mut self, n: usize) -> Box<[i8]> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.data[self.offset] as i8);
            self.offset += 1;
        }
        out.into_boxed_slice()
    }

    fn read_i32_vec(&mut self, n: usize) -> Box<[i32]> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let o = self.offset;
            let b = [
                self.data[o],
                self.data[o + 1],
                self.data[o + 2],
                self.data[o + 3],
            ];
            out.push(i32::from_le_bytes(b));
            self.offset += 4;
        }
        out.into_boxed_slice()
    }
}

/// Network piece code: WQ..WP = 0..4, BQ..BP = 5..9. Kings are not
/// features; they select the bucket instead.
#[inline]
#[must_use]
pub(crate) fn nn_piece_type(piece: Piece) -> usize {
    debug_assert!(!piece.is_empty() && !piece.is_king());
    let idx = piece.index();
    if idx <= 6 {
        idx - 2
    } else {
        idx - 8 + 5
    }
}

/// Row index in the first-layer weight matrix for (own king, piece,
/// square) seen from the given perspective. The board is mirrored
/// horizontally when the king is on files e-h, and vertically (with a
/// colour swap) for the black perspective.
#[inline]
#[must_use]
pub(crate) fn feature_index(king_sq: Square, pt: usize, sq: Square, white_persp: bool) -> usize {
    let (mut k_sq, mut pt, mut sq) = (king_sq, pt, sq);
    if !white_persp {
        k_sq = k_sq.mirror_y();
        pt = if pt >= 5 { pt - 5 } else { pt + 5 };
        sq = sq.mirror_y();
    }
    let mut x = k_sq.x();
    let y = k_sq.y();
    if x >= 4 {
        x ^= 7;
        sq = sq.mirror_x();
    }
    let k_idx = y * 4 + x;
    (k_idx * 10 + pt) * 64 + sq.as_index()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_size() {
        assert_eq!(NET_DATA_SIZE, 10_503_972);
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(NetData::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn zero_net_evaluates_to_zero() {
        let data = vec![0u8; NET_DATA_SIZE];
        let net = NetData::from_bytes(&data).unwrap();
        let input = [5i8; 2 * N1];
        let mut scratch = LayerScratch::default();
        assert_eq!(net.eval_layers(&input, &mut scratch), 0);
    }

    #[test]
    fn feature_index_king_bucket_mirroring() {
        let pt = 4; // white pawn
        let sq = Square::from_xy(2, 2);
        // King on a1 and king on h1 use the same bucket, with the square
        // mirrored for the h-side king.
        let a1 = feature_index(Square::from_xy(0, 0), pt, sq, true);
        let h1 = feature_index(Square::from_xy(7, 0), pt, sq.mirror_x(), true);
        assert_eq!(a1, h1);
        // Black perspective: black king on a8 with a black pawn mirrors to
        // the white-perspective index.
        let black = feature_index(Square::from_xy(0, 7), 9, sq.mirror_y(), false);
        assert_eq!(black, a1);
    }

    #[test]
    fn feature_index_in_range() {
        for k in 0..64 {
            for pt in 0..10 {
                for s in 0..64 {
                    for persp in [true, false] {
                        let idx = feature_index(
                            Square::from_index(k),
                            pt,
                            Square::from_index(s),
                            persp,
                        );
                        assert!(idx < IN_FEATURES);
                    }
                }
            }
        }
    }

    #[test]
    fn nn_piece_codes() {
        assert_eq!(nn_piece_type(Piece::WQueen), 0);
        assert_eq!(nn_piece_type(Piece::WPawn), 4);
        assert_eq!(nn_piece_type(Piece::BQueen), 5);
        assert_eq!(nn_piece_type(Piece::BPawn), 9);
    }
}
