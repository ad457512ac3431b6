//! Vectorised integer kernels for the network forward pass.
//!
//! Three operations, each with a scalar reference implementation and
//! AVX2 / NEON fast paths selected at runtime or compile time:
//! - accumulator row add/subtract (i16 vectors)
//! - shift-and-clip of i16 accumulators into i8 activations
//! - i8 x i8 dot product with i32 accumulation
//!
//! All paths produce bit-identical results; the scalar path is the
//! specification.

/// Clipped-ReLU shift applied between layers.
pub const OUT_SHIFT: u32 = 6;

/// Add `add` rows and subtract `sub` rows of `weights` (row length `n`)
/// from the accumulator.
#[inline]
pub fn add_sub_rows(acc: &mut [i16], weights: &[i16], n: usize, add: &[u16], sub: &[u16]) {
    debug_assert_eq!(acc.len(), n);
    for &f in add {
        let row = &weights[f as usize * n..f as usize * n + n];
        add_row(acc, row);
    }
    for &f in sub {
        let row = &weights[f as usize * n..f as usize * n + n];
        sub_row(acc, row);
    }
}

#[inline]
pub fn add_row(acc: &mut [i16], row: &[i16]) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe { add_row_avx2(acc, row) };
            return;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { add_row_neon(acc, row) };
        return;
    }
    #[allow(unreachable_code)]
    add_row_scalar(acc, row);
}

#[inline]
pub fn sub_row(acc: &mut [i16], row: &[i16]) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe { sub_row_avx2(acc, row) };
            return;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        unsafe { sub_row_neon(acc, row) };
        return;
    }
    #[allow(unreachable_code)]
    sub_row_scalar(acc, row);
}

/// `out[i] = clamp(acc[i] >> OUT_SHIFT, 0, 127)` as i8.
#[inline]
pub fn scale_clip_pack(out: &mut [i8], acc: &[i16]) {
    debug_assert_eq!(out.len(), acc.len());
    for (o, &a) in out.iter_mut().zip(acc.iter()) {
        *o = ((a >> OUT_SHIFT).clamp(0, 127)) as i8;
    }
}

/// Dot product of an i8 activation vector with an i8 weight row,
/// accumulated in i32. Activations are in [0, 127].
#[inline]
#[must_use]
pub fn dot_i8(input: &[i8], row: &[i8]) -> i32 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && input.len() % 32 == 0 {
            return unsafe { dot_i8_avx2(input, row) };
        }
    }
    dot_i8_scalar(input, row)
}

// ============================================================================
// Scalar reference implementations
// ============================================================================

#[inline]
fn add_row_scalar(acc: &mut [i16], row: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(row.iter()) {
        *a = a.wrapping_add(w);
    }
}

#[inline]
fn sub_row_scalar(acc: &mut [i16], row: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(row.iter()) {
        *a = a.wrapping_sub(w);
    }
}

#[inline]
fn dot_i8_scalar(input: &[i8], row: &[i8]) -> i32 {
    let mut sum = 0i32;
    for (&x, &w) in input.iter().zip(row.iter()) {
        sum += i32::from(x) * i32::from(w);
    }
    sum
}

// ============================================================================
// AVX2 (x86_64)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn add_row_avx2(acc: &mut [i16], row: &[i16]) {
    use std::arch::x86_64::*;
    let n = acc.len() & !15;
    let ap = acc.as_mut_ptr();
    let rp = row.as_ptr();
    for i in (0..n).step_by(16) {
        let a = _mm256_loadu_si256(ap.add(i) as *const __m256i);
        let w = _mm256_loadu_si256(rp.add(i) as *const __m256i);
        _mm256_storeu_si256(ap.add(i) as *mut __m256i, _mm256_add_epi16(a, w));
    }
    for i in n..acc.len() {
        acc[i] = acc[i].wrapping_add(row[i]);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn sub_row_avx2(acc: &mut [i16], row: &[i16]) {
    use std::arch::x86_64::*;
    let n = acc.len() & !15;
    let ap = acc.as_mut_ptr();
    let rp = row.as_ptr();
    for i in (0..n).step_by(16) {
        let a = _mm256_loadu_si256(ap.add(i) as *const __m256i);
        let w = _mm256_loadu_si256(rp.add(i) as *const __m256i);
        _mm256_storeu_si256(ap.add(i) as *mut __m256i, _mm256_sub_epi16(a, w));
    }
    for i in n..acc.len() {
        acc[i] = acc[i].wrapping_sub(row[i]);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_i8_avx2(input: &[i8], row: &[i8]) -> i32 {
    use std::arch::x86_64::*;
    let xp = input.as_ptr();
    let wp = row.as_ptr();
    let ones = _mm256_set1_epi16(1);
    let mut sum = _mm256_setzero_si256();
    for i in (0..input.len()).step_by(32) {
        let x = _mm256_loadu_si256(xp.add(i) as *const __m256i);
        let w = _mm256_loadu_si256(wp.add(i) as *const __m256i);
        // Activations are non-negative, so the unsigned-signed multiply
        // is exact; pair sums stay below i16::MAX (127 * 127 * 2).
        let prod = _mm256_maddubs_epi16(x, w);
        sum = _mm256_add_epi32(sum, _mm256_madd_epi16(prod, ones));
    }
    let mut lanes = [0i32; 8];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, sum);
    lanes.iter().sum()
}

// ============================================================================
// NEON (aarch64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
unsafe fn add_row_neon(acc: &mut [i16], row: &[i16]) {
    use std::arch::aarch64::*;
    let n = acc.len() & !7;
    let ap = acc.as_mut_ptr();
    let rp = row.as_ptr();
    for i in (0..n).step_by(8) {
        let a = vld1q_s16(ap.add(i));
        let w = vld1q_s16(rp.add(i));
        vst1q_s16(ap.add(i), vaddq_s16(a, w));
    }
    for i in n..acc.len() {
        acc[i] = acc[i].wrapping_add(row[i]);
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn sub_row_neon(acc: &mut [i16], row: &[i16]) {
    use std::arch::aarch64::*;
    let n = acc.len() & !7;
    let ap = acc.as_mut_ptr();
    let rp = row.as_ptr();
    for i in (0..n).step_by(8) {
        let a = vld1q_s16(ap.add(i));
        let w = vld1q_s16(rp.add(i));
        vst1q_s16(ap.add(i), vsubq_s16(a, w));
    }
    for i in n..acc.len() {
        acc[i] = acc[i].wrapping_sub(row[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_rows_match_scalar() {
        let n = 256;
        let weights: Vec<i16> = (0..4 * n).map(|i| (i as i16).wrapping_mul(31)).collect();
        let mut acc: Vec<i16> = (0..n).map(|i| i as i16).collect();
        let mut reference = acc.clone();

        add_sub_rows(&mut acc, &weights, n, &[0, 2], &[3]);
        for f in [0usize, 2] {
            add_row_scalar(&mut reference, &weights[f * n..f * n + n]);
        }
        sub_row_scalar(&mut reference, &weights[3 * n..4 * n]);
        assert_eq!(acc, reference);
    }

    #[test]
    fn clip_packs_into_range() {
        let acc: Vec<i16> = vec![-500, -1, 0, 63, 64, 8128, i16::MAX];
        let mut out = vec![0i8; acc.len()];
        scale_clip_pack(&mut out, &acc);
        assert_eq!(out, vec![0, 0, 0, 0, 1, 127, 127]);
    }

    #[test]
    fn dot_matches_scalar() {
        let input: Vec<i8> = (0..512).map(|i| (i % 128) as i8).collect();
        let row: Vec<i8> = (0..512).map(|i| ((i * 7) % 255) as u8 as i8).collect();
        assert_eq!(dot_i8(&input, &row), dot_i8_scalar(&input, &row));
    }
}
