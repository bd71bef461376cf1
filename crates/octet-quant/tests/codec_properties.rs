//! Statistical and round-trip properties of the blockwise codecs.

use approx::assert_abs_diff_eq;
use octet_core::{BlockSize, ExecutionContext};
use octet_quant::{
    dequantize_blockwise, dequantize_buffer, dequantize_dynamic, estimate_quantiles,
    quantize_blockwise, quantize_dynamic, quantize_dynamic_into, BlockCodec, Codebook,
    DynamicCodec, QuantizedViewMut, RandomStream, Rounding, DEFAULT_QUANTILE_OFFSET,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn seeded(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0) * 4.0).collect()
}

#[test]
fn dynamic_scenario_block_of_four() {
    let x = [0.0f32, 1.0, -1.0, 0.5];
    let block = BlockSize::new(4).unwrap();
    let q = quantize_dynamic(&x, block, true, Rounding::Nearest).unwrap();
    assert_eq!(q.absmax, vec![1.0]);

    let y: Vec<f32> = dequantize_dynamic(&q.codes, &q.absmax, block, true).unwrap();
    assert_eq!(y[0], 0.0);
    assert_eq!(y[1], 1.0);
    assert_eq!(y[2], -1.0);
    // top decade spacing is 0.9 / 64
    assert_abs_diff_eq!(y[3], 0.5, epsilon = 0.9 / 128.0);
}

#[test]
fn static_roundtrip_within_local_resolution() {
    let cb = Codebook::dynamic(true);
    let x = seeded(10_000, 1);
    let block = BlockSize::B4096;
    let q = quantize_blockwise(&x, &cb, block, Rounding::Nearest).unwrap();
    let y: Vec<f32> = dequantize_blockwise(&q.codes, &cb, &q.absmax, block).unwrap();

    for (i, (&a, &b)) in x.iter().zip(&y).enumerate() {
        let amax = q.absmax[i / block.get()];
        let local = cb.resolution_at(a / amax).max(cb.resolution_at(b / amax));
        assert!(
            (a - b).abs() <= local * amax + 1e-6,
            "element {i}: {a} vs {b}"
        );
    }
}

#[test]
fn requantizing_dequantized_output_is_idempotent() {
    let x = seeded(5000, 2);
    let q = quantize_dynamic(&x, BlockSize::B2048, true, Rounding::Nearest).unwrap();
    let y: Vec<f32> = dequantize_buffer(&q).unwrap();
    let q2 = quantize_dynamic(&y, BlockSize::B2048, true, Rounding::Nearest).unwrap();
    assert_eq!(q.absmax, q2.absmax);
    assert_eq!(q.codes, q2.codes);
}

#[test]
fn zero_blocks_decode_to_zero_for_every_codec() {
    let mut x = vec![0.0f32; 12];
    x[9] = -0.75;
    let block = BlockSize::new(4).unwrap();

    let dynamic = quantize_dynamic(&x, block, true, Rounding::Nearest).unwrap();
    let stat = quantize_blockwise(&x, &Codebook::linear(true), block, Rounding::Nearest).unwrap();
    for q in [dynamic, stat] {
        assert_eq!(q.absmax[0], 0.0);
        assert_eq!(q.absmax[1], 0.0);
        assert!(q.codes[..8].iter().all(|&c| c == 0));
        let y: Vec<f32> = dequantize_buffer(&q).unwrap();
        assert!(y[..8].iter().all(|v| v.to_bits() == 0));
    }
}

#[test]
fn stochastic_rounding_is_unbiased() {
    let cb = Codebook::linear(true);
    // between two linear entries, closer to the lower one
    let lo = cb.get(150);
    let hi = cb.get(151);
    let v = lo + 0.3 * (hi - lo);
    let x = vec![v; 1024];
    let mut x_with_max = x.clone();
    x_with_max.push(1.0);
    let block = BlockSize::new(2048).unwrap();

    let stream = RandomStream::new(17);
    let mut total = 0.0f64;
    let mut count = 0usize;
    for offset in (0..64).map(|k| k * 97) {
        let r = Rounding::Stochastic {
            stream: &stream,
            offset,
        };
        let q = quantize_blockwise(&x_with_max, &cb, block, r).unwrap();
        let y: Vec<f32> = dequantize_buffer(&q).unwrap();
        total += y[..1024].iter().map(|&v| f64::from(v)).sum::<f64>();
        count += 1024;
    }
    let mean = (total / count as f64) as f32;
    assert!((mean - v).abs() < 0.05 * (hi - lo), "mean {mean} vs {v}");

    let q = quantize_blockwise(&x_with_max, &cb, block, Rounding::Nearest).unwrap();
    let y: Vec<f32> = dequantize_buffer(&q).unwrap();
    assert!(y[..1024].iter().all(|&e| e == lo));
}

#[test]
fn dynamic_stochastic_is_unbiased() {
    let codec = DynamicCodec::new(false);
    let stream = RandomStream::new(5);
    let v = 0.0123f32;
    let mut sum = 0.0f64;
    for i in 0..stream.len() {
        let code = codec.encode(v, Some(stream.get(i)));
        sum += f64::from(codec.decode(code));
    }
    let mean = sum / stream.len() as f64;
    assert!((mean - f64::from(v)).abs() < 1e-4);
}

#[test]
fn quantize_into_caller_storage() {
    let ctx = ExecutionContext::with_threads(2).unwrap();
    let x = seeded(3000, 9);
    let block = BlockSize::B2048;
    let mut codes = vec![0u8; x.len()];
    let mut absmax = vec![0.0f32; 2];
    let view = QuantizedViewMut::new(&mut codes, &mut absmax, block).unwrap();
    quantize_dynamic_into(&ctx, &x, true, view, Rounding::Nearest).unwrap();

    let reference = quantize_dynamic(&x, block, true, Rounding::Nearest).unwrap();
    assert_eq!(codes, reference.codes);
    assert_eq!(absmax, reference.absmax);
}

#[test]
fn quantile_codebook_fits_its_data() {
    let x = seeded(50_000, 4);
    let cb = estimate_quantiles(&x, DEFAULT_QUANTILE_OFFSET, true).unwrap();
    let q = quantize_blockwise(&x, &cb, BlockSize::B4096, Rounding::Nearest).unwrap();

    // roughly equal occupancy of codes
    let mut hist = [0usize; 256];
    for &c in &q.codes {
        hist[c as usize] += 1;
    }
    let used = hist.iter().filter(|&&h| h > 0).count();
    assert!(used > 200, "only {used} codes used");
}
