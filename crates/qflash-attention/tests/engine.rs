//! End-to-end checks of the blocked engine against closed forms and the reference.

use qflash_attention::{
    compare, compute_attention, reference_attention, AttentionConfig, BlockedAttentionEngine,
    LogitScaling, Schedule, Verdict,
};
use qflash_core::{QFlashError, QuantizedTensor, Tensor};
use qflash_kernels::quantize_rows;

fn assert_close(a: &[f32], b: &[f32], tol: f32, label: &str) {
    assert_eq!(a.len(), b.len(), "{label}: length mismatch");
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!(
            (x - y).abs() <= tol,
            "{label}: mismatch at {i}: {x} vs {y} (diff {}, tol {tol})",
            (x - y).abs()
        );
    }
}

/// Smooth deterministic pattern in roughly [-1, 1].
fn authored(rows: usize, cols: usize, phase: f32) -> Tensor {
    Tensor::from_fn(rows, cols, |r, c| {
        let x = (r * cols + c) as f32;
        (0.37 * x + phase).sin() * (0.11 * x + 2.0 * phase).cos()
    })
}

fn authored_qkv(n: usize, dk: usize, dv: usize) -> (QuantizedTensor, QuantizedTensor, QuantizedTensor) {
    (
        quantize_rows(&authored(n, dk, 0.1)),
        quantize_rows(&authored(n, dk, 1.3)),
        quantize_rows(&authored(n, dv, 2.7)),
    )
}

#[test]
fn test_two_by_two_closed_form() {
    let config = AttentionConfig::new(2, 2, 2).with_blocks(2, 2);
    let out = compute_attention(
        &config,
        &[100, 0, 0, 100],
        &[0.01, 0.01],
        &[100, 0, 0, 100],
        &[0.01, 0.01],
        &[127, 0, 0, 127],
        &[0.1, 0.1],
    )
    .unwrap();

    // Q = K = I, so each row scores [1/sqrt(2), 0] against (own, other).
    let s = 1.0f32 / 2.0f32.sqrt();
    let own = s.exp() / (s.exp() + 1.0);
    let other = 1.0 / (s.exp() + 1.0);
    let v = 127.0 * 0.1;
    let expected = [own * v, other * v, other * v, own * v];

    assert_close(out.as_f32_slice(), &expected, 1e-3, "closed form");
    assert!(out.get(0, 0) > out.get(0, 1));
}

#[test]
fn test_single_block_matches_reference() {
    let (n, dk, dv) = (16, 8, 4);
    let (q, k, v) = authored_qkv(n, dk, dv);
    let engine = BlockedAttentionEngine::new(AttentionConfig::new(n, dk, dv).with_blocks(n, n)).unwrap();

    let out = engine.compute(&q, &k, &v).unwrap();
    let reference = reference_attention(&q, &k, &v, engine.logit_scale()).unwrap();
    assert_close(out.as_f32_slice(), reference.as_f32_slice(), 1e-4, "single block");
}

#[test]
fn test_block_count_invariance() {
    let (n, dk, dv) = (32, 16, 8);
    let (q, k, v) = authored_qkv(n, dk, dv);
    let base = BlockedAttentionEngine::new(AttentionConfig::new(n, dk, dv).with_blocks(n, n))
        .unwrap()
        .compute(&q, &k, &v)
        .unwrap();

    for (br, bc) in [(1, 1), (4, 8), (8, 4), (16, 32), (32, 2)] {
        let config = AttentionConfig::new(n, dk, dv).with_blocks(br, bc);
        let out = BlockedAttentionEngine::new(config).unwrap().compute(&q, &k, &v).unwrap();
        assert_close(
            out.as_f32_slice(),
            base.as_f32_slice(),
            1e-3,
            &format!("Br={br} Bc={bc}"),
        );
    }
}

#[test]
fn test_all_schedules_bitwise_equal() {
    let (n, dk, dv) = (48, 16, 12);
    let (q, k, v) = authored_qkv(n, dk, dv);
    let config = AttentionConfig::new(n, dk, dv).with_blocks(8, 16);

    let sequential = BlockedAttentionEngine::new(config).unwrap().compute(&q, &k, &v).unwrap();
    for schedule in [
        Schedule::Parallel,
        Schedule::Pipelined { depth: 1 },
        Schedule::Pipelined { depth: 3 },
    ] {
        let out = BlockedAttentionEngine::new(config.with_schedule(schedule))
            .unwrap()
            .compute(&q, &k, &v)
            .unwrap();
        assert_eq!(out, sequential, "{schedule:?}");
    }
}

#[test]
fn test_constant_values_are_reproduced() {
    // Softmax weights sum to 1, so a constant V column comes back unchanged.
    let (n, dk, dv) = (24, 8, 3);
    let q = quantize_rows(&authored(n, dk, 0.5));
    let k = quantize_rows(&authored(n, dk, 0.9));
    let v = quantize_rows(&Tensor::from_fn(n, dv, |_, c| [1.0, -1.0, 0.0][c]));

    let config = AttentionConfig::new(n, dk, dv).with_blocks(6, 4);
    let out = BlockedAttentionEngine::new(config).unwrap().compute(&q, &k, &v).unwrap();
    for r in 0..n {
        assert_close(out.row(r), &[1.0, -1.0, 0.0], 1e-4, &format!("row {r}"));
    }
}

#[test]
fn test_rmse_acceptance() {
    let (n, dk, dv) = (64, 32, 32);
    let q_f = authored(n, dk, 0.1);
    let k_f = authored(n, dk, 1.3);
    let v_f = authored(n, dv, 2.7);
    let (q, k, v) = (quantize_rows(&q_f), quantize_rows(&k_f), quantize_rows(&v_f));

    let engine = BlockedAttentionEngine::new(
        AttentionConfig::new(n, dk, dv).with_schedule(Schedule::Parallel),
    )
    .unwrap();
    let out = engine.compute(&q, &k, &v).unwrap();

    // Against the full-precision inputs, before quantization.
    let reference = reference_attention(&q_f, &k_f, &v_f, engine.logit_scale()).unwrap();
    let report = compare(&out, &reference).unwrap();
    assert!(report.rmse < 0.1, "rmse {}", report.rmse);
    assert_eq!(report.verdict(), Verdict::Pass);
}

#[test]
fn test_f32_baseline_matches_reference() {
    let (n, dk, dv) = (16, 8, 8);
    let (q, k, v) = (authored(n, dk, 0.2), authored(n, dk, 0.4), authored(n, dv, 0.6));
    let engine = BlockedAttentionEngine::new(AttentionConfig::new(n, dk, dv).with_blocks(4, 4)).unwrap();
    let out = engine.compute(&q, &k, &v).unwrap();
    let reference = reference_attention(&q, &k, &v, engine.logit_scale()).unwrap();
    assert_close(out.as_f32_slice(), reference.as_f32_slice(), 1e-4, "f32 baseline");
}

#[test]
fn test_right_shift_scaling_changes_temperature() {
    let (n, dk, dv) = (8, 16, 4);
    let (q, k, v) = authored_qkv(n, dk, dv);
    let default = BlockedAttentionEngine::new(AttentionConfig::new(n, dk, dv)).unwrap();
    // 2^-2 == 1/sqrt(16)
    let shifted = BlockedAttentionEngine::new(
        AttentionConfig::new(n, dk, dv).with_logit_scaling(LogitScaling::RightShift(2)),
    )
    .unwrap();
    assert_eq!(default.logit_scale(), shifted.logit_scale());
    assert_eq!(
        default.compute(&q, &k, &v).unwrap(),
        shifted.compute(&q, &k, &v).unwrap()
    );

    let flatter = BlockedAttentionEngine::new(
        AttentionConfig::new(n, dk, dv).with_logit_scaling(LogitScaling::RightShift(5)),
    )
    .unwrap();
    let out = flatter.compute(&q, &k, &v).unwrap();
    let reference = reference_attention(&q, &k, &v, 1.0 / 32.0).unwrap();
    assert_close(out.as_f32_slice(), reference.as_f32_slice(), 1e-4, "shift 5");
}

#[test]
fn test_rejects_bad_inputs() {
    let config = AttentionConfig::new(4, 2, 2);
    let ok = [0i8; 8];
    let scales = [1.0f32; 4];
    // Wrong element count.
    assert!(compute_attention(&config, &ok[..6], &scales, &ok, &scales, &ok, &scales).is_err());
    // Non-positive scale.
    let bad = [1.0, 0.0, 1.0, 1.0];
    assert!(compute_attention(&config, &ok, &scales, &ok, &bad, &ok, &scales).is_err());
    // Tile does not divide N.
    let config = AttentionConfig::new(4, 2, 2).with_blocks(3, 2);
    assert!(compute_attention(&config, &ok, &scales, &ok, &scales, &ok, &scales).is_err());
}

#[test]
fn test_overflowing_scores_reported_as_numeric_range() {
    // Finite inputs whose rescaled dot products exceed f32::MAX.
    let n = 8;
    let big = Tensor::from_fn(n, 4, |r, c| if (r + c) % 2 == 0 { 1e20 } else { -3e19 });
    let q = quantize_rows(&big);
    let v = quantize_rows(&authored(n, 4, 0.3));
    let config = AttentionConfig::new(n, 4, 4).with_blocks(4, 2);

    for schedule in [
        Schedule::Sequential,
        Schedule::Parallel,
        Schedule::Pipelined { depth: 1 },
        Schedule::Pipelined { depth: 4 },
    ] {
        let err = BlockedAttentionEngine::new(config.with_schedule(schedule))
            .unwrap()
            .compute(&q, &q, &v)
            .unwrap_err();
        assert!(
            matches!(err, QFlashError::NonFiniteScore { .. }),
            "{schedule:?}: {err}"
        );
    }
}
