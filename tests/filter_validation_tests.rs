//! Landmark filter validation tests

use face_pose_tracker::{
    config::FilterConfig,
    filters::{create_filter, FilterKind, LandmarkFilter},
    mark_detection::{Landmark, LandmarkSet},
    Error,
};
use proptest::prelude::*;

const DT: f64 = 1.0 / 30.0;

fn kinds() -> [FilterKind; 4] {
    [
        FilterKind::OneEuro,
        FilterKind::LowPass,
        FilterKind::CriticallyDamped,
        FilterKind::None,
    ]
}

fn filter(kind: FilterKind) -> Box<dyn LandmarkFilter> {
    create_filter(&FilterConfig {
        kind,
        ..FilterConfig::default()
    })
    .unwrap()
}

fn constant_set(x: f32, y: f32, confidence: f32) -> LandmarkSet {
    LandmarkSet::new(
        (0..68)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let offset = i as f32;
                Landmark::new(x + offset, y - offset, confidence)
            })
            .collect(),
    )
}

#[test]
fn test_first_update_is_exact() {
    let raw = constant_set(100.0, 200.0, 0.8);
    for kind in kinds() {
        let mut f = filter(kind);
        assert_eq!(f.update(&raw, DT), raw, "{}", f.name());
    }
}

#[test]
fn test_constant_input_snaps_exactly() {
    let raw = constant_set(321.5, 87.25, 0.9);
    for kind in kinds() {
        let mut f = filter(kind);
        for _ in 0..30 {
            assert_eq!(f.update(&raw, DT), raw, "{}", f.name());
        }
    }
}

#[test]
fn test_step_converges() {
    let start = constant_set(0.0, 0.0, 1.0);
    let target = constant_set(50.0, -20.0, 1.0);
    for kind in kinds() {
        let mut f = filter(kind);
        f.update(&start, DT);
        let mut out = f.update(&target, DT);
        for _ in 0..300 {
            out = f.update(&target, DT);
        }
        for (o, t) in out.iter().zip(target.iter()) {
            assert!((o.x - t.x).abs() < 0.05, "{}: {} vs {}", f.name(), o.x, t.x);
            assert!((o.y - t.y).abs() < 0.05, "{}: {} vs {}", f.name(), o.y, t.y);
        }
    }
}

#[test]
fn test_confidence_passes_through() {
    let mut f = filter(FilterKind::OneEuro);
    f.update(&constant_set(0.0, 0.0, 1.0), DT);
    let out = f.update(&constant_set(30.0, 30.0, 0.25), DT);
    assert!(out.iter().all(|p| p.confidence == 0.25));
    assert!(out[0].x < 30.0);
}

#[test]
fn test_reset_forgets_history() {
    let mut f = filter(FilterKind::LowPass);
    f.update(&constant_set(0.0, 0.0, 1.0), DT);
    f.reset();
    let fresh = constant_set(500.0, 500.0, 1.0);
    assert_eq!(f.update(&fresh, DT), fresh);
}

#[test]
fn test_cardinality_change_reseeds() {
    let mut f = filter(FilterKind::OneEuro);
    f.update(&constant_set(0.0, 0.0, 1.0), DT);
    let small = LandmarkSet::new(vec![Landmark::new(7.0, 8.0, 1.0); 5]);
    assert_eq!(f.update(&small, DT), small);
}

#[test]
fn test_bad_dt_is_tolerated() {
    let mut f = filter(FilterKind::CriticallyDamped);
    f.update(&constant_set(0.0, 0.0, 1.0), DT);
    for dt in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let out = f.update(&constant_set(10.0, 10.0, 1.0), dt);
        assert!(out.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }
}

#[test]
fn test_invalid_parameters() {
    let cases = [
        FilterConfig {
            kind: FilterKind::OneEuro,
            min_cutoff: 0.0,
            ..FilterConfig::default()
        },
        FilterConfig {
            kind: FilterKind::OneEuro,
            beta: -1.0,
            ..FilterConfig::default()
        },
        FilterConfig {
            kind: FilterKind::LowPass,
            alpha: 0.0,
            ..FilterConfig::default()
        },
        FilterConfig {
            kind: FilterKind::CriticallyDamped,
            halflife: -0.1,
            ..FilterConfig::default()
        },
    ];
    for config in cases {
        assert!(matches!(create_filter(&config), Err(Error::FilterError(_))), "{config:?}");
    }
}

#[test]
fn test_one_euro_follows_fast_motion_better_than_slow() {
    // Higher beta means less lag on a ramp
    let ramp = |i: usize| {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f32 * 10.0;
        constant_set(x, 0.0, 1.0)
    };
    let lag = |beta: f64| {
        let mut f = create_filter(&FilterConfig {
            kind: FilterKind::OneEuro,
            beta,
            ..FilterConfig::default()
        })
        .unwrap();
        let mut out = LandmarkSet::default();
        for i in 0..60 {
            out = f.update(&ramp(i), DT);
        }
        ramp(59)[0].x - out[0].x
    };
    assert!(lag(1.0) < lag(0.0));
}

proptest! {
    #[test]
    fn prop_output_stays_within_input_range(
        values in prop::collection::vec(-1000.0f32..1000.0, 2..60),
        kind_index in 0usize..3,
    ) {
        // First-order filters never overshoot the range of what they have seen
        let kind = [FilterKind::OneEuro, FilterKind::LowPass, FilterKind::None][kind_index];
        let mut f = filter(kind);
        let lo = values.iter().copied().fold(f32::MAX, f32::min);
        let hi = values.iter().copied().fold(f32::MIN, f32::max);
        for v in values {
            let out = f.update(&LandmarkSet::new(vec![Landmark::new(v, -v, 1.0)]), DT);
            prop_assert!(out[0].x >= lo - 1e-2 && out[0].x <= hi + 1e-2);
        }
    }
}
