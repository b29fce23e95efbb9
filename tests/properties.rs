//! Property-Based Tests
//!
//! Sanitizer, font-fit and page-size invariants over generated inputs.

use certforge_core::print::{Orientation, PageDescriptor, SCREEN_DPI};
use certforge_core::{fit_exact, fit_heuristic, sanitize, FitPolicy, HeuristicProfile, MetricTypeface, TextMeasure};
use proptest::prelude::*;

// ============================================================================
// Sanitizer Properties
// ============================================================================

/// Property: sanitizing twice changes nothing
#[test]
fn proptest_sanitize_idempotent() {
    proptest!(|(raw in "\\PC{0,300}")| {
        let once = sanitize(&raw);
        prop_assert_eq!(sanitize(&once), once);
    });
}

/// Property: markup payloads are stripped wherever they are embedded
#[test]
fn proptest_sanitize_strips_payloads() {
    let payloads = [
        "<script>alert(1)</script>",
        "<SCRIPT src=x></SCRIPT>",
        "<iframe src=evil></iframe>",
        "javascript:alert(1)",
        "VBScript:run",
        "data:text/html,hi",
        "onClick=steal()",
        "onmouseover = x",
    ];

    proptest!(|(prefix in "[a-zA-Z ]{0,20}", suffix in "[a-zA-Z ]{0,20}", idx in 0usize..8)| {
        let raw = format!("{}{}{}", prefix, payloads[idx], suffix);
        let clean = sanitize(&raw).to_lowercase();

        prop_assert!(!clean.contains("<script"), "script tag in {:?}", clean);
        prop_assert!(!clean.contains("</script"), "script tag in {:?}", clean);
        prop_assert!(!clean.contains("<iframe"), "iframe tag in {:?}", clean);
        prop_assert!(!clean.contains("javascript:"), "scheme in {:?}", clean);
        prop_assert!(!clean.contains("vbscript:"), "scheme in {:?}", clean);
        prop_assert!(!clean.contains("data:text/html"), "scheme in {:?}", clean);
        if payloads[idx].starts_with("on") {
            prop_assert!(!clean.contains('='), "handler in {:?}", clean);
        }
    });
}

/// Property: output never exceeds the length cap
#[test]
fn proptest_sanitize_length_cap() {
    proptest!(|(raw in "[a-zA-Z ]{0,400}")| {
        prop_assert!(sanitize(&raw).chars().count() <= 150);
    });
}

// ============================================================================
// Font-Fit Properties
// ============================================================================

/// Property: both strategies stay inside [min, max]
#[test]
fn proptest_fit_within_bounds() {
    let face = MetricTypeface::sans();
    let policy = FitPolicy::default();

    proptest!(|(text in "[A-Za-z ]{1,100}", width in 10.0f32..2000.0)| {
        let exact = fit_exact(&text, width, &policy, &face);
        prop_assert!(exact >= policy.min_size && exact <= policy.max_size);

        for profile in [HeuristicProfile::COMPACT, HeuristicProfile::GENEROUS] {
            let approx = fit_heuristic(&text, width, &policy, &profile);
            prop_assert!(approx >= policy.min_size && approx <= policy.max_size);
        }
    });
}

/// Property: the exact size is the largest fitting integer size, or min
#[test]
fn proptest_exact_is_maximal() {
    let face = MetricTypeface::sans();
    let policy = FitPolicy::default();

    proptest!(|(text in "[A-Za-z ]{1,100}", width in 10.0f32..2000.0)| {
        let size = fit_exact(&text, width, &policy, &face);
        let usable = policy.usable_width(width);
        let fits = |k: i32| face.measure(&text, k as f32) <= usable;

        if fits(size as i32) {
            for k in (size as i32 + 1)..=(policy.max_size as i32) {
                prop_assert!(!fits(k), "size {} also fits but {} was chosen", k, size);
            }
        } else {
            prop_assert_eq!(size, policy.min_size);
            for k in (policy.min_size as i32)..=(policy.max_size as i32) {
                prop_assert!(!fits(k));
            }
        }
    });
}

// ============================================================================
// Page-Size Properties
// ============================================================================

/// Property: page keeps the raster's aspect ratio and orientation follows it
#[test]
fn proptest_page_ratio_and_orientation() {
    proptest!(|(width in 1u32..5000, height in 1u32..5000)| {
        let page = PageDescriptor::from_pixels(width, height, SCREEN_DPI);
        let page_ratio = page.width_mm / page.height_mm;
        let pixel_ratio = width as f64 / height as f64;
        prop_assert!((page_ratio - pixel_ratio).abs() <= 1e-9 * pixel_ratio.max(1.0));

        let expected = if page.width_mm > page.height_mm {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        };
        prop_assert_eq!(page.orientation, expected);
        prop_assert_eq!(page.orientation == Orientation::Landscape, width > height);
    });
}
