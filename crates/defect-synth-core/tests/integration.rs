//! Integration tests for scene compositing

use std::fs;
use std::path::{Path, PathBuf};

use defect_synth_core::{
    BackgroundSource, CompositeError, Compositor, CompositorConfig, DatasetGenerator,
    GeneratorConfig, MaskRule, OutputNaming, PatchCountPlan, PatchPool, PatchTriple, Region,
    SceneManifest, SmoothingConfig,
};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("defect-synth-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn plain_compositor() -> Compositor {
    Compositor::new(CompositorConfig {
        smoothing: None,
        ..CompositorConfig::default()
    })
}

/// Background with a distinct value at every pixel
fn gradient_background(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 77]))
}

/// Patch whose mask is a checkerboard of foreground and padding pixels
fn checker_triple(size: u32, seed: u8) -> PatchTriple {
    let image = RgbImage::from_fn(size, size, |x, y| {
        Rgb([200u8.wrapping_add(seed), (x * 7 + y) as u8, seed])
    });
    let mask = RgbImage::from_fn(size, size, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([10, 20, 29])
        }
    });
    let target = RgbImage::from_pixel(size, size, Rgb([255, seed, 0]));
    PatchTriple::new(image, mask, target).unwrap()
}

fn mixed_pool() -> PatchPool {
    PatchPool::from_triples(vec![
        checker_triple(8, 1),
        checker_triple(12, 2),
        checker_triple(5, 3),
    ])
}

fn assert_pairwise_disjoint(regions: &[Region]) {
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
        }
    }
}

#[test]
fn test_single_patch_on_black_background() {
    init_logging();
    let triple = PatchTriple::new(
        RgbImage::from_pixel(20, 20, Rgb([0, 200, 100])),
        RgbImage::from_pixel(20, 20, Rgb([255, 255, 255])),
        RgbImage::from_pixel(20, 20, Rgb([255, 255, 0])),
    )
    .unwrap();
    let pool = PatchPool::from_triples(vec![triple]);
    let mut rng = StdRng::seed_from_u64(7);

    let scene = plain_compositor()
        .composite_scene(RgbImage::new(100, 100), &pool, 1, &mut rng)
        .unwrap();

    assert_eq!(scene.placed(), 1);
    let region = scene.regions()[0];
    assert_eq!((region.width, region.height), (20, 20));
    assert!(region.fits_within(100, 100));

    for (x, y, p) in scene.image.enumerate_pixels() {
        let expected = if region.contains(x, y) { Rgb([0, 200, 100]) } else { Rgb([0, 0, 0]) };
        assert_eq!(*p, expected, "image pixel ({x}, {y})");
    }
    for (x, y, p) in scene.target_mask.enumerate_pixels() {
        let expected = if region.contains(x, y) { Rgb([255, 255, 0]) } else { Rgb([0, 0, 0]) };
        assert_eq!(*p, expected, "mask pixel ({x}, {y})");
    }
}

#[test]
fn test_placed_regions_never_overlap() {
    let pool = mixed_pool();
    let compositor = plain_compositor();

    for seed in 0..25 {
        let mut rng = StdRng::seed_from_u64(seed);
        let scene = compositor
            .composite_scene(gradient_background(120, 90), &pool, 40, &mut rng)
            .unwrap();
        assert!(scene.placed() > 0);
        assert!(scene.placed() <= 40);
        assert_pairwise_disjoint(&scene.regions());
    }
}

#[test]
fn test_masked_copy_and_target_overwrite() {
    let pool = mixed_pool();
    let rule = MaskRule::default();
    let background = gradient_background(150, 150);
    let mut rng = StdRng::seed_from_u64(11);

    let scene = plain_compositor()
        .composite_scene(background.clone(), &pool, 20, &mut rng)
        .unwrap();

    for placement in &scene.placements {
        let triple = pool.get(placement.patch).unwrap();
        let r = placement.region;
        for (px, py, mask_pixel) in triple.mask.enumerate_pixels() {
            let (x, y) = (r.x + px, r.y + py);
            if rule.is_foreground(mask_pixel) {
                assert_eq!(scene.image.get_pixel(x, y), triple.image.get_pixel(px, py));
            } else {
                assert_eq!(scene.image.get_pixel(x, y), background.get_pixel(x, y));
            }
            assert_eq!(scene.target_mask.get_pixel(x, y), triple.target.get_pixel(px, py));
        }
    }

    let regions = scene.regions();
    for (x, y, p) in scene.image.enumerate_pixels() {
        if !regions.iter().any(|r| r.contains(x, y)) {
            assert_eq!(p, background.get_pixel(x, y));
            assert_eq!(scene.target_mask.get_pixel(x, y), &Rgb([0, 0, 0]));
        }
    }
}

#[test]
fn test_same_seed_same_scene() {
    let pool = mixed_pool();
    let compositor = Compositor::default();

    let mut rng_a = StdRng::seed_from_u64(1234);
    let mut rng_b = StdRng::seed_from_u64(1234);
    let a = compositor
        .composite_scene(gradient_background(100, 80), &pool, 15, &mut rng_a)
        .unwrap();
    let b = compositor
        .composite_scene(gradient_background(100, 80), &pool, 15, &mut rng_b)
        .unwrap();

    assert_eq!(a.placements, b.placements);
    assert_eq!(a.image, b.image);
    assert_eq!(a.target_mask, b.target_mask);
}

#[test]
fn test_over_request_underfills_without_error() {
    let pool = PatchPool::from_triples(vec![checker_triple(20, 4)]);
    let mut rng = StdRng::seed_from_u64(99);

    let scene = plain_compositor()
        .composite_scene(RgbImage::new(50, 50), &pool, 100, &mut rng)
        .unwrap();

    assert_eq!(scene.requested, 100);
    // at most four 20x20 squares fit in 50x50
    assert!(scene.placed() >= 1 && scene.placed() <= 4);
    assert_pairwise_disjoint(&scene.regions());
}

#[test]
fn test_smoothing_leaves_target_mask_sharp() {
    let triple = PatchTriple::new(
        RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])),
        RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])),
        RgbImage::from_pixel(10, 10, Rgb([0, 0, 255])),
    )
    .unwrap();
    let pool = PatchPool::from_triples(vec![triple]);
    let compositor = Compositor::new(CompositorConfig {
        smoothing: Some(SmoothingConfig { kernel_size: 9 }),
        ..CompositorConfig::default()
    });
    let mut rng = StdRng::seed_from_u64(3);

    let scene = compositor
        .composite_scene(RgbImage::new(40, 40), &pool, 1, &mut rng)
        .unwrap();
    let region = scene.regions()[0];

    for (x, y, p) in scene.target_mask.enumerate_pixels() {
        let expected = if region.contains(x, y) { Rgb([0, 0, 255]) } else { Rgb([0, 0, 0]) };
        assert_eq!(*p, expected);
    }
    // blur softens the patch corner
    assert!(scene.image.get_pixel(region.x, region.y).0[0] < 255);
}

fn write_patch(dir: &Path, base: &str, size: (u32, u32), mask_size: (u32, u32), with_target: bool) {
    let (w, h) = size;
    RgbImage::from_pixel(w, h, Rgb([180, 90, 45]))
        .save(dir.join(format!("{base}.png")))
        .unwrap();
    if with_target {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
            .save(dir.join(format!("{base}_target.png")))
            .unwrap();
    }
    let (mw, mh) = mask_size;
    RgbImage::from_pixel(mw, mh, Rgb([255, 255, 255]))
        .save(dir.join(format!("{base}_target_process.png")))
        .unwrap();
}

#[test]
fn test_pool_from_dir_skips_bad_triples() {
    init_logging();
    let dir = scratch_dir("pool-skip");
    write_patch(&dir, "a_good", (6, 6), (6, 6), true);
    write_patch(&dir, "b_mismatch", (6, 6), (5, 6), true);
    write_patch(&dir, "c_no_target", (6, 6), (6, 6), false);
    fs::write(dir.join("readme.txt"), "not an image").unwrap();

    let pool = PatchPool::from_dir(&dir).unwrap();
    assert_eq!(pool.len(), 3);
    assert!(pool.name(0).unwrap().ends_with("a_good.png"));

    let mut rng = StdRng::seed_from_u64(5);
    let scene = plain_compositor()
        .composite_scene(RgbImage::new(60, 60), &pool, 5, &mut rng)
        .unwrap();
    assert!(scene.placements.iter().all(|p| p.patch == 0));
    assert!(scene.placed() > 0);

    let report = pool.check();
    assert_eq!(report.valid, 1);
    assert_eq!(report.invalid.len(), 2);
}

#[test]
fn test_pool_without_separate_mask_uses_target() {
    let dir = scratch_dir("pool-fallback");
    RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])).save(dir.join("q.png")).unwrap();
    RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))
        .save(dir.join("q_target.png"))
        .unwrap();

    let pool = PatchPool::from_dir(&dir).unwrap();
    let triple = pool.get(0).unwrap();
    assert_eq!(triple.mask, triple.target);
}

#[test]
fn test_all_invalid_pool_is_fatal() {
    let dir = scratch_dir("pool-invalid");
    write_patch(&dir, "x", (6, 6), (3, 3), true);
    write_patch(&dir, "y", (6, 6), (6, 6), false);

    let pool = PatchPool::from_dir(&dir).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let result = plain_compositor().composite_scene(RgbImage::new(40, 40), &pool, 3, &mut rng);
    assert!(matches!(result, Err(CompositeError::NoValidPatches)));
}

#[test]
fn test_empty_patch_dir_is_error() {
    let dir = scratch_dir("pool-empty");
    assert!(matches!(
        PatchPool::from_dir(&dir),
        Err(CompositeError::EmptyDirectory(_))
    ));
}

#[test]
fn test_generator_writes_reproducible_scenes() {
    init_logging();
    let root = scratch_dir("generator");
    let patches = root.join("patches");
    let backgrounds = root.join("backgrounds");
    fs::create_dir_all(&patches).unwrap();
    fs::create_dir_all(&backgrounds).unwrap();

    write_patch(&patches, "bubble", (8, 8), (8, 8), true);
    let mut rng = StdRng::seed_from_u64(0);
    for name in ["b0.bmp", "b1.png"] {
        RgbImage::from_fn(64, 48, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
            .save(backgrounds.join(name))
            .unwrap();
    }

    let make_generator = |out: &str| {
        let config = GeneratorConfig {
            runs: 3,
            start_index: 10,
            plan: PatchCountPlan::Range { min: 2, max: 5 },
            naming: OutputNaming::Indexed {
                prefix: "qipao".to_string(),
            },
            output_dir: root.join(out).join("images"),
            target_dir: root.join(out).join("targets"),
            seed: Some(42),
            write_manifest: true,
        };
        DatasetGenerator::new(
            Compositor::default(),
            PatchPool::from_dir(&patches).unwrap(),
            BackgroundSource::from_dir(&backgrounds).unwrap(),
            config,
        )
        .unwrap()
    };

    let first = make_generator("run_a");
    let summary = first.run().unwrap();
    assert_eq!(summary.scenes_written, 3);
    assert_eq!(summary.scenes_failed, 0);
    assert!(summary.patches_placed <= summary.patches_requested);

    let images = root.join("run_a").join("images");
    let targets = root.join("run_a").join("targets");
    for index in 10..13 {
        assert!(images.join(format!("qipao_{index}.png")).is_file());
        assert!(targets.join(format!("qipao_target_{index}.png")).is_file());
    }

    let manifest: SceneManifest =
        serde_json::from_str(&fs::read_to_string(images.join("qipao_11.json")).unwrap()).unwrap();
    assert_eq!(manifest.index, 11);
    assert!((2..=5).contains(&manifest.requested));
    assert!(manifest.placements.iter().all(|p| p.patch.ends_with("bubble.png")));

    // a single scene regenerated from the same seed matches the batch output
    let second = make_generator("run_b");
    let scene = second.generate_scene(11).unwrap().unwrap();
    let a = image::open(images.join("qipao_11.png")).unwrap().to_rgb8();
    let b = image::open(&scene.image_path).unwrap().to_rgb8();
    assert_eq!(a, b);
}

fn generator_config(root: &Path, runs: usize) -> GeneratorConfig {
    GeneratorConfig {
        runs,
        output_dir: root.join("out"),
        target_dir: root.join("out_target"),
        seed: Some(1),
        ..GeneratorConfig::default()
    }
}

#[test]
fn test_unreadable_fixed_background_is_fatal() {
    let root = scratch_dir("generator-bad-bg");
    write_patch(&root, "spot", (4, 4), (4, 4), true);

    let generator = DatasetGenerator::new(
        Compositor::default(),
        PatchPool::from_dir(&root).unwrap(),
        BackgroundSource::File(root.join("missing.bmp")),
        generator_config(&root, 3),
    )
    .unwrap();

    assert!(matches!(
        generator.run(),
        Err(CompositeError::NoReadableBackground(1))
    ));
}

#[test]
fn test_all_unreadable_background_candidates_is_fatal() {
    let root = scratch_dir("generator-bad-bg-dir");
    let patches = root.join("patches");
    let backgrounds = root.join("backgrounds");
    fs::create_dir_all(&patches).unwrap();
    fs::create_dir_all(&backgrounds).unwrap();
    write_patch(&patches, "spot", (4, 4), (4, 4), true);
    fs::write(backgrounds.join("a.png"), "not a png").unwrap();
    fs::write(backgrounds.join("b.bmp"), "not a bmp").unwrap();

    let generator = DatasetGenerator::new(
        Compositor::default(),
        PatchPool::from_dir(&patches).unwrap(),
        BackgroundSource::from_dir(&backgrounds).unwrap(),
        generator_config(&root, 40),
    )
    .unwrap();

    assert!(matches!(
        generator.run(),
        Err(CompositeError::NoReadableBackground(2))
    ));
}

#[test]
fn test_one_unreadable_background_candidate_is_skipped() {
    let root = scratch_dir("generator-mixed-bg");
    let patches = root.join("patches");
    let backgrounds = root.join("backgrounds");
    fs::create_dir_all(&patches).unwrap();
    fs::create_dir_all(&backgrounds).unwrap();
    write_patch(&patches, "spot", (4, 4), (4, 4), true);
    fs::write(backgrounds.join("a_broken.png"), "not a png").unwrap();
    RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]))
        .save(backgrounds.join("b_good.png"))
        .unwrap();

    let generator = DatasetGenerator::new(
        Compositor::default(),
        PatchPool::from_dir(&patches).unwrap(),
        BackgroundSource::from_dir(&backgrounds).unwrap(),
        GeneratorConfig {
            plan: PatchCountPlan::Fixed { count: 3 },
            ..generator_config(&root, 20)
        },
    )
    .unwrap();

    let summary = generator.run().unwrap();
    assert_eq!(summary.scenes_written + summary.scenes_failed, 20);
    assert!(summary.scenes_written > 0);
}

#[test]
fn test_tiered_plan_stops_run_at_last_tier() {
    let root = scratch_dir("generator-tiered");
    write_patch(&root, "spot", (4, 4), (4, 4), true);
    let background = root.join("back.png");
    RgbImage::from_pixel(200, 200, Rgb([120, 120, 120]))
        .save(&background)
        .unwrap();

    let generator = DatasetGenerator::new(
        Compositor::default(),
        PatchPool::from_dir(&root).unwrap(),
        BackgroundSource::File(background),
        GeneratorConfig {
            start_index: 998,
            plan: PatchCountPlan::Tiered,
            naming: OutputNaming::Indexed {
                prefix: "yuyan".to_string(),
            },
            ..generator_config(&root, 5)
        },
    )
    .unwrap();

    let summary = generator.run().unwrap();
    assert_eq!(summary.scenes_written, 2);
    assert_eq!(summary.scenes_failed, 0);
    assert!((70..=100).contains(&summary.patches_requested));

    let out = root.join("out");
    assert!(out.join("yuyan_998.png").is_file());
    assert!(out.join("yuyan_999.png").is_file());
    assert!(!out.join("yuyan_1000.png").exists());
}

#[test]
fn test_large_invalid_pool_is_fatal_for_single_patch() {
    let dir = scratch_dir("pool-large-invalid");
    for i in 0..150 {
        write_patch(&dir, &format!("bad_{i:03}"), (6, 6), (6, 6), false);
    }

    let pool = PatchPool::from_dir(&dir).unwrap();
    assert_eq!(pool.len(), 150);
    let compositor = Compositor::new(CompositorConfig {
        max_attempts_per_patch: 100,
        smoothing: None,
        ..CompositorConfig::default()
    });
    let mut rng = StdRng::seed_from_u64(8);

    let result = compositor.composite_scene(RgbImage::new(40, 40), &pool, 1, &mut rng);
    assert!(matches!(result, Err(CompositeError::NoValidPatches)));
}
