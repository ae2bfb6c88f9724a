//! Generator of a synthetic patch pool and background for trying the CLI
//!
//! Usage: cargo run -p defect-synth-core --example gen_fixtures

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use imageproc::filter::gaussian_blur_f32;
use rand::Rng;
use std::fs;
use std::path::Path;

fn main() {
    let root = Path::new("generated_fixtures");
    let patches_dir = root.join("patches");
    let backgrounds_dir = root.join("backgrounds");
    if root.exists() {
        fs::remove_dir_all(root).unwrap();
    }
    fs::create_dir_all(&patches_dir).unwrap();
    fs::create_dir_all(&backgrounds_dir).unwrap();

    println!("Generating fixtures in {:?}", root);

    let mut rng = rand::thread_rng();
    let mut count = 0;

    // 1. Bubbles: bright ring with a darker core
    for i in 0..8 {
        let size = rng.gen_range(24..48u32);
        let radius = (size / 2 - 2) as i32;
        let center = ((size / 2) as i32, (size / 2) as i32);

        let mut patch = RgbImage::new(size, size);
        draw_filled_circle_mut(&mut patch, center, radius, Rgb([140, 140, 150]));
        draw_hollow_circle_mut(&mut patch, center, radius, Rgb([235, 235, 240]));
        let patch = gaussian_blur_f32(&patch, 0.8);

        let mut target = RgbImage::new(size, size);
        draw_filled_circle_mut(&mut target, center, radius, Rgb([255, 255, 255]));

        save_triple(&patches_dir, &format!("qipao_{i}"), &patch, &target);
        count += 1;
    }

    // 2. Spots: small dark blobs
    for i in 0..8 {
        let size = rng.gen_range(10..20u32);
        let center = ((size / 2) as i32, (size / 2) as i32);
        let radius = rng.gen_range(3..(size / 2) as i32);

        let mut patch = RgbImage::new(size, size);
        draw_filled_circle_mut(&mut patch, center, radius, Rgb([45, 40, 40]));

        let mut target = RgbImage::new(size, size);
        draw_filled_circle_mut(&mut target, center, radius, Rgb([255, 255, 255]));

        save_triple(&patches_dir, &format!("madian_{i}"), &patch, &target);
        count += 1;
    }

    // 3. Backgrounds: noisy flat surfaces
    for (i, base) in [110u8, 150, 190].iter().enumerate() {
        let mut background = RgbImage::new(800, 600);
        for p in background.pixels_mut() {
            let noise: i16 = rng.gen_range(-12..=12);
            let v = (*base as i16 + noise).clamp(0, 255) as u8;
            *p = Rgb([v, v, v]);
        }
        background.save(backgrounds_dir.join(format!("back_{i}.bmp"))).unwrap();
        count += 1;
    }

    println!("Generated {} fixtures.", count);
}

fn save_triple(dir: &Path, base: &str, patch: &RgbImage, target: &RgbImage) {
    patch.save(dir.join(format!("{base}.png"))).unwrap();
    target.save(dir.join(format!("{base}_target.png"))).unwrap();
    // the disc is both label and mask
    target.save(dir.join(format!("{base}_target_process.png"))).unwrap();
}
