use image::{Rgb, RgbImage};

use leafscan::geometry::{cover_square_region, DisplayBox};
use leafscan::{AspectRatio, CropNegotiator, ImageSource, RawImage, Size};

fn striped(width: u32, height: u32) -> RawImage {
    let pixels = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    RawImage::from_pixels(pixels, ImageSource::Camera).unwrap()
}

#[test]
fn portrait_preview_square_maps_into_landscape_sensor() {
    let rect = cover_square_region(Size::new(1280, 720), Size::new(720, 1280)).unwrap();
    assert_eq!(rect.width(), rect.height());
    assert_eq!(rect.width(), 405);
    assert!(rect.fits_within(Size::new(1280, 720)));
    // Centered horizontally within the clipped preview.
    let center = rect.x() as f64 + rect.width() as f64 / 2.0;
    assert!((center - 640.0).abs() <= 1.0);
}

#[test]
fn every_gesture_sequence_yields_a_crop_inside_the_original() {
    let image = striped(1024, 768);
    let gestures: &[&[(&str, f64, f64)]] = &[
        &[("zoom", 2.5, 0.0), ("pan", 300.0, -200.0), ("move", 500.0, 500.0)],
        &[("zoom", 0.2, 0.0), ("resize", 5000.0, 5000.0)],
        &[("pan", -900.0, 0.0), ("move", -50.0, -50.0), ("zoom", 4.0, 0.0)],
        &[("resize", 0.0, 0.0), ("move", 10_000.0, 10_000.0)],
    ];
    for sequence in gestures {
        let mut negotiator =
            CropNegotiator::new(&image, Size::new(600, 600), AspectRatio::Free).unwrap();
        for &(gesture, a, b) in sequence.iter() {
            match gesture {
                "zoom" => negotiator.zoom_by(a),
                "pan" => negotiator.pan_by(a, b),
                "move" => negotiator.move_by(a, b),
                _ => negotiator.resize_to(a, b),
            }
        }
        let outcome = negotiator.confirm().unwrap();
        assert!(outcome.rect.width() >= 1 && outcome.rect.height() >= 1);
        assert!(
            outcome.rect.fits_within(image.size()),
            "{:?} escaped the image after {:?}",
            outcome.rect,
            sequence
        );
        assert_eq!(outcome.cropped.size(), outcome.rect.size());
    }
}

#[test]
fn square_aspect_stays_square() {
    let image = striped(900, 500);
    let mut negotiator =
        CropNegotiator::new(&image, Size::new(450, 250), AspectRatio::SQUARE).unwrap();
    negotiator.set_selection(DisplayBox::new(10.0, 10.0, 300.0, 120.0));
    let rect = negotiator.crop_rectangle().unwrap();
    assert!(rect.width().abs_diff(rect.height()) <= 1, "{rect:?}");
}

#[test]
fn output_edge_scales_pixels_but_not_coordinates() {
    let image = striped(1600, 1200);
    let negotiator = CropNegotiator::new(&image, Size::new(800, 600), AspectRatio::Free)
        .unwrap()
        .with_output_edge(320);
    let outcome = negotiator.confirm().unwrap();
    assert_eq!(outcome.rect.width(), 1280);
    assert_eq!(outcome.rect.height(), 960);
    assert_eq!(outcome.cropped.width(), 320);
    assert_eq!(outcome.cropped.height(), 240);
}

#[test]
fn negotiation_leaves_the_original_untouched() {
    let image = striped(640, 480);
    let before = image.to_base64();
    for round in 0..3 {
        let mut negotiator =
            CropNegotiator::new(&image, Size::new(320, 240), AspectRatio::Free).unwrap();
        negotiator.zoom_by(1.5 + round as f64);
        negotiator.confirm().unwrap();
    }
    assert_eq!(image.to_base64(), before);
    assert_eq!(image.size(), Size::new(640, 480));
}
