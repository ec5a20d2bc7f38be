//! Heatmap rendering and transport encoding of explanation images.
//!
//! Rendering is deterministic: triangle (bilinear) resampling, a fixed jet colormap and
//! the JPEG encoder give byte-identical output for identical inputs.

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageResult, Rgb, RgbImage};
use crate::gradcam::SaliencyMap;

pub const DEFAULT_BLEND: f32 = 0.4;
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Jet colormap (blue -> cyan -> yellow -> red) for a level in `0..=255`.
pub fn jet(level: u8) -> Rgb<u8> {
	let x = level as f32 / 255.0;
	let channel = |center: f32| {
		let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
		(v * 255.0).round() as u8
	};

	Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
	blend: f32,
}

impl OverlayRenderer {
	/// `blend` is the heatmap weight, clamped to `[0, 1]`.
	pub fn new(blend: f32) -> Self {
		Self { blend: blend.clamp(0.0, 1.0) }
	}

	pub fn blend(&self) -> f32 {
		self.blend
	}

	/// Color heatmap of `map` at `width x height`.
	pub fn heatmap(&self, map: &SaliencyMap, width: u32, height: u32) -> RgbImage {
		let resized = imageops::resize(map.as_image(), width, height, FilterType::Triangle);

		RgbImage::from_fn(width, height, |x, y| {
			let value = resized.get_pixel(x, y).0[0].clamp(0.0, 1.0);
			jet((255.0 * value) as u8)
		})
	}

	/// `heatmap * blend + original * (1 - blend)` at the original's resolution.
	pub fn render(&self, original: &RgbImage, map: &SaliencyMap) -> RgbImage {
		let (width, height) = original.dimensions();
		let heatmap = self.heatmap(map, width, height);

		let mut composed = original.clone();
		for (out, heat) in composed.pixels_mut().zip(heatmap.pixels()) {
			for (o, h) in out.0.iter_mut().zip(heat.0) {
				let mixed = h as f32 * self.blend + *o as f32 * (1.0 - self.blend);
				*o = mixed.round().clamp(0.0, 255.0) as u8;
			}
		}
		composed
	}
}

impl Default for OverlayRenderer {
	fn default() -> Self {
		Self::new(DEFAULT_BLEND)
	}
}

/// JPEG-encodes `image` as a `data:image/jpeg;base64,...` URI.
pub fn encode_data_uri(image: &RgbImage, quality: u8) -> ImageResult<String> {
	let mut bytes = Vec::new();
	JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(image)?;

	Ok(format!("data:image/jpeg;base64,{}", general_purpose::STANDARD.encode(bytes)))
}
