//! Image -> tensor transform matching the ImageNet preprocessing the network was trained with.

use burn::prelude::{Backend, Device, TensorData};
use burn::tensor::{Element, Tensor};
use image::imageops::FilterType;
use image::RgbImage;

pub const SIDE: u32 = 224;

pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-channel mean/std normalization of `[B, 3, H, W]` tensors in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Normalizer<B: Backend> {
	pub mean: Tensor<B, 4>,
	pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
	pub fn new(device: &Device<B>) -> Self {
		let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
		let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
		Self { mean, std }
	}

	pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		(input - self.mean.clone()) / self.std.clone()
	}

	/// Resize to `SIDE x SIDE` (bilinear), scale to `[0, 1]`, normalize. Returns `[1, 3, SIDE, SIDE]`.
	pub fn transform(&self, image: &RgbImage) -> Tensor<B, 4> {
		let resized = image::imageops::resize(image, SIDE, SIDE, FilterType::Triangle);
		let side = SIDE as usize;
		let device = self.mean.device();
		let tensor = to_tensor::<B, u8>(resized.into_raw(), [side, side, 3], &device).unsqueeze::<4>();

		self.normalize(tensor)
	}
}

/// `[H, W, C]` bytes -> `[C, H, W]` floats in `[0, 1]`.
pub fn to_tensor<B: Backend, T: Element>(data: Vec<T>, shape: [usize; 3], device: &Device<B>) -> Tensor<B, 3> {
	Tensor::<B, 3>::from_data(TensorData::new(data, shape).convert::<B::FloatElem>(), device).permute([2, 0, 1]) / 255
}

#[cfg(test)]
mod tests {
	use super::*;
	use burn::backend::NdArray;
	use image::Rgb;

	type TestBackend = NdArray;

	#[test]
	fn test_transform_shape_for_any_aspect_ratio() {
		let normalizer = Normalizer::<TestBackend>::new(&Default::default());

		for (w, h) in [(224, 224), (640, 120), (31, 900)] {
			let image = RgbImage::from_pixel(w, h, Rgb([10, 200, 30]));
			assert_eq!(normalizer.transform(&image).dims(), [1, 3, 224, 224]);
		}
	}

	#[test]
	fn test_transform_normalizes_channels() {
		let normalizer = Normalizer::<TestBackend>::new(&Default::default());
		let image = RgbImage::from_pixel(50, 50, Rgb([255, 0, 128]));

		let tensor = normalizer.transform(&image);
		let pixel: Vec<f32> = tensor
			.slice([0..1, 0..3, 0..1, 0..1])
			.into_data()
			.iter::<f32>()
			.collect();

		let expected = [
			(1.0 - MEAN[0]) / STD[0],
			(0.0 - MEAN[1]) / STD[1],
			(128.0 / 255.0 - MEAN[2]) / STD[2],
		];
		for (value, expected) in pixel.iter().zip(expected) {
			assert!((value - expected).abs() < 1e-4, "{value} != {expected}");
		}
	}
}
