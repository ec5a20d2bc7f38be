use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::nn::{BatchNorm, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use crate::block::LayerBlock;
use crate::locate::{Introspect, LayerKind, LayerNode, LayerPath, Structure};
use crate::norm::norm2d;
use crate::tap::Tap;

const STEM: &str = "conv1";

/// ResNet feature extractor: the stem and four residual stages, without the
/// pooling and fully connected layers of the classification network.
#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) maxpool: MaxPool2d,
	pub(crate) layer1: LayerBlock<B>,
	pub(crate) layer2: LayerBlock<B>,
	pub(crate) layer3: LayerBlock<B>,
	pub(crate) layer4: LayerBlock<B>,
}

impl<B: Backend> ResNet<B> {
	fn stages(&self) -> [&LayerBlock<B>; 4] {
		[&self.layer1, &self.layer2, &self.layer3, &self.layer4]
	}

	/// Spatial feature map `[batch, channels, h / 32, w / 32]`.
	pub fn forward_features(&self, input: Tensor<B, 4>, tap: &mut Tap<B>) -> Tensor<B, 4> {
		let x = self.conv1.forward(input);
		let x = tap.observe(LayerPath::Node(STEM), x);
		let x = norm2d(&self.bn1, x);
		let x = self.relu.forward(x);
		let x = self.maxpool.forward(x);

		self.stages()
			.into_iter()
			.enumerate()
			.fold(x, |x, (i, stage)| tap.observe(LayerPath::Stage(i), stage.forward(x)))
	}
}

impl<B: Backend> Introspect for ResNet<B> {
	fn structure(&self) -> Structure {
		let stages = self.stages().len();
		let mut nodes = vec![LayerNode::new(LayerPath::Node(STEM), LayerKind::Conv)];
		nodes.extend((0..stages).map(|i| LayerNode::new(LayerPath::Stage(i), LayerKind::Block)));

		Structure {
			stages: Some(stages),
			features: None,
			nodes,
		}
	}
}
