//! Target layer selection for Grad-CAM.
//!
//! Backbones describe themselves through [`Structure`]; a [`LayerLocator`] walks an
//! ordered chain of strategies over that description and returns the first match.

use std::fmt;

/// Address of an observable point inside a backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerPath {
	/// Output of the n-th stage of a staged backbone.
	Stage(usize),
	/// Output of the n-th entry of a flat feature list.
	Feature(usize),
	/// Output of a named layer.
	Node(&'static str),
}

impl fmt::Display for LayerPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LayerPath::Stage(i) => write!(f, "stage[{i}]"),
			LayerPath::Feature(i) => write!(f, "features[{i}]"),
			LayerPath::Node(name) => write!(f, "node[{name}]"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
	Conv,
	Norm,
	Activation,
	Pool,
	Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerNode {
	pub path: LayerPath,
	pub kind: LayerKind,
}

impl LayerNode {
	pub fn new(path: LayerPath, kind: LayerKind) -> Self {
		Self { path, kind }
	}
}

/// Capabilities a backbone declares about its layout.
///
/// `nodes` lists every observable point in forward order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Structure {
	pub stages: Option<usize>,
	pub features: Option<usize>,
	pub nodes: Vec<LayerNode>,
}

/// Implemented by backbones that can be instrumented.
pub trait Introspect {
	fn structure(&self) -> Structure;
}

pub trait LocateStrategy: Send + Sync {
	fn name(&self) -> &'static str;
	fn locate(&self, structure: &Structure) -> Option<LayerPath>;
}

/// Final block of a staged architecture.
pub struct LastStage;

impl LocateStrategy for LastStage {
	fn name(&self) -> &'static str {
		"last-stage"
	}

	fn locate(&self, structure: &Structure) -> Option<LayerPath> {
		structure
			.stages
			.filter(|&n| n > 0)
			.map(|n| LayerPath::Stage(n - 1))
	}
}

/// Last entry of a flat feature list.
pub struct LastFeature;

impl LocateStrategy for LastFeature {
	fn name(&self) -> &'static str {
		"last-feature"
	}

	fn locate(&self, structure: &Structure) -> Option<LayerPath> {
		structure
			.features
			.filter(|&n| n > 0)
			.map(|n| LayerPath::Feature(n - 1))
	}
}

/// Last convolution (or block of convolutions) found walking the layer graph.
pub struct LastConv;

impl LocateStrategy for LastConv {
	fn name(&self) -> &'static str {
		"last-conv"
	}

	fn locate(&self, structure: &Structure) -> Option<LayerPath> {
		structure
			.nodes
			.iter()
			.rev()
			.find(|node| matches!(node.kind, LayerKind::Conv | LayerKind::Block))
			.map(|node| node.path)
	}
}

pub struct LayerLocator {
	strategies: Vec<Box<dyn LocateStrategy>>,
}

impl LayerLocator {
	pub fn new(strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
		Self { strategies }
	}

	/// Returns the selected layer together with the strategy that found it.
	pub fn locate(&self, structure: &Structure) -> Option<(LayerPath, &'static str)> {
		self.strategies.iter().find_map(|strategy| {
			strategy
				.locate(structure)
				.map(|path| (path, strategy.name()))
		})
	}
}

impl Default for LayerLocator {
	fn default() -> Self {
		Self::new(vec![Box::new(LastStage), Box::new(LastFeature), Box::new(LastConv)])
	}
}
