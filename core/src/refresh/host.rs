use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use uuid::Uuid;

/// The container a broadcast refresh reaches, like one record page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostScope(Arc<str>);

impl HostScope {
	pub fn new(name: impl AsRef<str>) -> Self {
		Self(name.as_ref().into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for HostScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug)]
struct Node {
	id: Uuid,
	scope: HostScope,
	attached: AtomicBool,
	parent: Option<HostNode>,
}

/// Handle to a node of the host's UI tree.
///
/// A node is live while it and all of its ancestors are attached. Only live nodes can
/// receive refresh registrations.
#[derive(Debug, Clone)]
pub struct HostNode(Arc<Node>);

impl HostNode {
	/// An attached root node for `scope`.
	#[must_use]
	pub fn root(scope: HostScope) -> Self {
		Self(Arc::new(Node {
			id: Uuid::new_v4(),
			scope,
			attached: AtomicBool::new(true),
			parent: None,
		}))
	}

	/// An attached node under this one, in the same scope.
	#[must_use]
	pub fn child(&self) -> Self {
		Self(Arc::new(Node {
			id: Uuid::new_v4(),
			scope: self.0.scope.clone(),
			attached: AtomicBool::new(true),
			parent: Some(self.clone()),
		}))
	}

	#[must_use]
	pub fn id(&self) -> Uuid {
		self.0.id
	}

	#[must_use]
	pub fn scope(&self) -> &HostScope {
		&self.0.scope
	}

	pub fn attach(&self) {
		self.0.attached.store(true, Ordering::Release);
	}

	pub fn detach(&self) {
		self.0.attached.store(false, Ordering::Release);
	}

	#[must_use]
	pub fn is_live(&self) -> bool {
		let mut node = Some(self);

		while let Some(HostNode(inner)) = node {
			if !inner.attached.load(Ordering::Acquire) {
				return false;
			}
			node = inner.parent.as_ref();
		}

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detaching_an_ancestor_kills_descendants() {
		let page = HostNode::root(HostScope::new("account:001A"));
		let list = page.child();
		let row = list.child();

		assert!(row.is_live());
		assert_eq!(row.scope(), page.scope());

		page.detach();
		assert!(!list.is_live());
		assert!(!row.is_live());

		page.attach();
		assert!(row.is_live());
	}
}
