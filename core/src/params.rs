use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

pub type AttributeMap = BTreeMap<String, Value>;

/// Variables of a query, as used for one fetch.
///
/// Compared structurally: two snapshots built from different attribute states are
/// equal when every variable holds an equal value, which is what decides whether a
/// binding has to fetch again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSnapshot(BTreeMap<String, Value>);

impl ParameterSnapshot {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(name.into(), value.into());
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// String value of a variable, `None` when missing or not a string.
	#[must_use]
	pub fn get_str(&self, name: &str) -> Option<&str> {
		self.0.get(name).and_then(Value::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParameterSnapshot {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(
			iter.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		)
	}
}

/// Computes the variables of a query from the attributes of its component.
pub type VariablesFn = dyn Fn(&AttributeMap) -> ParameterSnapshot + Send + Sync;

/// Variables made of the named attributes, copied as is. Missing attributes become
/// `null` so the query still sees every declared variable.
pub fn select_attributes(
	names: &[&str],
) -> impl Fn(&AttributeMap) -> ParameterSnapshot + Send + Sync + 'static {
	let names = names.iter().map(ToString::to_string).collect::<Vec<_>>();

	move |attributes| {
		names
			.iter()
			.map(|name| {
				(
					name.clone(),
					attributes.get(name).cloned().unwrap_or(Value::Null),
				)
			})
			.collect()
	}
}

/// Observable source attributes of a component, like `recordId` on a record page.
///
/// Watchers are only woken when a value actually changes; writing a value equal to
/// the current one is silent.
#[derive(Debug)]
pub struct Attributes {
	tx: watch::Sender<AttributeMap>,
}

impl Attributes {
	pub fn new<K: Into<String>, V: Into<Value>>(initial: impl IntoIterator<Item = (K, V)>) -> Self {
		let (tx, _) = watch::channel(
			initial
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		);

		Self { tx }
	}

	/// Returns whether the stored value changed.
	pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> bool {
		let name = name.into();
		let value = value.into();

		self.tx.send_if_modified(|attributes| {
			if attributes.get(&name) == Some(&value) {
				false
			} else {
				attributes.insert(name, value);
				true
			}
		})
	}

	pub fn remove(&self, name: &str) -> bool {
		self.tx
			.send_if_modified(|attributes| attributes.remove(name).is_some())
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<Value> {
		self.tx.borrow().get(name).cloned()
	}

	#[must_use]
	pub fn snapshot(&self) -> AttributeMap {
		self.tx.borrow().clone()
	}

	/// A receiver whose current value is already marked as seen, so it only wakes on
	/// the next change.
	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<AttributeMap> {
		self.tx.subscribe()
	}
}

impl Default for Attributes {
	fn default() -> Self {
		Self::new(std::iter::empty::<(String, Value)>())
	}
}
