#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Reactive bindings between components and a remote record store.
//!
//! Components mount [`ReactiveBinding`]s and get [`Subscription`]s whose envelopes
//! follow the component's attributes. A host wide [`RefreshCoordinator`] reaches every
//! subscription mounted under a scope, and the [`MutationNotifier`] makes writes show
//! up everywhere they should.

pub mod binding;
pub mod cache;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod fetcher;
pub mod notifications;
pub mod notifier;
pub mod params;
pub mod refresh;
pub mod transport;

pub use binding::{ReactiveBinding, Subscription};
pub use cache::ResultCache;
pub use config::{BindingConfig, NotifierConfig, RefreshConfig, CONFIG_FILE_NAME};
pub use context::Context;
pub use envelope::{ResultEnvelope, Row, RowSet};
pub use error::{ConfigError, RegistrationError, TransportError};
pub use fetcher::DataFetcher;
pub use notifications::{
	BufferedNotifications, Notification, NotificationChannel, NotificationKind,
	TracingNotifications,
};
pub use notifier::{CreatedRecord, MutationNotifier, RecordDraft, RefreshHandle};
pub use params::{select_attributes, AttributeMap, Attributes, ParameterSnapshot};
pub use refresh::{
	HostNode, HostScope, PendingRefresh, RefreshCoordinator, RefreshHandler, RefreshOutcome,
	RefreshRegistration, RefreshToken,
};
pub use transport::{
	QueryDescriptor, QueryTransport, RecordHandle, RecordId, RecordUpdateChannel,
	RecordWriteTransport, RelatedListSpec,
};
